//! Scan lifecycle orchestration.
//!
//! [`ScanOrchestrator`] owns the `pending → running → completed | error |
//! cancelled` lifecycle of scan records. Starting a scan persists it as
//! running and hands its id to a background dispatcher, so callers never wait
//! for the crawl. Every write after that is conditional on the record still
//! being active, which is how cancellation reaches a running scan.

use crate::collect::FindingsBuilder;
use crate::error::{Result, ScanError};
use crate::inspector::{InspectorSettings, PageInspector};
use crate::joblog::{JobLogRegistry, JobLogger};
use crate::notifier::{ChangeNotification, Notifier};
use crate::progress::ProgressTracker;
use crate::stats::{self, count};
use crate::{diff, discovery};
use chrono::Utc;
use crumb_browser::{BrowserLauncher, BrowserSession};
use crumb_classify::Classifier;
use crumb_core::model::{
    CookieChangeRequest, Findings, LogEntry, LogLevel, Scan, ScanConfig, ScanProgress, ScanStats,
    ScanStatus,
};
use crumb_core::{AppConfig, DomainName, ScanId};
use crumb_db::cookies;
use crumb_db::{scans, Database, DatabaseError};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Reason recorded on scans cancelled for exceeding the staleness threshold.
pub const STALE_REASON: &str = "timeout";

/// Reason recorded on scans cancelled through [`ScanOrchestrator::cancel_scan`].
pub const USER_CANCEL_REASON: &str = "Cancelled by user";

/// Error recorded on scans whose execution task panicked.
pub const PANIC_REASON: &str = "scan execution panicked";

/// Tunables for scan execution.
#[derive(Debug, Clone)]
pub struct ScanSettings {
    /// URLs inspected concurrently
    pub chunk_size: usize,
    /// Age after which an active scan is presumed abandoned
    pub stale_after: chrono::Duration,
    /// Minimum gap between throttled progress writes
    pub progress_flush_interval: Duration,
    /// Whether significant changes are sent to the notifier
    pub notifications_enabled: bool,
    /// How long job log buffers outlive their scan
    pub job_log_retention: Duration,
    pub inspector: InspectorSettings,
}

impl ScanSettings {
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            chunk_size: config.scanning.chunk_size.max(1),
            stale_after: chrono::Duration::minutes(config.scanning.stale_after_minutes),
            progress_flush_interval: Duration::from_millis(
                config.scanning.progress_flush_interval_ms,
            ),
            notifications_enabled: config.notifications.enabled,
            job_log_retention: Duration::from_secs(config.scanning.job_log_retention_secs),
            inspector: InspectorSettings::from_config(config),
        }
    }
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Findings and stats of a completed scan.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResults {
    pub scan_id: ScanId,
    pub domain_id: String,
    pub domain: String,
    pub findings: Findings,
    pub stats: ScanStats,
}

/// Per-type counts of applied baseline changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplySummary {
    pub added: u32,
    pub updated: u32,
    pub deleted: u32,
    /// Updates or deletes naming a cookie that does not exist for the domain
    pub skipped: u32,
}

/// How a scan execution ended, when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed,
    /// The record became terminal underneath the execution
    Stopped,
}

struct Core {
    db: Database,
    launcher: Arc<dyn BrowserLauncher>,
    classifier: Classifier,
    notifier: Arc<dyn Notifier>,
    settings: ScanSettings,
    logs: JobLogRegistry,
}

/// Entry point for starting, observing and cancelling scans.
///
/// Cheap to clone; clones share the same background dispatcher. The
/// dispatcher stops once every clone is dropped.
#[derive(Clone)]
pub struct ScanOrchestrator {
    core: Arc<Core>,
    dispatch: mpsc::UnboundedSender<ScanId>,
}

impl std::fmt::Debug for ScanOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanOrchestrator")
            .field("settings", &self.core.settings)
            .finish_non_exhaustive()
    }
}

impl ScanOrchestrator {
    /// Create an orchestrator and spawn its dispatcher.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        db: Database,
        launcher: Arc<dyn BrowserLauncher>,
        classifier: Classifier,
        notifier: Arc<dyn Notifier>,
        settings: ScanSettings,
    ) -> Self {
        let core = Arc::new(Core {
            db,
            launcher,
            classifier,
            notifier,
            logs: JobLogRegistry::new(settings.job_log_retention),
            settings,
        });
        let (dispatch, rx) = mpsc::unbounded_channel();
        spawn_dispatcher(core.clone(), rx);
        Self { core, dispatch }
    }

    /// Start a scan of `domain`.
    ///
    /// An active scan for the same domain rejects the request unless it is
    /// older than the staleness threshold, in which case it is cancelled
    /// first. The returned record is already `running`; the crawl itself
    /// happens in the background.
    pub async fn start_scan(&self, domain_id: &str, domain: &str, config: ScanConfig) -> Result<Scan> {
        let domain = DomainName::new(domain).map_err(|e| ScanError::InvalidInput(e.to_string()))?;
        let config = config.clamped();
        let pool = self.core.db.pool();
        let now = Utc::now();

        if let Some(active) = scans::find_active_for_domain(pool, domain_id).await? {
            if active.age(now) <= self.core.settings.stale_after {
                return Err(ScanError::AlreadyInProgress {
                    domain_id: domain_id.to_string(),
                });
            }
            warn!(
                scan_id = %active.id,
                domain_id,
                age_minutes = active.age(now).num_minutes(),
                "Cancelling stale scan"
            );
            let mut progress = active.progress.clone();
            progress.finish(ScanStatus::Cancelled, now);
            scans::terminate(
                pool,
                active.id.as_str(),
                ScanStatus::Cancelled,
                &progress,
                STALE_REASON,
                now,
            )
            .await?;
        }

        let mut scan = scans::create(pool, domain_id, domain.as_str(), &config, now)
            .await
            .map_err(|e| match e {
                DatabaseError::Conflict(_) => ScanError::AlreadyInProgress {
                    domain_id: domain_id.to_string(),
                },
                other => other.into(),
            })?;

        let progress = ScanProgress::started(config.max_urls, scan.created_at);
        if !scans::mark_running(pool, scan.id.as_str(), &progress, now).await? {
            return Err(ScanError::InvalidState(format!(
                "scan {} was finished before it started",
                scan.id
            )));
        }
        scan.status = ScanStatus::Running;
        scan.progress = progress;

        if self.dispatch.send(scan.id.clone()).is_err() {
            let message = "scan executor is not running";
            let mut progress = scan.progress.clone();
            progress.finish(ScanStatus::Error, Utc::now());
            scans::terminate(pool, scan.id.as_str(), ScanStatus::Error, &progress, message, Utc::now())
                .await?;
            return Err(ScanError::Execution(message.to_string()));
        }

        info!(
            scan_id = %scan.id,
            domain = %domain,
            max_urls = config.max_urls,
            depth = config.depth,
            "Scan started"
        );
        Ok(scan)
    }

    /// Cancel an active scan.
    ///
    /// In-flight page inspections finish on their own; their results are
    /// discarded because every later write checks the record is active.
    pub async fn cancel_scan(&self, scan_id: &str) -> Result<Scan> {
        let scan = self.get_scan_status(scan_id).await?;
        if scan.status.is_terminal() {
            return Err(ScanError::InvalidState(format!(
                "scan {scan_id} is already {}",
                scan.status
            )));
        }

        let now = Utc::now();
        let mut progress = scan.progress.clone();
        progress.finish(ScanStatus::Cancelled, now);
        let cancelled = scans::terminate(
            self.core.db.pool(),
            scan_id,
            ScanStatus::Cancelled,
            &progress,
            USER_CANCEL_REASON,
            now,
        )
        .await?;
        if !cancelled {
            return Err(ScanError::InvalidState(format!(
                "scan {scan_id} finished before it could be cancelled"
            )));
        }

        info!(scan_id, "Scan cancelled");
        self.get_scan_status(scan_id).await
    }

    /// Current record of a scan.
    pub async fn get_scan_status(&self, scan_id: &str) -> Result<Scan> {
        scans::get(self.core.db.pool(), scan_id)
            .await?
            .ok_or_else(|| ScanError::NotFound(scan_id.to_string()))
    }

    /// Findings and stats of a completed scan.
    pub async fn get_scan_results(&self, scan_id: &str) -> Result<ScanResults> {
        let scan = self.get_scan_status(scan_id).await?;
        if scan.status != ScanStatus::Completed {
            return Err(ScanError::ResultsNotReady {
                scan_id: scan_id.to_string(),
                status: scan.status,
            });
        }
        match (scan.findings, scan.stats) {
            (Some(findings), Some(stats)) => Ok(ScanResults {
                scan_id: scan.id,
                domain_id: scan.domain_id,
                domain: scan.domain,
                findings,
                stats,
            }),
            _ => Err(ScanError::InvalidState(format!(
                "completed scan {scan_id} has no stored findings"
            ))),
        }
    }

    /// Most recent scans of a domain, newest first.
    pub async fn list_scans(&self, domain_id: &str, limit: u32) -> Result<Vec<Scan>> {
        Ok(scans::list_for_domain(self.core.db.pool(), domain_id, limit).await?)
    }

    /// Buffered log entries of a running or recently finished scan.
    #[must_use]
    pub fn scan_logs(&self, scan_id: &str) -> Vec<LogEntry> {
        self.core.logs.entries(scan_id)
    }

    /// Poll until the scan reaches a terminal status.
    pub async fn wait_for_scan(&self, scan_id: &str, poll: Duration) -> Result<Scan> {
        loop {
            let scan = self.get_scan_status(scan_id).await?;
            if scan.status.is_terminal() {
                return Ok(scan);
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Materialize reviewed changes into the domain's cookie baseline.
    ///
    /// Adds upsert by name; updates and deletes address cookies by id and are
    /// skipped when the id does not belong to the scan's domain.
    pub async fn apply_changes(
        &self,
        scan_id: &str,
        changes: &[CookieChangeRequest],
    ) -> Result<ApplySummary> {
        let scan = self.get_scan_status(scan_id).await?;
        if scan.status != ScanStatus::Completed {
            return Err(ScanError::InvalidState(format!(
                "changes can only be applied to completed scans, scan {scan_id} is {}",
                scan.status
            )));
        }

        let pool = self.core.db.pool();
        let mut summary = ApplySummary::default();

        for change in changes {
            let now = Utc::now();
            match change {
                CookieChangeRequest::Add { cookie } => {
                    let (_, outcome) = cookies::upsert(pool, &scan.domain_id, cookie, "scan", now).await?;
                    debug!(scan_id, cookie = %cookie.name, ?outcome, "Applied cookie add");
                    summary.added += 1;
                }
                CookieChangeRequest::Update { cookie_id, cookie } => {
                    let applied = self.owns_cookie(&scan.domain_id, cookie_id).await?
                        && match cookies::update_by_id(pool, cookie_id, cookie, now).await {
                            Ok(applied) => applied,
                            Err(DatabaseError::Conflict(reason)) => {
                                warn!(scan_id, cookie_id, reason, "Cookie update rejected");
                                false
                            }
                            Err(e) => return Err(e.into()),
                        };
                    if applied {
                        summary.updated += 1;
                    } else {
                        summary.skipped += 1;
                    }
                }
                CookieChangeRequest::Delete { cookie_id } => {
                    if self.owns_cookie(&scan.domain_id, cookie_id).await?
                        && cookies::delete_by_id(pool, cookie_id).await?
                    {
                        summary.deleted += 1;
                    } else {
                        summary.skipped += 1;
                    }
                }
            }
        }

        info!(
            scan_id,
            added = summary.added,
            updated = summary.updated,
            deleted = summary.deleted,
            skipped = summary.skipped,
            "Applied baseline changes"
        );
        Ok(summary)
    }

    async fn owns_cookie(&self, domain_id: &str, cookie_id: &str) -> Result<bool> {
        Ok(cookies::get(self.core.db.pool(), cookie_id)
            .await?
            .is_some_and(|c| c.domain_id == domain_id))
    }
}

fn spawn_dispatcher(core: Arc<Core>, mut rx: mpsc::UnboundedReceiver<ScanId>) {
    tokio::spawn(async move {
        while let Some(scan_id) = rx.recv().await {
            let core = core.clone();
            tokio::spawn(async move {
                let execution = tokio::spawn({
                    let core = core.clone();
                    let scan_id = scan_id.clone();
                    async move { core.execute(scan_id).await }
                });
                if let Err(e) = execution.await {
                    if e.is_panic() {
                        core.record_panic(&scan_id).await;
                    }
                }
            });
        }
        debug!("Scan dispatcher stopped");
    });
}

impl Core {
    async fn execute(&self, scan_id: ScanId) {
        let scan = match scans::get(self.db.pool(), scan_id.as_str()).await {
            Ok(Some(scan)) => scan,
            Ok(None) => {
                warn!(scan_id = %scan_id, "Dispatched scan no longer exists");
                return;
            }
            Err(e) => {
                error!(scan_id = %scan_id, error = %e, "Failed to load dispatched scan");
                return;
            }
        };
        if scan.status.is_terminal() {
            debug!(scan_id = %scan_id, status = %scan.status, "Scan already finished, skipping");
            return;
        }

        let logger = self.logs.logger(scan_id.as_str());
        logger.info(&format!("Scanning {}", scan.domain));
        let mut tracker =
            ProgressTracker::new(scan.progress.clone(), self.settings.progress_flush_interval);

        match self.run(&scan, &mut tracker, &logger).await {
            Ok(Outcome::Completed) => {
                logger.info("Scan completed");
            }
            Ok(Outcome::Stopped) => {
                logger.info("Scan stopped because the record is no longer active");
            }
            Err(e) => {
                let message = e.to_string();
                logger.error("Scan failed", Some(json!({ "error": message })));
                let now = Utc::now();
                let mut progress = tracker.snapshot();
                progress.finish(ScanStatus::Error, now);
                match scans::terminate(
                    self.db.pool(),
                    scan_id.as_str(),
                    ScanStatus::Error,
                    &progress,
                    &message,
                    now,
                )
                .await
                {
                    Ok(true) => error!(scan_id = %scan_id, error = %message, "Scan failed"),
                    Ok(false) => debug!(scan_id = %scan_id, "Scan already terminal, failure not recorded"),
                    Err(db_err) => {
                        error!(scan_id = %scan_id, error = %db_err, "Failed to record scan failure");
                    }
                }
            }
        }

        self.classifier.purge_cache().await;
        // Detached; the buffer goes away after the retention delay
        drop(logger.cleanup());
    }

    /// Mark a scan whose execution task panicked as failed.
    async fn record_panic(&self, scan_id: &ScanId) {
        let logger = self.logs.logger(scan_id.as_str());
        logger.error(PANIC_REASON, None);

        let now = Utc::now();
        let mut progress = match scans::get(self.db.pool(), scan_id.as_str()).await {
            Ok(Some(scan)) => scan.progress,
            Ok(None) => {
                warn!(scan_id = %scan_id, "Panicked scan no longer exists");
                return;
            }
            Err(e) => {
                error!(scan_id = %scan_id, error = %e, "Failed to load panicked scan");
                ScanProgress::default()
            }
        };
        progress.current_url = None;
        progress.finish(ScanStatus::Error, now);

        match scans::terminate(
            self.db.pool(),
            scan_id.as_str(),
            ScanStatus::Error,
            &progress,
            PANIC_REASON,
            now,
        )
        .await
        {
            Ok(true) => error!(scan_id = %scan_id, "Scan execution panicked"),
            Ok(false) => debug!(scan_id = %scan_id, "Scan already terminal when its execution panicked"),
            Err(e) => error!(scan_id = %scan_id, error = %e, "Failed to record scan panic"),
        }
        drop(logger.cleanup());
    }

    async fn run(
        &self,
        scan: &Scan,
        tracker: &mut ProgressTracker,
        logger: &JobLogger,
    ) -> Result<Outcome> {
        let domain =
            DomainName::new(&scan.domain).map_err(|e| ScanError::InvalidInput(e.to_string()))?;
        let session = self.launcher.launch().await?;

        let outcome = self.crawl(scan, &domain, session.clone(), tracker, logger).await;

        if let Err(e) = session.close().await {
            warn!(scan_id = %scan.id, error = %e, "Failed to close browser");
        }
        outcome
    }

    async fn crawl(
        &self,
        scan: &Scan,
        domain: &DomainName,
        session: Arc<dyn BrowserSession>,
        tracker: &mut ProgressTracker,
        logger: &JobLogger,
    ) -> Result<Outcome> {
        let urls = discovery::discover(
            session.as_ref(),
            domain,
            &scan.config,
            self.settings.inspector.navigation_timeout,
        )
        .await;
        logger.log(
            LogLevel::Info,
            "URL discovery finished",
            Some(json!({ "count": urls.len() })),
        );

        tracker.set_total(count(urls.len()));
        if !self.flush(scan, tracker).await {
            return Ok(Outcome::Stopped);
        }

        let inspector = PageInspector::new(
            session,
            self.classifier.clone(),
            domain.clone(),
            self.settings.inspector.clone(),
        );
        let mut builder = FindingsBuilder::new();

        for (index, chunk) in urls.chunks(self.settings.chunk_size.max(1)).enumerate() {
            debug!(scan_id = %scan.id, chunk = index, size = chunk.len(), "Inspecting chunk");
            let mut still_active = true;

            let mut pending: FuturesUnordered<_> = chunk
                .iter()
                .map(|url| {
                    let inspector = &inspector;
                    async move { (url, inspector.inspect(url).await) }
                })
                .collect();

            while let Some((url, result)) = pending.next().await {
                match result {
                    Ok(report) => builder.add_page(report),
                    Err(err) => {
                        logger.warn(
                            "URL could not be inspected",
                            Some(json!({ "url": err.url, "attempts": err.attempts, "error": err.message })),
                        );
                        builder.add_error(err);
                    }
                }
                tracker.record(url);
                if tracker.is_due() && !self.flush(scan, tracker).await {
                    still_active = false;
                }
            }

            if !still_active || !self.flush(scan, tracker).await {
                info!(scan_id = %scan.id, "Scan no longer active, not dispatching further chunks");
                return Ok(Outcome::Stopped);
            }
        }

        builder.set_consent_accepted(inspector.consent_accepted());
        self.complete(scan, builder, tracker).await
    }

    /// Persist a progress snapshot. Returns `false` once the record is terminal.
    async fn flush(&self, scan: &Scan, tracker: &mut ProgressTracker) -> bool {
        let snapshot = tracker.snapshot();
        tracker.mark_flushed();
        match scans::update_progress(self.db.pool(), scan.id.as_str(), &snapshot, Utc::now()).await {
            Ok(active) => active,
            Err(e) => {
                warn!(scan_id = %scan.id, error = %e, "Progress write failed");
                true
            }
        }
    }

    async fn complete(
        &self,
        scan: &Scan,
        builder: FindingsBuilder,
        tracker: &ProgressTracker,
    ) -> Result<Outcome> {
        let now = Utc::now();
        let mut findings = builder.finish();

        let baseline = cookies::list_active(self.db.pool(), &scan.domain_id).await?;
        findings.changes = diff::diff(&findings.cookies, &baseline);
        let stats = stats::compute(&findings, now);
        let significant = diff::has_significant_changes(&findings.changes);

        let mut progress = tracker.snapshot();
        progress.current_url = None;
        progress.finish(ScanStatus::Completed, now);

        if !scans::complete(self.db.pool(), scan.id.as_str(), &progress, &findings, &stats, now).await? {
            return Ok(Outcome::Stopped);
        }

        info!(
            scan_id = %scan.id,
            cookies = stats.cookies.total,
            new_cookies = stats.new_cookies,
            modified_cookies = stats.modified_cookies,
            removed_cookies = stats.removed_cookies,
            urls_errored = stats.urls_errored,
            "Scan completed"
        );

        if significant && self.settings.notifications_enabled {
            let notification = ChangeNotification {
                scan_id: scan.id.clone(),
                domain_id: scan.domain_id.clone(),
                domain: scan.domain.clone(),
                changes: findings.changes,
            };
            if let Err(e) = self.notifier.notify(notification).await {
                warn!(scan_id = %scan.id, error = %e, "Failed to deliver change notification");
            }
        }
        Ok(Outcome::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_config() {
        let mut config = AppConfig::default();
        config.scanning.chunk_size = 0;
        config.notifications.enabled = false;

        let settings = ScanSettings::from_config(&config);
        assert_eq!(settings.chunk_size, 1);
        assert_eq!(settings.stale_after, chrono::Duration::minutes(30));
        assert!(!settings.notifications_enabled);
        assert_eq!(settings.inspector.max_attempts, 3);
    }

    #[test]
    fn test_apply_summary_wire_format() {
        let summary = ApplySummary {
            added: 2,
            ..ApplySummary::default()
        };
        let json = serde_json::to_value(summary).unwrap();
        assert_eq!(json["added"], 2);
        assert_eq!(json["skipped"], 0);
    }
}

//! Single-flight poller for queued analyses.
//!
//! Each tick acquires the persistent `analysis-worker` lease, claims the
//! oldest pending job and runs it inline, heartbeating the lease meanwhile.
//! Processes that fail to get the lease skip the tick, so at most one analysis
//! runs at a time across all processes sharing the store.

use crate::error::{Result, WorkerError};
use crate::pipeline::AnalysisPipeline;
use chrono::Utc;
use crumb_core::model::{Analysis, AnalysisResults, LogEntry, LogLevel};
use crumb_core::{AnalysisId, WorkerConfig};
use crumb_db::{analyses, leases, Database};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Name of the lease guarding analysis execution.
pub const LEASE_NAME: &str = "analysis-worker";

/// Polling and lease timing.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub poll_interval: Duration,
    pub lease_ttl: chrono::Duration,
    pub heartbeat: Duration,
}

impl WorkerSettings {
    #[must_use]
    pub fn from_config(config: &WorkerConfig) -> Self {
        let lease_ttl_secs = config.lease_ttl_secs.max(1);
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
            lease_ttl: chrono::Duration::seconds(i64::try_from(lease_ttl_secs).unwrap_or(i64::MAX)),
            heartbeat: Duration::from_secs(config.heartbeat_secs.clamp(1, lease_ttl_secs)),
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from_config(&WorkerConfig::default())
    }
}

pub struct AnalysisWorker {
    db: Database,
    pipeline: Arc<AnalysisPipeline>,
    settings: WorkerSettings,
    owner: String,
}

impl AnalysisWorker {
    /// Create a worker with a fresh owner id.
    pub fn new(db: Database, pipeline: Arc<AnalysisPipeline>, settings: WorkerSettings) -> Self {
        Self {
            db,
            pipeline,
            settings,
            owner: format!("worker-{}", uuid::Uuid::new_v4()),
        }
    }

    /// Lease owner id of this worker.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Poll until `shutdown` fires. The first tick runs immediately.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(owner = %self.owner, interval = ?self.settings.poll_interval, "Analysis worker started");

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(owner = %self.owner, error = %e, "Analysis worker tick failed");
                    }
                }
            }
        }

        if let Err(e) = leases::release(self.db.pool(), LEASE_NAME, &self.owner).await {
            warn!(owner = %self.owner, error = %e, "Failed to release worker lease");
        }
        info!(owner = %self.owner, "Analysis worker stopped");
    }

    /// One poll: take the lease, claim the oldest pending job and run it.
    ///
    /// Returns the id of the job that ran, if any.
    pub async fn tick(&self) -> Result<Option<AnalysisId>> {
        let pool = self.db.pool();
        let now = Utc::now();

        if !leases::try_acquire(pool, LEASE_NAME, &self.owner, self.settings.lease_ttl, now).await? {
            debug!(owner = %self.owner, "Worker lease held elsewhere, skipping tick");
            return Ok(None);
        }

        let outcome = match analyses::claim_next_pending(pool, now).await {
            Ok(Some(analysis)) => {
                let id = analysis.id.clone();
                info!(analysis_id = %id, domain = %analysis.domain, "Analysis claimed");
                self.process(&analysis).await;
                Ok(Some(id))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(e.into()),
        };

        if let Err(e) = leases::release(pool, LEASE_NAME, &self.owner).await {
            warn!(owner = %self.owner, error = %e, "Failed to release worker lease");
        }
        self.pipeline.purge_cache().await;
        outcome
    }

    async fn process(&self, analysis: &Analysis) {
        let run = self.pipeline.run(analysis);
        tokio::pin!(run);

        let mut beat = interval_at(Instant::now() + self.settings.heartbeat, self.settings.heartbeat);
        let result = loop {
            tokio::select! {
                result = &mut run => break result,
                _ = beat.tick() => self.heartbeat().await,
            }
        };

        self.finish(analysis, result).await;
    }

    async fn heartbeat(&self) {
        match leases::heartbeat(
            self.db.pool(),
            LEASE_NAME,
            &self.owner,
            self.settings.lease_ttl,
            Utc::now(),
        )
        .await
        {
            Ok(true) => debug!(owner = %self.owner, "Worker lease renewed"),
            Ok(false) => warn!(owner = %self.owner, "Worker lease lost while a job is running"),
            Err(e) => warn!(owner = %self.owner, error = %e, "Worker lease heartbeat failed"),
        }
    }

    async fn finish(&self, analysis: &Analysis, result: Result<AnalysisResults>) {
        let pool = self.db.pool();
        let id = analysis.id.as_str();

        let recorded = match result {
            Ok(results) => match analyses::mark_completed(pool, id, &results, Utc::now()).await {
                Ok(true) => {
                    info!(
                        analysis_id = id,
                        total = results.total_cookies,
                        new = results.new_cookies,
                        updated = results.updated_cookies,
                        "Analysis completed"
                    );
                    Ok(())
                }
                Ok(false) => {
                    info!(analysis_id = id, "Analysis finished after it was cancelled, results discarded");
                    Ok(())
                }
                Err(e) => Err(e),
            },
            Err(WorkerError::Cancelled) => {
                info!(analysis_id = id, "Analysis cancelled, pipeline stopped");
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                error!(analysis_id = id, error = %message, "Analysis failed");
                let entry = LogEntry::new(LogLevel::Error, "Analysis failed")
                    .with_data(json!({ "error": message }));
                match analyses::append_log(pool, id, &entry).await {
                    Ok(()) => analyses::mark_error(pool, id, &message, Utc::now()).await.map(|_| ()),
                    Err(e) => Err(e),
                }
            }
        };

        if let Err(e) = recorded {
            error!(analysis_id = id, error = %e, "Failed to record analysis outcome");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_config() {
        let settings = WorkerSettings::from_config(&WorkerConfig {
            heartbeat_secs: 120,
            lease_ttl_secs: 60,
            ..WorkerConfig::default()
        });
        assert_eq!(settings.poll_interval, Duration::from_secs(10));
        assert_eq!(settings.lease_ttl, chrono::Duration::seconds(60));
        assert_eq!(settings.heartbeat, Duration::from_secs(60));
    }
}

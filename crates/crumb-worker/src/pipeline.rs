//! The work done for one analysis job.
//!
//! Reachability, crawl, classification and baseline update run in order. Each
//! stage is announced by a milestone that bumps the job's progress and appends
//! a log entry; a milestone write that finds the job no longer running stops
//! the pipeline, which is how cancellation reaches it.

use crate::error::{Result, WorkerError};
use crate::probe::ReachabilityProbe;
use chrono::Utc;
use crumb_browser::{BrowserLauncher, BrowserSession};
use crumb_classify::Classifier;
use crumb_core::model::{
    Analysis, AnalysisConfiguration, AnalysisResults, CookieInput, Findings, LogEntry, LogLevel,
    ObservedCookie, ScanConfig, ScanType,
};
use crumb_core::DomainName;
use crumb_db::cookies::{self, UpsertOutcome};
use crumb_db::{analyses, Database};
use crumb_scanner::stats::count;
use crumb_scanner::{discovery, FindingsBuilder, InspectorSettings, PageInspector};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Detection method recorded on baseline cookies written by analyses.
pub const DETECTION_METHOD: &str = "analysis";

/// Crawl limits for an analysis.
#[must_use]
pub fn crawl_limits(configuration: &AnalysisConfiguration) -> ScanConfig {
    if configuration.deep_scan {
        ScanConfig {
            scan_type: ScanType::Full,
            max_urls: 20,
            depth: 3,
            include_subdomains: false,
        }
    } else {
        ScanConfig {
            scan_type: ScanType::Quick,
            max_urls: 5,
            depth: 1,
            include_subdomains: false,
        }
    }
}

/// Whether a cookie is set for the target domain or one of its subdomains.
#[must_use]
pub fn is_first_party(cookie: &ObservedCookie, domain: &DomainName) -> bool {
    domain.matches_host(cookie.domain.trim_start_matches('.'), true)
}

pub struct AnalysisPipeline {
    db: Database,
    launcher: Arc<dyn BrowserLauncher>,
    classifier: Classifier,
    probe: Arc<dyn ReachabilityProbe>,
    inspector: InspectorSettings,
}

impl AnalysisPipeline {
    pub fn new(
        db: Database,
        launcher: Arc<dyn BrowserLauncher>,
        classifier: Classifier,
        probe: Arc<dyn ReachabilityProbe>,
        inspector: InspectorSettings,
    ) -> Self {
        Self {
            db,
            launcher,
            classifier,
            probe,
            inspector,
        }
    }

    /// Evict expired entries from the classifier's provider cache.
    pub async fn purge_cache(&self) -> usize {
        self.classifier.purge_cache().await
    }

    /// Run the pipeline for a claimed (running) analysis within its time budget.
    pub async fn run(&self, analysis: &Analysis) -> Result<AnalysisResults> {
        let budget = analysis.configuration.timeout.max(1);
        match tokio::time::timeout(Duration::from_secs(budget), self.execute(analysis)).await {
            Ok(result) => result,
            Err(_) => Err(WorkerError::Timeout(budget)),
        }
    }

    async fn execute(&self, analysis: &Analysis) -> Result<AnalysisResults> {
        let id = analysis.id.as_str();
        let configuration = &analysis.configuration;
        let domain = DomainName::new(&analysis.domain)
            .map_err(|e| WorkerError::InvalidInput(e.to_string()))?;

        self.milestone(id, 10, "Validating domain reachability", None)
            .await?;
        let http_status = self
            .probe
            .check(&domain.start_url())
            .await
            .map_err(WorkerError::Unreachable)?;

        let limits = crawl_limits(configuration);
        self.milestone(
            id,
            30,
            "Crawling pages and collecting cookies",
            Some(json!({ "httpStatus": http_status, "maxUrls": limits.max_urls, "depth": limits.depth })),
        )
        .await?;
        let findings = self.crawl(&domain, &limits).await?;

        self.milestone(
            id,
            60,
            "Classifying cookies",
            Some(json!({
                "cookiesFound": findings.cookies.len(),
                "urlsScanned": findings.metadata.urls_scanned,
            })),
        )
        .await?;
        let observed: Vec<ObservedCookie> = findings
            .cookies
            .iter()
            .filter(|c| configuration.include_third_party || is_first_party(c, &domain))
            .cloned()
            .collect();

        self.milestone(
            id,
            80,
            "Updating cookie baseline",
            Some(json!({ "cookies": observed.len() })),
        )
        .await?;
        let mut results = self.update_baseline(&analysis.domain_id, &observed).await;
        results.scan_details = json!({
            "urlsScanned": findings.metadata.urls_scanned,
            "errors": findings.metadata.errors,
            "thirdPartyDropped": findings.cookies.len() - observed.len(),
            "deepScan": configuration.deep_scan,
            "includeThirdParty": configuration.include_third_party,
        });

        self.milestone(
            id,
            100,
            "Finalizing results",
            Some(json!({
                "newCookies": results.new_cookies,
                "updatedCookies": results.updated_cookies,
                "errorCookies": results.error_cookies,
            })),
        )
        .await?;
        Ok(results)
    }

    /// Record a milestone, failing with [`WorkerError::Cancelled`] once the
    /// job has left `running`.
    async fn milestone(&self, id: &str, progress: u8, step: &str, data: Option<Value>) -> Result<()> {
        let pool = self.db.pool();
        if !analyses::update_progress(pool, id, progress, step).await? {
            return Err(WorkerError::Cancelled);
        }

        let mut entry = LogEntry::new(LogLevel::Info, step);
        if let Some(data) = data {
            entry = entry.with_data(data);
        }
        analyses::append_log(pool, id, &entry).await?;
        info!(analysis_id = id, progress, "{step}");
        Ok(())
    }

    async fn crawl(&self, domain: &DomainName, limits: &ScanConfig) -> Result<Findings> {
        let session = self.launcher.launch().await?;
        let findings = self.collect(session.clone(), domain, limits).await;
        if let Err(e) = session.close().await {
            warn!(domain = %domain, error = %e, "Failed to close browser");
        }
        Ok(findings)
    }

    async fn collect(
        &self,
        session: Arc<dyn BrowserSession>,
        domain: &DomainName,
        limits: &ScanConfig,
    ) -> Findings {
        let urls = discovery::discover(
            session.as_ref(),
            domain,
            limits,
            self.inspector.navigation_timeout,
        )
        .await;

        let inspector = PageInspector::new(
            session,
            self.classifier.clone(),
            domain.clone(),
            self.inspector.clone(),
        );
        let mut builder = FindingsBuilder::new();
        for url in &urls {
            match inspector.inspect(url).await {
                Ok(report) => builder.add_page(report),
                Err(err) => {
                    warn!(url = %err.url, attempts = err.attempts, error = %err.message, "URL could not be inspected");
                    builder.add_error(err);
                }
            }
        }
        builder.set_consent_accepted(inspector.consent_accepted());
        builder.finish()
    }

    /// Upsert cookies into the baseline. Per-cookie failures are counted,
    /// not raised.
    async fn update_baseline(&self, domain_id: &str, observed: &[ObservedCookie]) -> AnalysisResults {
        let mut results = AnalysisResults {
            total_cookies: count(observed.len()),
            ..AnalysisResults::default()
        };

        for cookie in observed {
            let now = Utc::now();
            let input = CookieInput::from_observed(cookie, now);
            match cookies::upsert(self.db.pool(), domain_id, &input, DETECTION_METHOD, now).await {
                Ok((_, UpsertOutcome::Inserted)) => results.new_cookies += 1,
                Ok((_, UpsertOutcome::Updated)) => results.updated_cookies += 1,
                Err(e) => {
                    warn!(domain_id, cookie = %cookie.name, error = %e, "Failed to store cookie");
                    results.error_cookies += 1;
                }
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crumb_core::model::{CookieCategory, CookieSource};

    fn cookie(domain: &str) -> ObservedCookie {
        ObservedCookie {
            name: "c".to_string(),
            value: String::new(),
            domain: domain.to_string(),
            path: "/".to_string(),
            expires: None,
            http_only: false,
            secure: false,
            same_site: None,
            source: CookieSource::Jar,
            url: "https://example.com".to_string(),
            category: CookieCategory::Unknown,
            provider: None,
        }
    }

    #[test]
    fn test_crawl_limits() {
        let quick = crawl_limits(&AnalysisConfiguration::default());
        assert_eq!((quick.max_urls, quick.depth), (5, 1));

        let deep = crawl_limits(&AnalysisConfiguration {
            deep_scan: true,
            ..AnalysisConfiguration::default()
        });
        assert_eq!((deep.max_urls, deep.depth), (20, 3));
    }

    #[test]
    fn test_first_party() {
        let domain = DomainName::new("example.com").unwrap();
        assert!(is_first_party(&cookie(".example.com"), &domain));
        assert!(is_first_party(&cookie("shop.example.com"), &domain));
        assert!(!is_first_party(&cookie(".doubleclick.net"), &domain));
        assert!(!is_first_party(&cookie("notexample.com"), &domain));
    }
}

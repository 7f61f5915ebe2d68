//! Entry points for queuing, cancelling and inspecting analyses.

use crate::error::{Result, WorkerError};
use chrono::Utc;
use crumb_core::model::{Analysis, AnalysisConfiguration};
use crumb_core::{DomainName, WorkerConfig};
use crumb_db::{analyses, Database, DatabaseError};
use tracing::{info, warn};

/// Reason recorded on analyses cancelled for exceeding the staleness threshold.
pub const STALE_REASON: &str = "timeout";

/// Queues analyses for the worker and answers status queries.
#[derive(Debug, Clone)]
pub struct AnalysisService {
    db: Database,
    stale_after: chrono::Duration,
}

impl AnalysisService {
    #[must_use]
    pub fn new(db: Database, config: &WorkerConfig) -> Self {
        Self {
            db,
            stale_after: chrono::Duration::minutes(config.stale_after_minutes),
        }
    }

    /// Queue an analysis of `domain`.
    ///
    /// A pending or running analysis of the same domain rejects the request
    /// unless it is older than the staleness threshold, in which case it is
    /// cancelled first.
    pub async fn start_analysis(
        &self,
        domain_id: &str,
        domain: &str,
        configuration: AnalysisConfiguration,
    ) -> Result<Analysis> {
        let domain = DomainName::new(domain).map_err(|e| WorkerError::InvalidInput(e.to_string()))?;
        let pool = self.db.pool();
        let now = Utc::now();

        if let Some(active) = analyses::find_active_for_domain(pool, domain_id).await? {
            if active.age(now) <= self.stale_after {
                return Err(WorkerError::AlreadyInProgress {
                    domain_id: domain_id.to_string(),
                });
            }
            warn!(analysis_id = %active.id, domain_id, "Cancelling stale analysis");
            analyses::cancel(pool, active.id.as_str(), STALE_REASON, now).await?;
        }

        let analysis = analyses::create(pool, domain_id, domain.as_str(), &configuration, now)
            .await
            .map_err(|e| match e {
                DatabaseError::Conflict(_) => WorkerError::AlreadyInProgress {
                    domain_id: domain_id.to_string(),
                },
                other => other.into(),
            })?;

        info!(
            analysis_id = %analysis.id,
            domain = %domain,
            deep_scan = configuration.deep_scan,
            "Analysis queued"
        );
        Ok(analysis)
    }

    /// Cancel a pending or running analysis.
    pub async fn cancel_analysis(&self, analysis_id: &str) -> Result<Analysis> {
        let cancelled =
            analyses::cancel(self.db.pool(), analysis_id, "Cancelled by user", Utc::now()).await?;
        if !cancelled {
            return Err(WorkerError::NotCancellable {
                analysis_id: analysis_id.to_string(),
            });
        }
        info!(analysis_id, "Analysis cancelled");
        self.get_analysis_status(analysis_id).await
    }

    /// Current record of an analysis, logs included.
    pub async fn get_analysis_status(&self, analysis_id: &str) -> Result<Analysis> {
        analyses::get(self.db.pool(), analysis_id)
            .await?
            .ok_or_else(|| WorkerError::NotFound(analysis_id.to_string()))
    }
}

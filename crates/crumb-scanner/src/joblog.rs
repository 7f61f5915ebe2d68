//! Per-job structured log buffers.
//!
//! Every entry is also emitted as a `tracing` event. Buffers live in a shared
//! registry so status queries can read them while the job runs, and are
//! dropped a fixed delay after the job finishes.

use crumb_core::model::{LogEntry, LogLevel};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Shared store of job log buffers.
#[derive(Debug, Clone)]
pub struct JobLogRegistry {
    buffers: Arc<Mutex<HashMap<String, Vec<LogEntry>>>>,
    retention: Duration,
}

impl JobLogRegistry {
    #[must_use]
    pub fn new(retention: Duration) -> Self {
        Self {
            buffers: Arc::new(Mutex::new(HashMap::new())),
            retention,
        }
    }

    /// Logger for `job_id`; an existing buffer is reused.
    pub fn logger(&self, job_id: &str) -> JobLogger {
        if let Ok(mut buffers) = self.buffers.lock() {
            buffers.entry(job_id.to_string()).or_default();
        }
        JobLogger {
            job_id: job_id.to_string(),
            registry: self.clone(),
        }
    }

    #[must_use]
    pub fn entries(&self, job_id: &str) -> Vec<LogEntry> {
        self.buffers
            .lock()
            .ok()
            .and_then(|buffers| buffers.get(job_id).cloned())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn contains(&self, job_id: &str) -> bool {
        self.buffers
            .lock()
            .map(|buffers| buffers.contains_key(job_id))
            .unwrap_or(false)
    }

    fn push(&self, job_id: &str, entry: LogEntry) {
        if let Ok(mut buffers) = self.buffers.lock() {
            buffers.entry(job_id.to_string()).or_default().push(entry);
        }
    }

    fn remove(&self, job_id: &str) {
        if let Ok(mut buffers) = self.buffers.lock() {
            buffers.remove(job_id);
        }
    }
}

impl Default for JobLogRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

/// Logger bound to one job.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    registry: JobLogRegistry,
}

impl JobLogger {
    #[must_use]
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Record an entry and return it.
    pub fn log(&self, level: LogLevel, message: &str, data: Option<Value>) -> LogEntry {
        match level {
            LogLevel::Debug => debug!(job_id = %self.job_id, data = ?data, "{message}"),
            LogLevel::Info => info!(job_id = %self.job_id, data = ?data, "{message}"),
            LogLevel::Warn => warn!(job_id = %self.job_id, data = ?data, "{message}"),
            LogLevel::Error => error!(job_id = %self.job_id, data = ?data, "{message}"),
        }
        let mut entry = LogEntry::new(level, message);
        if let Some(data) = data {
            entry = entry.with_data(data);
        }
        self.registry.push(&self.job_id, entry.clone());
        entry
    }

    pub fn info(&self, message: &str) -> LogEntry {
        self.log(LogLevel::Info, message, None)
    }

    pub fn warn(&self, message: &str, data: Option<Value>) -> LogEntry {
        self.log(LogLevel::Warn, message, data)
    }

    pub fn error(&self, message: &str, data: Option<Value>) -> LogEntry {
        self.log(LogLevel::Error, message, data)
    }

    #[must_use]
    pub fn entries(&self) -> Vec<LogEntry> {
        self.registry.entries(&self.job_id)
    }

    /// Drop this job's buffer once the retention delay has passed.
    pub fn cleanup(self) -> JoinHandle<()> {
        let retention = self.registry.retention;
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            self.registry.remove(&self.job_id);
            debug!(job_id = %self.job_id, "Released job log buffer");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_entries_are_buffered_per_job() {
        let registry = JobLogRegistry::new(Duration::from_secs(60));
        let a = registry.logger("a");
        let b = registry.logger("b");

        a.info("Crawl started");
        a.warn("URL failed", Some(json!({"url": "https://example.com/x"})));
        b.error("Browser failed to launch", None);

        let entries = a.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].level, LogLevel::Warn);
        assert!(entries[1].data.is_some());
        assert_eq!(registry.entries("b").len(), 1);
        assert!(registry.entries("missing").is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_releases_after_retention() {
        let registry = JobLogRegistry::new(Duration::from_millis(20));
        let logger = registry.logger("job");
        logger.info("done");

        let handle = logger.cleanup();
        assert!(registry.contains("job"));
        handle.await.unwrap();
        assert!(!registry.contains("job"));
    }
}

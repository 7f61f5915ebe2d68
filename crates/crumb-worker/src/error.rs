//! Error types for analysis jobs.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("analysis already in progress for domain {domain_id}")]
    AlreadyInProgress { domain_id: String },

    #[error("analysis not found or cannot be cancelled")]
    NotCancellable { analysis_id: String },

    #[error("analysis not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("target unreachable: {0}")]
    Unreachable(String),

    #[error("analysis timed out after {0} seconds")]
    Timeout(u64),

    #[error("analysis was cancelled")]
    Cancelled,

    #[error("HTTP client error: {0}")]
    Http(String),

    #[error("Database error: {0}")]
    Database(#[from] crumb_db::DatabaseError),

    #[error("Scan error: {0}")]
    Scan(#[from] crumb_scanner::ScanError),

    #[error("Browser error: {0}")]
    Browser(#[from] crumb_browser::BrowserError),
}

pub type Result<T> = std::result::Result<T, WorkerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = WorkerError::NotCancellable {
            analysis_id: "a1".to_string(),
        };
        assert_eq!(err.to_string(), "analysis not found or cannot be cancelled");

        let err = WorkerError::AlreadyInProgress {
            domain_id: "d1".to_string(),
        };
        assert_eq!(err.to_string(), "analysis already in progress for domain d1");
        assert_eq!(
            WorkerError::Timeout(300).to_string(),
            "analysis timed out after 300 seconds"
        );
    }
}

use crumb_core::model::ScanStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("scan already in progress for domain {domain_id}")]
    AlreadyInProgress { domain_id: String },

    #[error("scan not found: {0}")]
    NotFound(String),

    #[error("results not available yet: scan {scan_id} is {status}")]
    ResultsNotReady { scan_id: String, status: ScanStatus },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("page inspection failed for {url}: {message}")]
    PageInspection { url: String, message: String },

    #[error("Database error: {0}")]
    Database(#[from] crumb_db::DatabaseError),

    #[error("Browser error: {0}")]
    Browser(#[from] crumb_browser::BrowserError),

    #[error("Classification error: {0}")]
    Classify(#[from] crumb_classify::ClassifyError),

    #[error("scan execution failed: {0}")]
    Execution(String),
}

pub type Result<T> = std::result::Result<T, ScanError>;

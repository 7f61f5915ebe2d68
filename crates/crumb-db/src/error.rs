//! Errors raised by the store.

use thiserror::Error;

/// Failures of store operations.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// The database file or pool could not be opened.
    #[error("failed to open database: {0}")]
    Open(String),

    /// A schema migration did not apply.
    #[error("migration failed: {0}")]
    Migration(String),

    /// No row with the given id.
    #[error("record not found")]
    NotFound,

    /// A uniqueness rule rejected the write.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A stored value does not parse back into the model.
    #[error("decode error: {0}")]
    Decode(String),

    /// A JSON column could not be encoded or decoded.
    #[error("JSON column: {0}")]
    Json(String),

    /// Error from `sqlx`.
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Creating the database directory failed.
    #[error("database I/O: {0}")]
    Io(#[from] std::io::Error),
}

impl DatabaseError {
    /// Map a unique-constraint violation to [`DatabaseError::Conflict`].
    pub(crate) fn from_insert(err: sqlx::Error, what: &str) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => Self::Conflict(what.to_string()),
            _ => Self::Sqlx(err),
        }
    }
}

impl From<serde_json::Error> for DatabaseError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

/// Result of a store operation.
pub type Result<T> = std::result::Result<T, DatabaseError>;

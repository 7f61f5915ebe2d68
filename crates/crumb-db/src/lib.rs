//! Crumb Database Layer
//!
//! `SQLite` persistence for scans, analyses, baseline cookies and job leases.
//! Uses `SQLx` with embedded migrations.
//!
//! # Example
//!
//! ```ignore
//! use crumb_db::Database;
//!
//! let db = Database::open("crumb.db").await?;
//! let active = crumb_db::scans::find_active_for_domain(db.pool(), "d1").await?;
//! ```
//!
//! # Design Principles
//!
//! - Repositories are free functions over `&SqlitePool`
//! - Every status-changing write is a conditional `UPDATE` guarded on the
//!   record still being active, and reports whether it applied
//! - Timestamps are RFC 3339 strings with microsecond precision

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

/// Analysis jobs and logs.
pub mod analyses;
pub mod connection;
/// Baseline cookies.
#[allow(missing_docs)]
pub mod cookies;
pub mod error;
/// Job leases.
#[allow(missing_docs)]
pub mod leases;
pub mod migrations;
/// Scan records.
pub mod scans;
/// Timestamp column encoding.
#[allow(missing_docs)]
pub mod timestamp;

pub use error::{DatabaseError, Result};

use sqlx::SqlitePool;
use std::path::Path;

/// Connection pool size for file-backed databases.
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// High-level database handle. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open a database without running migrations.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let pool = connection::connect(path, DEFAULT_MAX_CONNECTIONS).await?;
        Ok(Self { pool })
    }

    /// Open a database and bring its schema up to date.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Self::new(path).await?;
        db.run_migrations().await?;
        Ok(db)
    }

    /// A fresh, migrated in-memory database on a single connection.
    pub async fn in_memory() -> Result<Self> {
        let db = Self::from_pool(connection::connect(":memory:", 1).await?);
        db.run_migrations().await?;
        Ok(db)
    }

    /// Wrap an existing pool.
    #[must_use]
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Run all pending database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        migrations::run_migrations(&self.pool).await
    }

    /// Get the current schema version.
    pub async fn get_schema_version(&self) -> Result<i64> {
        migrations::get_schema_version(&self.pool).await
    }

    /// Get a reference to the underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database connection gracefully.
    pub async fn close(self) {
        self.pool.close().await;
        tracing::info!("Database pool closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_database_migrations() {
        let db = Database::new(":memory:").await.expect("create database");
        assert_eq!(db.get_schema_version().await.expect("get version"), 0);

        db.run_migrations().await.expect("run migrations");
        assert_eq!(
            db.get_schema_version().await.expect("get version"),
            migrations::SCHEMA_VERSION
        );
    }

    #[tokio::test]
    async fn test_in_memory_databases_are_isolated() {
        let a = Database::in_memory().await.unwrap();
        let b = Database::in_memory().await.unwrap();
        sqlx::query("INSERT INTO job_leases (name, owner, heartbeat_at, expires_at) VALUES ('x', 'o', 't', 't')")
            .execute(a.pool())
            .await
            .unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM job_leases")
            .fetch_one(b.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crumb.db");
        {
            let db = Database::open(&path).await.unwrap();
            sqlx::query("INSERT INTO job_leases (name, owner, heartbeat_at, expires_at) VALUES ('x', 'o', 't', 't')")
                .execute(db.pool())
                .await
                .unwrap();
            db.close().await;
        }
        let db = Database::open(&path).await.unwrap();
        let owner: String = sqlx::query_scalar("SELECT owner FROM job_leases WHERE name = 'x'")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(owner, "o");
    }

    #[tokio::test]
    async fn test_database_close() {
        let db = Database::in_memory().await.expect("create database");
        db.close().await;
    }
}

//! Embedded schema migrations.

use crate::error::{DatabaseError, Result};
use sqlx::migrate::Migrator;
use sqlx::{Pool, Sqlite};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Number of migrations shipped in `migrations/`.
pub const SCHEMA_VERSION: i64 = 4;

/// Apply every migration not yet recorded in `_sqlx_migrations`.
pub async fn run_migrations(pool: &Pool<Sqlite>) -> Result<()> {
    let before = get_schema_version(pool).await?;
    if before == SCHEMA_VERSION {
        tracing::debug!(version = before, "Schema up to date");
        return Ok(());
    }

    MIGRATOR
        .run(pool)
        .await
        .map_err(|e| DatabaseError::Migration(e.to_string()))?;

    tracing::info!(from = before, to = SCHEMA_VERSION, "Migrated schema");
    Ok(())
}

/// Highest successfully applied migration, 0 on a fresh database.
pub async fn get_schema_version(pool: &Pool<Sqlite>) -> Result<i64> {
    let bookkeeping: Option<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations'",
    )
    .fetch_optional(pool)
    .await?;
    if bookkeeping.is_none() {
        return Ok(0);
    }

    let version: Option<i64> =
        sqlx::query_scalar("SELECT MAX(version) FROM _sqlx_migrations WHERE success = 1")
            .fetch_one(pool)
            .await?;
    Ok(version.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::connect;

    #[tokio::test]
    async fn test_creates_store_tables() {
        let pool = connect(":memory:", 1).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND name != '_sqlx_migrations'
             ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        assert_eq!(
            tables,
            ["analyses", "analysis_logs", "cookies", "job_leases", "scans"]
        );
    }

    #[tokio::test]
    async fn test_version_tracks_runs() {
        let pool = connect(":memory:", 1).await.unwrap();
        assert_eq!(get_schema_version(&pool).await.unwrap(), 0);

        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();
        assert_eq!(get_schema_version(&pool).await.unwrap(), SCHEMA_VERSION);
    }
}

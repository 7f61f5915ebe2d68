//! Named, expiring leases for single-flight background work.
//!
//! A lease is held by one owner until it expires. The holder extends it with
//! heartbeats; anyone may take it over once it has expired.

use crate::error::Result;
use crate::timestamp;
use chrono::{DateTime, Duration, Utc};
use sqlx::{Row, SqlitePool};

/// A lease row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub name: String,
    pub owner: String,
    pub heartbeat_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Acquire or re-acquire `name` for `owner`.
///
/// Succeeds when no lease exists, the current one has expired, or `owner`
/// already holds it.
pub async fn try_acquire(
    pool: &SqlitePool,
    name: &str,
    owner: &str,
    ttl: Duration,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        "INSERT INTO job_leases (name, owner, heartbeat_at, expires_at)
         VALUES (?, ?, ?, ?)
         ON CONFLICT(name) DO UPDATE SET
             owner = excluded.owner,
             heartbeat_at = excluded.heartbeat_at,
             expires_at = excluded.expires_at
         WHERE job_leases.expires_at <= excluded.heartbeat_at
            OR job_leases.owner = excluded.owner",
    )
    .bind(name)
    .bind(owner)
    .bind(timestamp::encode(now))
    .bind(timestamp::encode(now + ttl))
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Extend a held lease. Returns `false` if `owner` no longer holds it.
pub async fn heartbeat(
    pool: &SqlitePool,
    name: &str,
    owner: &str,
    ttl: Duration,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE job_leases SET heartbeat_at = ?, expires_at = ? WHERE name = ? AND owner = ?",
    )
    .bind(timestamp::encode(now))
    .bind(timestamp::encode(now + ttl))
    .bind(name)
    .bind(owner)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Give a lease up. Returns `false` if `owner` did not hold it.
pub async fn release(pool: &SqlitePool, name: &str, owner: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM job_leases WHERE name = ? AND owner = ?")
        .bind(name)
        .bind(owner)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn current(pool: &SqlitePool, name: &str) -> Result<Option<Lease>> {
    let row = sqlx::query(
        "SELECT name, owner, heartbeat_at, expires_at FROM job_leases WHERE name = ?",
    )
    .bind(name)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => {
            let heartbeat_at: String = row.try_get("heartbeat_at")?;
            let expires_at: String = row.try_get("expires_at")?;
            Ok(Some(Lease {
                name: row.try_get("name")?,
                owner: row.try_get("owner")?,
                heartbeat_at: timestamp::decode(&heartbeat_at)?,
                expires_at: timestamp::decode(&expires_at)?,
            }))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    const NAME: &str = "analysis-worker";

    async fn setup_test_db() -> Database {
        Database::in_memory().await.expect("create test database")
    }

    #[tokio::test]
    async fn test_live_lease_excludes_others() {
        let db = setup_test_db().await;
        let now = Utc::now();
        let ttl = Duration::seconds(60);

        assert!(try_acquire(db.pool(), NAME, "a", ttl, now).await.unwrap());
        assert!(!try_acquire(db.pool(), NAME, "b", ttl, now).await.unwrap());
        // Holder may re-acquire
        assert!(try_acquire(db.pool(), NAME, "a", ttl, now).await.unwrap());

        let lease = current(db.pool(), NAME).await.unwrap().unwrap();
        assert_eq!(lease.owner, "a");
    }

    #[tokio::test]
    async fn test_expired_lease_can_be_taken_over() {
        let db = setup_test_db().await;
        let now = Utc::now();
        let ttl = Duration::seconds(60);

        assert!(try_acquire(db.pool(), NAME, "a", ttl, now).await.unwrap());
        let later = now + Duration::seconds(61);
        assert!(try_acquire(db.pool(), NAME, "b", ttl, later).await.unwrap());
        assert!(!heartbeat(db.pool(), NAME, "a", ttl, later).await.unwrap());
        assert_eq!(current(db.pool(), NAME).await.unwrap().unwrap().owner, "b");
    }

    #[tokio::test]
    async fn test_heartbeat_extends_lease() {
        let db = setup_test_db().await;
        let now = Utc::now();
        let ttl = Duration::seconds(60);

        try_acquire(db.pool(), NAME, "a", ttl, now).await.unwrap();
        let later = now + Duration::seconds(45);
        assert!(heartbeat(db.pool(), NAME, "a", ttl, later).await.unwrap());

        // Would have expired without the heartbeat
        let probe = now + Duration::seconds(90);
        assert!(!try_acquire(db.pool(), NAME, "b", ttl, probe).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_only_by_owner() {
        let db = setup_test_db().await;
        let now = Utc::now();
        let ttl = Duration::seconds(60);

        try_acquire(db.pool(), NAME, "a", ttl, now).await.unwrap();
        assert!(!release(db.pool(), NAME, "b").await.unwrap());
        assert!(release(db.pool(), NAME, "a").await.unwrap());
        assert!(current(db.pool(), NAME).await.unwrap().is_none());
        assert!(try_acquire(db.pool(), NAME, "b", ttl, now).await.unwrap());
    }
}

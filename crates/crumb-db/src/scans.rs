//! Scan records.
//!
//! Every write after creation is conditional on the record still being
//! active (`pending` or `running`), so a terminal scan is never modified.

use crate::error::{DatabaseError, Result};
use crate::timestamp;
use chrono::{DateTime, Utc};
use crumb_core::model::{Findings, Scan, ScanConfig, ScanProgress, ScanStats, ScanStatus};
use crumb_core::ScanId;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

const COLUMNS: &str = "id, domain_id, domain, status, config, progress, findings, stats, error, created_at, updated_at";

fn from_row(row: &SqliteRow) -> Result<Scan> {
    let id: String = row.try_get("id")?;
    let status_str: String = row.try_get("status")?;
    let status = ScanStatus::parse(&status_str)
        .ok_or_else(|| DatabaseError::Decode(format!("invalid scan status '{status_str}'")))?;

    let config_str: String = row.try_get("config")?;
    let progress_str: String = row.try_get("progress")?;
    let findings_str: Option<String> = row.try_get("findings")?;
    let stats_str: Option<String> = row.try_get("stats")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    let progress_raw = serde_json::from_str(&progress_str).unwrap_or(serde_json::Value::Null);

    Ok(Scan {
        id: ScanId::new(id).map_err(|e| DatabaseError::Decode(e.to_string()))?,
        domain_id: row.try_get("domain_id")?,
        domain: row.try_get("domain")?,
        status,
        config: serde_json::from_str::<ScanConfig>(&config_str)
            .map_err(|e| DatabaseError::Decode(format!("invalid scan config: {e}")))?,
        progress: ScanProgress::normalize(&progress_raw, status),
        findings: findings_str
            .map(|s| serde_json::from_str::<Findings>(&s))
            .transpose()
            .map_err(|e| DatabaseError::Decode(format!("invalid findings: {e}")))?,
        stats: stats_str
            .map(|s| serde_json::from_str::<ScanStats>(&s))
            .transpose()
            .map_err(|e| DatabaseError::Decode(format!("invalid stats: {e}")))?,
        error: row.try_get("error")?,
        created_at: timestamp::decode(&created_at)?,
        updated_at: timestamp::decode(&updated_at)?,
    })
}

fn progress_json(progress: &ScanProgress) -> Result<String> {
    Ok(serde_json::to_string(&progress.clone().normalized())?)
}

/// Insert a new `pending` scan.
///
/// Fails with [`DatabaseError::Conflict`] when the domain already has an
/// active scan.
pub async fn create(
    pool: &SqlitePool,
    domain_id: &str,
    domain: &str,
    config: &ScanConfig,
    now: DateTime<Utc>,
) -> Result<Scan> {
    let id = ScanId::generate();
    let now = timestamp::stored(now);
    let progress = ScanProgress::default();

    sqlx::query(
        "INSERT INTO scans (id, domain_id, domain, status, config, progress, created_at, updated_at)
         VALUES (?, ?, ?, 'pending', ?, ?, ?, ?)",
    )
    .bind(id.as_str())
    .bind(domain_id)
    .bind(domain)
    .bind(serde_json::to_string(config)?)
    .bind(progress_json(&progress)?)
    .bind(timestamp::encode(now))
    .bind(timestamp::encode(now))
    .execute(pool)
    .await
    .map_err(|e| DatabaseError::from_insert(e, &format!("active scan exists for domain {domain_id}")))?;

    Ok(Scan {
        id,
        domain_id: domain_id.to_string(),
        domain: domain.to_string(),
        status: ScanStatus::Pending,
        config: config.clone(),
        progress,
        findings: None,
        stats: None,
        error: None,
        created_at: now,
        updated_at: now,
    })
}

/// Get a scan by id.
pub async fn get(pool: &SqlitePool, id: &str) -> Result<Option<Scan>> {
    let row = sqlx::query(&format!("SELECT {COLUMNS} FROM scans WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(from_row).transpose()
}

/// The pending or running scan for a domain, if any.
pub async fn find_active_for_domain(pool: &SqlitePool, domain_id: &str) -> Result<Option<Scan>> {
    let row = sqlx::query(&format!(
        "SELECT {COLUMNS} FROM scans
         WHERE domain_id = ? AND status IN ('pending', 'running')
         ORDER BY created_at DESC LIMIT 1"
    ))
    .bind(domain_id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(from_row).transpose()
}

/// Most recent scans for a domain, newest first.
pub async fn list_for_domain(pool: &SqlitePool, domain_id: &str, limit: u32) -> Result<Vec<Scan>> {
    let rows = sqlx::query(&format!(
        "SELECT {COLUMNS} FROM scans WHERE domain_id = ? ORDER BY created_at DESC LIMIT ?"
    ))
    .bind(domain_id)
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;
    rows.iter().map(from_row).collect()
}

/// `pending -> running` with the initial progress snapshot.
pub async fn mark_running(
    pool: &SqlitePool,
    id: &str,
    progress: &ScanProgress,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE scans SET status = 'running', progress = ?, updated_at = ?
         WHERE id = ? AND status = 'pending'",
    )
    .bind(progress_json(progress)?)
    .bind(timestamp::encode(now))
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Persist a progress snapshot.
///
/// Returns `false` when the scan is no longer active and nothing was written.
pub async fn update_progress(
    pool: &SqlitePool,
    id: &str,
    progress: &ScanProgress,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE scans SET progress = ?, updated_at = ?
         WHERE id = ? AND status IN ('pending', 'running')",
    )
    .bind(progress_json(progress)?)
    .bind(timestamp::encode(now))
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Move an active scan to `completed` with its findings and stats.
pub async fn complete(
    pool: &SqlitePool,
    id: &str,
    progress: &ScanProgress,
    findings: &Findings,
    stats: &ScanStats,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE scans SET status = 'completed', progress = ?, findings = ?, stats = ?, error = NULL, updated_at = ?
         WHERE id = ? AND status IN ('pending', 'running')",
    )
    .bind(progress_json(progress)?)
    .bind(serde_json::to_string(findings)?)
    .bind(serde_json::to_string(stats)?)
    .bind(timestamp::encode(now))
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Move an active scan to `error` or `cancelled`, recording `message`.
pub async fn terminate(
    pool: &SqlitePool,
    id: &str,
    status: ScanStatus,
    progress: &ScanProgress,
    message: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    if !matches!(status, ScanStatus::Error | ScanStatus::Cancelled) {
        return Err(DatabaseError::Conflict(format!(
            "cannot terminate scan with status {status}"
        )));
    }
    let result = sqlx::query(
        "UPDATE scans SET status = ?, progress = ?, error = ?, updated_at = ?
         WHERE id = ? AND status IN ('pending', 'running')",
    )
    .bind(status.as_str())
    .bind(progress_json(progress)?)
    .bind(message)
    .bind(timestamp::encode(now))
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use chrono::Duration;

    async fn setup_test_db() -> Database {
        Database::in_memory().await.expect("create test database")
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let db = setup_test_db().await;
        let now = Utc::now();
        let scan = create(db.pool(), "d1", "example.com", &ScanConfig::default(), now)
            .await
            .expect("create scan");

        let loaded = get(db.pool(), scan.id.as_str()).await.unwrap().unwrap();
        assert_eq!(loaded.status, ScanStatus::Pending);
        assert_eq!(loaded.domain, "example.com");
        assert_eq!(loaded.created_at, scan.created_at);
        assert_eq!(loaded.config, ScanConfig::default());
        assert!(loaded.findings.is_none());
    }

    #[tokio::test]
    async fn test_second_active_scan_conflicts() {
        let db = setup_test_db().await;
        let now = Utc::now();
        create(db.pool(), "d1", "example.com", &ScanConfig::default(), now)
            .await
            .unwrap();

        let err = create(db.pool(), "d1", "example.com", &ScanConfig::default(), now)
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Conflict(_)));

        // Other domains are unaffected
        create(db.pool(), "d2", "example.org", &ScanConfig::default(), now)
            .await
            .expect("other domain");
    }

    #[tokio::test]
    async fn test_terminal_scan_frees_domain() {
        let db = setup_test_db().await;
        let now = Utc::now();
        let scan = create(db.pool(), "d1", "example.com", &ScanConfig::default(), now)
            .await
            .unwrap();
        assert!(terminate(
            db.pool(),
            scan.id.as_str(),
            ScanStatus::Cancelled,
            &ScanProgress::default(),
            "timeout",
            now
        )
        .await
        .unwrap());

        assert!(find_active_for_domain(db.pool(), "d1").await.unwrap().is_none());
        create(db.pool(), "d1", "example.com", &ScanConfig::default(), now)
            .await
            .expect("new scan after cancel");
    }

    #[tokio::test]
    async fn test_progress_write_rejected_after_terminal() {
        let db = setup_test_db().await;
        let now = Utc::now();
        let scan = create(db.pool(), "d1", "example.com", &ScanConfig::default(), now)
            .await
            .unwrap();
        let progress = ScanProgress::started(5, now);
        assert!(mark_running(db.pool(), scan.id.as_str(), &progress, now)
            .await
            .unwrap());
        assert!(!mark_running(db.pool(), scan.id.as_str(), &progress, now)
            .await
            .unwrap());

        let mut progress = progress;
        progress.urls_scanned = 2;
        assert!(update_progress(db.pool(), scan.id.as_str(), &progress, now)
            .await
            .unwrap());

        let mut cancelled = progress.clone();
        cancelled.finish(ScanStatus::Cancelled, now + Duration::seconds(1));
        assert!(terminate(
            db.pool(),
            scan.id.as_str(),
            ScanStatus::Cancelled,
            &cancelled,
            "Cancelled by user",
            now
        )
        .await
        .unwrap());

        progress.urls_scanned = 3;
        assert!(!update_progress(db.pool(), scan.id.as_str(), &progress, now)
            .await
            .unwrap());

        let loaded = get(db.pool(), scan.id.as_str()).await.unwrap().unwrap();
        assert_eq!(loaded.status, ScanStatus::Cancelled);
        assert_eq!(loaded.progress.urls_scanned, 2);
        assert_eq!(loaded.progress.duration, Some(1000));
        assert_eq!(loaded.error.as_deref(), Some("Cancelled by user"));
    }

    #[tokio::test]
    async fn test_complete_persists_findings() {
        let db = setup_test_db().await;
        let now = Utc::now();
        let scan = create(db.pool(), "d1", "example.com", &ScanConfig::default(), now)
            .await
            .unwrap();

        let mut progress = ScanProgress::started(1, now);
        progress.finish(ScanStatus::Completed, now);
        let findings = Findings::default();
        let stats = ScanStats::default();
        assert!(complete(db.pool(), scan.id.as_str(), &progress, &findings, &stats, now)
            .await
            .unwrap());
        assert!(!complete(db.pool(), scan.id.as_str(), &progress, &findings, &stats, now)
            .await
            .unwrap());

        let loaded = get(db.pool(), scan.id.as_str()).await.unwrap().unwrap();
        assert_eq!(loaded.status, ScanStatus::Completed);
        assert_eq!(loaded.progress.percentage, 100);
        assert!(loaded.findings.is_some());
        assert!(loaded.stats.is_some());
    }

    #[tokio::test]
    async fn test_malformed_progress_is_normalized_on_read() {
        let db = setup_test_db().await;
        let scan = create(db.pool(), "d1", "example.com", &ScanConfig::default(), Utc::now())
            .await
            .unwrap();
        sqlx::query("UPDATE scans SET progress = 'not json' WHERE id = ?")
            .bind(scan.id.as_str())
            .execute(db.pool())
            .await
            .unwrap();

        let loaded = get(db.pool(), scan.id.as_str()).await.unwrap().unwrap();
        assert_eq!(loaded.progress.percentage, 0);
        assert_eq!(loaded.progress.status, ScanStatus::Pending);
    }

    #[tokio::test]
    async fn test_terminate_rejects_non_terminal_status() {
        let db = setup_test_db().await;
        let result = terminate(
            db.pool(),
            "whatever",
            ScanStatus::Running,
            &ScanProgress::default(),
            "",
            Utc::now(),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_list_for_domain_newest_first() {
        let db = setup_test_db().await;
        let t0 = Utc::now();
        let first = create(db.pool(), "d1", "example.com", &ScanConfig::default(), t0)
            .await
            .unwrap();
        terminate(
            db.pool(),
            first.id.as_str(),
            ScanStatus::Error,
            &ScanProgress::default(),
            "boom",
            t0,
        )
        .await
        .unwrap();
        let second = create(
            db.pool(),
            "d1",
            "example.com",
            &ScanConfig::default(),
            t0 + Duration::seconds(5),
        )
        .await
        .unwrap();

        let scans = list_for_domain(db.pool(), "d1", 10).await.unwrap();
        assert_eq!(scans.len(), 2);
        assert_eq!(scans[0].id, second.id);
    }
}

//! Analysis jobs and their append-only logs.

use crate::error::{DatabaseError, Result};
use crate::timestamp;
use chrono::{DateTime, Utc};
use crumb_core::model::{
    Analysis, AnalysisConfiguration, AnalysisResults, AnalysisStatus, LogEntry, LogLevel,
};
use crumb_core::AnalysisId;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

const COLUMNS: &str = "id, domain_id, domain, status, progress, current_step, configuration, results, error, created_at, started_at, completed_at";

fn from_row(row: &SqliteRow, logs: Vec<LogEntry>) -> Result<Analysis> {
    let id: String = row.try_get("id")?;
    let status_str: String = row.try_get("status")?;
    let status = AnalysisStatus::parse(&status_str)
        .ok_or_else(|| DatabaseError::Decode(format!("invalid analysis status '{status_str}'")))?;
    let progress: i64 = row.try_get("progress")?;
    let configuration: String = row.try_get("configuration")?;
    let results: Option<String> = row.try_get("results")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(Analysis {
        id: AnalysisId::new(id).map_err(|e| DatabaseError::Decode(e.to_string()))?,
        domain_id: row.try_get("domain_id")?,
        domain: row.try_get("domain")?,
        status,
        progress: u8::try_from(progress.clamp(0, 100)).unwrap_or(0),
        current_step: row.try_get("current_step")?,
        configuration: serde_json::from_str::<AnalysisConfiguration>(&configuration)
            .map_err(|e| DatabaseError::Decode(format!("invalid configuration: {e}")))?,
        results: results
            .map(|s| serde_json::from_str::<AnalysisResults>(&s))
            .transpose()
            .map_err(|e| DatabaseError::Decode(format!("invalid results: {e}")))?,
        error: row.try_get("error")?,
        logs,
        created_at: timestamp::decode(&created_at)?,
        started_at: timestamp::decode_opt(row.try_get("started_at")?)?,
        completed_at: timestamp::decode_opt(row.try_get("completed_at")?)?,
    })
}

/// Insert a new `pending` analysis.
///
/// Fails with [`DatabaseError::Conflict`] when the domain already has an
/// active analysis.
pub async fn create(
    pool: &SqlitePool,
    domain_id: &str,
    domain: &str,
    configuration: &AnalysisConfiguration,
    now: DateTime<Utc>,
) -> Result<Analysis> {
    let id = AnalysisId::generate();
    let now = timestamp::stored(now);

    sqlx::query(
        "INSERT INTO analyses (id, domain_id, domain, status, progress, configuration, created_at)
         VALUES (?, ?, ?, 'pending', 0, ?, ?)",
    )
    .bind(id.as_str())
    .bind(domain_id)
    .bind(domain)
    .bind(serde_json::to_string(configuration)?)
    .bind(timestamp::encode(now))
    .execute(pool)
    .await
    .map_err(|e| {
        DatabaseError::from_insert(e, &format!("active analysis exists for domain {domain_id}"))
    })?;

    Ok(Analysis {
        id,
        domain_id: domain_id.to_string(),
        domain: domain.to_string(),
        status: AnalysisStatus::Pending,
        progress: 0,
        current_step: None,
        configuration: configuration.clone(),
        results: None,
        error: None,
        logs: Vec::new(),
        created_at: now,
        started_at: None,
        completed_at: None,
    })
}

/// Get an analysis with its logs.
pub async fn get(pool: &SqlitePool, id: &str) -> Result<Option<Analysis>> {
    let row = sqlx::query(&format!("SELECT {COLUMNS} FROM analyses WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    match row {
        Some(row) => {
            let logs = logs(pool, id).await?;
            Ok(Some(from_row(&row, logs)?))
        }
        None => Ok(None),
    }
}

/// Just the status, for cheap cancellation checks.
pub async fn status(pool: &SqlitePool, id: &str) -> Result<Option<AnalysisStatus>> {
    let status: Option<String> = sqlx::query_scalar("SELECT status FROM analyses WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    status
        .map(|s| {
            AnalysisStatus::parse(&s)
                .ok_or_else(|| DatabaseError::Decode(format!("invalid analysis status '{s}'")))
        })
        .transpose()
}

/// The pending or running analysis for a domain, if any.
pub async fn find_active_for_domain(pool: &SqlitePool, domain_id: &str) -> Result<Option<Analysis>> {
    let id: Option<String> = sqlx::query_scalar(
        "SELECT id FROM analyses
         WHERE domain_id = ? AND status IN ('pending', 'running')
         ORDER BY created_at DESC LIMIT 1",
    )
    .bind(domain_id)
    .fetch_optional(pool)
    .await?;
    match id {
        Some(id) => get(pool, &id).await,
        None => Ok(None),
    }
}

/// Atomically claim the oldest pending analysis, moving it to `running`.
///
/// Ties on `created_at` resolve by insertion order.
pub async fn claim_next_pending(pool: &SqlitePool, now: DateTime<Utc>) -> Result<Option<Analysis>> {
    let claimed: Option<String> = sqlx::query_scalar(
        "UPDATE analyses
         SET status = 'running', started_at = ?, progress = 0
         WHERE id = (
             SELECT id FROM analyses
             WHERE status = 'pending'
             ORDER BY created_at ASC, rowid ASC
             LIMIT 1
         )
         AND status = 'pending'
         RETURNING id",
    )
    .bind(timestamp::encode(now))
    .fetch_optional(pool)
    .await?;

    match claimed {
        Some(id) => get(pool, &id).await,
        None => Ok(None),
    }
}

/// Record a milestone. Progress never moves backwards.
///
/// Returns `false` when the analysis is no longer running.
pub async fn update_progress(
    pool: &SqlitePool,
    id: &str,
    progress: u8,
    current_step: &str,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE analyses SET progress = MAX(progress, ?), current_step = ?
         WHERE id = ? AND status = 'running'",
    )
    .bind(i64::from(progress.min(100)))
    .bind(current_step)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Append one log entry.
pub async fn append_log(pool: &SqlitePool, id: &str, entry: &LogEntry) -> Result<()> {
    let data = entry.data.as_ref().map(serde_json::to_string).transpose()?;
    sqlx::query(
        "INSERT INTO analysis_logs (analysis_id, timestamp, level, message, data)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(timestamp::encode(entry.timestamp))
    .bind(entry.level.as_str())
    .bind(&entry.message)
    .bind(data)
    .execute(pool)
    .await?;
    Ok(())
}

/// Log entries in append order.
pub async fn logs(pool: &SqlitePool, id: &str) -> Result<Vec<LogEntry>> {
    let rows = sqlx::query(
        "SELECT timestamp, level, message, data FROM analysis_logs WHERE analysis_id = ? ORDER BY id",
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        let timestamp: String = row.try_get("timestamp")?;
        let level: String = row.try_get("level")?;
        let data: Option<String> = row.try_get("data")?;
        entries.push(LogEntry {
            timestamp: timestamp::decode(&timestamp)?,
            level: LogLevel::parse(&level),
            message: row.try_get("message")?,
            data: data.and_then(|d| serde_json::from_str(&d).ok()),
        });
    }
    Ok(entries)
}

/// `running -> completed` with results; progress is forced to 100.
pub async fn mark_completed(
    pool: &SqlitePool,
    id: &str,
    results: &AnalysisResults,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE analyses
         SET status = 'completed', progress = 100, current_step = 'Completed', results = ?, completed_at = ?
         WHERE id = ? AND status IN ('pending', 'running')",
    )
    .bind(serde_json::to_string(results)?)
    .bind(timestamp::encode(now))
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Move an active analysis to `error`.
pub async fn mark_error(pool: &SqlitePool, id: &str, error: &str, now: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE analyses SET status = 'error', error = ?, completed_at = ?
         WHERE id = ? AND status IN ('pending', 'running')",
    )
    .bind(error)
    .bind(timestamp::encode(now))
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Move an active analysis to `cancelled`.
pub async fn cancel(pool: &SqlitePool, id: &str, reason: &str, now: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE analyses SET status = 'cancelled', error = ?, completed_at = ?
         WHERE id = ? AND status IN ('pending', 'running')",
    )
    .bind(reason)
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
    async fn test_claim_is_fifo() {
        let db = setup_test_db().await;
        let t1 = Utc::now();
        let first = create(db.pool(), "d1", "a.test", &AnalysisConfiguration::default(), t1)
            .await
            .unwrap();
        let second = create(
            db.pool(),
            "d2",
            "b.test",
            &AnalysisConfiguration::default(),
            t1 + Duration::seconds(1),
        )
        .await
        .unwrap();

        let claimed = claim_next_pending(db.pool(), t1).await.unwrap().unwrap();
        assert_eq!(claimed.id, first.id);
        assert_eq!(claimed.status, AnalysisStatus::Running);
        assert!(claimed.started_at.is_some());

        let claimed = claim_next_pending(db.pool(), t1).await.unwrap().unwrap();
        assert_eq!(claimed.id, second.id);

        assert!(claim_next_pending(db.pool(), t1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_same_timestamp_uses_insertion_order() {
        let db = setup_test_db().await;
        let t = Utc::now();
        let first = create(db.pool(), "d1", "a.test", &AnalysisConfiguration::default(), t)
            .await
            .unwrap();
        create(db.pool(), "d2", "b.test", &AnalysisConfiguration::default(), t)
            .await
            .unwrap();

        let claimed = claim_next_pending(db.pool(), t).await.unwrap().unwrap();
        assert_eq!(claimed.id, first.id);
    }

    #[tokio::test]
    async fn test_progress_is_monotonic() {
        let db = setup_test_db().await;
        let now = Utc::now();
        let analysis = create(db.pool(), "d1", "a.test", &AnalysisConfiguration::default(), now)
            .await
            .unwrap();

        // Not running yet
        assert!(!update_progress(db.pool(), analysis.id.as_str(), 10, "Validating")
            .await
            .unwrap());

        claim_next_pending(db.pool(), now).await.unwrap();
        assert!(update_progress(db.pool(), analysis.id.as_str(), 60, "Classifying")
            .await
            .unwrap());
        assert!(update_progress(db.pool(), analysis.id.as_str(), 30, "Crawling")
            .await
            .unwrap());

        let loaded = get(db.pool(), analysis.id.as_str()).await.unwrap().unwrap();
        assert_eq!(loaded.progress, 60);
        assert_eq!(loaded.current_step.as_deref(), Some("Crawling"));
    }

    #[tokio::test]
    async fn test_logs_append_in_order() {
        let db = setup_test_db().await;
        let analysis = create(
            db.pool(),
            "d1",
            "a.test",
            &AnalysisConfiguration::default(),
            Utc::now(),
        )
        .await
        .unwrap();

        append_log(db.pool(), analysis.id.as_str(), &LogEntry::new(LogLevel::Info, "one"))
            .await
            .unwrap();
        append_log(
            db.pool(),
            analysis.id.as_str(),
            &LogEntry::new(LogLevel::Warn, "two").with_data(serde_json::json!({"n": 2})),
        )
        .await
        .unwrap();

        let loaded = get(db.pool(), analysis.id.as_str()).await.unwrap().unwrap();
        let messages: Vec<&str> = loaded.logs.iter().map(|l| l.message.as_str()).collect();
        assert_eq!(messages, vec!["one", "two"]);
        assert_eq!(loaded.logs[1].level, LogLevel::Warn);
        assert_eq!(loaded.logs[1].data, Some(serde_json::json!({"n": 2})));
    }

    #[tokio::test]
    async fn test_terminal_states_are_final() {
        let db = setup_test_db().await;
        let now = Utc::now();
        let analysis = create(db.pool(), "d1", "a.test", &AnalysisConfiguration::default(), now)
            .await
            .unwrap();
        claim_next_pending(db.pool(), now).await.unwrap();

        assert!(cancel(db.pool(), analysis.id.as_str(), "Cancelled by user", now)
            .await
            .unwrap());
        assert!(!mark_completed(db.pool(), analysis.id.as_str(), &AnalysisResults::default(), now)
            .await
            .unwrap());
        assert!(!mark_error(db.pool(), analysis.id.as_str(), "late", now)
            .await
            .unwrap());

        assert_eq!(
            status(db.pool(), analysis.id.as_str()).await.unwrap(),
            Some(AnalysisStatus::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_completed_sets_progress_and_results() {
        let db = setup_test_db().await;
        let now = Utc::now();
        let analysis = create(db.pool(), "d1", "a.test", &AnalysisConfiguration::default(), now)
            .await
            .unwrap();
        claim_next_pending(db.pool(), now).await.unwrap();

        let results = AnalysisResults {
            total_cookies: 3,
            new_cookies: 2,
            updated_cookies: 1,
            ..AnalysisResults::default()
        };
        assert!(mark_completed(db.pool(), analysis.id.as_str(), &results, now)
            .await
            .unwrap());

        let loaded = get(db.pool(), analysis.id.as_str()).await.unwrap().unwrap();
        assert_eq!(loaded.progress, 100);
        assert_eq!(loaded.results, Some(results));
        assert!(loaded.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_one_active_per_domain() {
        let db = setup_test_db().await;
        let now = Utc::now();
        create(db.pool(), "d1", "a.test", &AnalysisConfiguration::default(), now)
            .await
            .unwrap();
        let err = create(db.pool(), "d1", "a.test", &AnalysisConfiguration::default(), now)
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Conflict(_)));
        assert!(find_active_for_domain(db.pool(), "d1").await.unwrap().is_some());
    }
}

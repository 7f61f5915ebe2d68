//! Baseline cookies, unique per `(domain_id, name)`.

use crate::error::{DatabaseError, Result};
use crate::timestamp;
use chrono::{DateTime, Utc};
use crumb_core::model::{BaselineCookie, CookieCategory, CookieInput, CookieStatus, Detection};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

const COLUMNS: &str = "id, domain_id, name, domain, value, category, provider, duration_days, expires, secure, http_only, same_site, path, detection_method, first_detected, last_seen, status";

/// Whether an upsert created a row or refreshed an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

fn from_row(row: &SqliteRow) -> Result<BaselineCookie> {
    let category: String = row.try_get("category")?;
    let status: String = row.try_get("status")?;
    let first_detected: String = row.try_get("first_detected")?;
    let last_seen: String = row.try_get("last_seen")?;

    Ok(BaselineCookie {
        id: row.try_get("id")?,
        domain_id: row.try_get("domain_id")?,
        name: row.try_get("name")?,
        domain: row.try_get("domain")?,
        value: row.try_get("value")?,
        category: CookieCategory::parse(&category),
        provider: row.try_get("provider")?,
        duration_days: row.try_get("duration_days")?,
        expires: timestamp::decode_opt(row.try_get("expires")?)?,
        secure: row.try_get("secure")?,
        http_only: row.try_get("http_only")?,
        same_site: row.try_get("same_site")?,
        path: row.try_get("path")?,
        detection: Detection {
            method: row.try_get("detection_method")?,
            first_detected: timestamp::decode(&first_detected)?,
            last_seen: timestamp::decode(&last_seen)?,
        },
        status: CookieStatus::parse(&status),
    })
}

/// Active baseline cookies for a domain, ordered by name.
pub async fn list_active(pool: &SqlitePool, domain_id: &str) -> Result<Vec<BaselineCookie>> {
    let rows = sqlx::query(&format!(
        "SELECT {COLUMNS} FROM cookies WHERE domain_id = ? AND status = 'active' ORDER BY name"
    ))
    .bind(domain_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(from_row).collect()
}

pub async fn get(pool: &SqlitePool, id: &str) -> Result<Option<BaselineCookie>> {
    let row = sqlx::query(&format!("SELECT {COLUMNS} FROM cookies WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(from_row).transpose()
}

/// Insert or refresh a cookie by name within a domain.
///
/// A refreshed cookie keeps its id and `first_detected`, and becomes active.
pub async fn upsert(
    pool: &SqlitePool,
    domain_id: &str,
    input: &CookieInput,
    method: &str,
    now: DateTime<Utc>,
) -> Result<(BaselineCookie, UpsertOutcome)> {
    let now_str = timestamp::encode(now);
    let mut tx = pool.begin().await?;

    let existing: Option<String> =
        sqlx::query_scalar("SELECT id FROM cookies WHERE domain_id = ? AND name = ?")
            .bind(domain_id)
            .bind(&input.name)
            .fetch_optional(&mut *tx)
            .await?;

    let (id, outcome) = if let Some(id) = existing {
        sqlx::query(
            "UPDATE cookies SET domain = ?, value = ?, category = ?, provider = ?, duration_days = ?,
                 expires = ?, secure = ?, http_only = ?, same_site = ?, path = ?,
                 detection_method = ?, last_seen = ?, status = 'active', updated_at = ?
             WHERE id = ?",
        )
        .bind(&input.domain)
        .bind(&input.value)
        .bind(input.category.as_str())
        .bind(&input.provider)
        .bind(input.duration_days)
        .bind(input.expires.map(timestamp::encode))
        .bind(input.secure)
        .bind(input.http_only)
        .bind(&input.same_site)
        .bind(&input.path)
        .bind(method)
        .bind(&now_str)
        .bind(&now_str)
        .bind(&id)
        .execute(&mut *tx)
        .await?;
        (id, UpsertOutcome::Updated)
    } else {
        let id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO cookies (id, domain_id, name, domain, value, category, provider, duration_days,
                 expires, secure, http_only, same_site, path, detection_method, first_detected,
                 last_seen, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'active', ?, ?)",
        )
        .bind(&id)
        .bind(domain_id)
        .bind(&input.name)
        .bind(&input.domain)
        .bind(&input.value)
        .bind(input.category.as_str())
        .bind(&input.provider)
        .bind(input.duration_days)
        .bind(input.expires.map(timestamp::encode))
        .bind(input.secure)
        .bind(input.http_only)
        .bind(&input.same_site)
        .bind(&input.path)
        .bind(method)
        .bind(&now_str)
        .bind(&now_str)
        .bind(&now_str)
        .bind(&now_str)
        .execute(&mut *tx)
        .await?;
        (id, UpsertOutcome::Inserted)
    };

    tx.commit().await?;

    let cookie = get(pool, &id).await?.ok_or(DatabaseError::NotFound)?;
    Ok((cookie, outcome))
}

/// Overwrite a cookie's attributes by id. Returns `false` if no such cookie.
pub async fn update_by_id(
    pool: &SqlitePool,
    id: &str,
    input: &CookieInput,
    now: DateTime<Utc>,
) -> Result<bool> {
    let now_str = timestamp::encode(now);
    let result = sqlx::query(
        "UPDATE cookies SET name = ?, domain = ?, value = ?, category = ?, provider = ?,
             duration_days = ?, expires = ?, secure = ?, http_only = ?, same_site = ?, path = ?,
             last_seen = ?, updated_at = ?
         WHERE id = ?",
    )
    .bind(&input.name)
    .bind(&input.domain)
    .bind(&input.value)
    .bind(input.category.as_str())
    .bind(&input.provider)
    .bind(input.duration_days)
    .bind(input.expires.map(timestamp::encode))
    .bind(input.secure)
    .bind(input.http_only)
    .bind(&input.same_site)
    .bind(&input.path)
    .bind(&now_str)
    .bind(&now_str)
    .bind(id)
    .execute(pool)
    .await
    .map_err(|e| DatabaseError::from_insert(e, &format!("cookie name '{}' already used", input.name)))?;
    Ok(result.rows_affected() == 1)
}

/// Remove a cookie by id. Returns `false` if no such cookie.
pub async fn delete_by_id(pool: &SqlitePool, id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM cookies WHERE id = ?")
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

    fn input(name: &str, value: &str) -> CookieInput {
        CookieInput {
            name: name.to_string(),
            domain: ".example.com".to_string(),
            value: Some(value.to_string()),
            category: CookieCategory::Marketing,
            provider: Some("Facebook".to_string()),
            duration_days: Some(90),
            expires: None,
            secure: true,
            http_only: false,
            same_site: Some("Lax".to_string()),
            path: "/".to_string(),
        }
    }

    #[tokio::test]
    async fn test_upsert_inserts_then_updates() {
        let db = setup_test_db().await;
        let t0 = Utc::now();

        let (first, outcome) = upsert(db.pool(), "d1", &input("_fbp", "A"), "scan", t0)
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Inserted);
        assert_eq!(first.value.as_deref(), Some("A"));

        let (second, outcome) = upsert(
            db.pool(),
            "d1",
            &input("_fbp", "B"),
            "analysis",
            t0 + Duration::minutes(1),
        )
        .await
        .unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated);
        assert_eq!(second.id, first.id);
        assert_eq!(second.value.as_deref(), Some("B"));
        assert_eq!(second.detection.first_detected, first.detection.first_detected);
        assert!(second.detection.last_seen > first.detection.last_seen);
        assert_eq!(second.detection.method, "analysis");
    }

    #[tokio::test]
    async fn test_list_active_is_scoped_to_domain() {
        let db = setup_test_db().await;
        let now = Utc::now();
        upsert(db.pool(), "d1", &input("_fbp", "A"), "scan", now)
            .await
            .unwrap();
        upsert(db.pool(), "d1", &input("_ga", "GA1.2.3.4"), "scan", now)
            .await
            .unwrap();
        upsert(db.pool(), "d2", &input("_ga", "GA1.2.3.4"), "scan", now)
            .await
            .unwrap();

        let names: Vec<String> = list_active(db.pool(), "d1")
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["_fbp", "_ga"]);

        sqlx::query("UPDATE cookies SET status = 'inactive' WHERE name = '_fbp'")
            .execute(db.pool())
            .await
            .unwrap();
        assert_eq!(list_active(db.pool(), "d1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_and_delete_by_id() {
        let db = setup_test_db().await;
        let now = Utc::now();
        let (cookie, _) = upsert(db.pool(), "d1", &input("_fbp", "A"), "scan", now)
            .await
            .unwrap();

        let mut changed = input("_fbp", "A");
        changed.category = CookieCategory::Advertising;
        assert!(update_by_id(db.pool(), &cookie.id, &changed, now).await.unwrap());
        let loaded = get(db.pool(), &cookie.id).await.unwrap().unwrap();
        assert_eq!(loaded.category, CookieCategory::Advertising);

        assert!(delete_by_id(db.pool(), &cookie.id).await.unwrap());
        assert!(!delete_by_id(db.pool(), &cookie.id).await.unwrap());
        assert!(!update_by_id(db.pool(), &cookie.id, &changed, now).await.unwrap());
    }

    #[tokio::test]
    async fn test_expires_round_trip() {
        let db = setup_test_db().await;
        let now = timestamp::stored(Utc::now());
        let mut with_expiry = input("_fbp", "A");
        with_expiry.expires = Some(now + Duration::days(90));

        let (cookie, _) = upsert(db.pool(), "d1", &with_expiry, "scan", now)
            .await
            .unwrap();
        assert_eq!(cookie.expires, with_expiry.expires);
    }
}

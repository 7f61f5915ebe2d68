use super::findings::{CookieCategory, ObservedCookie};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether a baseline cookie is still expected on the site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CookieStatus {
    #[default]
    Active,
    Inactive,
}

impl CookieStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Self {
        if s == "inactive" {
            Self::Inactive
        } else {
            Self::Active
        }
    }
}

/// How and when a baseline cookie was detected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    /// `scan`, `analysis` or `manual`
    pub method: String,
    pub first_detected: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// A persisted, previously known cookie of a domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaselineCookie {
    pub id: String,
    pub domain_id: String,
    pub name: String,
    /// Cookie `Domain` attribute
    pub domain: String,
    pub value: Option<String>,
    pub category: CookieCategory,
    pub provider: Option<String>,
    pub duration_days: Option<i64>,
    pub expires: Option<DateTime<Utc>>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<String>,
    pub path: String,
    pub detection: Detection,
    pub status: CookieStatus,
}

/// Caller-supplied cookie attributes for baseline writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieInput {
    pub name: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub category: CookieCategory,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub duration_days: Option<i64>,
    #[serde(default)]
    pub expires: Option<DateTime<Utc>>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub same_site: Option<String>,
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_path() -> String {
    "/".to_string()
}

impl CookieInput {
    /// Build baseline attributes from a crawl observation.
    #[must_use]
    pub fn from_observed(cookie: &ObservedCookie, now: DateTime<Utc>) -> Self {
        Self {
            name: cookie.name.clone(),
            domain: cookie.domain.clone(),
            value: Some(cookie.value.clone()),
            category: cookie.category,
            provider: cookie.provider.clone(),
            duration_days: cookie.duration_days(now),
            expires: cookie.expires,
            secure: cookie.secure,
            http_only: cookie.http_only,
            same_site: cookie.same_site.clone(),
            path: cookie.path.clone(),
        }
    }
}

/// One entry of an apply-changes request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CookieChangeRequest {
    /// Insert, or update the cookie with the same name
    Add { cookie: CookieInput },
    /// Overwrite an existing baseline cookie
    #[serde(rename_all = "camelCase")]
    Update {
        cookie_id: String,
        cookie: CookieInput,
    },
    /// Remove a baseline cookie
    #[serde(rename_all = "camelCase")]
    Delete { cookie_id: String },
}

use super::cookie::BaselineCookie;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Purpose category of a cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CookieCategory {
    Necessary,
    Functionality,
    Analytics,
    Marketing,
    Advertising,
    #[default]
    Unknown,
}

impl CookieCategory {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Necessary => "necessary",
            Self::Functionality => "functionality",
            Self::Analytics => "analytics",
            Self::Marketing => "marketing",
            Self::Advertising => "advertising",
            Self::Unknown => "unknown",
        }
    }

    /// Lenient parse; anything unrecognised is `Unknown`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "necessary" | "essential" | "strictly_necessary" => Self::Necessary,
            "functionality" | "functional" | "preferences" => Self::Functionality,
            "analytics" | "statistics" | "performance" => Self::Analytics,
            "marketing" => Self::Marketing,
            "advertising" | "ads" => Self::Advertising,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for CookieCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a cookie observation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CookieSource {
    /// Read from the browser cookie jar after the page settled
    #[default]
    Jar,
    /// Parsed from a `Set-Cookie` response header
    Header,
}

/// A cookie seen during a crawl.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub expires: Option<DateTime<Utc>>,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: Option<String>,
    pub source: CookieSource,
    /// Page on which the cookie was first observed
    pub url: String,
    #[serde(default)]
    pub category: CookieCategory,
    #[serde(default)]
    pub provider: Option<String>,
}

impl ObservedCookie {
    /// Remaining lifetime in whole days, `None` for session cookies.
    #[must_use]
    pub fn duration_days(&self, now: DateTime<Utc>) -> Option<i64> {
        self.expires.map(|expires| (expires - now).num_days().max(0))
    }
}

/// A script loaded by a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptFinding {
    /// `None` for inline scripts
    pub src: Option<String>,
    pub host: Option<String>,
    pub inline: bool,
    /// Body length in bytes, when captured
    pub size: Option<usize>,
    pub category: String,
    pub provider: Option<String>,
    pub page_url: String,
}

/// An outbound request recognised as a tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerFinding {
    pub url: String,
    pub host: String,
    pub tracker_type: String,
    pub resource_type: Option<String>,
    pub page_url: String,
}

/// Which web storage area an entry lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Local,
    Session,
}

/// A tracking-related web storage entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageEntry {
    pub key: String,
    /// Truncated value
    pub value: String,
    pub kind: StorageKind,
    pub page_url: String,
}

/// Web storage entries kept after filtering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageFindings {
    pub local_storage: Vec<StorageEntry>,
    pub session_storage: Vec<StorageEntry>,
}

impl StorageFindings {
    #[must_use]
    pub fn len(&self) -> usize {
        self.local_storage.len() + self.session_storage.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Merge entries from another page, skipping keys already recorded.
    pub fn merge(&mut self, other: StorageFindings) {
        for entry in other.local_storage {
            if !self.local_storage.iter().any(|e| e.key == entry.key) {
                self.local_storage.push(entry);
            }
        }
        for entry in other.session_storage {
            if !self.session_storage.iter().any(|e| e.key == entry.key) {
                self.session_storage.push(entry);
            }
        }
    }
}

/// An embedded frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IframeFinding {
    pub src: String,
    pub host: Option<String>,
    pub third_party: bool,
    pub page_url: String,
}

/// A form and the kind of data it collects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormFinding {
    pub action: Option<String>,
    pub method: String,
    pub field_count: u32,
    pub has_email: bool,
    pub has_password: bool,
    pub page_url: String,
}

/// A detected consent management platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CmpData {
    pub name: String,
    /// Global variable that revealed the platform
    pub global: String,
    pub version: Option<String>,
    /// Whether the automatic consent acceptance clicked something
    #[serde(default)]
    pub consent_accepted: bool,
}

/// IAB TCF consent data read through `__tcfapi`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TcfData {
    pub tc_string: Option<String>,
    pub gdpr_applies: Option<bool>,
    pub cmp_id: Option<u32>,
    pub cmp_version: Option<u32>,
    #[serde(default)]
    pub purpose_consents: BTreeMap<u32, bool>,
    #[serde(default)]
    pub purpose_legitimate_interests: BTreeMap<u32, bool>,
    #[serde(default)]
    pub compliance_issues: Vec<String>,
}

/// One changed attribute of a modified cookie.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldChange {
    pub property: String,
    pub old: serde_json::Value,
    pub new: serde_json::Value,
}

/// A cookie present in both baseline and crawl with differing attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifiedCookie {
    pub name: String,
    pub baseline_id: String,
    pub cookie: ObservedCookie,
    pub changes: Vec<FieldChange>,
}

/// Result of comparing a crawl against the baseline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieChanges {
    pub new_cookies: Vec<ObservedCookie>,
    pub modified_cookies: Vec<ModifiedCookie>,
    pub removed_cookies: Vec<BaselineCookie>,
}

impl CookieChanges {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.new_cookies.is_empty()
            && self.modified_cookies.is_empty()
            && self.removed_cookies.is_empty()
    }
}

/// A URL that could not be inspected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlError {
    pub url: String,
    pub message: String,
    pub attempts: u32,
}

/// Bookkeeping about the crawl itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanMetadata {
    pub urls_scanned: u32,
    pub errors: Vec<UrlError>,
}

/// Everything a scan found.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Findings {
    pub cookies: Vec<ObservedCookie>,
    pub scripts: Vec<ScriptFinding>,
    pub trackers: Vec<TrackerFinding>,
    pub storage: StorageFindings,
    pub iframes: Vec<IframeFinding>,
    pub forms: Vec<FormFinding>,
    pub cmp_data: Option<CmpData>,
    pub tcf_data: Option<TcfData>,
    pub changes: CookieChanges,
    pub metadata: ScanMetadata,
}

/// Cookie aggregates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieStats {
    pub total: u32,
    pub by_category: BTreeMap<String, u32>,
    pub by_provider: BTreeMap<String, u32>,
    pub by_duration: BTreeMap<String, u32>,
}

/// Script aggregates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptStats {
    pub total: u32,
    pub by_type: BTreeMap<String, u32>,
    pub by_provider: BTreeMap<String, u32>,
}

/// Tracker aggregates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerStats {
    pub total: u32,
    pub by_type: BTreeMap<String, u32>,
    pub by_host: BTreeMap<String, u32>,
}

/// Aggregates stored alongside a completed scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStats {
    pub cookies: CookieStats,
    pub scripts: ScriptStats,
    pub trackers: TrackerStats,
    pub storage_entries: u32,
    pub iframes: u32,
    pub forms: u32,
    pub new_cookies: u32,
    pub modified_cookies: u32,
    pub removed_cookies: u32,
    pub has_cmp: bool,
    pub tcf_issues: u32,
    pub urls_errored: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_parse_is_lenient() {
        assert_eq!(CookieCategory::parse("Analytics"), CookieCategory::Analytics);
        assert_eq!(CookieCategory::parse("essential"), CookieCategory::Necessary);
        assert_eq!(CookieCategory::parse("bogus"), CookieCategory::Unknown);
    }

    #[test]
    fn test_category_serializes_lowercase() {
        let json = serde_json::to_string(&CookieCategory::Advertising).expect("serialize");
        assert_eq!(json, "\"advertising\"");
    }

    #[test]
    fn test_tcf_purpose_maps_accept_string_keys() {
        let tcf: TcfData = serde_json::from_str(
            r#"{"tcString":"CO1","gdprApplies":true,"cmpId":10,"cmpVersion":2,
                "purposeConsents":{"1":true,"3":false},
                "purposeLegitimateInterests":{"3":true}}"#,
        )
        .expect("parse tcf");
        assert_eq!(tcf.purpose_consents.get(&1), Some(&true));
        assert_eq!(tcf.purpose_legitimate_interests.get(&3), Some(&true));
    }

    #[test]
    fn test_storage_merge_skips_duplicate_keys() {
        let entry = |key: &str| StorageEntry {
            key: key.to_string(),
            value: "v".to_string(),
            kind: StorageKind::Local,
            page_url: "https://example.com".to_string(),
        };
        let mut storage = StorageFindings {
            local_storage: vec![entry("_ga_id")],
            session_storage: vec![],
        };
        storage.merge(StorageFindings {
            local_storage: vec![entry("_ga_id"), entry("amplitude_id")],
            session_storage: vec![],
        });
        assert_eq!(storage.len(), 2);
    }
}

use super::findings::{Findings, ScanStats};
use super::status::ScanStatus;
use crate::types::ScanId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound on the URL budget of a single scan.
pub const MAX_URLS_LIMIT: u32 = 500;

/// Upper bound on the path depth of a single scan.
pub const MAX_DEPTH_LIMIT: u32 = 10;

/// Kind of scan requested by the caller. Recorded verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScanType {
    /// Regular full crawl
    #[default]
    Full,
    /// Small crawl, typically a handful of pages
    Quick,
    /// Caller-tuned limits
    Custom,
}

/// Crawl limits for one scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanConfig {
    pub scan_type: ScanType,
    pub max_urls: u32,
    pub depth: u32,
    pub include_subdomains: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            scan_type: ScanType::Full,
            max_urls: 20,
            depth: 3,
            include_subdomains: false,
        }
    }
}

impl ScanConfig {
    /// Clamp limits into the supported range.
    #[must_use]
    pub fn clamped(mut self) -> Self {
        self.max_urls = self.max_urls.clamp(1, MAX_URLS_LIMIT);
        self.depth = self.depth.min(MAX_DEPTH_LIMIT);
        self
    }
}

/// Live progress of a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanProgress {
    /// 0..=100
    pub percentage: u8,
    pub urls_scanned: u32,
    pub urls_total: u32,
    pub current_url: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Milliseconds between `start_time` and `end_time`
    pub duration: Option<i64>,
    pub status: ScanStatus,
}

impl Default for ScanProgress {
    fn default() -> Self {
        Self {
            percentage: 0,
            urls_scanned: 0,
            urls_total: 0,
            current_url: None,
            start_time: None,
            end_time: None,
            duration: None,
            status: ScanStatus::Pending,
        }
    }
}

impl ScanProgress {
    /// Progress of a scan that just entered `running`.
    #[must_use]
    pub fn started(urls_total: u32, now: DateTime<Utc>) -> Self {
        Self {
            urls_total,
            start_time: Some(now),
            status: ScanStatus::Running,
            ..Self::default()
        }
    }

    /// Stamp a terminal status with end time and duration.
    pub fn finish(&mut self, status: ScanStatus, now: DateTime<Utc>) {
        self.status = status;
        self.end_time = Some(now);
        self.duration = self
            .start_time
            .map(|start| (now - start).num_milliseconds().max(0));
        if status == ScanStatus::Completed {
            self.percentage = 100;
        }
    }
}

/// A scan record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scan {
    pub id: ScanId,
    pub domain_id: String,
    pub domain: String,
    pub status: ScanStatus,
    pub config: ScanConfig,
    pub progress: ScanProgress,
    pub findings: Option<Findings>,
    pub stats: Option<ScanStats>,
    /// Error message for `error`, reason for `cancelled`
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Scan {
    /// Time since the scan was created.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }
}

impl ScanProgress {
    /// Rebuild a snapshot from loosely typed JSON.
    ///
    /// Unknown statuses fall back to `status`, numbers are clamped
    /// (`percentage` to `0..=100`, `urlsScanned` to `urlsTotal`) and
    /// unparseable fields take their defaults. Never fails.
    #[must_use]
    pub fn normalize(raw: &serde_json::Value, status: ScanStatus) -> Self {
        let field = |key: &str| raw.as_object().and_then(|o| o.get(key));
        let number = |key: &str| {
            field(key).and_then(|v| {
                v.as_f64()
                    .or_else(|| v.as_str().and_then(|s| s.trim().parse::<f64>().ok()))
                    .filter(|n| n.is_finite())
            })
        };
        let time = |key: &str| {
            field(key)
                .and_then(serde_json::Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| t.with_timezone(&Utc))
        };

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let count = |key: &str| number(key).map_or(0, |n| n.clamp(0.0, f64::from(u32::MAX)) as u32);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let percentage = number("percentage").map_or(0, |n| n.clamp(0.0, 100.0) as u8);
        #[allow(clippy::cast_possible_truncation)]
        let duration = number("duration").map(|n| n.max(0.0) as i64);

        Self {
            percentage,
            urls_scanned: count("urlsScanned"),
            urls_total: count("urlsTotal"),
            current_url: field("currentUrl")
                .and_then(serde_json::Value::as_str)
                .map(str::to_string),
            start_time: time("startTime"),
            end_time: time("endTime"),
            duration,
            status: field("status")
                .and_then(serde_json::Value::as_str)
                .and_then(ScanStatus::parse)
                .unwrap_or(status),
        }
        .normalized()
    }

    /// Clamp a typed snapshot into its valid ranges.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.percentage = self.percentage.min(100);
        self.urls_scanned = self.urls_scanned.min(self.urls_total);
        if let Some(duration) = self.duration {
            self.duration = Some(duration.max(0));
        }
        self
    }

    /// Percentage implied by the scanned and total counters.
    #[must_use]
    pub fn computed_percentage(&self) -> u8 {
        if self.urls_total == 0 {
            return 0;
        }
        let pct = u64::from(self.urls_scanned) * 100 / u64::from(self.urls_total);
        u8::try_from(pct.min(100)).unwrap_or(100)
    }
}

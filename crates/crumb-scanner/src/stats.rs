//! Aggregate counts over a scan's findings.

use chrono::{DateTime, Utc};
use crumb_core::model::{
    CookieStats, Findings, ScanStats, ScriptStats, TrackerStats,
};
use std::collections::BTreeMap;

const UNKNOWN: &str = "unknown";

/// Lifetime bucket for a cookie: `session` up to a day, `short-term` up to
/// 30 days, `medium-term` up to a year, `long-term` beyond.
#[must_use]
pub fn duration_bucket(days: Option<i64>) -> &'static str {
    match days {
        None => "session",
        Some(d) if d <= 1 => "session",
        Some(d) if d <= 30 => "short-term",
        Some(d) if d <= 365 => "medium-term",
        Some(_) => "long-term",
    }
}

fn bump(map: &mut BTreeMap<String, u32>, key: &str) {
    *map.entry(key.to_string()).or_insert(0) += 1;
}

/// Saturating `usize` to `u32` conversion for counters.
#[must_use]
pub fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

#[must_use]
pub fn compute(findings: &Findings, now: DateTime<Utc>) -> ScanStats {
    let mut cookies = CookieStats {
        total: count(findings.cookies.len()),
        ..CookieStats::default()
    };
    for cookie in &findings.cookies {
        bump(&mut cookies.by_category, cookie.category.as_str());
        bump(&mut cookies.by_provider, cookie.provider.as_deref().unwrap_or(UNKNOWN));
        bump(&mut cookies.by_duration, duration_bucket(cookie.duration_days(now)));
    }

    let mut scripts = ScriptStats {
        total: count(findings.scripts.len()),
        ..ScriptStats::default()
    };
    for script in &findings.scripts {
        bump(&mut scripts.by_type, &script.category);
        bump(&mut scripts.by_provider, script.provider.as_deref().unwrap_or(UNKNOWN));
    }

    let mut trackers = TrackerStats {
        total: count(findings.trackers.len()),
        ..TrackerStats::default()
    };
    for tracker in &findings.trackers {
        bump(&mut trackers.by_type, &tracker.tracker_type);
        bump(&mut trackers.by_host, &tracker.host);
    }

    ScanStats {
        cookies,
        scripts,
        trackers,
        storage_entries: count(findings.storage.len()),
        iframes: count(findings.iframes.len()),
        forms: count(findings.forms.len()),
        new_cookies: count(findings.changes.new_cookies.len()),
        modified_cookies: count(findings.changes.modified_cookies.len()),
        removed_cookies: count(findings.changes.removed_cookies.len()),
        has_cmp: findings.cmp_data.is_some(),
        tcf_issues: findings
            .tcf_data
            .as_ref()
            .map_or(0, |tcf| count(tcf.compliance_issues.len())),
        urls_errored: count(findings.metadata.errors.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use crumb_core::model::{CookieCategory, CookieSource, ObservedCookie, TrackerFinding};

    fn cookie(name: &str, category: CookieCategory, expires: Option<DateTime<Utc>>) -> ObservedCookie {
        ObservedCookie {
            name: name.to_string(),
            value: String::new(),
            domain: "example.com".to_string(),
            path: "/".to_string(),
            expires,
            http_only: false,
            secure: false,
            same_site: None,
            source: CookieSource::Jar,
            url: "https://example.com".to_string(),
            category,
            provider: None,
        }
    }

    #[test]
    fn test_duration_buckets() {
        assert_eq!(duration_bucket(None), "session");
        assert_eq!(duration_bucket(Some(0)), "session");
        assert_eq!(duration_bucket(Some(1)), "session");
        assert_eq!(duration_bucket(Some(2)), "short-term");
        assert_eq!(duration_bucket(Some(30)), "short-term");
        assert_eq!(duration_bucket(Some(31)), "medium-term");
        assert_eq!(duration_bucket(Some(365)), "medium-term");
        assert_eq!(duration_bucket(Some(366)), "long-term");
    }

    #[test]
    fn test_compute_counts() {
        let now = Utc::now();
        let mut findings = Findings::default();
        findings.cookies = vec![
            cookie("_ga", CookieCategory::Analytics, Some(now + Duration::days(400))),
            cookie("_gid", CookieCategory::Analytics, Some(now + Duration::hours(20))),
            cookie("sid", CookieCategory::Necessary, None),
        ];
        findings.cookies[0].provider = Some("Google Analytics".to_string());
        findings.trackers.push(TrackerFinding {
            url: "https://www.facebook.com/tr".to_string(),
            host: "www.facebook.com".to_string(),
            tracker_type: "pixel".to_string(),
            resource_type: None,
            page_url: "https://example.com".to_string(),
        });

        let stats = compute(&findings, now);
        assert_eq!(stats.cookies.total, 3);
        assert_eq!(stats.cookies.by_category.get("analytics"), Some(&2));
        assert_eq!(stats.cookies.by_provider.get("Google Analytics"), Some(&1));
        assert_eq!(stats.cookies.by_provider.get("unknown"), Some(&2));
        assert_eq!(stats.cookies.by_duration.get("session"), Some(&2));
        assert_eq!(stats.cookies.by_duration.get("long-term"), Some(&1));
        assert_eq!(stats.trackers.by_type.get("pixel"), Some(&1));
        assert_eq!(stats.trackers.by_host.get("www.facebook.com"), Some(&1));
        assert!(!stats.has_cmp);
        assert_eq!(stats.urls_errored, 0);
    }
}

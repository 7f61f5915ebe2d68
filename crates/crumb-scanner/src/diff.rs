//! Comparison of observed cookies against the persisted baseline.

use chrono::Duration;
use crumb_core::model::{
    BaselineCookie, CookieCategory, CookieChanges, FieldChange, ModifiedCookie, ObservedCookie,
};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};

/// Expiry instants closer than this are considered equal.
#[must_use]
pub fn expiry_tolerance() -> Duration {
    Duration::hours(24)
}

fn bare_domain(domain: &str) -> String {
    domain.trim_start_matches('.').to_ascii_lowercase()
}

fn change(property: &str, old: Value, new: Value) -> FieldChange {
    FieldChange {
        property: property.to_string(),
        old,
        new,
    }
}

/// Field-level differences between a baseline cookie and an observation.
#[must_use]
pub fn field_changes(baseline: &BaselineCookie, observed: &ObservedCookie) -> Vec<FieldChange> {
    let mut changes = Vec::new();

    if let Some(old) = &baseline.value {
        if *old != observed.value {
            changes.push(change("value", json!(old), json!(observed.value)));
        }
    }
    if bare_domain(&baseline.domain) != bare_domain(&observed.domain) {
        changes.push(change("domain", json!(baseline.domain), json!(observed.domain)));
    }
    if baseline.path != observed.path {
        changes.push(change("path", json!(baseline.path), json!(observed.path)));
    }

    let expires_differ = match (baseline.expires, observed.expires) {
        (None, None) => false,
        (Some(a), Some(b)) => (a - b).abs() > expiry_tolerance(),
        _ => true,
    };
    if expires_differ {
        changes.push(change(
            "expires",
            json!(baseline.expires),
            json!(observed.expires),
        ));
    }

    if baseline.http_only != observed.http_only {
        changes.push(change("httpOnly", json!(baseline.http_only), json!(observed.http_only)));
    }
    if baseline.secure != observed.secure {
        changes.push(change("secure", json!(baseline.secure), json!(observed.secure)));
    }

    let same_site = |s: &Option<String>| s.as_deref().map(str::to_ascii_lowercase);
    if same_site(&baseline.same_site) != same_site(&observed.same_site) {
        changes.push(change(
            "sameSite",
            json!(baseline.same_site),
            json!(observed.same_site),
        ));
    }

    if baseline.category != CookieCategory::Unknown
        && observed.category != CookieCategory::Unknown
        && baseline.category != observed.category
    {
        changes.push(change(
            "category",
            json!(baseline.category),
            json!(observed.category),
        ));
    }
    if let (Some(old), Some(new)) = (&baseline.provider, &observed.provider) {
        if old != new {
            changes.push(change("provider", json!(old), json!(new)));
        }
    }

    changes
}

/// Split observations into new, modified and removed cookies, keyed by name.
///
/// The first observation of a name wins. New cookies keep observation order,
/// removed cookies keep baseline order.
#[must_use]
pub fn diff(observed: &[ObservedCookie], baseline: &[BaselineCookie]) -> CookieChanges {
    let by_name: HashMap<&str, &BaselineCookie> =
        baseline.iter().map(|c| (c.name.as_str(), c)).collect();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut changes = CookieChanges::default();

    for cookie in observed {
        if !seen.insert(cookie.name.as_str()) {
            continue;
        }
        match by_name.get(cookie.name.as_str()) {
            None => changes.new_cookies.push(cookie.clone()),
            Some(base) => {
                let fields = field_changes(base, cookie);
                if !fields.is_empty() {
                    changes.modified_cookies.push(ModifiedCookie {
                        name: cookie.name.clone(),
                        baseline_id: base.id.clone(),
                        cookie: cookie.clone(),
                        changes: fields,
                    });
                }
            }
        }
    }

    changes.removed_cookies = baseline
        .iter()
        .filter(|c| !seen.contains(c.name.as_str()))
        .cloned()
        .collect();
    changes
}

/// New cookies, or a modified cookie whose category or provider changed.
#[must_use]
pub fn has_significant_changes(changes: &CookieChanges) -> bool {
    !changes.new_cookies.is_empty()
        || changes.modified_cookies.iter().any(|m| {
            m.changes
                .iter()
                .any(|c| c.property == "category" || c.property == "provider")
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crumb_core::model::{CookieSource, CookieStatus, Detection};

    fn observed(name: &str, value: &str) -> ObservedCookie {
        ObservedCookie {
            name: name.to_string(),
            value: value.to_string(),
            domain: ".example.com".to_string(),
            path: "/".to_string(),
            expires: None,
            http_only: false,
            secure: true,
            same_site: Some("Lax".to_string()),
            source: CookieSource::Jar,
            url: "https://example.com".to_string(),
            category: CookieCategory::Marketing,
            provider: Some("Facebook".to_string()),
        }
    }

    fn baseline(name: &str, value: &str) -> BaselineCookie {
        let now = Utc::now();
        BaselineCookie {
            id: format!("id-{name}"),
            domain_id: "d1".to_string(),
            name: name.to_string(),
            domain: "example.com".to_string(),
            value: Some(value.to_string()),
            category: CookieCategory::Marketing,
            provider: Some("Facebook".to_string()),
            duration_days: None,
            expires: None,
            secure: true,
            http_only: false,
            same_site: Some("lax".to_string()),
            path: "/".to_string(),
            detection: Detection {
                method: "scan".to_string(),
                first_detected: now,
                last_seen: now,
            },
            status: CookieStatus::Active,
        }
    }

    #[test]
    fn test_value_change_is_modification() {
        let changes = diff(&[observed("_fbp", "B")], &[baseline("_fbp", "A")]);
        assert!(changes.new_cookies.is_empty());
        assert!(changes.removed_cookies.is_empty());
        assert_eq!(changes.modified_cookies.len(), 1);

        let modified = &changes.modified_cookies[0];
        assert_eq!(modified.baseline_id, "id-_fbp");
        assert_eq!(modified.changes, vec![change("value", json!("A"), json!("B"))]);
        assert!(!has_significant_changes(&changes));
    }

    #[test]
    fn test_sets_are_disjoint() {
        let seen = [observed("_fbp", "A"), observed("_ga", "GA1"), observed("_ga", "dup")];
        let base = [baseline("_fbp", "A"), baseline("old", "x")];
        let changes = diff(&seen, &base);

        let new: Vec<&str> = changes.new_cookies.iter().map(|c| c.name.as_str()).collect();
        let removed: Vec<&str> = changes.removed_cookies.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(new, vec!["_ga"]);
        assert_eq!(removed, vec!["old"]);
        assert!(changes.modified_cookies.is_empty());
        assert!(has_significant_changes(&changes));
    }

    #[test]
    fn test_expiry_tolerance() {
        let now = Utc::now();
        let mut base = baseline("_fbp", "A");
        base.expires = Some(now);

        let mut seen = observed("_fbp", "A");
        seen.expires = Some(now + Duration::hours(23));
        assert!(field_changes(&base, &seen).is_empty());

        seen.expires = Some(now + Duration::hours(25));
        assert_eq!(field_changes(&base, &seen)[0].property, "expires");

        seen.expires = None;
        assert_eq!(field_changes(&base, &seen)[0].property, "expires");
    }

    #[test]
    fn test_category_and_provider_are_significant() {
        let mut seen = observed("_fbp", "A");
        seen.category = CookieCategory::Advertising;
        let changes = diff(&[seen.clone()], &[baseline("_fbp", "A")]);
        assert!(has_significant_changes(&changes));

        // Unknown on either side is not a category change
        seen.category = CookieCategory::Unknown;
        seen.provider = None;
        let changes = diff(&[seen], &[baseline("_fbp", "A")]);
        assert!(changes.modified_cookies.is_empty());
    }

    #[test]
    fn test_unknown_baseline_value_is_ignored() {
        let mut base = baseline("_fbp", "A");
        base.value = None;
        assert!(field_changes(&base, &observed("_fbp", "B")).is_empty());
    }
}

//! Tracker request classification and tracking storage keys.

use crate::rules::RuleSet;

/// Tracker type of a request URL, if any group matches.
pub fn tracker_type<'a>(rules: &'a RuleSet, url: &str) -> Option<&'a str> {
    rules
        .trackers
        .iter()
        .find(|(pattern, _)| pattern.is_match(url))
        .map(|(_, label)| label.as_str())
}

/// Whether a storage key looks tracking-related.
pub fn is_tracking_storage_key(rules: &RuleSet, key: &str) -> bool {
    rules.storage_keys.iter().any(|pattern| pattern.is_match(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> RuleSet {
        RuleSet::embedded().unwrap()
    }

    #[test]
    fn test_first_group_wins() {
        let rules = rules();
        assert_eq!(
            tracker_type(&rules, "https://www.facebook.com/tr?id=1&ev=PageView"),
            Some("pixel")
        );
        assert_eq!(
            tracker_type(&rules, "https://www.google-analytics.com/g/collect?v=2"),
            Some("beacon")
        );
        assert_eq!(
            tracker_type(&rules, "https://static.hotjar.com/c/hotjar-1.js"),
            Some("analytics")
        );
        assert_eq!(
            tracker_type(&rules, "https://ad.doubleclick.net/ddm/activity"),
            Some("tracking")
        );
    }

    #[test]
    fn test_plain_request_is_not_a_tracker() {
        assert_eq!(tracker_type(&rules(), "https://example.com/styles.css"), None);
    }

    #[test]
    fn test_storage_keys() {
        let rules = rules();
        assert!(is_tracking_storage_key(&rules, "_ga_session"));
        assert!(is_tracking_storage_key(&rules, "ajs_anonymous_id"));
        assert!(is_tracking_storage_key(&rules, "userTracking"));
        assert!(!is_tracking_storage_key(&rules, "cart_items"));
    }
}

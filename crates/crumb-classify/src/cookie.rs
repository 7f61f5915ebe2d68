//! Cookie category detection.

use crate::rules::RuleSet;
use crumb_core::model::CookieCategory;

/// Categorize a cookie by name.
///
/// The first matching pattern group wins. Without a match, a cookie that is
/// both `HttpOnly` and `Secure`, or whose name mentions consent, is treated as
/// necessary; anything else is unknown.
pub fn categorize(rules: &RuleSet, name: &str, http_only: bool, secure: bool) -> CookieCategory {
    if let Some((_, category)) = rules
        .cookie_categories
        .iter()
        .find(|(pattern, _)| pattern.is_match(name))
    {
        return *category;
    }
    heuristic(name, http_only, secure)
}

fn heuristic(name: &str, http_only: bool, secure: bool) -> CookieCategory {
    if http_only && secure {
        return CookieCategory::Necessary;
    }
    if name.to_ascii_lowercase().contains("consent") {
        return CookieCategory::Necessary;
    }
    CookieCategory::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> RuleSet {
        RuleSet::embedded().unwrap()
    }

    #[test]
    fn test_google_analytics_cookie() {
        assert_eq!(categorize(&rules(), "_ga", false, false), CookieCategory::Analytics);
        assert_eq!(
            categorize(&rules(), "_ga_ABC123", false, false),
            CookieCategory::Analytics
        );
    }

    #[test]
    fn test_csrf_cookie_is_necessary() {
        assert_eq!(
            categorize(&rules(), "csrf_token", false, false),
            CookieCategory::Necessary
        );
    }

    #[test]
    fn test_unmatched_cookie_is_unknown() {
        assert_eq!(categorize(&rules(), "xyz123", false, false), CookieCategory::Unknown);
    }

    #[test]
    fn test_secure_http_only_fallback() {
        assert_eq!(categorize(&rules(), "xyz123", true, true), CookieCategory::Necessary);
        assert_eq!(categorize(&rules(), "xyz123", true, false), CookieCategory::Unknown);
    }

    #[test]
    fn test_consent_name_fallback() {
        assert_eq!(
            categorize(&rules(), "site_Consent_state", false, false),
            CookieCategory::Necessary
        );
    }

    #[test]
    fn test_marketing_and_advertising() {
        let rules = rules();
        assert_eq!(categorize(&rules, "_fbp", false, false), CookieCategory::Marketing);
        assert_eq!(categorize(&rules, "IDE", true, true), CookieCategory::Advertising);
    }

    #[test]
    fn test_first_group_wins() {
        assert_eq!(
            categorize(&rules(), "_hjSessionUser_1", false, false),
            CookieCategory::Analytics
        );
        assert_eq!(categorize(&rules(), "PHPSESSID", false, false), CookieCategory::Necessary);
    }
}

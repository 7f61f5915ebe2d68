//! Script categorization by URL, then by content.

use crate::rules::RuleSet;

/// Label used when no rule matches.
pub const UNKNOWN: &str = "unknown";

pub fn categorize(rules: &RuleSet, src: Option<&str>, content: Option<&str>) -> String {
    if let Some(src) = src {
        let lowered = src.to_ascii_lowercase();
        if let Some((_, label)) = rules
            .script_url_rules
            .iter()
            .find(|(needle, _)| lowered.contains(needle.as_str()))
        {
            return label.clone();
        }
    }

    if let Some(content) = content {
        if let Some((_, label)) = rules
            .script_content_rules
            .iter()
            .find(|(needle, _)| content.contains(needle.as_str()))
        {
            return label.clone();
        }
    }

    UNKNOWN.to_string()
}

/// Cache key for a script: its URL, or a digest-free fingerprint of inline code.
pub fn identity(src: Option<&str>, content: Option<&str>) -> String {
    match (src, content) {
        (Some(src), _) => format!("script:{src}"),
        (None, Some(content)) => {
            let prefix: String = content.chars().take(64).collect();
            format!("inline:{}:{prefix}", content.len())
        }
        (None, None) => "inline:0:".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> RuleSet {
        RuleSet::embedded().unwrap()
    }

    #[test]
    fn test_url_rules() {
        let rules = rules();
        assert_eq!(
            categorize(&rules, Some("https://www.google-analytics.com/analytics.js"), None),
            "analytics"
        );
        assert_eq!(
            categorize(&rules, Some("https://www.googletagmanager.com/gtm.js?id=GTM-X"), None),
            "tag-manager"
        );
        assert_eq!(
            categorize(&rules, Some("https://www.googletagmanager.com/gtag/js?id=G-X"), None),
            "analytics"
        );
        assert_eq!(
            categorize(&rules, Some("https://securepubads.g.doubleclick.net/tag/js/gpt.js"), None),
            "advertising"
        );
    }

    #[test]
    fn test_url_rule_beats_content() {
        let rules = rules();
        assert_eq!(
            categorize(&rules, Some("https://cdn.example.com/ADVERTISING.js"), Some("gtag('js')")),
            "advertising"
        );
    }

    #[test]
    fn test_content_rules() {
        let rules = rules();
        assert_eq!(categorize(&rules, None, Some("gtag('config', 'G-1');")), "analytics");
        assert_eq!(categorize(&rules, None, Some("fbq('init', '123');")), "marketing");
        assert_eq!(categorize(&rules, None, Some("window.dataLayer = [];")), "tag-manager");
    }

    #[test]
    fn test_fallback_unknown() {
        let rules = rules();
        assert_eq!(categorize(&rules, Some("https://example.com/app.js"), Some("1+1")), UNKNOWN);
        assert_eq!(categorize(&rules, None, None), UNKNOWN);
    }

    #[test]
    fn test_identity() {
        assert_eq!(identity(Some("https://a/b.js"), None), "script:https://a/b.js");
        assert!(identity(None, Some("var x = 1;")).starts_with("inline:10:"));
    }
}

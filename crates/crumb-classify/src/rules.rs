//! Rule tables loaded from TOML.
//!
//! The default set is embedded at compile time; a user file given by
//! `classification.rules_path` replaces it wholesale.

use crate::error::{ClassifyError, Result};
use crumb_core::model::CookieCategory;
use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

/// The rule document shipped with the crate.
pub const DEFAULT_RULES: &str = include_str!("../rules/default_rules.toml");

#[derive(Debug, Clone, Deserialize)]
struct RuleFile {
    #[serde(default)]
    cookie_categories: Vec<PatternGroup>,
    #[serde(default)]
    providers: Vec<ProviderEntry>,
    #[serde(default)]
    value_patterns: Vec<ValuePattern>,
    #[serde(default)]
    script_url_rules: Vec<SubstringEntry>,
    #[serde(default)]
    script_content_rules: Vec<SubstringEntry>,
    #[serde(default)]
    trackers: Vec<PatternGroup>,
    #[serde(default)]
    storage: StorageEntry,
}

#[derive(Debug, Clone, Deserialize)]
struct PatternGroup {
    label: String,
    patterns: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ProviderEntry {
    name: String,
    #[serde(default)]
    cookie_patterns: Vec<String>,
    #[serde(default)]
    domains: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ValuePattern {
    pattern: String,
    provider: String,
}

#[derive(Debug, Clone, Deserialize)]
struct SubstringEntry {
    needle: String,
    label: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct StorageEntry {
    #[serde(default)]
    key_patterns: Vec<String>,
}

/// A well-known provider with its cookie-name patterns and domains.
#[derive(Debug, Clone)]
pub struct ProviderRule {
    pub name: String,
    pub cookie_patterns: Vec<Regex>,
    /// Lowercased domain substrings
    pub domains: Vec<String>,
}

/// Compiled, ordered rule tables.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub cookie_categories: Vec<(Regex, CookieCategory)>,
    pub providers: Vec<ProviderRule>,
    pub value_patterns: Vec<(Regex, String)>,
    pub script_url_rules: Vec<(String, String)>,
    pub script_content_rules: Vec<(String, String)>,
    pub trackers: Vec<(Regex, String)>,
    pub storage_keys: Vec<Regex>,
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|source| ClassifyError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

fn category_label(label: &str) -> Result<CookieCategory> {
    let category = CookieCategory::parse(label);
    if category == CookieCategory::Unknown && !label.eq_ignore_ascii_case("unknown") {
        return Err(ClassifyError::UnknownCategory(label.to_string()));
    }
    Ok(category)
}

impl RuleSet {
    /// Parse and compile a TOML rule document.
    pub fn from_toml(source: &str) -> Result<Self> {
        let file: RuleFile = toml::from_str(source)?;

        let mut cookie_categories = Vec::new();
        for group in &file.cookie_categories {
            let category = category_label(&group.label)?;
            for pattern in &group.patterns {
                cookie_categories.push((compile(pattern)?, category));
            }
        }

        let providers = file
            .providers
            .iter()
            .map(|entry| {
                Ok(ProviderRule {
                    name: entry.name.clone(),
                    cookie_patterns: entry
                        .cookie_patterns
                        .iter()
                        .map(|p| compile(p))
                        .collect::<Result<_>>()?,
                    domains: entry.domains.iter().map(|d| d.to_lowercase()).collect(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let value_patterns = file
            .value_patterns
            .iter()
            .map(|v| Ok((compile(&v.pattern)?, v.provider.clone())))
            .collect::<Result<Vec<_>>>()?;

        let mut trackers = Vec::new();
        for group in &file.trackers {
            for pattern in &group.patterns {
                trackers.push((compile(pattern)?, group.label.clone()));
            }
        }

        let storage_keys = file
            .storage
            .key_patterns
            .iter()
            .map(|p| compile(p))
            .collect::<Result<Vec<_>>>()?;

        let substrings = |entries: &[SubstringEntry]| {
            entries
                .iter()
                .map(|e| (e.needle.clone(), e.label.clone()))
                .collect::<Vec<_>>()
        };

        let rules = Self {
            cookie_categories,
            providers,
            value_patterns,
            script_url_rules: substrings(&file.script_url_rules),
            script_content_rules: substrings(&file.script_content_rules),
            trackers,
            storage_keys,
        };
        debug!(
            category_patterns = rules.cookie_categories.len(),
            providers = rules.providers.len(),
            tracker_patterns = rules.trackers.len(),
            "Compiled classification rules"
        );
        Ok(rules)
    }

    /// The embedded default rules.
    pub fn embedded() -> Result<Self> {
        Self::from_toml(DEFAULT_RULES)
    }

    /// Load rules from `path`.
    pub fn from_file(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path).map_err(|source| ClassifyError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let rules = Self::from_toml(&source)?;
        info!("Loaded classification rules from {}", path.display());
        Ok(rules)
    }

    /// Load the user file when one is configured, the embedded rules otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::embedded(),
        }
    }

    /// Look a provider up by its display name
    pub fn provider(&self, name: &str) -> Option<&ProviderRule> {
        self.providers.iter().find(|p| p.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_embedded_rules_compile() {
        let rules = RuleSet::embedded().unwrap();
        assert!(!rules.cookie_categories.is_empty());
        assert!(rules.provider("Google Analytics").is_some());
        assert!(!rules.trackers.is_empty());
        assert!(!rules.storage_keys.is_empty());
    }

    #[test]
    fn test_category_order_is_preserved() {
        let rules = RuleSet::embedded().unwrap();
        assert_eq!(rules.cookie_categories[0].1, CookieCategory::Necessary);
        assert_eq!(
            rules.cookie_categories.last().unwrap().1,
            CookieCategory::Advertising
        );
    }

    #[test]
    fn test_tracker_groups_in_order() {
        let rules = RuleSet::embedded().unwrap();
        let labels: Vec<&str> = rules.trackers.iter().map(|(_, l)| l.as_str()).collect();
        let first_of = |label| labels.iter().position(|l| *l == label).unwrap();
        assert!(first_of("pixel") < first_of("beacon"));
        assert!(first_of("beacon") < first_of("analytics"));
        assert!(first_of("analytics") < first_of("tracking"));
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let source = r#"
            [[cookie_categories]]
            label = "necessary"
            patterns = ["("]
        "#;
        assert!(matches!(
            RuleSet::from_toml(source),
            Err(ClassifyError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_unknown_category_rejected() {
        let source = r#"
            [[cookie_categories]]
            label = "tasty"
            patterns = ["^x$"]
        "#;
        assert!(matches!(
            RuleSet::from_toml(source),
            Err(ClassifyError::UnknownCategory(_))
        ));
    }

    #[test]
    fn test_load_user_file_replaces_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [[cookie_categories]]
            label = "marketing"
            patterns = ['^promo$']
            "#
        )
        .unwrap();

        let rules = RuleSet::load(Some(file.path())).unwrap();
        assert_eq!(rules.cookie_categories.len(), 1);
        assert!(rules.providers.is_empty());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = RuleSet::load(Some(Path::new("/nonexistent/rules.toml"))).unwrap_err();
        assert!(matches!(err, ClassifyError::Io { .. }));
    }
}

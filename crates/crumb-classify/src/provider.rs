//! Provider resolution cascade: cookie name, then cookie domain, then value.

use crate::rules::RuleSet;

/// Which step of the cascade produced a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchSource {
    Name,
    Domain,
    Value,
}

pub fn by_name<'a>(rules: &'a RuleSet, name: &str) -> Option<&'a str> {
    rules
        .providers
        .iter()
        .find(|p| p.cookie_patterns.iter().any(|re| re.is_match(name)))
        .map(|p| p.name.as_str())
}

/// Match a cookie domain or request host against provider domains on a
/// label boundary, so `facebook.com` matches `.www.facebook.com` but
/// `x.com` does not match `netflix.com`.
pub fn by_domain<'a>(rules: &'a RuleSet, domain: &str) -> Option<&'a str> {
    let host = domain.trim().trim_start_matches('.').to_ascii_lowercase();
    if host.is_empty() {
        return None;
    }
    rules
        .providers
        .iter()
        .find(|p| {
            p.domains
                .iter()
                .any(|d| host == *d || host.ends_with(&format!(".{d}")))
        })
        .map(|p| p.name.as_str())
}

pub fn by_value<'a>(rules: &'a RuleSet, value: &str) -> Option<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    rules
        .value_patterns
        .iter()
        .find(|(re, _)| re.is_match(value))
        .map(|(_, provider)| provider.as_str())
}

/// Run the full cascade.
pub fn resolve<'a>(
    rules: &'a RuleSet,
    name: &str,
    domain: &str,
    value: &str,
) -> Option<(&'a str, MatchSource)> {
    by_name(rules, name)
        .map(|p| (p, MatchSource::Name))
        .or_else(|| by_domain(rules, domain).map(|p| (p, MatchSource::Domain)))
        .or_else(|| by_value(rules, value).map(|p| (p, MatchSource::Value)))
}

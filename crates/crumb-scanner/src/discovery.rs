//! Breadth-first discovery of same-site URLs.
//!
//! Links come from anchors and form actions in the page HTML plus
//! `location` assignments in inline scripts. Discovery never fails: a page
//! that cannot be fetched is logged and skipped, and the start URL is always
//! part of the result.

use crumb_browser::BrowserSession;
use crumb_core::model::ScanConfig;
use crumb_core::DomainName;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Query parameters that only carry campaign or click tracking.
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "dclid", "msclkid", "mc_cid", "mc_eid", "_ga", "_gl", "yclid", "igshid",
];

static ANCHOR_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("valid selector"));

static FORM_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("form[action]").expect("valid selector"));

static SCRIPT_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("script:not([src])").expect("valid selector"));

static LOCATION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"(?:window\.|document\.)?location(?:\.href)?\s*=\s*['"]([^'"]+)['"]"#,
        r#"location\.(?:assign|replace)\(\s*['"]([^'"]+)['"]\s*\)"#,
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

fn is_tracking_param(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name.starts_with("utm_") || TRACKING_PARAMS.contains(&name.as_str())
}

/// Canonical form used for deduplication.
///
/// Forces https, drops the fragment and tracking parameters and strips a
/// trailing slash. Returns `None` for anything that is not http(s).
#[must_use]
pub fn normalize_url(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw.trim()).ok()?;
    match url.scheme() {
        "http" => url.set_scheme("https").ok()?,
        "https" => {}
        _ => return None,
    }
    url.host_str()?;
    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    let mut out = url.to_string();
    if url.query().is_none() && out.ends_with('/') {
        out.pop();
    }
    Some(out)
}

fn path_depth(url: &Url) -> usize {
    url.path_segments()
        .map_or(0, |segments| segments.filter(|s| !s.is_empty()).count())
}

/// Whether a normalized URL is inside the crawl boundary.
#[must_use]
pub fn is_acceptable(url: &str, domain: &DomainName, config: &ScanConfig) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return false;
    }
    let Some(host) = parsed.host_str() else {
        return false;
    };
    domain.matches_host(host, config.include_subdomains)
        && path_depth(&parsed) <= config.depth as usize
}

/// Raw link targets found in a page, resolved against `base`.
#[must_use]
pub fn extract_links(html: &str, base: &str) -> Vec<String> {
    let Ok(base) = Url::parse(base) else {
        return Vec::new();
    };
    let document = Html::parse_document(html);
    let mut raw: Vec<String> = Vec::new();

    for element in document.select(&ANCHOR_SELECTOR) {
        if let Some(href) = element.value().attr("href") {
            raw.push(href.to_string());
        }
    }
    for element in document.select(&FORM_SELECTOR) {
        if let Some(action) = element.value().attr("action") {
            raw.push(action.to_string());
        }
    }
    for element in document.select(&SCRIPT_SELECTOR) {
        let code: String = element.text().collect();
        for pattern in LOCATION_PATTERNS.iter() {
            for captures in pattern.captures_iter(&code) {
                if let Some(target) = captures.get(1) {
                    raw.push(target.as_str().to_string());
                }
            }
        }
    }

    raw.into_iter()
        .map(|href| href.trim().to_string())
        .filter(|href| !href.is_empty() && !href.starts_with('#'))
        .filter_map(|href| base.join(&href).ok())
        .map(|url| url.to_string())
        .collect()
}

async fn fetch_html(
    session: &dyn BrowserSession,
    url: &str,
    timeout: Duration,
) -> Result<String, String> {
    let deadline = tokio::time::Instant::now() + timeout;
    let page = match tokio::time::timeout_at(deadline, session.open(url)).await {
        Ok(Ok(page)) => page,
        Ok(Err(e)) => return Err(e.to_string()),
        Err(_) => return Err(format!("timed out after {timeout:?}")),
    };

    // The page is closed even when reading it runs out of time
    let content = match tokio::time::timeout_at(deadline, page.content()).await {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(_) => Err(format!("timed out after {timeout:?}")),
    };
    if let Err(e) = page.close().await {
        debug!(url, error = %e, "Failed to close discovery page");
    }
    content
}

/// Crawl from the domain's start URL and return the URLs to inspect.
///
/// The result holds at most `config.max_urls` entries, in discovery order,
/// and always starts with the start URL.
pub async fn discover(
    session: &dyn BrowserSession,
    domain: &DomainName,
    config: &ScanConfig,
    timeout: Duration,
) -> Vec<String> {
    let max_urls = config.max_urls.max(1) as usize;
    let start = normalize_url(&domain.start_url()).unwrap_or_else(|| domain.start_url());

    let mut urls = vec![start.clone()];
    let mut visited: HashSet<String> = HashSet::from([start.clone()]);
    let mut queue: VecDeque<String> = VecDeque::from([start]);

    while let Some(current) = queue.pop_front() {
        if urls.len() >= max_urls {
            break;
        }

        let html = match fetch_html(session, &current, timeout).await {
            Ok(html) => html,
            Err(e) => {
                warn!(url = %current, error = %e, "Discovery fetch failed, skipping page");
                continue;
            }
        };

        for link in extract_links(&html, &current) {
            let Some(normalized) = normalize_url(&link) else {
                continue;
            };
            if !is_acceptable(&normalized, domain, config) || !visited.insert(normalized.clone()) {
                continue;
            }
            urls.push(normalized.clone());
            queue.push_back(normalized);
            if urls.len() >= max_urls {
                break;
            }
        }
    }

    debug!(domain = %domain, count = urls.len(), "URL discovery finished");
    urls
}

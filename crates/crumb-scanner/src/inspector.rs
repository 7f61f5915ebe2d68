//! Per-URL page inspection.
//!
//! One [`PageInspector`] serves a whole scan. It navigates to each URL,
//! accepts the consent banner once per scan, simulates interaction and then
//! collects everything the page exposes: cookies from the jar and from
//! `Set-Cookie` headers, scripts, tracker requests, web storage, iframes,
//! forms, the CMP and TCF consent data.

use crate::consent;
use crate::error::{Result, ScanError};
use chrono::{DateTime, Utc};
use crumb_browser::{extract_host, BrowserSession, NetworkEvent, PageHandle, RawCookie};
use crumb_classify::Classifier;
use crumb_core::model::{
    CmpData, CookieSource, FormFinding, IframeFinding, ObservedCookie, ScriptFinding,
    StorageEntry, StorageFindings, StorageKind, TcfData, TrackerFinding, UrlError,
};
use crumb_core::{AppConfig, DomainName};
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Longest storage value kept in findings.
const STORAGE_VALUE_LIMIT: usize = 200;

const INTERACTION_SCRIPT: &str = r"/*crumb:interact*/ (async () => {
  const pause = (ms) => new Promise((r) => setTimeout(r, ms));
  try {
    window.scrollTo(0, document.body ? document.body.scrollHeight : 0);
    await pause(250);
    window.scrollTo(0, 0);
  } catch (e) {}
  try { window.dispatchEvent(new Event('load')); } catch (e) {}
  try { window.dispatchEvent(new Event('scroll')); } catch (e) {}
  try { document.dispatchEvent(new MouseEvent('mousemove', { clientX: 120, clientY: 80 })); } catch (e) {}
  try { document.body && document.body.dispatchEvent(new MouseEvent('click', { bubbles: false })); } catch (e) {}
  try { if (typeof window.gtag === 'function') window.gtag('event', 'page_view'); } catch (e) {}
  try { if (typeof window.ga === 'function') window.ga('send', 'pageview'); } catch (e) {}
  try { if (typeof window.fbq === 'function') window.fbq('track', 'PageView'); } catch (e) {}
  try { if (Array.isArray(window.dataLayer)) window.dataLayer.push({ event: 'scroll' }); } catch (e) {}
  try { if (typeof window._satellite === 'object' && window._satellite.track) window._satellite.track('scroll'); } catch (e) {}
  return true;
})()";

const STORAGE_SCRIPT: &str = r"/*crumb:storage*/ (() => {
  const dump = (area) => {
    const out = [];
    try {
      for (let i = 0; i < area.length; i++) {
        const key = area.key(i);
        out.push({ key, value: String(area.getItem(key) || '') });
      }
    } catch (e) {}
    return out;
  };
  return { local: dump(window.localStorage), session: dump(window.sessionStorage) };
})()";

static SCRIPT_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("script").expect("valid selector"));
static IFRAME_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("iframe[src]").expect("valid selector"));
static FORM_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("form").expect("valid selector"));
static FIELD_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("input, select, textarea").expect("valid selector"));

/// Timing and retry knobs for page inspection.
#[derive(Debug, Clone)]
pub struct InspectorSettings {
    pub max_attempts: u32,
    pub retry_base_delay: Duration,
    pub settle_delay: Duration,
    pub interaction_delay: Duration,
    pub navigation_timeout: Duration,
}

impl InspectorSettings {
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_attempts: config.scanning.max_attempts.max(1),
            retry_base_delay: Duration::from_millis(config.scanning.retry_base_delay_ms),
            settle_delay: Duration::from_millis(config.scanning.settle_delay_ms),
            interaction_delay: Duration::from_millis(config.scanning.interaction_delay_ms),
            navigation_timeout: Duration::from_secs(config.browser.navigation_timeout_secs),
        }
    }
}

impl Default for InspectorSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Everything collected from one page.
#[derive(Debug, Clone, Default)]
pub struct PageReport {
    pub url: String,
    pub cookies: Vec<ObservedCookie>,
    pub scripts: Vec<ScriptFinding>,
    pub trackers: Vec<TrackerFinding>,
    pub storage: StorageFindings,
    pub iframes: Vec<IframeFinding>,
    pub forms: Vec<FormFinding>,
    pub cmp: Option<CmpData>,
    pub tcf: Option<TcfData>,
}

/// Inspects pages against one browser session.
pub struct PageInspector {
    session: Arc<dyn BrowserSession>,
    classifier: Classifier,
    domain: DomainName,
    settings: InspectorSettings,
    consent_attempted: AtomicBool,
    consent_accepted: AtomicBool,
}

impl PageInspector {
    pub fn new(
        session: Arc<dyn BrowserSession>,
        classifier: Classifier,
        domain: DomainName,
        settings: InspectorSettings,
    ) -> Self {
        Self {
            session,
            classifier,
            domain,
            settings,
            consent_attempted: AtomicBool::new(false),
            consent_accepted: AtomicBool::new(false),
        }
    }

    /// Whether the automatic consent click succeeded on some page.
    pub fn consent_accepted(&self) -> bool {
        self.consent_accepted.load(Ordering::SeqCst)
    }

    /// Inspect `url`, retrying failed attempts with exponential backoff.
    pub async fn inspect(&self, url: &str) -> std::result::Result<PageReport, UrlError> {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.inspect_once(url).await {
                Ok(report) => return Ok(report),
                Err(e) if attempt < max_attempts => {
                    let delay = self.settings.retry_base_delay * 2u32.saturating_pow(attempt - 1);
                    warn!(
                        "Inspection of {} failed (attempt {}/{}), retrying in {:?}: {}",
                        url, attempt, max_attempts, delay, e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(url, attempts = attempt, error = %e, "Giving up on URL");
                    return Err(UrlError {
                        url: url.to_string(),
                        message: e.to_string(),
                        attempts: attempt,
                    });
                }
            }
        }
    }

    async fn inspect_once(&self, url: &str) -> Result<PageReport> {
        let page = tokio::time::timeout(self.settings.navigation_timeout, self.session.open(url))
            .await
            .map_err(|_| ScanError::PageInspection {
                url: url.to_string(),
                message: format!("navigation timed out after {:?}", self.settings.navigation_timeout),
            })??;

        let report = self.collect(page.as_ref(), url).await;
        if let Err(e) = page.close().await {
            debug!(url, error = %e, "Failed to close page");
        }
        report
    }

    async fn collect(&self, page: &dyn PageHandle, url: &str) -> Result<PageReport> {
        tokio::time::sleep(self.settings.settle_delay).await;

        if !self.consent_attempted.swap(true, Ordering::SeqCst) {
            let attempt = consent::accept(page).await;
            if attempt.clicked {
                info!(url, method = ?attempt.method, target = ?attempt.target, "Accepted consent banner");
                self.consent_accepted.store(true, Ordering::SeqCst);
                tokio::time::sleep(self.settings.settle_delay).await;
            }
        }

        if let Err(e) = page.evaluate(INTERACTION_SCRIPT).await {
            debug!(url, error = %e, "Interaction script failed");
        }
        tokio::time::sleep(self.settings.interaction_delay).await;

        let now = Utc::now();
        let html = page.content().await?;
        let jar = page.cookies().await?;
        let events = page.take_network_events().await;
        let storage_raw = page.evaluate(STORAGE_SCRIPT).await.unwrap_or_else(|e| {
            debug!(url, error = %e, "Storage script failed");
            serde_json::Value::Null
        });
        let cmp = consent::detect_cmp(page).await.map(|mut cmp| {
            cmp.consent_accepted = self.consent_accepted();
            cmp
        });
        let tcf = consent::read_tcf(page).await;

        let dom = parse_dom(&html, url, &self.domain);
        let traffic = Traffic::from_events(&events);

        let mut cookies: Vec<ObservedCookie> =
            jar.into_iter().map(|raw| observed_from_jar(raw, url)).collect();
        for (response_url, line) in &traffic.set_cookies {
            let default_domain = extract_host(response_url).unwrap_or_default();
            if let Some(cookie) = parse_set_cookie(line, &default_domain, url, now) {
                cookies.push(cookie);
            }
        }
        for cookie in &mut cookies {
            self.classifier.classify_cookie(cookie).await;
        }

        let scripts = self.scripts(&dom, &traffic, url).await;
        let trackers = self.trackers(&traffic, url);
        let storage = self.storage(&storage_raw, url);

        debug!(
            url,
            cookies = cookies.len(),
            scripts = scripts.len(),
            trackers = trackers.len(),
            "Inspected page"
        );

        Ok(PageReport {
            url: url.to_string(),
            cookies,
            scripts,
            trackers,
            storage,
            iframes: dom.iframes,
            forms: dom.forms,
            cmp,
            tcf,
        })
    }

    async fn scripts(&self, dom: &DomFindings, traffic: &Traffic, page_url: &str) -> Vec<ScriptFinding> {
        let mut scripts = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();

        let external = dom
            .script_srcs
            .iter()
            .chain(traffic.script_bodies.keys());
        for src in external {
            if !seen.insert(src.as_str()) {
                continue;
            }
            let body = traffic.script_bodies.get(src).map(String::as_str);
            let mut finding = ScriptFinding {
                src: Some(src.clone()),
                host: extract_host(src).ok(),
                inline: false,
                size: body.map(str::len),
                category: String::new(),
                provider: None,
                page_url: page_url.to_string(),
            };
            self.classifier.classify_script(&mut finding, body).await;
            scripts.push(finding);
        }

        for content in &dom.inline_scripts {
            let mut finding = ScriptFinding {
                src: None,
                host: None,
                inline: true,
                size: Some(content.len()),
                category: String::new(),
                provider: None,
                page_url: page_url.to_string(),
            };
            self.classifier.classify_script(&mut finding, Some(content)).await;
            scripts.push(finding);
        }
        scripts
    }

    fn trackers(&self, traffic: &Traffic, page_url: &str) -> Vec<TrackerFinding> {
        let mut seen = HashSet::new();
        traffic
            .requests
            .iter()
            .filter(|(url, _)| seen.insert(url.as_str()))
            .filter_map(|(url, resource_type)| {
                let tracker_type = self.classifier.tracker_type(url)?;
                Some(TrackerFinding {
                    url: url.clone(),
                    host: extract_host(url).ok()?,
                    tracker_type: tracker_type.to_string(),
                    resource_type: resource_type.clone(),
                    page_url: page_url.to_string(),
                })
            })
            .collect()
    }

    fn storage(&self, raw: &serde_json::Value, page_url: &str) -> StorageFindings {
        #[derive(Deserialize, Default)]
        struct Dump {
            #[serde(default)]
            local: Vec<Item>,
            #[serde(default)]
            session: Vec<Item>,
        }
        #[derive(Deserialize)]
        struct Item {
            key: String,
            #[serde(default)]
            value: String,
        }

        let dump: Dump = serde_json::from_value(raw.clone()).unwrap_or_default();
        let keep = |items: Vec<Item>, kind: StorageKind| -> Vec<StorageEntry> {
            items
                .into_iter()
                .filter(|item| self.classifier.is_tracking_storage_key(&item.key))
                .map(|item| StorageEntry {
                    key: item.key,
                    value: item.value.chars().take(STORAGE_VALUE_LIMIT).collect(),
                    kind,
                    page_url: page_url.to_string(),
                })
                .collect()
        };

        StorageFindings {
            local_storage: keep(dump.local, StorageKind::Local),
            session_storage: keep(dump.session, StorageKind::Session),
        }
    }
}

/// Network traffic of one page, split by what the inspector needs from it.
#[derive(Debug, Default)]
struct Traffic {
    requests: Vec<(String, Option<String>)>,
    set_cookies: Vec<(String, String)>,
    script_bodies: HashMap<String, String>,
}

impl Traffic {
    fn from_events(events: &[NetworkEvent]) -> Self {
        let mut traffic = Self::default();
        for event in events {
            match event {
                NetworkEvent::Request { url, resource_type } => {
                    traffic.requests.push((url.clone(), resource_type.clone()));
                }
                NetworkEvent::Response {
                    url,
                    mime_type,
                    resource_type,
                    set_cookie,
                    body,
                    ..
                } => {
                    for line in set_cookie.iter().flat_map(|h| h.lines()) {
                        traffic.set_cookies.push((url.clone(), line.to_string()));
                    }
                    let is_script = resource_type
                        .as_deref()
                        .is_some_and(|t| t.eq_ignore_ascii_case("script"))
                        || mime_type.as_deref().is_some_and(|m| m.contains("javascript"));
                    if let (true, Some(body)) = (is_script, body) {
                        traffic.script_bodies.insert(url.clone(), body.clone());
                    }
                }
            }
        }
        traffic
    }
}

/// Plain data pulled out of the DOM.
#[derive(Debug, Default)]
struct DomFindings {
    script_srcs: Vec<String>,
    inline_scripts: Vec<String>,
    iframes: Vec<IframeFinding>,
    forms: Vec<FormFinding>,
}

fn resolve(base: Option<&Url>, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    match base {
        Some(base) => base.join(href).ok().map(|u| u.to_string()),
        None => Url::parse(href).ok().map(|u| u.to_string()),
    }
}

fn form_finding(form: ElementRef<'_>, base: Option<&Url>, page_url: &str) -> FormFinding {
    let mut field_count = 0;
    let mut has_email = false;
    let mut has_password = false;

    for field in form.select(&FIELD_SELECTOR) {
        let element = field.value();
        let kind = element.attr("type").unwrap_or("text").to_ascii_lowercase();
        if element.name() == "input" && matches!(kind.as_str(), "hidden" | "submit" | "button" | "reset" | "image") {
            continue;
        }
        field_count += 1;

        let named = |needle: &str| {
            ["name", "id", "autocomplete"]
                .iter()
                .filter_map(|attr| element.attr(attr))
                .any(|v| v.to_ascii_lowercase().contains(needle))
        };
        has_email |= kind == "email" || named("email");
        has_password |= kind == "password";
    }

    FormFinding {
        action: form.value().attr("action").and_then(|a| resolve(base, a)),
        method: form
            .value()
            .attr("method")
            .map_or_else(|| "get".to_string(), str::to_ascii_lowercase),
        field_count,
        has_email,
        has_password,
        page_url: page_url.to_string(),
    }
}

fn parse_dom(html: &str, page_url: &str, domain: &DomainName) -> DomFindings {
    let base = Url::parse(page_url).ok();
    let document = Html::parse_document(html);
    let mut dom = DomFindings::default();

    for script in document.select(&SCRIPT_SELECTOR) {
        if let Some(src) = script.value().attr("src") {
            if let Some(src) = resolve(base.as_ref(), src) {
                dom.script_srcs.push(src);
            }
        } else {
            let code: String = script.text().collect();
            if !code.trim().is_empty() {
                dom.inline_scripts.push(code);
            }
        }
    }

    for iframe in document.select(&IFRAME_SELECTOR) {
        let Some(src) = iframe.value().attr("src").and_then(|s| resolve(base.as_ref(), s)) else {
            continue;
        };
        let host = extract_host(&src).ok();
        let third_party = host.as_deref().is_some_and(|h| !domain.matches_host(h, true));
        dom.iframes.push(IframeFinding {
            src,
            host,
            third_party,
            page_url: page_url.to_string(),
        });
    }

    for form in document.select(&FORM_SELECTOR) {
        dom.forms.push(form_finding(form, base.as_ref(), page_url));
    }
    dom
}

#[allow(clippy::cast_possible_truncation)]
fn observed_from_jar(raw: RawCookie, page_url: &str) -> ObservedCookie {
    let expires = raw
        .expires
        .filter(|secs| secs.is_finite() && *secs > 0.0)
        .and_then(|secs| DateTime::from_timestamp(secs.trunc() as i64, 0));
    ObservedCookie {
        name: raw.name,
        value: raw.value,
        domain: raw.domain,
        path: raw.path,
        expires,
        http_only: raw.http_only,
        secure: raw.secure,
        same_site: raw.same_site,
        source: CookieSource::Jar,
        url: page_url.to_string(),
        category: crumb_core::model::CookieCategory::Unknown,
        provider: None,
    }
}

/// Browsers cap cookie lifetimes at 400 days.
const MAX_COOKIE_LIFETIME_SECS: i64 = 400 * 24 * 60 * 60;

fn lifetime_limit(now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    chrono::Duration::try_seconds(MAX_COOKIE_LIFETIME_SECS).and_then(|d| now.checked_add_signed(d))
}

fn expiry_from_max_age(seconds: i64, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    chrono::Duration::try_seconds(seconds.clamp(0, MAX_COOKIE_LIFETIME_SECS))
        .and_then(|d| now.checked_add_signed(d))
}

fn parse_cookie_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    DateTime::parse_from_rfc2822(value)
        .or_else(|_| DateTime::parse_from_rfc2822(&value.replace('-', " ")))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse one `Set-Cookie` header line.
///
/// `Max-Age` wins over `Expires`; a missing `Domain` falls back to the host
/// that sent the header.
#[must_use]
pub fn parse_set_cookie(
    line: &str,
    default_domain: &str,
    page_url: &str,
    now: DateTime<Utc>,
) -> Option<ObservedCookie> {
    let mut parts = line.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut cookie = ObservedCookie {
        name: name.to_string(),
        value: value.trim().trim_matches('"').to_string(),
        domain: default_domain.to_string(),
        path: "/".to_string(),
        expires: None,
        http_only: false,
        secure: false,
        same_site: None,
        source: CookieSource::Header,
        url: page_url.to_string(),
        category: crumb_core::model::CookieCategory::Unknown,
        provider: None,
    };
    let mut max_age = None;

    for attribute in parts {
        let (key, val) = attribute
            .split_once('=')
            .map_or((attribute.trim(), ""), |(k, v)| (k.trim(), v.trim()));
        match key.to_ascii_lowercase().as_str() {
            "domain" if !val.is_empty() => cookie.domain = val.to_ascii_lowercase(),
            "path" if val.starts_with('/') => cookie.path = val.to_string(),
            "expires" => {
                cookie.expires = parse_cookie_date(val).map(|at| match lifetime_limit(now) {
                    Some(limit) => at.min(limit),
                    None => at,
                });
            }
            "max-age" => max_age = val.parse::<i64>().ok(),
            "secure" => cookie.secure = true,
            "httponly" => cookie.http_only = true,
            "samesite" if !val.is_empty() => {
                let mut normalized = val.to_ascii_lowercase();
                if let Some(first) = normalized.get_mut(0..1) {
                    first.make_ascii_uppercase();
                }
                cookie.same_site = Some(normalized);
            }
            _ => {}
        }
    }

    if let Some(seconds) = max_age {
        cookie.expires = expiry_from_max_age(seconds, now);
    }
    Some(cookie)
}

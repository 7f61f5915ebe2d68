//! A deterministic in-process browser for tests.
//!
//! Pages are registered per URL with their HTML, cookie jar, network traffic
//! and canned answers for script evaluation. Evaluation answers are keyed by a
//! needle; the first needle contained in the evaluated script wins.

use crate::error::{BrowserError, Result};
use crate::page::{BrowserLauncher, BrowserSession, NetworkEvent, PageHandle, RawCookie};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scripted content for one URL.
#[derive(Debug, Clone, Default)]
pub struct FakePage {
    html: String,
    cookies: Vec<RawCookie>,
    network: Vec<NetworkEvent>,
    evaluations: Vec<(String, Value)>,
    fail_first: usize,
    delay: Option<Duration>,
    content_delay: Option<Duration>,
}

impl FakePage {
    pub fn new(html: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            ..Self::default()
        }
    }

    /// Add a session cookie scoped to `domain` with path `/`
    #[must_use]
    pub fn cookie(self, name: &str, value: &str, domain: &str) -> Self {
        self.raw_cookie(RawCookie {
            name: name.to_string(),
            value: value.to_string(),
            domain: domain.to_string(),
            path: "/".to_string(),
            expires: None,
            http_only: false,
            secure: true,
            same_site: None,
        })
    }

    #[must_use]
    pub fn raw_cookie(mut self, cookie: RawCookie) -> Self {
        self.cookies.push(cookie);
        self
    }

    #[must_use]
    pub fn network(mut self, event: NetworkEvent) -> Self {
        self.network.push(event);
        self
    }

    /// Answer any evaluated script containing `needle` with `value`
    #[must_use]
    pub fn evaluation(mut self, needle: &str, value: Value) -> Self {
        self.evaluations.push((needle.to_string(), value));
        self
    }

    /// Fail the first `n` navigations to this page
    #[must_use]
    pub fn failing(mut self, n: usize) -> Self {
        self.fail_first = n;
        self
    }

    /// Hold each navigation for `delay` before it resolves
    #[must_use]
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Hold each content read for `delay`
    #[must_use]
    pub fn slow_content(mut self, delay: Duration) -> Self {
        self.content_delay = Some(delay);
        self
    }
}

#[derive(Debug, Default)]
struct FakeState {
    pages: Mutex<HashMap<String, FakePage>>,
    opens: Mutex<HashMap<String, usize>>,
    launches: AtomicUsize,
    closes: AtomicUsize,
    open_now: AtomicUsize,
    max_open: AtomicUsize,
    fail_launch: AtomicBool,
}

impl FakeState {
    fn lookup(&self, url: &str) -> Option<FakePage> {
        let pages = self.pages.lock().ok()?;
        pages
            .get(url)
            .or_else(|| pages.get(url.trim_end_matches('/')))
            .or_else(|| pages.get(&format!("{url}/")))
            .cloned()
    }

    fn record_open(&self, url: &str) -> usize {
        let Ok(mut opens) = self.opens.lock() else {
            return 0;
        };
        let count = opens.entry(url.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    fn page_opened(&self) {
        let now = self.open_now.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_open.fetch_max(now, Ordering::SeqCst);
    }

    fn page_closed(&self) {
        self.open_now.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Launcher handing out sessions over a shared set of scripted pages.
#[derive(Debug, Clone, Default)]
pub struct ScriptedBrowser {
    state: Arc<FakeState>,
}

impl ScriptedBrowser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_page(self, url: &str, page: FakePage) -> Self {
        self.add_page(url, page);
        self
    }

    pub fn add_page(&self, url: &str, page: FakePage) {
        if let Ok(mut pages) = self.state.pages.lock() {
            pages.insert(url.to_string(), page);
        }
    }

    /// Make every subsequent `launch` fail
    pub fn fail_launches(&self, fail: bool) {
        self.state.fail_launch.store(fail, Ordering::SeqCst);
    }

    pub fn launches(&self) -> usize {
        self.state.launches.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Navigation attempts made to `url`
    pub fn opens(&self, url: &str) -> usize {
        self.state
            .opens
            .lock()
            .map(|opens| opens.get(url).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// URLs navigated to at least once
    pub fn visited(&self) -> Vec<String> {
        let mut urls: Vec<String> = self
            .state
            .opens
            .lock()
            .map(|opens| opens.keys().cloned().collect())
            .unwrap_or_default();
        urls.sort();
        urls
    }

    pub fn open_pages(&self) -> usize {
        self.state.open_now.load(Ordering::SeqCst)
    }

    /// Highest number of pages that were open at the same time
    pub fn max_concurrent_pages(&self) -> usize {
        self.state.max_open.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl BrowserLauncher for ScriptedBrowser {
    async fn launch(&self) -> Result<Arc<dyn BrowserSession>> {
        if self.state.fail_launch.load(Ordering::SeqCst) {
            return Err(BrowserError::ChromiumError(
                "scripted launch failure".to_string(),
            ));
        }
        self.state.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ScriptedSession {
            state: self.state.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct ScriptedSession {
    state: Arc<FakeState>,
    closed: AtomicBool,
}

#[async_trait::async_trait]
impl BrowserSession for ScriptedSession {
    async fn open(&self, url: &str) -> Result<Box<dyn PageHandle>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrowserError::SessionClosed);
        }

        let attempt = self.state.record_open(url);
        let page = self
            .state
            .lookup(url)
            .ok_or_else(|| BrowserError::NavigationError(format!("{url}: net::ERR_NAME_NOT_RESOLVED")))?;

        self.state.page_opened();
        if let Some(delay) = page.delay {
            tokio::time::sleep(delay).await;
        }

        if attempt <= page.fail_first {
            self.state.page_closed();
            return Err(BrowserError::NavigationError(format!(
                "{url}: scripted failure {attempt}"
            )));
        }

        Ok(Box::new(ScriptedPage {
            url: url.to_string(),
            events: Mutex::new(page.network.clone()),
            page,
            state: self.state.clone(),
        }))
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

struct ScriptedPage {
    url: String,
    page: FakePage,
    events: Mutex<Vec<NetworkEvent>>,
    state: Arc<FakeState>,
}

#[async_trait::async_trait]
impl PageHandle for ScriptedPage {
    fn url(&self) -> &str {
        &self.url
    }

    async fn content(&self) -> Result<String> {
        if let Some(delay) = self.page.content_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.page.html.clone())
    }

    async fn cookies(&self) -> Result<Vec<RawCookie>> {
        Ok(self.page.cookies.clone())
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        Ok(self
            .page
            .evaluations
            .iter()
            .find(|(needle, _)| script.contains(needle.as_str()))
            .map_or(Value::Null, |(_, value)| value.clone()))
    }

    async fn take_network_events(&self) -> Vec<NetworkEvent> {
        self.events
            .lock()
            .map(|mut events| std::mem::take(&mut *events))
            .unwrap_or_default()
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.state.page_closed();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_unknown_url_fails_navigation() {
        let browser = ScriptedBrowser::new();
        let session = browser.launch().await.unwrap();
        let err = session.open("https://nowhere.test/").await.err().unwrap();
        assert!(matches!(err, BrowserError::NavigationError(_)));
        assert_eq!(browser.opens("https://nowhere.test/"), 1);
    }

    #[tokio::test]
    async fn test_failing_page_recovers() {
        let browser = ScriptedBrowser::new()
            .with_page("https://a.test", FakePage::new("<html></html>").failing(2));
        let session = browser.launch().await.unwrap();

        assert!(session.open("https://a.test").await.is_err());
        assert!(session.open("https://a.test").await.is_err());
        let page = session.open("https://a.test").await.unwrap();
        assert_eq!(page.url(), "https://a.test");
        page.close().await.unwrap();
        assert_eq!(browser.open_pages(), 0);
    }

    #[tokio::test]
    async fn test_evaluation_matches_needle() {
        let browser = ScriptedBrowser::new().with_page(
            "https://a.test",
            FakePage::new("").evaluation("crumb:storage", json!({"local": []})),
        );
        let session = browser.launch().await.unwrap();
        let page = session.open("https://a.test/").await.unwrap();

        let hit = page.evaluate("/*crumb:storage*/ (() => 1)()").await.unwrap();
        assert_eq!(hit, json!({"local": []}));
        let miss = page.evaluate("document.title").await.unwrap();
        assert_eq!(miss, Value::Null);
    }

    #[tokio::test]
    async fn test_network_events_drain_once() {
        let browser = ScriptedBrowser::new().with_page(
            "https://a.test",
            FakePage::new("").network(NetworkEvent::Request {
                url: "https://cdn.test/x.js".to_string(),
                resource_type: Some("script".to_string()),
            }),
        );
        let session = browser.launch().await.unwrap();
        let page = session.open("https://a.test").await.unwrap();
        assert_eq!(page.take_network_events().await.len(), 1);
        assert!(page.take_network_events().await.is_empty());
    }

    #[tokio::test]
    async fn test_closed_session_rejects_open() {
        let browser =
            ScriptedBrowser::new().with_page("https://a.test", FakePage::new("<html></html>"));
        let session = browser.launch().await.unwrap();
        session.close().await.unwrap();
        session.close().await.unwrap();
        assert_eq!(browser.closes(), 1);
        assert!(matches!(
            session.open("https://a.test").await.err().unwrap(),
            BrowserError::SessionClosed
        ));
    }

    #[tokio::test]
    async fn test_launch_failure() {
        let browser = ScriptedBrowser::new();
        browser.fail_launches(true);
        assert!(browser.launch().await.is_err());
        assert_eq!(browser.launches(), 0);
    }
}

//! Chromium backend built on `chromiumoxide`.

use crate::error::{BrowserError, Result};
use crate::fingerprint::{FingerprintConfig, STEALTH_SCRIPT};
use crate::page::{BrowserLauncher, BrowserSession, NetworkEvent, PageHandle, RawCookie};
use chromiumoxide::browser::{Browser, BrowserConfig as CdpBrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::{
    EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent, EventResponseReceived,
    GetResponseBodyParams, ResourceType,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::Page;
use futures_util::stream::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Launches one headless Chromium per session.
#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    config: crumb_core::BrowserConfig,
}

impl ChromiumLauncher {
    #[must_use]
    pub fn new(config: crumb_core::BrowserConfig) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self) -> Result<Arc<dyn BrowserSession>> {
        let fingerprint = FingerprintConfig::from_config(&self.config);

        let mut builder = CdpBrowserConfig::builder()
            .no_sandbox()
            .window_size(fingerprint.viewport_width, fingerprint.viewport_height)
            .arg("--disable-blink-features=AutomationControlled")
            .arg(format!("--user-agent={}", fingerprint.user_agent))
            .arg(format!("--lang={}", "en-US"));
        if !self.config.headless {
            builder = builder.with_head();
        }
        if let Some(executable) = &self.config.executable {
            builder = builder.chrome_executable(executable);
        }
        let config = builder.build().map_err(BrowserError::ChromiumError)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;

        // Spawn browser handler
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("Browser handler stopped: {}", e);
                    break;
                }
            }
        });

        tracing::info!(user_agent = %fingerprint.user_agent, "Chromium session launched");

        Ok(Arc::new(ChromiumSession {
            browser: Mutex::new(Some(browser)),
            handler_task,
            fingerprint,
            navigation_timeout: Duration::from_secs(self.config.navigation_timeout_secs),
        }))
    }
}

/// A running Chromium instance.
pub struct ChromiumSession {
    browser: Mutex<Option<Browser>>,
    handler_task: JoinHandle<()>,
    fingerprint: FingerprintConfig,
    navigation_timeout: Duration,
}

impl ChromiumSession {
    async fn new_page(&self) -> Result<Page> {
        let guard = self.browser.lock().await;
        let browser = guard.as_ref().ok_or(BrowserError::SessionClosed)?;
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;
        drop(guard);

        page.execute(SetUserAgentOverrideParams::new(
            self.fingerprint.user_agent.clone(),
        ))
        .await
        .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;
        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(STEALTH_SCRIPT))
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;
        Ok(page)
    }
}

#[async_trait::async_trait]
impl BrowserSession for ChromiumSession {
    async fn open(&self, url: &str) -> Result<Box<dyn PageHandle>> {
        let page = self.new_page().await?;
        let events = Arc::new(StdMutex::new(NetworkLog::default()));
        let listeners = attach_network_hooks(&page, &events).await?;

        match tokio::time::timeout(self.navigation_timeout, page.goto(url)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                abort_all(&listeners);
                let _ = page.close().await;
                return Err(BrowserError::NavigationError(format!("{url}: {e}")));
            }
            Err(_) => {
                abort_all(&listeners);
                let _ = page.close().await;
                return Err(BrowserError::Timeout(format!(
                    "{url} after {:?}",
                    self.navigation_timeout
                )));
            }
        }

        let final_url = page
            .url()
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| url.to_string());

        Ok(Box::new(ChromiumPage {
            page,
            url: final_url,
            events,
            listeners,
            closed: false,
        }))
    }

    async fn close(&self) -> Result<()> {
        let mut guard = self.browser.lock().await;
        if let Some(mut browser) = guard.take() {
            browser
                .close()
                .await
                .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;
            let _ = browser.wait().await;
        }
        self.handler_task.abort();
        tracing::info!("Chromium session closed");
        Ok(())
    }
}

// Sessions dropped without `close` still stop their handler task
impl Drop for ChromiumSession {
    fn drop(&mut self) {
        self.handler_task.abort();
    }
}

fn abort_all(tasks: &[JoinHandle<()>]) {
    for task in tasks {
        task.abort();
    }
}

fn resource_label(resource: &ResourceType) -> String {
    format!("{resource:?}").to_lowercase()
}

/// Captured traffic of one page.
///
/// Script responses wait in `pending` until their body has finished
/// loading, everything else is recorded as soon as headers arrive.
#[derive(Debug, Default)]
struct NetworkLog {
    events: Vec<NetworkEvent>,
    pending: HashMap<String, NetworkEvent>,
}

impl NetworkLog {
    fn record(&mut self, event: NetworkEvent) {
        self.events.push(event);
    }

    fn hold(&mut self, request_id: String, event: NetworkEvent) {
        self.pending.insert(request_id, event);
    }

    /// Take a held response out, leaving the body to the caller.
    fn release(&mut self, request_id: &str) -> Option<NetworkEvent> {
        self.pending.remove(request_id)
    }

    /// Drain recorded events. Responses still loading go out without a body.
    fn drain(&mut self) -> Vec<NetworkEvent> {
        let mut events = std::mem::take(&mut self.events);
        events.extend(self.pending.drain().map(|(_, event)| event));
        events
    }
}

fn with_body(event: NetworkEvent, fetched: Option<String>) -> NetworkEvent {
    match event {
        NetworkEvent::Response {
            url,
            status,
            mime_type,
            resource_type,
            set_cookie,
            ..
        } => NetworkEvent::Response {
            url,
            status,
            mime_type,
            resource_type,
            set_cookie,
            body: fetched,
        },
        other => other,
    }
}

async fn attach_network_hooks(
    page: &Page,
    log: &Arc<StdMutex<NetworkLog>>,
) -> Result<Vec<JoinHandle<()>>> {
    let mut requests = page
        .event_listener::<EventRequestWillBeSent>()
        .await
        .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;
    let mut responses = page
        .event_listener::<EventResponseReceived>()
        .await
        .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;
    let mut finished = page
        .event_listener::<EventLoadingFinished>()
        .await
        .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;
    let mut failed = page
        .event_listener::<EventLoadingFailed>()
        .await
        .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;

    let request_sink = log.clone();
    let request_task = tokio::spawn(async move {
        while let Some(event) = requests.next().await {
            let record = NetworkEvent::Request {
                url: event.request.url.clone(),
                resource_type: event.r#type.as_ref().map(resource_label),
            };
            if let Ok(mut sink) = request_sink.lock() {
                sink.record(record);
            }
        }
    });

    let response_sink = log.clone();
    let response_task = tokio::spawn(async move {
        while let Some(event) = responses.next().await {
            let headers = event.response.headers.inner();
            let set_cookie = headers
                .as_object()
                .map(|map| {
                    map.iter()
                        .filter(|(name, _)| name.eq_ignore_ascii_case("set-cookie"))
                        .filter_map(|(_, value)| value.as_str())
                        .flat_map(|value| value.split('\n'))
                        .map(str::to_string)
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();

            let is_script = event.r#type == ResourceType::Script
                || event.response.mime_type.contains("javascript");
            let record = NetworkEvent::Response {
                url: event.response.url.clone(),
                status: event.response.status,
                mime_type: Some(event.response.mime_type.clone()),
                resource_type: Some(resource_label(&event.r#type)),
                set_cookie,
                body: None,
            };
            if let Ok(mut sink) = response_sink.lock() {
                if is_script {
                    sink.hold(event.request_id.inner().clone(), record);
                } else {
                    sink.record(record);
                }
            }
        }
    });

    // Bodies are only retrievable once loading has finished
    let finished_sink = log.clone();
    let body_page = page.clone();
    let finished_task = tokio::spawn(async move {
        while let Some(event) = finished.next().await {
            let held = finished_sink
                .lock()
                .ok()
                .and_then(|mut sink| sink.release(event.request_id.inner()));
            let Some(held) = held else { continue };

            let body = body_page
                .execute(GetResponseBodyParams::new(event.request_id.clone()))
                .await
                .ok()
                .map(|response| response.result.body.clone());
            if let Ok(mut sink) = finished_sink.lock() {
                sink.record(with_body(held, body));
            }
        }
    });

    let failed_sink = log.clone();
    let failed_task = tokio::spawn(async move {
        while let Some(event) = failed.next().await {
            if let Ok(mut sink) = failed_sink.lock() {
                if let Some(held) = sink.release(event.request_id.inner()) {
                    sink.record(held);
                }
            }
        }
    });

    Ok(vec![request_task, response_task, finished_task, failed_task])
}

/// A Chromium tab with its network hooks attached.
pub struct ChromiumPage {
    page: Page,
    url: String,
    events: Arc<StdMutex<NetworkLog>>,
    listeners: Vec<JoinHandle<()>>,
    closed: bool,
}

#[async_trait::async_trait]
impl PageHandle for ChromiumPage {
    fn url(&self) -> &str {
        &self.url
    }

    async fn content(&self) -> Result<String> {
        self.page
            .content()
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))
    }

    async fn cookies(&self) -> Result<Vec<RawCookie>> {
        let cookies = self
            .page
            .get_cookies()
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;

        Ok(cookies
            .into_iter()
            .map(|cookie| RawCookie {
                expires: (!cookie.session && cookie.expires > 0.0).then_some(cookie.expires),
                same_site: cookie.same_site.as_ref().map(|s| format!("{s:?}")),
                name: cookie.name,
                value: cookie.value,
                domain: cookie.domain,
                path: cookie.path,
                http_only: cookie.http_only,
                secure: cookie.secure,
            })
            .collect())
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| BrowserError::EvaluationError(e.to_string()))?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn take_network_events(&self) -> Vec<NetworkEvent> {
        self.events
            .lock()
            .map(|mut log| log.drain())
            .unwrap_or_default()
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let mut this = self;
        this.closed = true;
        abort_all(&this.listeners);
        this.page
            .clone()
            .close()
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))
    }
}

// Pages dropped without `close` stop their listeners and close the tab
impl Drop for ChromiumPage {
    fn drop(&mut self) {
        abort_all(&self.listeners);
        if self.closed {
            return;
        }
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let page = self.page.clone();
            runtime.spawn(async move {
                if let Err(e) = page.close().await {
                    tracing::debug!(error = %e, "Failed to close dropped page");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(url: &str, body: Option<&str>) -> NetworkEvent {
        NetworkEvent::Response {
            url: url.to_string(),
            status: 200,
            mime_type: Some("application/javascript".to_string()),
            resource_type: Some("script".to_string()),
            set_cookie: vec!["id=1".to_string()],
            body: body.map(str::to_string),
        }
    }

    #[test]
    fn test_held_script_waits_for_loading_finished() {
        let mut log = NetworkLog::default();
        log.hold("r1".to_string(), response("https://cdn.test/a.js", None));
        assert!(log.events.is_empty());

        let held = log.release("r1").expect("held response");
        log.record(with_body(held, Some("console.log(1)".to_string())));
        assert!(log.release("r1").is_none());

        let events = log.drain();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            NetworkEvent::Response { body: Some(body), set_cookie, .. }
                if body == "console.log(1)" && set_cookie.len() == 1
        ));
    }

    #[test]
    fn test_drain_flushes_unfinished_responses_without_body() {
        let mut log = NetworkLog::default();
        log.record(NetworkEvent::Request {
            url: "https://example.com/".to_string(),
            resource_type: Some("document".to_string()),
        });
        log.hold("r2".to_string(), response("https://cdn.test/slow.js", None));

        let events = log.drain();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[1], NetworkEvent::Response { body: None, .. }));
        assert!(log.drain().is_empty());
    }

    #[test]
    fn test_with_body_leaves_requests_alone() {
        let request = NetworkEvent::Request {
            url: "https://example.com/".to_string(),
            resource_type: None,
        };
        assert!(matches!(
            with_body(request, Some("ignored".to_string())),
            NetworkEvent::Request { .. }
        ));
    }
}

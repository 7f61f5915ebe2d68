//! Reachability check run before an analysis crawls a site.

use crate::error::{Result, WorkerError};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

const PROBE_USER_AGENT: &str = "Mozilla/5.0 (compatible; CrumbBot/1.0; +cookie-compliance)";

#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// Fetch `url` and return the HTTP status, or why the site is unreachable.
    async fn check(&self, url: &str) -> std::result::Result<u16, String>;
}

/// Plain HTTP GET with redirects followed.
///
/// Any response below 500 counts as reachable; bot walls answering 403 still
/// serve pages a browser can load.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
}

impl HttpProbe {
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(PROBE_USER_AGENT)
            .build()
            .map_err(|e| WorkerError::Http(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ReachabilityProbe for HttpProbe {
    async fn check(&self, url: &str) -> std::result::Result<u16, String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("{url}: {e}"))?;
        let status = response.status();
        debug!(url, status = status.as_u16(), "Reachability probe answered");

        if status.is_server_error() {
            return Err(format!("{url} answered HTTP {}", status.as_u16()));
        }
        Ok(status.as_u16())
    }
}

//! The narrow browser interface the scanner is written against.

use crate::error::{BrowserError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A cookie as reported by the browser cookie jar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    /// Seconds since the Unix epoch; `None` for session cookies
    pub expires: Option<f64>,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: Option<String>,
}

/// Traffic observed by a page's request/response hooks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NetworkEvent {
    /// An outbound request
    Request {
        url: String,
        resource_type: Option<String>,
    },
    /// A response, with raw `Set-Cookie` lines and, for scripts, the body
    Response {
        url: String,
        status: i64,
        mime_type: Option<String>,
        resource_type: Option<String>,
        set_cookie: Vec<String>,
        body: Option<String>,
    },
}

/// An open page.
#[async_trait::async_trait]
pub trait PageHandle: Send + Sync {
    /// The URL the page ended up on
    fn url(&self) -> &str;

    /// Serialized DOM
    async fn content(&self) -> Result<String>;

    /// Cookie jar visible to the page
    async fn cookies(&self) -> Result<Vec<RawCookie>>;

    /// Evaluate a JavaScript expression; promises are awaited and the result
    /// returned by value (`null` for `undefined`)
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value>;

    /// Drain network events recorded since the page was opened or last drained
    async fn take_network_events(&self) -> Vec<NetworkEvent>;

    /// Close the page
    async fn close(self: Box<Self>) -> Result<()>;
}

/// One running browser instance.
#[async_trait::async_trait]
pub trait BrowserSession: Send + Sync {
    /// Open a new page and navigate it to `url`
    async fn open(&self, url: &str) -> Result<Box<dyn PageHandle>>;

    /// Tear the browser down; further `open` calls fail
    async fn close(&self) -> Result<()>;
}

/// Creates browser sessions. Each scan launches, and closes, its own session.
#[async_trait::async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn BrowserSession>>;
}

/// Helper to extract the host from a URL
pub fn extract_host(url: &str) -> Result<String> {
    let url = url::Url::parse(url)
        .map_err(|e| BrowserError::NavigationError(format!("Invalid URL: {e}")))?;

    url.host_str()
        .ok_or_else(|| BrowserError::NavigationError("No host in URL".to_string()))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_host() {
        assert_eq!(
            extract_host("https://example.com/path").unwrap(),
            "example.com"
        );
        assert_eq!(
            extract_host("http://subdomain.example.com:8080/path").unwrap(),
            "subdomain.example.com"
        );
    }

    #[test]
    fn test_extract_host_invalid() {
        assert!(extract_host("not-a-url").is_err());
        assert!(extract_host("data:text/plain,hello").is_err());
    }
}

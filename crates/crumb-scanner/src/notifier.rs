//! Delivery of significant cookie changes.

use crate::error::{Result, ScanError};
use crumb_core::model::CookieChanges;
use crumb_core::ScanId;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::info;

/// Sent when a completed scan found significant cookie changes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeNotification {
    pub scan_id: ScanId,
    pub domain_id: String,
    pub domain: String,
    pub changes: CookieChanges,
}

impl ChangeNotification {
    /// One-line summary such as `2 new, 1 modified, 0 removed`.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} new, {} modified, {} removed",
            self.changes.new_cookies.len(),
            self.changes.modified_cookies.len(),
            self.changes.removed_cookies.len()
        )
    }
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: ChangeNotification) -> Result<()>;
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait::async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, notification: ChangeNotification) -> Result<()> {
        info!(
            scan_id = %notification.scan_id,
            domain = %notification.domain,
            "Cookie changes detected: {}",
            notification.summary()
        );
        Ok(())
    }
}

/// Forwards notifications to an in-process receiver.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::Sender<ChangeNotification>,
}

impl ChannelNotifier {
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ChangeNotification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait::async_trait]
impl Notifier for ChannelNotifier {
    async fn notify(&self, notification: ChangeNotification) -> Result<()> {
        self.tx
            .send(notification)
            .await
            .map_err(|_| ScanError::Execution("notification receiver dropped".to_string()))
    }
}

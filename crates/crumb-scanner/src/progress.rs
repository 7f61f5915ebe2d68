//! In-memory scan progress with throttled persistence.

use crumb_core::model::ScanProgress;
use std::time::{Duration, Instant};

/// Tracks progress of a running scan and decides when to persist it.
///
/// Counts are cumulative and the percentage never goes down.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    progress: ScanProgress,
    min_interval: Duration,
    last_flush: Option<Instant>,
}

impl ProgressTracker {
    #[must_use]
    pub fn new(progress: ScanProgress, min_interval: Duration) -> Self {
        Self {
            progress: progress.normalized(),
            min_interval,
            last_flush: None,
        }
    }

    /// Replace the URL budget once discovery knows the real count.
    pub fn set_total(&mut self, total: u32) {
        self.progress.urls_total = total.max(self.progress.urls_scanned);
        self.recompute();
    }

    /// Count one more processed URL.
    pub fn record(&mut self, url: &str) {
        self.progress.urls_scanned = self
            .progress
            .urls_scanned
            .saturating_add(1)
            .min(self.progress.urls_total.max(1));
        self.progress.current_url = Some(url.to_string());
        self.recompute();
    }

    fn recompute(&mut self) {
        // Only completion may report 100
        let computed = self.progress.computed_percentage().min(99);
        self.progress.percentage = self.progress.percentage.max(computed);
    }

    /// Whether a throttled write is due.
    #[must_use]
    pub fn is_due(&self) -> bool {
        self.last_flush
            .map_or(true, |at| at.elapsed() >= self.min_interval)
    }

    pub fn mark_flushed(&mut self) {
        self.last_flush = Some(Instant::now());
    }

    #[must_use]
    pub fn snapshot(&self) -> ScanProgress {
        self.progress.clone().normalized()
    }

    #[must_use]
    pub fn urls_scanned(&self) -> u32 {
        self.progress.urls_scanned
    }
}

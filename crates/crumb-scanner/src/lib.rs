//! Crumb Scanner - cookie compliance scan engine.
//!
//! This crate crawls a website with a real browser and records everything a
//! cookie compliance review needs: cookies, scripts, tracking requests, web
//! storage, iframes, forms and the consent platform in use. Results are diffed
//! against the domain's cookie baseline.
//!
//! # Features
//!
//! - Same-site URL discovery bounded by URL budget and path depth
//! - Page inspection in bounded-concurrency chunks with retry and backoff
//! - Consent banner acceptance and CMP/TCF detection
//! - Baseline diffing with field-level change reporting
//! - Throttled progress persistence and cooperative cancellation
//!
//! # Example
//!
//! ```rust,ignore
//! use crumb_scanner::{ScanOrchestrator, ScanSettings, TracingNotifier};
//! use std::sync::Arc;
//!
//! let orchestrator = ScanOrchestrator::new(
//!     database,
//!     Arc::new(ChromiumLauncher::new(config.browser.clone())),
//!     Classifier::from_config(&config.classification)?,
//!     Arc::new(TracingNotifier),
//!     ScanSettings::from_config(&config),
//! );
//!
//! let scan = orchestrator.start_scan("d1", "example.com", ScanConfig::default()).await?;
//! let scan = orchestrator.wait_for_scan(scan.id.as_str(), Duration::from_secs(1)).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

/// Merging per-page reports into scan findings.
#[allow(missing_docs)]
pub mod collect;
/// Consent banners, CMP detection and TCF.
#[allow(missing_docs)]
pub mod consent;
/// Baseline diffing.
pub mod diff;
/// Same-site URL discovery.
pub mod discovery;
pub mod error;
/// Single-page inspection.
#[allow(missing_docs)]
pub mod inspector;
/// Per-job log buffers.
#[allow(missing_docs)]
pub mod joblog;
/// Change notifications.
#[allow(missing_docs)]
pub mod notifier;
#[allow(missing_docs)]
pub mod orchestrator;
/// Progress tracking.
#[allow(missing_docs)]
pub mod progress;
/// Scan statistics.
pub mod stats;

// Re-export commonly used types
pub use collect::FindingsBuilder;
pub use error::{Result, ScanError};
pub use inspector::{InspectorSettings, PageInspector, PageReport};
pub use joblog::{JobLogRegistry, JobLogger};
pub use notifier::{ChangeNotification, ChannelNotifier, Notifier, TracingNotifier};
pub use orchestrator::{ApplySummary, ScanOrchestrator, ScanResults, ScanSettings};
pub use progress::ProgressTracker;

//! Crumb Worker - queued cookie analyses.
//!
//! Analyses are requested through [`AnalysisService`], persisted as `pending`
//! and picked up by a single [`AnalysisWorker`] poller. The worker probes the
//! site, crawls it with the scanner's discovery and page inspector, and writes
//! the classified cookies into the domain's baseline.
//!
//! # Example
//!
//! ```rust,ignore
//! use crumb_worker::{AnalysisPipeline, AnalysisWorker, HttpProbe, WorkerSettings};
//! use tokio_util::sync::CancellationToken;
//!
//! let pipeline = AnalysisPipeline::new(db.clone(), launcher, classifier, Arc::new(probe), inspector);
//! let worker = AnalysisWorker::new(db, Arc::new(pipeline), WorkerSettings::from_config(&config.worker));
//!
//! let shutdown = CancellationToken::new();
//! worker.run(shutdown.clone()).await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[allow(missing_docs)]
pub mod error;
/// Analysis pipeline stages.
#[allow(missing_docs)]
pub mod pipeline;
/// Reachability probing.
#[allow(missing_docs)]
pub mod probe;
/// Analysis entry points.
#[allow(missing_docs)]
pub mod service;
/// Lease-guarded poller.
#[allow(missing_docs)]
pub mod worker;

pub use error::{Result, WorkerError};
pub use pipeline::AnalysisPipeline;
pub use probe::{HttpProbe, ReachabilityProbe};
pub use service::AnalysisService;
pub use worker::{AnalysisWorker, WorkerSettings, LEASE_NAME};

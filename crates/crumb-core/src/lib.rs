//! Crumb Core - Foundation crate for the Crumb cookie compliance scanner.
//!
//! This crate provides the shared data model, error handling and
//! configuration management that all other Crumb crates depend on.
//!
//! # Modules
//!
//! - [`error`] - Central error types using thiserror
//! - [`config`] - TOML-based configuration with XDG paths
//! - [`types`] - Validated newtypes (`ScanId`, `AnalysisId`, `DomainName`)
//! - [`model`] - Scans, analyses, findings and baseline cookies
//!
//! # Example
//!
//! ```rust
//! use crumb_core::{AppConfig, DomainName};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::default();
//! let domain = DomainName::new("https://www.example.com/")?;
//! assert_eq!(domain.as_str(), "www.example.com");
//! assert_eq!(config.scanning.chunk_size, 5);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod config;
pub mod error;
#[allow(missing_docs)]
pub mod model;
pub mod types;

// Re-export commonly used types
pub use config::{
    AppConfig, BrowserConfig, ClassificationConfig, DatabaseConfig, NotificationConfig,
    ScanningConfig, WorkerConfig,
};
pub use error::{ConfigError, ConfigResult, CrumbError, Result};
pub use types::{AnalysisId, DomainName, ScanId};

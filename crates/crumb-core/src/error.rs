//! Error types owned by the core crate.
//!
//! Identifier and domain parsing report [`CrumbError`]; loading and checking
//! `config.toml` reports [`ConfigError`]. Other crates wrap these in their own
//! enums.

use thiserror::Error;

/// Errors from parsing core values.
#[derive(Error, Debug)]
pub enum CrumbError {
    /// Settings could not be loaded
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A scan or analysis id that is not a UUID v4
    #[error("invalid {kind} ID: must be a valid UUID v4, got '{value}'")]
    InvalidId {
        /// `scan` or `analysis`
        kind: String,
        /// The rejected input
        value: String,
    },

    /// Input that does not name a host
    #[error("invalid domain: '{0}'")]
    InvalidDomain(String),
}

/// Errors from reading, writing or checking `config.toml`.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No home directory to derive the XDG config path from
    #[error("no config directory available on this platform")]
    NoConfigDir,

    /// File is not valid TOML for [`crate::AppConfig`]
    #[error("malformed config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Settings could not be written back as TOML
    #[error("could not encode config: {0}")]
    Encode(#[from] toml::ser::Error),

    /// Reading or writing the file failed
    #[error("config file I/O: {0}")]
    Io(#[from] std::io::Error),

    /// A setting outside its allowed range
    #[error("invalid config value for {field}: {reason}")]
    InvalidValue {
        /// Dotted setting path, e.g. `scanning.chunk_size`
        field: String,
        /// What is allowed
        reason: String,
    },
}

/// Result alias for core value parsing.
pub type Result<T> = std::result::Result<T, CrumbError>;

/// Result alias for configuration handling.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

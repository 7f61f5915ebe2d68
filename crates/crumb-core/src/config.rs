//! Configuration management for Crumb.
//!
//! Provides TOML-based configuration with XDG-compliant paths and
//! environment variable overrides.

use crate::error::{ConfigError, ConfigResult};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration.
///
/// This is loaded from `~/.config/crumb/config.toml` (or platform equivalent).
/// If the file doesn't exist, default values are used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Scan orchestration settings
    pub scanning: ScanningConfig,
    /// Browser automation settings
    pub browser: BrowserConfig,
    /// Analysis worker settings
    pub worker: WorkerConfig,
    /// Cookie/script classification settings
    pub classification: ClassificationConfig,
    /// Persistent store settings
    pub database: DatabaseConfig,
    /// Change notification settings
    pub notifications: NotificationConfig,
}

impl AppConfig {
    /// Load configuration from disk, falling back to defaults if not found.
    ///
    /// # Errors
    /// Returns error if:
    /// - Config directory cannot be determined
    /// - File exists but cannot be read
    /// - File contents are not valid TOML
    pub fn load() -> ConfigResult<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit path, falling back to defaults if
    /// the file does not exist.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if path.exists() {
            tracing::debug!("Loading config from {}", path.display());
            let contents = fs::read_to_string(path)?;
            let config: Self = toml::from_str(&contents)?;
            config.validate()?;
            Ok(config)
        } else {
            tracing::debug!("Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load configuration with environment variable overrides.
    ///
    /// Supports the following environment variables:
    /// - `CRUMB_HEADLESS`: Override browser headless mode (true/false)
    /// - `CRUMB_DATABASE_PATH`: Override the SQLite database location
    /// - `CRUMB_CHUNK_SIZE`: Override the per-scan page concurrency
    /// - `CRUMB_POLL_INTERVAL_SECS`: Override the analysis worker poll interval
    pub fn load_with_env(path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(path) => Self::load_from(path)?,
            None => Self::load()?,
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("CRUMB_HEADLESS") {
            if let Ok(headless) = val.parse() {
                self.browser.headless = headless;
                tracing::debug!("Override browser.headless from env: {}", headless);
            }
        }

        if let Ok(val) = std::env::var("CRUMB_DATABASE_PATH") {
            if !val.is_empty() {
                tracing::debug!("Override database.path from env: {}", val);
                self.database.path = Some(PathBuf::from(val));
            }
        }

        if let Ok(val) = std::env::var("CRUMB_CHUNK_SIZE") {
            if let Ok(size) = val.parse() {
                self.scanning.chunk_size = size;
                tracing::debug!("Override scanning.chunk_size from env: {}", size);
            }
        }

        if let Ok(val) = std::env::var("CRUMB_POLL_INTERVAL_SECS") {
            if let Ok(secs) = val.parse() {
                self.worker.poll_interval_secs = secs;
                tracing::debug!("Override worker.poll_interval_secs from env: {}", secs);
            }
        }
    }

    /// Reject values that would stall or break the scanner.
    pub fn validate(&self) -> ConfigResult<()> {
        fn invalid(field: &str, reason: &str) -> ConfigError {
            ConfigError::InvalidValue {
                field: field.to_string(),
                reason: reason.to_string(),
            }
        }

        if self.scanning.chunk_size == 0 {
            return Err(invalid("scanning.chunk_size", "must be at least 1"));
        }
        if self.scanning.max_attempts == 0 {
            return Err(invalid("scanning.max_attempts", "must be at least 1"));
        }
        if self.scanning.stale_after_minutes <= 0 {
            return Err(invalid("scanning.stale_after_minutes", "must be positive"));
        }
        if self.worker.poll_interval_secs == 0 {
            return Err(invalid("worker.poll_interval_secs", "must be at least 1"));
        }
        if self.worker.heartbeat_secs >= self.worker.lease_ttl_secs {
            return Err(invalid(
                "worker.heartbeat_secs",
                "must be shorter than worker.lease_ttl_secs",
            ));
        }
        Ok(())
    }

    /// Save configuration to disk.
    ///
    /// Creates the config directory if it doesn't exist.
    pub fn save(&self) -> ConfigResult<()> {
        let config_path = Self::config_path()?;
        let config_dir = config_path
            .parent()
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "config_path".to_string(),
                reason: "no parent directory".to_string(),
            })?;

        fs::create_dir_all(config_dir)?;
        tracing::debug!("Saving config to {}", config_path.display());

        let contents = toml::to_string_pretty(self)?;
        fs::write(config_path, contents)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    ///
    /// Uses XDG base directories: `~/.config/crumb/config.toml`
    pub fn config_path() -> ConfigResult<PathBuf> {
        let dirs = ProjectDirs::from("com", "crumb", "crumb").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Get the data directory path.
    ///
    /// Uses XDG base directories: `~/.local/share/crumb`
    pub fn data_dir() -> ConfigResult<PathBuf> {
        let dirs = ProjectDirs::from("com", "crumb", "crumb").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.data_dir().to_path_buf())
    }

    /// Resolve the database file, defaulting to `<data_dir>/crumb.db`.
    pub fn database_path(&self) -> ConfigResult<PathBuf> {
        match &self.database.path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::data_dir()?.join("crumb.db")),
        }
    }
}

/// Scan orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanningConfig {
    /// Number of pages inspected concurrently within one scan
    pub chunk_size: usize,
    /// Age after which an active scan is presumed abandoned
    pub stale_after_minutes: i64,
    /// Navigation attempts per URL before it is recorded as errored
    pub max_attempts: u32,
    /// Base delay for the exponential retry backoff
    pub retry_base_delay_ms: u64,
    /// Wait after navigation for the page to settle
    pub settle_delay_ms: u64,
    /// Wait after simulated interaction for lazy trackers to fire
    pub interaction_delay_ms: u64,
    /// Minimum interval between two progress writes
    pub progress_flush_interval_ms: u64,
    /// Default URL budget when a start request omits one
    pub default_max_urls: u32,
    /// Default path depth when a start request omits one
    pub default_depth: u32,
    /// How long per-job log buffers are retained after the job ends
    pub job_log_retention_secs: u64,
}

impl Default for ScanningConfig {
    fn default() -> Self {
        Self {
            chunk_size: 5,
            stale_after_minutes: 30,
            max_attempts: 3,
            retry_base_delay_ms: 1000,
            settle_delay_ms: 1500,
            interaction_delay_ms: 1000,
            progress_flush_interval_ms: 1000,
            default_max_urls: 20,
            default_depth: 3,
            job_log_retention_secs: 60,
        }
    }
}

/// Browser automation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Run browser in headless mode
    pub headless: bool,
    /// Browser window width
    pub window_width: u32,
    /// Browser window height
    pub window_height: u32,
    /// Navigation timeout in seconds
    pub navigation_timeout_secs: u64,
    /// Fixed user agent; a realistic one is picked at random when unset
    pub user_agent: Option<String>,
    /// Explicit Chrome/Chromium binary
    pub executable: Option<PathBuf>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            window_width: 1920,
            window_height: 1080,
            navigation_timeout_secs: 30,
            user_agent: None,
            executable: None,
        }
    }
}

/// Analysis worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Interval between two queue polls
    pub poll_interval_secs: u64,
    /// Age after which a pending/running analysis is presumed abandoned
    pub stale_after_minutes: i64,
    /// Lifetime of the worker lease without a heartbeat
    pub lease_ttl_secs: u64,
    /// Interval between lease renewals while a job runs
    pub heartbeat_secs: u64,
    /// Timeout for the reachability probe
    pub reachability_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            stale_after_minutes: 5,
            lease_ttl_secs: 60,
            heartbeat_secs: 15,
            reachability_timeout_secs: 10,
        }
    }
}

/// Cookie and script classification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    /// TOML rule file replacing the built-in tables
    pub rules_path: Option<PathBuf>,
    /// Lifetime of memoized provider lookups
    pub provider_cache_ttl_hours: u64,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            rules_path: None,
            provider_cache_ttl_hours: 24,
        }
    }
}

/// Persistent store settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file; defaults to the XDG data directory
    pub path: Option<PathBuf>,
}

/// Change notification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Notify when a scan finds significant cookie changes
    pub enabled: bool,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.scanning.chunk_size, 5);
        assert_eq!(config.scanning.stale_after_minutes, 30);
        assert_eq!(config.worker.stale_after_minutes, 5);
        assert_eq!(config.classification.provider_cache_ttl_hours, 24);
        assert!(config.browser.headless);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("[scanning]"));
        assert!(toml_str.contains("[worker]"));

        let parsed: AppConfig = toml::from_str(&toml_str).expect("parse serialized config");
        assert_eq!(parsed.scanning.chunk_size, config.scanning.chunk_size);
    }

    #[test]
    fn test_load_from_file() {
        let tmp = TempDir::new().expect("create temp dir");
        let config_path = tmp.path().join("config.toml");

        fs::write(
            &config_path,
            "[scanning]\nchunk_size = 2\n\n[worker]\npoll_interval_secs = 3\n",
        )
        .expect("write config file");

        let loaded = AppConfig::load_from(&config_path).expect("load config");
        assert_eq!(loaded.scanning.chunk_size, 2);
        assert_eq!(loaded.worker.poll_interval_secs, 3);
        // Untouched sections keep their defaults
        assert_eq!(loaded.scanning.max_attempts, 3);
        assert!(loaded.browser.headless);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let tmp = TempDir::new().expect("create temp dir");
        let loaded = AppConfig::load_from(&tmp.path().join("absent.toml")).expect("load config");
        assert_eq!(loaded.scanning.chunk_size, 5);
    }

    #[test]
    fn test_invalid_chunk_size_rejected() {
        let tmp = TempDir::new().expect("create temp dir");
        let config_path = tmp.path().join("config.toml");
        fs::write(&config_path, "[scanning]\nchunk_size = 0\n").expect("write config file");

        let err = AppConfig::load_from(&config_path).expect_err("zero chunk size");
        assert!(err.to_string().contains("scanning.chunk_size"));
    }

    #[test]
    fn test_heartbeat_must_be_shorter_than_lease() {
        let mut config = AppConfig::default();
        config.worker.heartbeat_secs = 60;
        config.worker.lease_ttl_secs = 60;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_explicit_database_path() {
        let mut config = AppConfig::default();
        config.database.path = Some(PathBuf::from("/tmp/crumb-test.db"));
        assert_eq!(
            config.database_path().expect("resolve path"),
            PathBuf::from("/tmp/crumb-test.db")
        );
    }
}

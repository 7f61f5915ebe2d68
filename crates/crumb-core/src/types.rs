//! Shared newtypes used across the Crumb workspace.
//!
//! Identifiers are validated UUID v4 strings; domains are normalised,
//! lowercase hostnames.

use crate::error::CrumbError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

fn validate_uuid(kind: &str, id: &str) -> Result<(), CrumbError> {
    static UUID_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = UUID_REGEX.get_or_init(|| {
        Regex::new(r"^[0-9a-f]{8}-[0-9a-f]{4}-4[0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$")
            .expect("valid regex")
    });

    if regex.is_match(id) {
        Ok(())
    } else {
        Err(CrumbError::InvalidId {
            kind: kind.to_string(),
            value: id.to_string(),
        })
    }
}

/// Identifier of a scan record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScanId(String);

impl ScanId {
    /// Create a `ScanId` from an existing string.
    ///
    /// # Errors
    /// Returns error if the ID is not a valid UUID v4.
    pub fn new(id: impl Into<String>) -> Result<Self, CrumbError> {
        let id = id.into();
        validate_uuid("scan", &id)?;
        Ok(Self(id))
    }

    /// Create a new random `ScanId`.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an analysis job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnalysisId(String);

impl AnalysisId {
    /// Create an `AnalysisId` from an existing string.
    ///
    /// # Errors
    /// Returns error if the ID is not a valid UUID v4.
    pub fn new(id: impl Into<String>) -> Result<Self, CrumbError> {
        let id = id.into();
        validate_uuid("analysis", &id)?;
        Ok(Self(id))
    }

    /// Create a new random `AnalysisId`.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AnalysisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A normalised target hostname such as `example.com`.
///
/// Accepts bare hosts as well as full URLs; scheme, port, path and a
/// trailing dot are stripped and the result is lowercased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomainName(String);

impl DomainName {
    /// Parse and normalise a domain.
    ///
    /// # Errors
    /// Returns error if the input does not contain a valid hostname.
    pub fn new(input: &str) -> Result<Self, CrumbError> {
        static HOST_REGEX: OnceLock<Regex> = OnceLock::new();
        let regex = HOST_REGEX.get_or_init(|| {
            Regex::new(r"^([a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z0-9-]{2,63}$|^localhost$")
                .expect("valid regex")
        });

        let mut host = input.trim().to_ascii_lowercase();
        if let Some(idx) = host.find("://") {
            host = host[idx + 3..].to_string();
        }
        if let Some(idx) = host.find(['/', '?', '#']) {
            host.truncate(idx);
        }
        if let Some(idx) = host.rfind(':') {
            host.truncate(idx);
        }
        let host = host.trim_end_matches('.').to_string();

        if regex.is_match(&host) {
            Ok(Self(host))
        } else {
            Err(CrumbError::InvalidDomain(input.trim().to_string()))
        }
    }

    /// Get the inner hostname.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The https URL crawling starts from.
    #[must_use]
    pub fn start_url(&self) -> String {
        format!("https://{}", self.0)
    }

    /// Whether `host` belongs to this domain.
    ///
    /// A leading `www.` is ignored on both sides. Subdomains only match when
    /// `include_subdomains` is set.
    #[must_use]
    pub fn matches_host(&self, host: &str, include_subdomains: bool) -> bool {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        let bare_host = host.strip_prefix("www.").unwrap_or(&host);
        let bare_self = self.0.strip_prefix("www.").unwrap_or(&self.0);

        if bare_host == bare_self {
            return true;
        }
        include_subdomains && bare_host.ends_with(&format!(".{bare_self}"))
    }
}

impl fmt::Display for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

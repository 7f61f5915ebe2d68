//! Data model shared by the scanner, the store and the analysis worker.
//!
//! Wire names are camelCase so records serialize the way API consumers
//! expect them.

pub mod analysis;
pub mod cookie;
pub mod findings;
pub mod scan;
pub mod status;

pub use analysis::{Analysis, AnalysisConfiguration, AnalysisResults, LogEntry, LogLevel};
pub use cookie::{BaselineCookie, CookieChangeRequest, CookieInput, CookieStatus, Detection};
pub use findings::{
    CmpData, CookieCategory, CookieChanges, CookieSource, CookieStats, FieldChange, Findings,
    FormFinding, IframeFinding, ModifiedCookie, ObservedCookie, ScanMetadata, ScanStats,
    ScriptFinding, ScriptStats, StorageEntry, StorageFindings, StorageKind, TcfData,
    TrackerFinding, TrackerStats, UrlError,
};
pub use scan::{Scan, ScanConfig, ScanProgress, ScanType, MAX_DEPTH_LIMIT, MAX_URLS_LIMIT};
pub use status::{AnalysisStatus, JobStatus, ScanStatus};

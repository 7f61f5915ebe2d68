use clap::{Parser, Subcommand, ValueEnum};
use crumb_core::model::{AnalysisConfiguration, ScanConfig, ScanType};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "crumb")]
#[command(about = "Cookie compliance scanning", long_about = None)]
pub struct Cli {
    /// Path to config file (default: ~/.config/crumb/config.toml)
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ScanKind {
    Full,
    Quick,
    Custom,
}

impl From<ScanKind> for ScanType {
    fn from(kind: ScanKind) -> Self {
        match kind {
            ScanKind::Full => Self::Full,
            ScanKind::Quick => Self::Quick,
            ScanKind::Custom => Self::Custom,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Crawl a domain and wait for the scan to finish
    Scan {
        /// Host to scan, e.g. example.com
        domain: String,
        /// Identifier the scan and baseline are filed under (default: the host)
        #[arg(long)]
        domain_id: Option<String>,
        #[arg(long, value_enum, default_value = "full")]
        scan_type: ScanKind,
        /// URL budget (default from config)
        #[arg(long)]
        max_urls: Option<u32>,
        /// Maximum path depth (default from config)
        #[arg(long)]
        depth: Option<u32>,
        /// Follow links into subdomains
        #[arg(long)]
        include_subdomains: bool,
    },
    /// Show a scan record
    Status { scan_id: String },
    /// Show findings and stats of a completed scan
    Results { scan_id: String },
    /// Cancel an active scan
    Cancel { scan_id: String },
    /// Write reviewed changes of a completed scan into the baseline
    Apply {
        scan_id: String,
        /// JSON array of `{"type": "add"|"update"|"delete", ...}` changes
        #[arg(long, conflicts_with = "accept_new")]
        file: Option<PathBuf>,
        /// Add every new cookie the scan found
        #[arg(long)]
        accept_new: bool,
    },
    /// List recent scans of a domain
    History {
        domain_id: String,
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
    /// Queue a cookie analysis
    Analyze {
        domain: String,
        #[arg(long)]
        domain_id: Option<String>,
        /// Crawl more pages, deeper
        #[arg(long)]
        deep: bool,
        /// Drop cookies set for other domains
        #[arg(long)]
        first_party_only: bool,
        /// Pipeline budget in seconds
        #[arg(long, default_value_t = 300)]
        timeout: u64,
        /// Run a worker in this process until the analysis finishes
        #[arg(long)]
        wait: bool,
    },
    /// Show an analysis record
    AnalysisStatus { analysis_id: String },
    /// Cancel a pending or running analysis
    AnalysisCancel { analysis_id: String },
    /// Process queued analyses until interrupted
    Worker,
}

impl Commands {
    /// Scan limits from flags, falling back to configured defaults.
    pub fn scan_config(
        scan_type: ScanKind,
        max_urls: Option<u32>,
        depth: Option<u32>,
        include_subdomains: bool,
        defaults: &crumb_core::ScanningConfig,
    ) -> ScanConfig {
        ScanConfig {
            scan_type: scan_type.into(),
            max_urls: max_urls.unwrap_or(defaults.default_max_urls),
            depth: depth.unwrap_or(defaults.default_depth),
            include_subdomains,
        }
    }

    pub fn analysis_configuration(deep: bool, first_party_only: bool, timeout: u64) -> AnalysisConfiguration {
        AnalysisConfiguration {
            deep_scan: deep,
            include_third_party: !first_party_only,
            timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scan() {
        let cli = Cli::parse_from(["crumb", "scan", "example.com", "--max-urls", "5", "--scan-type", "quick"]);
        let Commands::Scan {
            domain,
            max_urls,
            depth,
            scan_type,
            include_subdomains,
            ..
        } = cli.command
        else {
            panic!("expected scan command");
        };
        assert_eq!(domain, "example.com");

        let config = Commands::scan_config(
            scan_type,
            max_urls,
            depth,
            include_subdomains,
            &crumb_core::ScanningConfig::default(),
        );
        assert_eq!(config.max_urls, 5);
        assert_eq!(config.depth, 3);
        assert_eq!(config.scan_type, ScanType::Quick);
    }

    #[test]
    fn test_parse_analyze() {
        let cli = Cli::parse_from(["crumb", "analyze", "example.com", "--deep", "--first-party-only"]);
        let Commands::Analyze {
            deep,
            first_party_only,
            timeout,
            ..
        } = cli.command
        else {
            panic!("expected analyze command");
        };
        let configuration = Commands::analysis_configuration(deep, first_party_only, timeout);
        assert!(configuration.deep_scan);
        assert!(!configuration.include_third_party);
        assert_eq!(configuration.timeout, 300);
    }

    #[test]
    fn test_apply_flags_conflict() {
        assert!(Cli::try_parse_from(["crumb", "apply", "s1", "--file", "c.json", "--accept-new"]).is_err());
    }
}

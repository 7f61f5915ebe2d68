use crate::cli::{Commands, ScanKind};
use anyhow::{bail, Context};
use crumb_browser::ChromiumLauncher;
use crumb_classify::Classifier;
use crumb_core::model::{CookieChangeRequest, CookieInput, ScanStatus};
use crumb_core::AppConfig;
use crumb_db::Database;
use crumb_scanner::{InspectorSettings, ScanOrchestrator, ScanSettings, TracingNotifier};
use crumb_worker::{AnalysisPipeline, AnalysisService, AnalysisWorker, HttpProbe, WorkerSettings};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const STATUS_POLL: Duration = Duration::from_secs(1);

pub async fn run(command: Commands, config: &AppConfig, db: Database) -> anyhow::Result<()> {
    match command {
        Commands::Scan {
            domain,
            domain_id,
            scan_type,
            max_urls,
            depth,
            include_subdomains,
        } => {
            scan(
                config,
                db,
                &domain,
                domain_id.as_deref(),
                (scan_type, max_urls, depth, include_subdomains),
            )
            .await
        }
        Commands::Status { scan_id } => {
            let scan = orchestrator(config, db)?.get_scan_status(&scan_id).await?;
            print_json(&scan)
        }
        Commands::Results { scan_id } => {
            let results = orchestrator(config, db)?.get_scan_results(&scan_id).await?;
            print_json(&results)
        }
        Commands::Cancel { scan_id } => {
            let scan = orchestrator(config, db)?.cancel_scan(&scan_id).await?;
            print_json(&scan)
        }
        Commands::Apply {
            scan_id,
            file,
            accept_new,
        } => apply(config, db, &scan_id, file.as_deref(), accept_new).await,
        Commands::History { domain_id, limit } => {
            let scans = orchestrator(config, db)?.list_scans(&domain_id, limit).await?;
            print_json(&scans)
        }
        Commands::Analyze {
            domain,
            domain_id,
            deep,
            first_party_only,
            timeout,
            wait,
        } => {
            let service = AnalysisService::new(db.clone(), &config.worker);
            let analysis = service
                .start_analysis(
                    domain_id.as_deref().unwrap_or(&domain),
                    &domain,
                    Commands::analysis_configuration(deep, first_party_only, timeout),
                )
                .await?;
            if !wait {
                return print_json(&analysis);
            }

            let worker = worker(config, db)?;
            loop {
                let current = service.get_analysis_status(analysis.id.as_str()).await?;
                if current.status.is_terminal() {
                    return print_json(&current);
                }
                if worker.tick().await?.is_none() {
                    tokio::time::sleep(STATUS_POLL).await;
                }
            }
        }
        Commands::AnalysisStatus { analysis_id } => {
            let service = AnalysisService::new(db, &config.worker);
            print_json(&service.get_analysis_status(&analysis_id).await?)
        }
        Commands::AnalysisCancel { analysis_id } => {
            let service = AnalysisService::new(db, &config.worker);
            print_json(&service.cancel_analysis(&analysis_id).await?)
        }
        Commands::Worker => {
            let worker = worker(config, db)?;
            let shutdown = CancellationToken::new();
            let token = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Shutdown requested");
                    token.cancel();
                }
            });
            worker.run(shutdown).await;
            Ok(())
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn orchestrator(config: &AppConfig, db: Database) -> anyhow::Result<ScanOrchestrator> {
    let classifier = Classifier::from_config(&config.classification)
        .context("failed to load classification rules")?;
    Ok(ScanOrchestrator::new(
        db,
        Arc::new(ChromiumLauncher::new(config.browser.clone())),
        classifier,
        Arc::new(TracingNotifier),
        ScanSettings::from_config(config),
    ))
}

fn worker(config: &AppConfig, db: Database) -> anyhow::Result<AnalysisWorker> {
    let classifier = Classifier::from_config(&config.classification)
        .context("failed to load classification rules")?;
    let probe = HttpProbe::new(Duration::from_secs(config.worker.reachability_timeout_secs))?;
    let pipeline = AnalysisPipeline::new(
        db.clone(),
        Arc::new(ChromiumLauncher::new(config.browser.clone())),
        classifier,
        Arc::new(probe),
        InspectorSettings::from_config(config),
    );
    Ok(AnalysisWorker::new(
        db,
        Arc::new(pipeline),
        WorkerSettings::from_config(&config.worker),
    ))
}

async fn scan(
    config: &AppConfig,
    db: Database,
    domain: &str,
    domain_id: Option<&str>,
    (scan_type, max_urls, depth, include_subdomains): (ScanKind, Option<u32>, Option<u32>, bool),
) -> anyhow::Result<()> {
    let orchestrator = orchestrator(config, db)?;
    let scan_config =
        Commands::scan_config(scan_type, max_urls, depth, include_subdomains, &config.scanning);

    let scan = orchestrator
        .start_scan(domain_id.unwrap_or(domain), domain, scan_config)
        .await?;
    info!(scan_id = %scan.id, "Scan running, press Ctrl+C to cancel");

    // Scans execute in this process, so the command stays until the scan ends
    let finished = tokio::select! {
        result = orchestrator.wait_for_scan(scan.id.as_str(), STATUS_POLL) => result?,
        _ = tokio::signal::ctrl_c() => {
            warn!(scan_id = %scan.id, "Interrupted, cancelling scan");
            orchestrator.cancel_scan(scan.id.as_str()).await?
        }
    };

    match finished.status {
        ScanStatus::Completed => print_json(&orchestrator.get_scan_results(scan.id.as_str()).await?),
        status => {
            print_json(&finished)?;
            bail!(
                "scan {} ended {status}: {}",
                finished.id,
                finished.error.as_deref().unwrap_or("no message")
            )
        }
    }
}

async fn apply(
    config: &AppConfig,
    db: Database,
    scan_id: &str,
    file: Option<&Path>,
    accept_new: bool,
) -> anyhow::Result<()> {
    let orchestrator = orchestrator(config, db)?;

    let changes: Vec<CookieChangeRequest> = match (file, accept_new) {
        (Some(path), _) => read_changes(path)?,
        (None, true) => {
            let results = orchestrator.get_scan_results(scan_id).await?;
            let now = chrono::Utc::now();
            results
                .findings
                .changes
                .new_cookies
                .iter()
                .map(|cookie| CookieChangeRequest::Add {
                    cookie: CookieInput::from_observed(cookie, now),
                })
                .collect()
        }
        (None, false) => bail!("pass --file or --accept-new"),
    };

    let summary = orchestrator.apply_changes(scan_id, &changes).await?;
    print_json(&summary)
}

fn read_changes(path: &Path) -> anyhow::Result<Vec<CookieChangeRequest>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&contents).context("invalid changes file")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_changes_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"type": "delete", "cookieId": "c1"}}, {{"type": "delete", "cookieId": "c2"}}]"#
        )
        .unwrap();

        let changes = read_changes(file.path()).unwrap();
        assert_eq!(changes.len(), 2);
        assert!(matches!(&changes[0], CookieChangeRequest::Delete { cookie_id } if cookie_id == "c1"));
    }

    #[test]
    fn test_read_changes_rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let err = read_changes(file.path()).unwrap_err();
        assert!(err.to_string().contains("invalid changes file"));
    }
}

use crumb_browser::ChromiumLauncher;
use crumb_classify::Classifier;
use crumb_core::model::{ScanConfig, ScanStatus, ScanType};
use crumb_core::AppConfig;
use crumb_db::Database;
use crumb_scanner::{ScanOrchestrator, ScanSettings, TracingNotifier};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
#[ignore = "Requires Chrome browser and network access"]
async fn test_full_scan_flow() {
    // Setup
    let config = AppConfig::default();
    let db = Database::in_memory().await.expect("create db");

    let orchestrator = ScanOrchestrator::new(
        db.clone(),
        Arc::new(ChromiumLauncher::new(config.browser.clone())),
        Classifier::from_config(&config.classification).expect("classifier"),
        Arc::new(TracingNotifier),
        ScanSettings::from_config(&config),
    );

    // Start scan
    let scan = orchestrator
        .start_scan(
            "integration",
            "example.com",
            ScanConfig {
                scan_type: ScanType::Quick,
                max_urls: 2,
                depth: 1,
                include_subdomains: false,
            },
        )
        .await
        .expect("start scan");
    assert_eq!(scan.status, ScanStatus::Running);

    let scan = tokio::time::timeout(
        Duration::from_secs(180),
        orchestrator.wait_for_scan(scan.id.as_str(), Duration::from_millis(500)),
    )
    .await
    .expect("scan finishes")
    .expect("scan record");

    assert_eq!(scan.status, ScanStatus::Completed, "error: {:?}", scan.error);
    let results = orchestrator
        .get_scan_results(scan.id.as_str())
        .await
        .expect("results");
    assert!(results.findings.metadata.urls_scanned >= 1);

    println!(
        "Integration scan completed - {} cookies, {} scripts",
        results.stats.cookies.total, results.stats.scripts.total
    );
}

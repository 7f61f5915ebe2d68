//! Crumb command-line shell.
//!
//! Thin wrapper that loads configuration, opens the store and forwards each
//! subcommand to the scanner or worker crates. Results are printed as JSON.

mod cli;
mod commands;

use anyhow::Context;
use clap::Parser;
use cli::Cli;
use crumb_core::AppConfig;
use crumb_db::Database;
use tracing::info;

/// Initialize tracing subscriber for logging
fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,crumb=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    info!("Starting Crumb v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load_with_env(cli.config.as_deref()).context("failed to load config")?;
    let db_path = config.database_path()?;
    let db = Database::open(&db_path)
        .await
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;

    let result = commands::run(cli.command, &config, db.clone()).await;
    db.close().await;
    result
}

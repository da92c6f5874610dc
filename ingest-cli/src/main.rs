//! Ingest load stage
//!
//! Loads standardized tables into a target service, creating entities the
//! first time and updating them on every later run.
//!
//! Usage:
//!   ingest-load settings.json tables.json --dry-run

use anyhow::{Context, Result};
use clap::Parser;
use ingest_cli::{Args, read_tables};
use ingest_load::{DataServiceClient, LoadOrchestrator, LoadTarget, build_adapter_set};
use ingest_types::Method;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.default_log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let settings = args.settings()?;
    let tables = read_tables(&args.tables)?;
    info!("Loading into {} for project {}", settings.target_url, settings.project_id);

    let client = DataServiceClient::new().context("failed to create HTTP client")?;
    let adapters = build_adapter_set(&settings, client).context("invalid target adapters")?;
    let orchestrator = LoadOrchestrator::open(adapters, LoadTarget::from(&settings), args.options())
        .context("failed to prepare the load")?;

    let report = orchestrator.run(&tables).await.context("load failed")?;

    if let Some(token) = &report.unreached_resume_token {
        warn!("Resume target '{token}' was never reached");
    }
    info!(
        "Done: {} created, {} updated",
        report.total(Method::Create),
        report.total(Method::Update)
    );
    Ok(())
}

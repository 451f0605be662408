use std::{
    fs::{self, OpenOptions},
    path::PathBuf,
    process::ExitCode,
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};
use dhhltb_core::{
    config::{self, AppConfig},
    export::{self, ExportFormat},
    source, HltbClient, Orchestrator, RunError, RunOptions,
};

/// Fill a databaze-her.cz game list with HowLongToBeat playtimes.
#[derive(Parser, Debug)]
#[command(name = "dh-hltb", version, about)]
struct Args {
    /// Saved game list pages, JSON exports or directories containing them
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Output file, .xlsx, .csv or .json
    #[arg(short, long, default_value = "stats.xlsx")]
    output: PathBuf,

    /// Days before a cached match is fetched again (0 refreshes everything)
    #[arg(long = "cache-ttl", value_name = "DAYS")]
    cache_ttl: Option<i64>,

    /// Resolve and export ignored games too
    #[arg(short, long)]
    include_ignored: bool,

    /// Directory for the cache and log file
    #[arg(long, value_name = "DIR")]
    cachedir: Option<PathBuf>,

    /// Override table (YAML)
    #[arg(long, value_name = "FILE")]
    mapping: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    ExportFormat::from_path(&args.output)?;

    config::ensure_default_config()?;
    let mut config = AppConfig::load()?;
    if let Some(ttl) = args.cache_ttl {
        config.cache_ttl_days = ttl;
    }
    if let Some(dir) = args.cachedir.clone() {
        config.cache_dir = dir;
    }
    if let Some(mapping) = args.mapping.clone() {
        config.mapping_path = mapping;
    }

    init_logging(&config)?;

    let raw_records = source::load_sources(&args.inputs)?;
    let provider = HltbClient::new(&config).context("failed to build HTTP client")?;
    let options = RunOptions::from_config(&config, args.include_ignored);
    let mut orchestrator =
        Orchestrator::prepare(&config, options, Box::new(provider), raw_records)?;

    let outcome = orchestrator.run_until(shutdown_signal()).await;
    orchestrator.save_cache()?;

    match outcome {
        Ok(summary) => {
            if summary.failed > 0 {
                warn!("{} games could not be matched", summary.failed);
            }
            export::export(
                orchestrator.records(),
                orchestrator.overrides(),
                args.include_ignored,
                &args.output,
            )?;
            Ok(ExitCode::SUCCESS)
        }
        Err(err @ RunError::Connection { .. }) => {
            error!("{:#}", anyhow::Error::new(err));
            Ok(ExitCode::FAILURE)
        }
        Err(RunError::Cancelled) => {
            info!("interrupted, partial results kept in cache");
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("failed to listen for Ctrl-C: {err}");
        std::future::pending::<()>().await;
    }
}

fn init_logging(config: &AppConfig) -> Result<()> {
    let log_path = config.log_path();
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("failed to open log file {}", log_path.display()))?;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .compact()
        .with_writer(std::io::stdout);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .compact()
        .with_writer(Arc::new(log_file));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    Ok(())
}

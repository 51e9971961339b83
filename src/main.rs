//! TDS530 Collector
//!
//! Polls a TDS530-class data logger over TCP, serves the latest reading over
//! HTTP, and optionally records every reading to a TSV file.
//!
//! # Usage
//!
//! ```bash
//! # Poll the logger at its factory address, serve on 127.0.0.1:5000
//! tds530
//!
//! # Simulator on localhost, logging to ./run.tsv
//! tds530-sim &
//! tds530 --host 127.0.0.1 --log run
//!
//! # One exchange, print the reading as JSON
//! tds530 --host 127.0.0.1 probe
//! ```
//!
//! # Environment Variables
//!
//! - `TDS530_CONFIG`: path to a `tds530.toml`
//! - `TDS530_HOST`, `TDS530_PORT`, `TDS530_SERVER_ADDR`, `TDS530_LOG`: CLI overrides
//! - `RUST_LOG`: logging level (default: info)

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tds530_collector::acquisition::probe_once;
use tds530_collector::api::{create_app, ApiState};
use tds530_collector::config::StationConfig;
use tds530_collector::station::Station;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "tds530")]
#[command(about = "Polling collector for TDS530-class data loggers")]
#[command(version)]
struct CliArgs {
    /// Config file (fails if it cannot be loaded)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Data logger host
    #[arg(long, env = "TDS530_HOST")]
    host: Option<String>,

    /// Data logger TCP port
    #[arg(long, env = "TDS530_PORT")]
    port: Option<u16>,

    /// HTTP server bind address
    #[arg(short, long, env = "TDS530_SERVER_ADDR")]
    addr: Option<String>,

    /// Attach a TSV log at startup (`.tsv` is appended when there is no extension)
    #[arg(long, value_name = "PATH", env = "TDS530_LOG")]
    log: Option<PathBuf>,

    /// Never attach a log at startup, even if the config names one
    #[arg(long)]
    dry_run: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<SubCommand>,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Connect once, run a single exchange, print the reading as JSON
    Probe,
}

// ============================================================================
// Startup
// ============================================================================

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

/// Config file (explicit or searched), then CLI/env overrides, then validation.
fn resolve_config(args: &CliArgs) -> Result<StationConfig> {
    let mut config = match &args.config {
        Some(path) => StationConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => StationConfig::load(),
    };

    if let Some(host) = &args.host {
        config.device.host.clone_from(host);
    }
    if let Some(port) = args.port {
        config.device.port = port;
    }
    if let Some(addr) = &args.addr {
        config.server.addr.clone_from(addr);
    }
    if let Some(path) = &args.log {
        config.log.path = Some(path.clone());
    }
    if args.dry_run {
        config.log.path = None;
    }

    config.validate()?;
    Ok(config)
}

async fn run_probe(config: &StationConfig) -> Result<()> {
    let reading = probe_once(&config.device)
        .await
        .with_context(|| format!("Probe of {} failed", config.device.addr()))?;
    println!("{}", serde_json::to_string_pretty(&reading)?);
    Ok(())
}

async fn run_station(config: StationConfig, cancel: CancellationToken) -> Result<()> {
    let station = Arc::new(Station::new(&config));

    if let Some(path) = &config.log.path {
        let opened = station
            .start_logging(path)
            .with_context(|| format!("Failed to open log {}", path.display()))?;
        info!(path = %opened.display(), "Logging readings");
    }

    let listener = tokio::net::TcpListener::bind(&config.server.addr)
        .await
        .with_context(|| format!("Failed to bind HTTP server to {}", config.server.addr))?;
    let app = create_app(ApiState::new(Arc::clone(&station)));

    station.start();
    info!(
        device = %config.device.addr(),
        http = %config.server.addr,
        "Collector running"
    );

    let server_cancel = cancel.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            server_cancel.cancelled().await;
            info!("HTTP server received shutdown signal");
        })
        .await;

    // The server also returns on a bind/accept failure, so make sure
    // every other task sees the shutdown.
    cancel.cancel();
    station.shutdown().await;

    match served {
        Ok(()) => {
            info!("Shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "HTTP server error");
            Err(e.into())
        }
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_tracing(args.json_logs);

    let config = resolve_config(&args)?;

    if let Some(SubCommand::Probe) = args.command {
        return run_probe(&config).await;
    }

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            return;
        }
        info!("Received Ctrl-C, shutting down");
        shutdown.cancel();
    });

    run_station(config, cancel).await
}

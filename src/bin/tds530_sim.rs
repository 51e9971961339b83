//! TDS530 Device Simulator
//!
//! Listens like a data logger so the collector can run without hardware.
//!
//! # Usage
//! ```bash
//! tds530-sim --listen 127.0.0.1:4242 --channels 16 --glitch-rate 0.05
//! tds530 --host 127.0.0.1
//! ```

use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use tds530_collector::simulator::{self, SimulatorConfig};

#[derive(Parser, Debug)]
#[command(name = "tds530-sim")]
#[command(about = "Simulated TDS530 data logger for collector testing")]
#[command(version)]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:4242")]
    listen: String,

    /// Channels per frame
    #[arg(short, long, default_value = "10")]
    channels: usize,

    /// Probability that a channel is sent as absent (0.0 - 1.0)
    #[arg(long, default_value = "0.0", value_parser = parse_rate)]
    glitch_rate: f64,

    /// Delay before each response in milliseconds
    #[arg(long, default_value = "0")]
    delay_ms: u64,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,
}

fn parse_rate(s: &str) -> Result<f64, String> {
    let rate: f64 = s.parse().map_err(|e| format!("{e}"))?;
    if (0.0..=1.0).contains(&rate) {
        Ok(rate)
    } else {
        Err(format!("{rate} is not between 0.0 and 1.0"))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args = Args::parse();
    let listener = TcpListener::bind(&args.listen).await?;
    let config = SimulatorConfig {
        channels: args.channels,
        glitch_rate: args.glitch_rate,
        seed: args.seed,
        response_delay: Duration::from_millis(args.delay_ms),
        ..SimulatorConfig::default()
    };

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received, stopping simulator");
        }
        shutdown.cancel();
    });

    simulator::serve(listener, config, cancel).await?;
    Ok(())
}

//! TDS530 Device Simulator
//!
//! A TCP server that answers each poll request with a frame of random-walk
//! channel values, for exercising the collector without hardware. With
//! probability `glitch_rate` a channel is sent as `------` (the logger's
//! marker for an unreadable input), which the collector stores as null.

use std::time::Duration;

use chrono::{Local, Timelike};
use rand::prelude::*;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::acquisition::format_frame;
use crate::config::defaults::{FRAME_TERMINATOR, POLL_REQUEST};
use crate::types::Reading;

/// Random-walk step size as a fraction of the channel's span.
const WALK_STEP: f64 = 0.02;

#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Channels per frame
    pub channels: usize,
    /// Probability in `[0, 1]` that a channel is sent as absent
    pub glitch_rate: f64,
    /// Seed for reproducible output, entropy when `None`
    pub seed: Option<u64>,
    /// Delay before each response
    pub response_delay: Duration,
    pub request: String,
    pub terminator: String,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            channels: 10,
            glitch_rate: 0.0,
            seed: None,
            response_delay: Duration::ZERO,
            request: POLL_REQUEST.to_string(),
            terminator: FRAME_TERMINATOR.to_string(),
        }
    }
}

/// Accept connections on `listener` until `cancel` fires. Each connection is
/// served on its own task.
pub async fn serve(
    listener: TcpListener,
    config: SimulatorConfig,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let local = listener.local_addr()?;
    info!(address = %local, channels = config.channels, "Device simulator listening");
    let mut connection_id: u64 = 0;

    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, peer) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "Simulator accept failed");
                continue;
            }
        };

        connection_id += 1;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(connection_id)),
            None => StdRng::from_entropy(),
        };
        let config = config.clone();
        let cancel = cancel.child_token();
        info!(peer = %peer, "Simulator client connected");

        tokio::spawn(async move {
            if let Err(e) = serve_connection(stream, config, rng, cancel).await {
                debug!(peer = %peer, error = %e, "Simulator connection ended with error");
            }
            info!(peer = %peer, "Simulator client disconnected");
        });
    }

    info!(address = %local, "Device simulator stopped");
    Ok(())
}

async fn serve_connection(
    stream: TcpStream,
    config: SimulatorConfig,
    rng: StdRng,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half);
    let mut channels = ChannelWalk::new(config.channels, rng);
    let request = config.request.trim();
    let mut line = String::new();

    loop {
        line.clear();
        let read = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            read = lines.read_line(&mut line) => read?,
        };
        if read == 0 {
            return Ok(());
        }
        if line.trim() != request {
            debug!(line = %line.trim(), "Simulator ignoring unknown command");
            continue;
        }

        if !config.response_delay.is_zero() {
            tokio::time::sleep(config.response_delay).await;
        }
        let reading = channels.next_reading(config.glitch_rate);
        write_half
            .write_all(format_frame(&reading, &config.terminator).as_bytes())
            .await?;
    }
}

/// Per-connection channel state. Each channel walks within its own span.
struct ChannelWalk {
    rng: StdRng,
    values: Vec<f64>,
    spans: Vec<(f64, f64)>,
}

impl ChannelWalk {
    fn new(count: usize, mut rng: StdRng) -> Self {
        let spans: Vec<(f64, f64)> = (0..count)
            .map(|_| {
                let low = rng.gen_range(-50.0..50.0);
                (low, low + rng.gen_range(1.0..100.0))
            })
            .collect();
        let values = spans
            .iter()
            .map(|&(low, high)| rng.gen_range(low..high))
            .collect();
        Self { rng, values, spans }
    }

    fn next_reading(&mut self, glitch_rate: f64) -> Reading {
        let glitch_rate = glitch_rate.clamp(0.0, 1.0);
        let mut channels = Vec::with_capacity(self.values.len());

        for (value, &(low, high)) in self.values.iter_mut().zip(&self.spans) {
            let step = (high - low) * WALK_STEP;
            *value = (*value + self.rng.gen_range(-step..=step)).clamp(low, high);
            // Three decimals, like the logger's display resolution.
            let shown = (*value * 1000.0).round() / 1000.0;
            channels.push((!self.rng.gen_bool(glitch_rate)).then_some(shown));
        }

        let now = Local::now().naive_local();
        let timestamp = now.with_nanosecond(0).unwrap_or(now);
        Reading::new(timestamp, channels)
    }
}

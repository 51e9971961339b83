//! Poll Loop (Collector)
//!
//! Drives [`DeviceSession`]s forever: connect, poll/parse/publish until the
//! connection fails, close, wait a fixed backoff, reconnect. Connect errors
//! and disconnects are retried without limit; malformed frames are dropped
//! per exchange; sink failures are logged and polling continues.
//!
//! The loop runs as a tokio task behind [`Collector::start`] /
//! [`Collector::stop`]. Cancellation is cooperative and observed both here
//! and inside the session's read loop, so `stop` never waits on a blocked
//! read.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::frame::parse_frame;
use super::session::{DeviceSession, SessionError};
use super::stats::{CollectorStats, CollectorStatsSnapshot};
use crate::config::defaults::STOP_GRACE_MS;
use crate::config::DeviceConfig;
use crate::types::Reading;

// ============================================================================
// Publish Sink
// ============================================================================

/// Receives every successfully parsed reading.
///
/// `publish` runs on tokio's blocking pool, so it may do file I/O. The
/// poll task waits for it before the next exchange. An `Err` is logged
/// and counted; it never stops the poll loop.
pub trait ReadingSink: Send + Sync + 'static {
    fn publish(&self, reading: Reading) -> anyhow::Result<()>;
}

impl<F> ReadingSink for F
where
    F: Fn(Reading) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn publish(&self, reading: Reading) -> anyhow::Result<()> {
        self(reading)
    }
}

// ============================================================================
// Poll Loop Contract
// ============================================================================

/// Start/stop contract for a background poller.
#[async_trait]
pub trait PollLoop: Send + Sync {
    /// Begin polling. Returns `false` if already running.
    fn start(&self) -> bool;

    /// Cancel polling and wait for the task to exit. Returns `false` if
    /// nothing was running.
    async fn stop(&self) -> bool;

    fn is_running(&self) -> bool;
}

// ============================================================================
// Collector
// ============================================================================

struct PollTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Background poller for one data logger.
pub struct Collector {
    config: DeviceConfig,
    sink: Arc<dyn ReadingSink>,
    stats: Arc<CollectorStats>,
    stop_grace: Duration,
    task: Mutex<Option<PollTask>>,
}

impl Collector {
    pub fn new(config: DeviceConfig, sink: Arc<dyn ReadingSink>) -> Self {
        Self {
            config,
            sink,
            stats: Arc::new(CollectorStats::default()),
            stop_grace: Duration::from_millis(STOP_GRACE_MS),
            task: Mutex::new(None),
        }
    }

    /// Override how long `stop` waits before aborting the task.
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn stats(&self) -> CollectorStatsSnapshot {
        self.stats.snapshot()
    }

    fn lock_task(&self) -> MutexGuard<'_, Option<PollTask>> {
        self.task.lock().unwrap_or_else(|e| {
            warn!("Collector task mutex poisoned, recovering");
            e.into_inner()
        })
    }
}

#[async_trait]
impl PollLoop for Collector {
    /// Must be called from within a tokio runtime.
    fn start(&self) -> bool {
        let mut task = self.lock_task();
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            debug!("Collector already running");
            return false;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_poll_loop(
            self.config.clone(),
            Arc::clone(&self.sink),
            Arc::clone(&self.stats),
            cancel.clone(),
        ));
        *task = Some(PollTask { cancel, handle });
        true
    }

    async fn stop(&self) -> bool {
        let task = self.lock_task().take();
        let Some(PollTask { cancel, mut handle }) = task else {
            return false;
        };

        cancel.cancel();
        match tokio::time::timeout(self.stop_grace, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Poll task ended abnormally"),
            Err(_) => {
                warn!(
                    grace_ms = self.stop_grace.as_millis() as u64,
                    "Poll task did not exit in time, aborting"
                );
                handle.abort();
                let _ = handle.await;
            }
        }
        self.stats.set_connected(false);
        true
    }

    fn is_running(&self) -> bool {
        self.lock_task()
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        if let Some(task) = self.lock_task().take() {
            task.cancel.cancel();
        }
    }
}

// ============================================================================
// Loop Body
// ============================================================================

async fn run_poll_loop(
    config: DeviceConfig,
    sink: Arc<dyn ReadingSink>,
    stats: Arc<CollectorStats>,
    cancel: CancellationToken,
) {
    let addr = config.addr();
    let backoff = config.reconnect_backoff();
    info!(address = %addr, "Poll loop starting");

    while !cancel.is_cancelled() {
        stats.record_connect_attempt();
        let connected = tokio::select! {
            _ = cancel.cancelled() => break,
            result = DeviceSession::connect(&config) => result,
        };

        let mut session = match connected {
            Ok(session) => session.with_stats(Arc::clone(&stats)),
            Err(e) => {
                stats.record_connect_failure();
                warn!(
                    address = %addr,
                    error = %e,
                    backoff_ms = backoff.as_millis() as u64,
                    "Data logger unreachable, retrying after backoff"
                );
                if !sleep_or_cancel(&cancel, backoff).await {
                    break;
                }
                continue;
            }
        };

        stats.set_connected(true);
        let ended = poll_session(&mut session, &config, &sink, &stats, &cancel).await;
        stats.set_connected(false);
        session.close().await;

        if matches!(ended, SessionError::Cancelled) {
            break;
        }

        stats.record_disconnect();
        warn!(
            address = %addr,
            error = %ended,
            backoff_ms = backoff.as_millis() as u64,
            "Data logger session ended, reconnecting after backoff"
        );
        if !sleep_or_cancel(&cancel, backoff).await {
            break;
        }
    }

    info!(address = %addr, "Poll loop stopped");
}

/// Poll on one connection until it fails. Returns why it ended.
async fn poll_session(
    session: &mut DeviceSession,
    config: &DeviceConfig,
    sink: &Arc<dyn ReadingSink>,
    stats: &CollectorStats,
    cancel: &CancellationToken,
) -> SessionError {
    let interval = config.poll_interval();

    loop {
        let raw = match session.exchange(cancel).await {
            Ok(raw) => raw,
            Err(e) => return e,
        };

        match parse_frame(&raw) {
            Ok(reading) => {
                // A frame that completes while stop() is waiting is dropped.
                if cancel.is_cancelled() {
                    return SessionError::Cancelled;
                }
                stats.record_frame();
                debug!(
                    time = %reading.formatted_time(),
                    channels = reading.channel_count(),
                    "Reading received"
                );
                publish_blocking(sink, reading, stats).await;
            }
            Err(e) => {
                stats.record_malformed_frame();
                warn!(error = %e, bytes = raw.len(), "Discarding malformed frame");
            }
        }

        if !interval.is_zero() && !sleep_or_cancel(cancel, interval).await {
            return SessionError::Cancelled;
        }
    }
}

/// Hand one reading to the sink on the blocking pool and wait for it.
async fn publish_blocking(sink: &Arc<dyn ReadingSink>, reading: Reading, stats: &CollectorStats) {
    let sink = Arc::clone(sink);
    match tokio::task::spawn_blocking(move || sink.publish(reading)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            stats.record_sink_failure();
            warn!(error = %e, "Reading sink failed, continuing to poll");
        }
        Err(e) => {
            stats.record_sink_failure();
            warn!(error = %e, "Reading sink task panicked, continuing to poll");
        }
    }
}

/// Sleep for `duration` unless cancelled first. `true` when the full
/// duration elapsed.
async fn sleep_or_cancel(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

// ============================================================================
// One-shot Probe
// ============================================================================

/// Connect, run a single exchange, and parse it. Used by `tds530 probe`.
pub async fn probe_once(config: &DeviceConfig) -> anyhow::Result<Reading> {
    use anyhow::Context;

    let mut session = DeviceSession::connect(config).await?;
    let raw = session
        .exchange(&CancellationToken::new())
        .await
        .with_context(|| format!("Exchange with {} failed", session.addr()))?;
    session.close().await;
    Ok(parse_frame(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn unreachable_config() -> DeviceConfig {
        DeviceConfig {
            // TEST-NET-1, never routable.
            host: "192.0.2.1".to_string(),
            port: 4242,
            connect_timeout_ms: 100,
            reconnect_backoff_ms: 50,
            read_timeout_ms: 50,
            ..DeviceConfig::default()
        }
    }

    #[test]
    fn test_closure_is_a_sink() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let sink: Arc<dyn ReadingSink> = Arc::new(move |_r: Reading| -> anyhow::Result<()> {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let reading = Reading::new(chrono::NaiveDateTime::default(), vec![]);
        sink.publish(reading).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let sink: Arc<dyn ReadingSink> = Arc::new(|_r: Reading| -> anyhow::Result<()> { Ok(()) });
        let collector = Collector::new(unreachable_config(), sink)
            .with_stop_grace(Duration::from_millis(500));

        assert!(!collector.stop().await, "stop before start is a no-op");
        assert!(collector.start());
        assert!(!collector.start(), "second start is a no-op");
        assert!(collector.is_running());

        assert!(collector.stop().await);
        assert!(!collector.is_running());
        assert!(!collector.stop().await, "second stop is a no-op");

        assert!(collector.start(), "restart after stop");
        assert!(collector.stop().await);
    }

    #[tokio::test]
    async fn test_unreachable_device_keeps_retrying() {
        let sink: Arc<dyn ReadingSink> = Arc::new(|_r: Reading| -> anyhow::Result<()> { Ok(()) });
        let collector = Collector::new(unreachable_config(), sink);
        collector.start();
        tokio::time::sleep(Duration::from_millis(600)).await;

        let stats = collector.stats();
        assert!(stats.connect_attempts >= 2, "stats: {stats:?}");
        assert!(stats.connect_failures >= 1, "stats: {stats:?}");
        assert_eq!(stats.frames_received, 0);
        assert!(collector.is_running());
        collector.stop().await;
    }
}

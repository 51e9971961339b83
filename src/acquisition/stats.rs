//! Collector health counters
//!
//! Written by the poll task, read by API handlers. Plain atomics: each
//! counter is independent, so no snapshot needs to be globally consistent.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Live counters for one collector.
#[derive(Debug, Default)]
pub struct CollectorStats {
    connected: AtomicBool,
    connect_attempts: AtomicU64,
    connect_failures: AtomicU64,
    disconnects: AtomicU64,
    frames_received: AtomicU64,
    malformed_frames: AtomicU64,
    read_timeouts: AtomicU64,
    sink_failures: AtomicU64,
    /// Unix millis of the last published reading, 0 = never.
    last_reading_ms: AtomicI64,
}

impl CollectorStats {
    pub(crate) fn record_connect_attempt(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_connect_failure(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    pub(crate) fn record_disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_frame(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.last_reading_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub(crate) fn record_malformed_frame(&self) {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_read_timeout(&self) {
        self.read_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_sink_failure(&self) {
        self.sink_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the counters out for serialization.
    pub fn snapshot(&self) -> CollectorStatsSnapshot {
        let last_ms = self.last_reading_ms.load(Ordering::Relaxed);
        CollectorStatsSnapshot {
            connected: self.connected.load(Ordering::Relaxed),
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
            read_timeouts: self.read_timeouts.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
            last_reading_at: (last_ms > 0)
                .then(|| DateTime::<Utc>::from_timestamp_millis(last_ms))
                .flatten(),
        }
    }
}

/// Point-in-time copy of [`CollectorStats`].
#[derive(Debug, Clone, Serialize)]
pub struct CollectorStatsSnapshot {
    pub connected: bool,
    pub connect_attempts: u64,
    pub connect_failures: u64,
    pub disconnects: u64,
    pub frames_received: u64,
    pub malformed_frames: u64,
    pub read_timeouts: u64,
    pub sink_failures: u64,
    /// Host clock time of the last published reading
    pub last_reading_at: Option<DateTime<Utc>>,
}

//! Device Connection Session
//!
//! One TCP connection to the data logger. Each [`DeviceSession::exchange`]
//! sends the poll request and accumulates the reply until the frame
//! terminator shows up. The socket is closed when the session is dropped,
//! whichever way the caller leaves.

use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use super::stats::CollectorStats;
use crate::config::defaults::READ_CHUNK_BYTES;
use crate::config::DeviceConfig;

/// Connection session errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Connection to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    #[error("Connection closed by device")]
    ConnectionLost,

    #[error("Socket I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No frame terminator within {limit} bytes")]
    FrameTooLarge { limit: usize },

    #[error("Exchange cancelled")]
    Cancelled,
}

/// An open connection to the data logger.
pub struct DeviceSession {
    stream: TcpStream,
    addr: String,
    request: Vec<u8>,
    terminator: Vec<u8>,
    read_timeout: Duration,
    max_frame_bytes: usize,
    buffer: Vec<u8>,
    stats: Option<std::sync::Arc<CollectorStats>>,
}

impl DeviceSession {
    /// Open a fresh TCP connection, bounded by the configured connect timeout.
    pub async fn connect(config: &DeviceConfig) -> Result<Self, SessionError> {
        let addr = config.addr();
        let timeout = config.connect_timeout();
        tracing::debug!(address = %addr, "Connecting to data logger");

        let stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| SessionError::ConnectTimeout {
                addr: addr.clone(),
                timeout,
            })?
            .map_err(|source| SessionError::Connect {
                addr: addr.clone(),
                source,
            })?;

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "Could not set TCP_NODELAY");
        }

        // Keepalive catches a logger that vanished without a FIN.
        if let Some(idle) = config.keepalive() {
            let sock_ref = socket2::SockRef::from(&stream);
            let keepalive = socket2::TcpKeepalive::new()
                .with_time(idle)
                .with_interval(Duration::from_secs(10));
            if let Err(e) = sock_ref.set_tcp_keepalive(&keepalive) {
                tracing::debug!(error = %e, "Could not enable TCP keepalive");
            }
        }

        tracing::info!(address = %addr, "Data logger connection established");

        Ok(Self {
            stream,
            addr,
            request: config.request.as_bytes().to_vec(),
            terminator: config.terminator.as_bytes().to_vec(),
            read_timeout: config.read_timeout(),
            max_frame_bytes: config.max_frame_bytes,
            buffer: Vec::with_capacity(READ_CHUNK_BYTES * 4),
            stats: None,
        })
    }

    /// Count read timeouts into the collector's statistics.
    pub fn with_stats(mut self, stats: std::sync::Arc<CollectorStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Remote address this session is connected to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Send one poll request and collect the reply up to and including the
    /// terminator.
    ///
    /// A read that times out is retried; only cancellation, a closed peer,
    /// a socket error, or an oversize frame end the exchange early.
    pub async fn exchange(&mut self, cancel: &CancellationToken) -> Result<String, SessionError> {
        self.buffer.clear();

        tokio::select! {
            _ = cancel.cancelled() => return Err(SessionError::Cancelled),
            written = write_request(&mut self.stream, &self.request) => written?,
        }

        let mut chunk = [0u8; READ_CHUNK_BYTES];
        loop {
            let read = tokio::select! {
                _ = cancel.cancelled() => return Err(SessionError::Cancelled),
                read = tokio::time::timeout(self.read_timeout, self.stream.read(&mut chunk)) => read,
            };

            let n = match read {
                Err(_elapsed) => {
                    tracing::trace!(address = %self.addr, "Read timed out, still waiting for frame");
                    if let Some(stats) = &self.stats {
                        stats.record_read_timeout();
                    }
                    continue;
                }
                Ok(Ok(0)) => return Err(SessionError::ConnectionLost),
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(SessionError::Io(e)),
            };

            // Back up so a terminator straddling two reads is still found.
            // One extra byte covers a `\r` in front of the final `\n`.
            let overlap = self.terminator.len();
            let search_from = self.buffer.len().saturating_sub(overlap);
            self.buffer.extend_from_slice(&chunk[..n]);

            if let Some(end) = find_frame_end(&self.buffer, &self.terminator, search_from) {
                if end < self.buffer.len() {
                    tracing::debug!(
                        trailing = self.buffer.len() - end,
                        "Discarding bytes after frame terminator"
                    );
                }
                return Ok(String::from_utf8_lossy(&self.buffer[..end]).into_owned());
            }

            if self.buffer.len() > self.max_frame_bytes {
                return Err(SessionError::FrameTooLarge {
                    limit: self.max_frame_bytes,
                });
            }
        }
    }

    /// Shut down the write half and drop the socket.
    pub async fn close(mut self) {
        if let Err(e) = self.stream.shutdown().await {
            tracing::debug!(error = %e, "Socket shutdown failed (already closed?)");
        }
        tracing::info!(address = %self.addr, "Data logger connection closed");
    }
}

async fn write_request(stream: &mut TcpStream, request: &[u8]) -> std::io::Result<()> {
    stream.write_all(request).await?;
    stream.flush().await
}

/// Position of `needle` in `haystack`, searching from `from`.
fn find_terminator(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    let from = from.min(haystack.len());
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// End offset (exclusive) of the first terminator at or after `from`.
///
/// A terminator ending in `\n` also matches with `\r\n` in its place.
fn find_frame_end(haystack: &[u8], terminator: &[u8], from: usize) -> Option<usize> {
    let stem = match terminator.strip_suffix(b"\n") {
        Some(stem) if !stem.is_empty() => stem,
        _ => return find_terminator(haystack, terminator, from).map(|pos| pos + terminator.len()),
    };

    let mut from = from;
    while let Some(pos) = find_terminator(haystack, stem, from) {
        let after = pos + stem.len();
        match &haystack[after..] {
            [b'\n', ..] => return Some(after + 1),
            [b'\r', b'\n', ..] => return Some(after + 2),
            _ => from = pos + 1,
        }
    }
    None
}

//! System-wide default constants.
//!
//! Every configurable value in [`StationConfig`](super::StationConfig) falls
//! back to one of these.

// ============================================================================
// Device Protocol
// ============================================================================

/// Factory IP address of the data logger's LAN interface.
pub const DEVICE_HOST: &str = "192.168.100.100";

/// TCP port the data logger listens on for measurement requests.
pub const DEVICE_PORT: u16 = 4242;

/// Poll request sent once per exchange.
pub const POLL_REQUEST: &str = "ST\r\n";

/// End-of-frame marker: `END`, seven spaces, newline. A terminator ending
/// in `\n` also matches when the device sends `\r\n` instead.
pub const FRAME_TERMINATOR: &str = "END       \n";

// ============================================================================
// Connection Session
// ============================================================================

/// Upper bound on a single socket read (ms). A timeout is not an error;
/// it only bounds how long a read can hold off cancellation checks.
pub const READ_TIMEOUT_MS: u64 = 500;

/// Upper bound on the TCP connect handshake (ms).
pub const CONNECT_TIMEOUT_MS: u64 = 3_000;

/// Size of each socket read (bytes).
pub const READ_CHUNK_BYTES: usize = 1_024;

/// A frame larger than this without a terminator is treated as garbage
/// and the session is rebuilt (bytes).
pub const MAX_FRAME_BYTES: usize = 64 * 1_024;

/// TCP keepalive idle time (seconds). 0 disables keepalive.
pub const TCP_KEEPALIVE_SECS: u64 = 30;

// ============================================================================
// Poll Loop
// ============================================================================

/// Fixed delay before reconnecting after a connect failure or disconnect (ms).
pub const RECONNECT_BACKOFF_MS: u64 = 1_000;

/// Delay between successive exchanges on a healthy connection (ms).
/// 0 polls back-to-back, pacing is left to the device.
pub const POLL_INTERVAL_MS: u64 = 0;

/// How long `Collector::stop` waits for the poll task before aborting it (ms).
pub const STOP_GRACE_MS: u64 = 3_000;

// ============================================================================
// HTTP Server
// ============================================================================

/// HTTP server bind address.
pub const SERVER_ADDR: &str = "127.0.0.1:5000";

// ============================================================================
// TSV Log
// ============================================================================

/// Directory that log paths received over HTTP are resolved against.
pub const LOG_DIR: &str = ".";

/// Extension appended to log paths given without one.
pub const LOG_EXTENSION: &str = "tsv";

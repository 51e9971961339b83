//! Station Configuration - device protocol, HTTP server, and TSV log settings
//!
//! Each struct implements `Default` with the values in [`super::defaults`],
//! so an empty or missing config file reproduces the stock behavior.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::defaults;

/// Environment variable naming a config file to load.
pub const CONFIG_ENV_VAR: &str = "TDS530_CONFIG";

/// Config file looked up in the working directory when the env var is unset.
pub const LOCAL_CONFIG_FILE: &str = "tds530.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one collector station.
///
/// Load with `StationConfig::load()` which searches:
/// 1. `$TDS530_CONFIG` env var
/// 2. `./tds530.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StationConfig {
    /// Data logger connection and framing
    #[serde(default)]
    pub device: DeviceConfig,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// TSV logging
    #[serde(default)]
    pub log: LogConfig,
}

impl StationConfig {
    /// Load configuration using the standard search order:
    /// 1. `$TDS530_CONFIG` environment variable
    /// 2. `./tds530.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), device = %config.device.addr(), "Loaded station config from TDS530_CONFIG");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from TDS530_CONFIG, falling back");
                    }
                }
            } else {
                warn!(path = %path, "TDS530_CONFIG points to non-existent file, falling back");
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!(device = %config.device.addr(), "Loaded station config from ./tds530.toml");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./tds530.toml, using defaults");
                }
            }
        }

        info!("No tds530.toml found, using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Check every field for values the collector cannot run with.
    ///
    /// All problems are collected, not just the first.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.device;
        let mut errors: Vec<String> = Vec::new();

        if d.host.trim().is_empty() {
            errors.push("device.host must not be empty".to_string());
        }
        if d.port == 0 {
            errors.push("device.port must be in 1..=65535".to_string());
        }
        if d.request.is_empty() {
            errors.push("device.request must not be empty".to_string());
        }
        if d.terminator.is_empty() {
            errors.push("device.terminator must not be empty".to_string());
        }
        if d.read_timeout_ms == 0 {
            errors.push("device.read_timeout_ms must be > 0".to_string());
        }
        if d.connect_timeout_ms == 0 {
            errors.push("device.connect_timeout_ms must be > 0".to_string());
        }
        if d.reconnect_backoff_ms == 0 {
            errors.push("device.reconnect_backoff_ms must be > 0".to_string());
        }
        if d.max_frame_bytes < d.terminator.len() {
            errors.push(format!(
                "device.max_frame_bytes ({}) is smaller than the terminator ({} bytes)",
                d.max_frame_bytes,
                d.terminator.len()
            ));
        }
        if self.server.addr.trim().is_empty() {
            errors.push("server.addr must not be empty".to_string());
        }
        if self.log.dir.as_os_str().is_empty() {
            errors.push("log.dir must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::Serialize(e) => write!(f, "Config serialization error: {}", e),
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Device Config
// ============================================================================

/// Data logger endpoint and wire protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Data logger host name or IP address
    #[serde(default = "default_host")]
    pub host: String,

    /// Data logger TCP port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request sent at the start of each exchange
    #[serde(default = "default_request")]
    pub request: String,

    /// Marker that ends a response frame
    #[serde(default = "default_terminator")]
    pub terminator: String,

    /// Bound on a single socket read (ms)
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Bound on the TCP connect handshake (ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Fixed delay before every reconnect attempt (ms)
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,

    /// Delay between exchanges on a healthy connection (ms)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Largest accepted frame before the session is rebuilt (bytes)
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    /// TCP keepalive idle time (seconds, 0 disables)
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
}

fn default_host() -> String {
    defaults::DEVICE_HOST.to_string()
}
fn default_port() -> u16 {
    defaults::DEVICE_PORT
}
fn default_request() -> String {
    defaults::POLL_REQUEST.to_string()
}
fn default_terminator() -> String {
    defaults::FRAME_TERMINATOR.to_string()
}
fn default_read_timeout_ms() -> u64 {
    defaults::READ_TIMEOUT_MS
}
fn default_connect_timeout_ms() -> u64 {
    defaults::CONNECT_TIMEOUT_MS
}
fn default_reconnect_backoff_ms() -> u64 {
    defaults::RECONNECT_BACKOFF_MS
}
fn default_poll_interval_ms() -> u64 {
    defaults::POLL_INTERVAL_MS
}
fn default_max_frame_bytes() -> usize {
    defaults::MAX_FRAME_BYTES
}
fn default_keepalive_secs() -> u64 {
    defaults::TCP_KEEPALIVE_SECS
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request: default_request(),
            terminator: default_terminator(),
            read_timeout_ms: default_read_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            max_frame_bytes: default_max_frame_bytes(),
            keepalive_secs: default_keepalive_secs(),
        }
    }
}

impl DeviceConfig {
    /// `host:port` string handed to the resolver.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// `None` when keepalive is disabled.
    pub fn keepalive(&self) -> Option<Duration> {
        (self.keepalive_secs > 0).then(|| Duration::from_secs(self.keepalive_secs))
    }
}

// ============================================================================
// Server Config
// ============================================================================

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server bind address.
    ///
    /// Can be overridden by `TDS530_SERVER_ADDR` env var or `--addr` CLI flag.
    #[serde(default = "default_server_addr")]
    pub addr: String,
}

fn default_server_addr() -> String {
    defaults::SERVER_ADDR.to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_server_addr(),
        }
    }
}

// ============================================================================
// Log Config
// ============================================================================

/// TSV logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log file attached at startup. `None` starts with logging off.
    /// Trusted operator input, so it is not confined to `dir`.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Root for paths given to `POST /v1/log`. Requests must name a
    /// relative path that stays inside it.
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,

    /// What to do when a reading's channel count differs from the header.
    #[serde(default)]
    pub width_policy: WidthPolicy,
}

fn default_log_dir() -> PathBuf {
    PathBuf::from(defaults::LOG_DIR)
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            path: None,
            dir: default_log_dir(),
            width_policy: WidthPolicy::default(),
        }
    }
}

/// Handling of a reading whose channel count differs from the last header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WidthPolicy {
    /// Write a fresh header line, then the row.
    #[default]
    Reheader,
    /// Refuse the row; the log keeps its original width.
    Reject,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = StationConfig::default();
        assert!(config.validate().is_ok(), "Default config must always validate");
    }

    #[test]
    fn test_empty_toml_produces_defaults() {
        let config: StationConfig = toml::from_str("").expect("empty TOML should parse");
        assert_eq!(config.device.host, "192.168.100.100");
        assert_eq!(config.device.port, 4242);
        assert_eq!(config.device.request, "ST\r\n");
        assert_eq!(config.device.terminator, "END       \n");
        assert_eq!(config.device.read_timeout_ms, 500);
        assert_eq!(config.device.reconnect_backoff_ms, 1_000);
        assert_eq!(config.server.addr, "127.0.0.1:5000");
        assert!(config.log.path.is_none());
        assert_eq!(config.log.dir, PathBuf::from("."));
        assert_eq!(config.log.width_policy, WidthPolicy::Reheader);
    }

    #[test]
    fn test_partial_toml_override() {
        let toml_str = r#"
[device]
host = "10.0.0.7"
port = 5025
read_timeout_ms = 250

[log]
path = "/tmp/run.tsv"
dir = "/srv/tds530"
width_policy = "reject"
"#;
        let config: StationConfig = toml::from_str(toml_str).expect("partial TOML should parse");
        assert_eq!(config.device.addr(), "10.0.0.7:5025");
        assert_eq!(config.device.read_timeout(), Duration::from_millis(250));
        assert_eq!(config.log.path.as_deref(), Some(Path::new("/tmp/run.tsv")));
        assert_eq!(config.log.dir, PathBuf::from("/srv/tds530"));
        assert_eq!(config.log.width_policy, WidthPolicy::Reject);
        // Non-overridden values retain defaults
        assert_eq!(config.device.request, "ST\r\n");
        assert_eq!(config.device.connect_timeout_ms, 3_000);
    }

    #[test]
    fn test_validation_collects_every_error() {
        let mut config = StationConfig::default();
        config.device.host = " ".to_string();
        config.device.port = 0;
        config.device.read_timeout_ms = 0;
        config.device.max_frame_bytes = 4;
        config.log.dir = PathBuf::new();

        match config.validate() {
            Err(ConfigError::Validation(errors)) => {
                assert_eq!(errors.len(), 5, "unexpected errors: {errors:?}");
                assert!(errors.iter().any(|e| e.contains("log.dir")));
                assert!(errors.iter().any(|e| e.contains("device.host")));
                assert!(errors.iter().any(|e| e.contains("device.port")));
                assert!(errors.iter().any(|e| e.contains("read_timeout_ms")));
                assert!(errors.iter().any(|e| e.contains("max_frame_bytes")));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_keepalive_zero_disables() {
        let mut device = DeviceConfig::default();
        assert_eq!(device.keepalive(), Some(Duration::from_secs(30)));
        device.keepalive_secs = 0;
        assert_eq!(device.keepalive(), None);
    }

    #[test]
    fn test_load_from_file_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tds530.toml");
        std::fs::write(&path, "[device]\nport = 0\n").unwrap();

        let err = StationConfig::load_from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_toml_round_trip_keeps_terminator() {
        let config = StationConfig::default();
        let text = config.to_toml().unwrap();
        let back: StationConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.device.terminator, config.device.terminator);
        assert_eq!(back.device.request, config.device.request);
    }
}

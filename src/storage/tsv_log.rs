//! Tab-separated reading log
//!
//! File layout:
//!
//! ```text
//! Time<TAB>CH000<TAB>CH001<TAB>...
//! 2024/03/09 07:05:01<TAB>1.25<TAB><TAB>...
//! ```
//!
//! The header is written with the first row after `attach`, sized to that
//! row's channel count. Absent values are empty fields. Every row is synced
//! to disk before `write` returns.

use std::fs::File;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::config::defaults::LOG_EXTENSION;
use crate::config::WidthPolicy;
use crate::types::Reading;

/// Log writer errors
#[derive(Debug, Error)]
pub enum LogError {
    #[error("A log is already attached: {}", .0.display())]
    AlreadyAttached(PathBuf),

    #[error("No log is attached")]
    NotAttached,

    #[error("Invalid log path {}: {reason}", path.display())]
    InvalidPath { path: PathBuf, reason: &'static str },

    #[error("Reading has {got} channels but the log header has {expected}")]
    WidthMismatch { expected: usize, got: usize },

    #[error("Log I/O error ({}): {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Logging state reported to the control API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogStatus {
    pub attached: bool,
    pub path: Option<PathBuf>,
    pub rows_written: u64,
    /// Width of the current header, `None` until the first row.
    pub channels: Option<usize>,
}

struct OpenLog {
    path: PathBuf,
    file: File,
    header_width: Option<usize>,
    rows_written: u64,
}

impl OpenLog {
    fn io_error(&self, source: std::io::Error) -> LogError {
        LogError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// Append-only TSV sink. Not synchronized; the owning store serializes access.
pub struct TsvLog {
    open: Option<OpenLog>,
    policy: WidthPolicy,
}

impl TsvLog {
    pub fn new(policy: WidthPolicy) -> Self {
        Self { open: None, policy }
    }

    pub fn is_attached(&self) -> bool {
        self.open.is_some()
    }

    /// Create (or truncate) `path` and start a fresh log there.
    pub fn attach(&mut self, path: &Path) -> Result<(), LogError> {
        if let Some(open) = &self.open {
            return Err(LogError::AlreadyAttached(open.path.clone()));
        }

        let file = File::create(path).map_err(|source| LogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.open = Some(OpenLog {
            path: path.to_path_buf(),
            file,
            header_width: None,
            rows_written: 0,
        });
        tracing::info!(path = %path.display(), "TSV log attached");
        Ok(())
    }

    /// Close the current log. Returns the path that was closed.
    pub fn detach(&mut self) -> Result<PathBuf, LogError> {
        let open = self.open.take().ok_or(LogError::NotAttached)?;
        if let Err(e) = open.file.sync_all() {
            tracing::warn!(path = %open.path.display(), error = %e, "Final sync of TSV log failed");
        }
        tracing::info!(
            path = %open.path.display(),
            rows = open.rows_written,
            "TSV log detached"
        );
        Ok(open.path)
    }

    /// Append one reading, writing the header first when needed.
    pub fn write(&mut self, reading: &Reading) -> Result<(), LogError> {
        let policy = self.policy;
        let open = self.open.as_mut().ok_or(LogError::NotAttached)?;
        let width = reading.channel_count();

        let mut text = String::new();
        match open.header_width {
            None => text.push_str(&header_line(width)),
            Some(expected) if expected != width => match policy {
                WidthPolicy::Reheader => {
                    tracing::warn!(
                        path = %open.path.display(),
                        from = expected,
                        to = width,
                        "Channel count changed, writing a new header"
                    );
                    text.push_str(&header_line(width));
                }
                WidthPolicy::Reject => {
                    return Err(LogError::WidthMismatch { expected, got: width });
                }
            },
            Some(_) => {}
        }
        text.push_str(&row_line(reading));

        open.file
            .write_all(text.as_bytes())
            .and_then(|()| open.file.sync_data())
            .map_err(|e| open.io_error(e))?;

        open.header_width = Some(width);
        open.rows_written += 1;
        Ok(())
    }

    pub fn status(&self) -> LogStatus {
        match &self.open {
            Some(open) => LogStatus {
                attached: true,
                path: Some(open.path.clone()),
                rows_written: open.rows_written,
                channels: open.header_width,
            },
            None => LogStatus {
                attached: false,
                path: None,
                rows_written: 0,
                channels: None,
            },
        }
    }
}

fn header_line(width: usize) -> String {
    let mut line = String::from("Time");
    for idx in 0..width {
        line.push_str(&format!("\tCH{idx:03}"));
    }
    line.push('\n');
    line
}

fn row_line(reading: &Reading) -> String {
    let mut line = reading.formatted_time();
    for value in &reading.channels {
        line.push('\t');
        if let Some(v) = value {
            line.push_str(&format_value(*v));
        }
    }
    line.push('\n');
    line
}

/// Shortest text that parses back to the same `f64`, always with a decimal
/// point or exponent (`1.0`, `0.25`, `1e-7`).
fn format_value(v: f64) -> String {
    format!("{v:?}")
}

/// Append `.tsv` to a path that has no extension.
pub fn normalize_log_path(path: &Path) -> PathBuf {
    if path.extension().is_some() {
        path.to_path_buf()
    } else {
        path.with_extension(LOG_EXTENSION)
    }
}

/// Resolve a client-supplied log path inside `dir`, then normalize it.
///
/// Absolute paths and any `..` component are refused, so the result can
/// never name a file outside `dir`.
pub fn resolve_log_path(dir: &Path, requested: &Path) -> Result<PathBuf, LogError> {
    let invalid = |reason| LogError::InvalidPath {
        path: requested.to_path_buf(),
        reason,
    };
    if requested.as_os_str().is_empty() {
        return Err(invalid("path is empty"));
    }
    for component in requested.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => return Err(invalid("must stay inside the log directory")),
            Component::RootDir | Component::Prefix(_) => return Err(invalid("must be relative to the log directory")),
        }
    }
    if requested.file_name().is_none() {
        return Err(invalid("must name a file"));
    }
    Ok(normalize_log_path(&dir.join(requested)))
}

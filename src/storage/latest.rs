//! Latest-value store
//!
//! Holds the single most recent [`Reading`] for API readers and forwards
//! each one to the TSV log when a log is attached.
//!
//! Two locks, one discipline: the value lives in a `watch` channel (atomic
//! replace, whole-value reads, change notification), and the log sits behind
//! a mutex that `publish` holds across replace + write. A concurrent
//! `detach_log` therefore sees either the whole publish or none of it, while
//! `get` never waits on file I/O.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;

use super::tsv_log::{LogError, LogStatus, TsvLog};
use crate::acquisition::ReadingSink;
use crate::config::WidthPolicy;
use crate::types::Reading;

pub type LatestReading = Option<Arc<Reading>>;

pub struct LatestStore {
    latest: watch::Sender<LatestReading>,
    log: Mutex<TsvLog>,
}

impl LatestStore {
    pub fn new(width_policy: WidthPolicy) -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            latest,
            log: Mutex::new(TsvLog::new(width_policy)),
        }
    }

    /// Replace the stored reading and log it if a log is attached.
    ///
    /// The stored value is updated even when the log write fails.
    pub fn publish(&self, reading: Reading) -> Result<(), LogError> {
        let reading = Arc::new(reading);
        let mut log = self.lock_log();
        self.latest.send_replace(Some(Arc::clone(&reading)));
        if log.is_attached() {
            log.write(&reading)?;
        }
        Ok(())
    }

    /// The most recent reading, or `None` before the first publish.
    pub fn get(&self) -> LatestReading {
        self.latest.borrow().clone()
    }

    /// Receiver notified on every publish.
    pub fn subscribe(&self) -> watch::Receiver<LatestReading> {
        self.latest.subscribe()
    }

    pub fn attach_log(&self, path: &Path) -> Result<(), LogError> {
        self.lock_log().attach(path)
    }

    pub fn detach_log(&self) -> Result<PathBuf, LogError> {
        self.lock_log().detach()
    }

    pub fn log_status(&self) -> LogStatus {
        self.lock_log().status()
    }

    fn lock_log(&self) -> MutexGuard<'_, TsvLog> {
        self.log.lock().unwrap_or_else(|e| {
            tracing::warn!("TSV log mutex poisoned, recovering");
            e.into_inner()
        })
    }
}

impl Default for LatestStore {
    fn default() -> Self {
        Self::new(WidthPolicy::default())
    }
}

impl ReadingSink for LatestStore {
    fn publish(&self, reading: Reading) -> anyhow::Result<()> {
        Ok(Self::publish(self, reading)?)
    }
}

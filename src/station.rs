//! Station
//!
//! Owns one [`Collector`] and the [`LatestStore`] it publishes into, and is
//! the single handle the HTTP layer and `main` operate on.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::watch;

use crate::acquisition::{Collector, CollectorStatsSnapshot, PollLoop, ReadingSink};
use crate::config::StationConfig;
use crate::storage::{normalize_log_path, resolve_log_path, LatestReading, LatestStore, LogError, LogStatus};

pub struct Station {
    store: Arc<LatestStore>,
    collector: Collector,
    log_dir: PathBuf,
}

impl Station {
    pub fn new(config: &StationConfig) -> Self {
        let store = Arc::new(LatestStore::new(config.log.width_policy));
        let sink: Arc<dyn ReadingSink> = Arc::clone(&store) as Arc<dyn ReadingSink>;
        let collector = Collector::new(config.device.clone(), sink);
        Self {
            store,
            collector,
            log_dir: config.log.dir.clone(),
        }
    }

    pub fn store(&self) -> &Arc<LatestStore> {
        &self.store
    }

    pub fn collector(&self) -> &Collector {
        &self.collector
    }

    /// Start the poll loop. Returns `false` if it was already running.
    pub fn start(&self) -> bool {
        self.collector.start()
    }

    pub fn latest(&self) -> LatestReading {
        self.store.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<LatestReading> {
        self.store.subscribe()
    }

    /// Attach a log at `path` (`.tsv` appended when it has no extension).
    /// Returns the path actually opened.
    pub fn start_logging(&self, path: &Path) -> Result<PathBuf, LogError> {
        let path = normalize_log_path(path);
        self.store.attach_log(&path)?;
        Ok(path)
    }

    /// Attach a log named by an untrusted relative path, resolved inside
    /// the configured log directory.
    pub fn start_logging_in_log_dir(&self, requested: &Path) -> Result<PathBuf, LogError> {
        let path = resolve_log_path(&self.log_dir, requested)?;
        self.store.attach_log(&path)?;
        Ok(path)
    }

    pub fn stop_logging(&self) -> Result<PathBuf, LogError> {
        self.store.detach_log()
    }

    pub fn log_status(&self) -> LogStatus {
        self.store.log_status()
    }

    pub fn collector_stats(&self) -> CollectorStatsSnapshot {
        self.collector.stats()
    }

    /// Stop polling, then close any attached log.
    pub async fn shutdown(&self) {
        if self.collector.stop().await {
            tracing::info!("Collector stopped");
        }
        match self.store.detach_log() {
            Ok(path) => tracing::info!(path = %path.display(), "Log closed on shutdown"),
            Err(LogError::NotAttached) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to close log on shutdown"),
        }
    }
}

//! Reading storage
//!
//! [`LatestStore`] keeps the most recent reading for API readers and forwards
//! each one to the optional [`TsvLog`] on disk.

pub mod latest;
pub mod tsv_log;

pub use latest::{LatestReading, LatestStore};
pub use tsv_log::{normalize_log_path, resolve_log_path, LogError, LogStatus, TsvLog};

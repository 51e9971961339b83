//! TDS530 Collector: polling engine for TDS530-class data loggers
//!
//! ## Architecture
//!
//! - **Acquisition**: TCP session, frame parser, reconnecting poll loop
//! - **Storage**: latest-value store and TSV log writer
//! - **Station**: collector + store behind one handle
//! - **API**: axum read/control endpoints and dashboard page
//! - **Simulator**: fake data logger for tests and demos

pub mod acquisition;
pub mod api;
pub mod config;
pub mod simulator;
pub mod station;
pub mod storage;
pub mod types;

// Re-export station configuration
pub use config::StationConfig;

// Re-export commonly used types
pub use types::Reading;

// Re-export acquisition entry points
pub use acquisition::{Collector, PollLoop, ReadingSink};

// Re-export storage
pub use storage::{LatestStore, LogError, LogStatus};

pub use station::Station;

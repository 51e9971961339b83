//! Device data acquisition module
//!
//! Polls a TDS530-class data logger over TCP:
//! - [`frame`]: response text → [`Reading`](crate::types::Reading)
//! - [`session`]: one TCP connection, one request/response exchange at a time
//! - [`collector`]: reconnecting poll loop with start/stop lifecycle

pub mod collector;
pub mod frame;
pub mod session;
mod stats;

pub use collector::{probe_once, Collector, PollLoop, ReadingSink};
pub use frame::{format_frame, parse_frame, FrameError};
pub use session::{DeviceSession, SessionError};
pub use stats::{CollectorStats, CollectorStatsSnapshot};

//! Shared data structures for the TDS530 collector
//!
//! - [`Reading`]: one parsed device sample (timestamp + channel vector)

mod reading;

pub use reading::*;

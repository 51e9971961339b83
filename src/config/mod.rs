//! Station Configuration Module
//!
//! Device, server, and logging settings loaded from a TOML file.
//!
//! ## Loading Order
//!
//! 1. `TDS530_CONFIG` environment variable (path to TOML file)
//! 2. `tds530.toml` in the current working directory
//! 3. Built-in defaults (see [`defaults`])
//!
//! The loaded [`StationConfig`] is handed to the
//! [`Station`](crate::station::Station) that owns it.

mod station_config;
pub mod defaults;

pub use station_config::*;

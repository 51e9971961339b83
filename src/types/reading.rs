//! Device reading types

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Timestamp layout used on the wire, in the TSV log, and in the HTTP API.
pub const TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// One parsed sample from the data logger.
///
/// Serializes as `{"time": "YYYY/MM/DD HH:MM:SS", "data": [1.5, null, ...]}`,
/// the shape the HTTP API has always returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Device clock time from the first line of the frame (second precision)
    #[serde(rename = "time", with = "device_time")]
    pub timestamp: NaiveDateTime,

    /// One slot per accepted channel line, in arrival order.
    /// `None` when the value text was not numeric.
    #[serde(rename = "data")]
    pub channels: Vec<Option<f64>>,
}

impl Reading {
    pub fn new(timestamp: NaiveDateTime, channels: Vec<Option<f64>>) -> Self {
        Self { timestamp, channels }
    }

    /// Number of channel slots (absent values included).
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Timestamp rendered in the device's `YYYY/MM/DD HH:MM:SS` layout.
    pub fn formatted_time(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }
}

mod device_time {
    use super::TIMESTAMP_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&ts.format(TIMESTAMP_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT).map_err(serde::de::Error::custom)
    }
}

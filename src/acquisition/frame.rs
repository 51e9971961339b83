//! TDS530 Response Frame Parser
//!
//! A poll response is plain text:
//!
//! ```text
//! 2024/03/09 07:05:01
//! M000  +1.2345E+00
//! M001  -0.0021
//! M002  ------
//! END
//! ```
//!
//! Line 0 is the device clock (`YYYY/MM/DD HH:MM:SS`). Every following line is
//! `<channel-id><two spaces><value>`. Lines that do not split into exactly two
//! fields (the `END` marker among them) are skipped. A line with the right
//! shape but a non-numeric value keeps its slot as an absent value.

use chrono::NaiveDateTime;
use thiserror::Error;

use crate::types::{Reading, TIMESTAMP_FORMAT};

/// Separator between channel id and value.
const FIELD_SEPARATOR: &str = "  ";

/// Placeholder the device (and the simulator) prints for an over-range or
/// disconnected input.
pub const ABSENT_VALUE_TEXT: &str = "------";

/// Malformed frame errors. Either one means the whole exchange is discarded.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Malformed frame: expected at least 2 lines, got {0}")]
    TooFewLines(usize),

    #[error("Malformed frame: bad timestamp line {line:?}: {source}")]
    BadTimestamp {
        line: String,
        #[source]
        source: chrono::ParseError,
    },
}

/// Parse one complete frame into a [`Reading`].
///
/// Pure: no I/O, no state.
pub fn parse_frame(raw: &str) -> Result<Reading, FrameError> {
    let lines = split_lines(raw);
    if lines.len() < 2 {
        return Err(FrameError::TooFewLines(lines.len()));
    }

    let timestamp = NaiveDateTime::parse_from_str(lines[0], TIMESTAMP_FORMAT).map_err(|source| {
        FrameError::BadTimestamp {
            line: lines[0].to_string(),
            source,
        }
    })?;

    let channels = lines[1..].iter().filter_map(|line| parse_channel_line(line)).collect();

    Ok(Reading::new(timestamp, channels))
}

/// `None` when the line is not a channel line (skip the slot),
/// `Some(None)` when it is one but the value is not numeric.
fn parse_channel_line(line: &str) -> Option<Option<f64>> {
    let mut parts = line.split(FIELD_SEPARATOR);
    let (_id, value) = (parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    Some(value.trim().parse::<f64>().ok())
}

/// Split on `\r\n`, `\n`, or a lone `\r`. A trailing line break does not
/// produce an empty final line.
fn split_lines(raw: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let mut start = 0;
    let bytes = raw.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\n' => {
                lines.push(&raw[start..i]);
                start = i + 1;
            }
            b'\r' => {
                lines.push(&raw[start..i]);
                if bytes.get(i + 1) == Some(&b'\n') {
                    i += 1;
                }
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    if start < raw.len() {
        lines.push(&raw[start..]);
    }
    lines
}

/// Render a reading the way the device sends it, terminator included.
///
/// Channel ids are `M000`, `M001`, ...; absent values print as
/// [`ABSENT_VALUE_TEXT`].
pub fn format_frame(reading: &Reading, terminator: &str) -> String {
    let mut frame = reading.formatted_time();
    frame.push_str("\r\n");
    for (idx, value) in reading.channels.iter().enumerate() {
        match value {
            Some(v) => frame.push_str(&format!("M{idx:03}{FIELD_SEPARATOR}{v:?}\r\n")),
            None => frame.push_str(&format!("M{idx:03}{FIELD_SEPARATOR}{ABSENT_VALUE_TEXT}\r\n")),
        }
    }
    frame.push_str(terminator);
    frame
}

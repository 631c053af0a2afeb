//! Wire line decoding
//!
//! Two formats are live at once: the original `|`-delimited lines and the
//! newer JSON records. [`WireFormat::sniff`] picks one per line and the
//! matching submodule does the work. Decoding is pure and does no I/O.
//!
//! Outcomes:
//! * `Ok(Some(event))`: a complete event
//! * `Ok(None)`: nothing to do (blank line, `#` comment, unknown kind)
//! * `Err(DecodeError)`: the line is malformed

pub mod legacy;
pub mod structured;

use crate::error::{DecodeError, DecodeFailure};
use crate::events::{Event, EventKind};
use std::collections::BTreeMap;

/// Decode failures kept verbatim in a [`DecodeSummary`]
const MAX_SAMPLED_ERRORS: usize = 10;

/// The line formats the decoder understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    Legacy,
    Structured,
}

impl WireFormat {
    /// Structured records are JSON objects; everything else is treated as legacy
    pub fn sniff(line: &str) -> Self {
        if line.starts_with('{') {
            WireFormat::Structured
        } else {
            WireFormat::Legacy
        }
    }
}

fn is_skippable(line: &str) -> bool {
    line.is_empty() || line.starts_with('#')
}

/// Decode raw bytes from the delivery channel
pub fn decode(raw: &[u8]) -> Result<Option<Event>, DecodeError> {
    let line = std::str::from_utf8(raw).map_err(|_| {
        DecodeError::new(
            String::from_utf8_lossy(raw).trim().to_string(),
            DecodeFailure::InvalidUtf8,
        )
    })?;
    decode_line(line)
}

/// Decode a single textual line
pub fn decode_line(line: &str) -> Result<Option<Event>, DecodeError> {
    let line = line.trim();
    if is_skippable(line) {
        return Ok(None);
    }

    match WireFormat::sniff(line) {
        WireFormat::Legacy => legacy::decode(line),
        WireFormat::Structured => structured::decode(line),
    }
}

/// Determine a line's kind without a full decode, for topic routing
pub fn sniff_kind(line: &str) -> Result<Option<EventKind>, DecodeError> {
    let line = line.trim();
    if is_skippable(line) {
        return Ok(None);
    }

    match WireFormat::sniff(line) {
        WireFormat::Legacy => legacy::sniff(line),
        WireFormat::Structured => structured::sniff(line),
    }
}

/// Outcome counts for a batch of lines, such as a capture file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodeSummary {
    /// Decoded events per kind token
    pub events: BTreeMap<&'static str, usize>,
    pub skipped: usize,
    pub errors: usize,
    /// The first few failures, with their 1-based line numbers
    pub sampled_errors: Vec<(usize, DecodeError)>,
}

impl DecodeSummary {
    pub fn decoded(&self) -> usize {
        self.events.values().sum()
    }
}

/// Decode every line and tally the results
pub fn summarize<'a>(lines: impl IntoIterator<Item = &'a str>) -> DecodeSummary {
    let mut summary = DecodeSummary::default();

    for (index, line) in lines.into_iter().enumerate() {
        match decode_line(line) {
            Ok(Some(event)) => *summary.events.entry(event.kind().token()).or_default() += 1,
            Ok(None) => summary.skipped += 1,
            Err(e) => {
                summary.errors += 1;
                if summary.sampled_errors.len() < MAX_SAMPLED_ERRORS {
                    summary.sampled_errors.push((index + 1, e));
                }
            }
        }
    }

    summary
}

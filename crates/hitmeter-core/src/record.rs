//! Per-request result record produced by the load generator.
//!
//! JSON decoding follows the generator's result encoding: `latency` is an
//! integer number of nanoseconds, and fields the observer has no use for
//! (`body`, `headers`, ...) are ignored.

use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::{HitmeterError, Result};

/// Outcome of a single request. Transient: one per observed hit, dropped
/// once aggregated.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ResultRecord {
    /// Name of the attack that produced this hit.
    pub attack: String,
    pub seq: u64,
    pub method: String,
    pub url: String,
    /// HTTP status code; 0 when no response was received.
    pub code: u16,
    pub timestamp: Option<String>,
    #[serde(deserialize_with = "latency_from_nanos")]
    pub latency: Duration,
    pub bytes_in: u64,
    pub bytes_out: u64,
    /// Empty on success.
    pub error: String,
}

fn latency_from_nanos<'de, D>(d: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let nanos = u64::deserialize(d)?;
    Ok(Duration::from_nanos(nanos))
}

impl ResultRecord {
    /// Convenience constructor for a record without transport error.
    pub fn new(method: impl Into<String>, url: impl Into<String>, code: u16) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            code,
            ..Self::default()
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_bytes(mut self, bytes_in: u64, bytes_out: u64) -> Self {
        self.bytes_in = bytes_in;
        self.bytes_out = bytes_out;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = error.into();
        self
    }

    /// True when the record carries an error message.
    pub fn is_failure(&self) -> bool {
        !self.error.is_empty()
    }

    /// Decode one JSON-encoded record (one line of an NDJSON stream).
    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| HitmeterError::Decode(format!("invalid result: {e}")))
    }
}

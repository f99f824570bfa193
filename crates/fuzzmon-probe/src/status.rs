//! Status records produced by probe cycles.
//!
//! Status code convention:
//! - negative: an anomaly was detected on the target
//! - zero: nominal
//! - positive: probe-specific informational code
//! - absent: the probe has made no statement yet

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A timestamped health report returned by `Probe::start` or `Probe::measure`.
///
/// Records are immutable once built: the builder methods consume `self`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    status: Option<i64>,
    private_info: Option<serde_json::Value>,
    timestamp: DateTime<Utc>,
}

impl StatusRecord {
    /// A record with no status statement, stamped now.
    pub fn empty() -> Self {
        Self {
            status: None,
            private_info: None,
            timestamp: Utc::now(),
        }
    }

    /// A record carrying `status`, stamped now.
    pub fn new(status: i64) -> Self {
        Self {
            status: Some(status),
            ..Self::empty()
        }
    }

    /// A status-0 record, stamped now.
    pub fn nominal() -> Self {
        Self::new(0)
    }

    /// Attach opaque probe-private data (a message, a PID, a structured payload).
    pub fn with_info(mut self, info: impl Into<serde_json::Value>) -> Self {
        self.private_info = Some(info.into());
        self
    }

    /// The status code, `None` when the probe made no statement.
    pub fn status(&self) -> Option<i64> {
        self.status
    }

    /// Probe-private payload, if any.
    pub fn private_info(&self) -> Option<&serde_json::Value> {
        self.private_info.as_ref()
    }

    /// When the record was built.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// True when the record reports a negative status code.
    pub fn is_anomaly(&self) -> bool {
        matches!(self.status, Some(code) if code < 0)
    }
}

impl Default for StatusRecord {
    fn default() -> Self {
        Self::empty()
    }
}

/// A record published by a named probe, as seen by registry subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusUpdate {
    /// Name of the publishing probe.
    pub probe: String,
    /// The record as stored in the registry.
    pub record: StatusRecord,
}

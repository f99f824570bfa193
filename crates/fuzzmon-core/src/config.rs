//! Monitor configuration: handshake poll period and termination bounds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::MonitorError;

/// Timing knobs for the monitor.
///
/// Every wait in the subsystem is a bounded poll; these values set the poll
/// granularity and the ceiling on waiting for a probe worker to exit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Poll period of handshake waits (default: 1 s).
    pub handshake_poll_ms: u64,
    /// How long `stop_probe` / `stop_all_probes` wait for workers to exit (default: 10 s).
    pub termination_timeout_ms: u64,
    /// Re-check period while waiting for termination (default: 100 ms).
    pub termination_poll_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            handshake_poll_ms: 1_000,
            termination_timeout_ms: 10_000,
            termination_poll_ms: 100,
        }
    }
}

impl MonitorConfig {
    /// Parse a JSON document; missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, MonitorError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Handshake poll period, at least 1 ms so waits never spin.
    pub fn handshake_poll(&self) -> Duration {
        Duration::from_millis(self.handshake_poll_ms.max(1))
    }

    /// Ceiling on waiting for probe workers to exit.
    pub fn termination_timeout(&self) -> Duration {
        Duration::from_millis(self.termination_timeout_ms)
    }

    /// Re-check period of the termination wait, at least 1 ms.
    pub fn termination_poll(&self) -> Duration {
        Duration::from_millis(self.termination_poll_ms.max(1))
    }
}

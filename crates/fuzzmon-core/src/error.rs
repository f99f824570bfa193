use std::time::Duration;

use fuzzmon_probe::RegistryError;

/// Errors surfaced to the engine by `Monitor` operations.
///
/// Probe lifecycle failures never show up here: they are contained in the
/// worker and recorded in the registry. Only configuration errors and
/// termination timeouts reach the caller.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Probe '{0}' is already started")]
    AlreadyStarted(String),

    #[error("Probe '{0}' has no runnable implementation")]
    NotRunnable(String),

    #[error("Failed to spawn worker for probe '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Timeout! Probe(s) {probes:?} still running after {waited:?}")]
    TerminationTimeout { probes: Vec<String>, waited: Duration },

    #[error("Invalid monitor configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl MonitorError {
    /// Errors caused by the request itself; no state was changed.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Registry(_) | Self::AlreadyStarted(_) | Self::NotRunnable(_) | Self::Config(_)
        )
    }

    /// The operation was abandoned after its time bound.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::TerminationTimeout { .. })
    }
}

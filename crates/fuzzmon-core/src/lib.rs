//! Probe monitoring for a fuzzing engine.
//!
//! `fuzzmon-probe` defines probes and runs their workers; this crate owns the
//! engine side: starting and stopping workers, bracketing each transmission
//! with the handshake hooks, and aggregating probe statuses into a verdict on
//! the target's health.

pub mod config;
pub mod error;
pub mod logging;
pub mod monitor;

pub use config::MonitorConfig;
pub use error::MonitorError;
pub use monitor::{Monitor, TargetHealth};

pub use fuzzmon_probe::{
    ExecutionMode, Handle, Probe, ProbeContext, ProbeError, ProbeFailure, ProbeRegistration,
    ProbeRegistry, StatusRecord, StatusUpdate,
};

//! The probe lifecycle contract and the handles passed to it.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::status::StatusRecord;

/// Opaque collaborator handle (data model, target, logger).
pub type Handle = Arc<dyn Any + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("{0}")]
    Failed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unavailable: {0}")]
    Unavailable(String),
}

impl ProbeError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// Handles supplied by the engine to every probe lifecycle call.
///
/// The core never looks inside them; probes downcast to the concrete types
/// they were written against.
#[derive(Clone, Default)]
pub struct ProbeContext {
    data_model: Option<Handle>,
    target: Option<Handle>,
    logger: Option<Handle>,
}

impl ProbeContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data_model(mut self, dm: Handle) -> Self {
        self.data_model = Some(dm);
        self
    }

    pub fn with_target(mut self, target: Handle) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_logger(mut self, logger: Handle) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn data_model<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.data_model.as_deref()?.downcast_ref()
    }

    pub fn target<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.target.as_deref()?.downcast_ref()
    }

    pub fn logger<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.logger.as_deref()?.downcast_ref()
    }

    pub fn set_data_model(&mut self, dm: Option<Handle>) {
        self.data_model = dm;
    }

    pub fn set_target(&mut self, target: Option<Handle>) {
        self.target = target;
    }

    pub fn set_logger(&mut self, logger: Option<Handle>) {
        self.logger = logger;
    }
}

impl fmt::Debug for ProbeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeContext")
            .field("data_model", &self.data_model.is_some())
            .field("target", &self.target.is_some())
            .field("logger", &self.logger.is_some())
            .finish()
    }
}

/// Instrumentation that observes the target next to the fuzzing data path.
///
/// Only `measure` is mandatory. `arm` is called for synchronized probes
/// right before each transmission; free-running probes never see it.
/// Any error (or panic) from these calls is contained by the runner: it is
/// reported, and the probe is reset to not-started.
pub trait Probe: Send + 'static {
    /// One-time initialisation. May return an initial status.
    fn start(&mut self, _ctx: &ProbeContext) -> Result<Option<StatusRecord>, ProbeError> {
        Ok(None)
    }

    /// One-time teardown.
    fn stop(&mut self, _ctx: &ProbeContext) -> Result<(), ProbeError> {
        Ok(())
    }

    /// Prepare instrumentation immediately before a transmission.
    fn arm(&mut self, _ctx: &ProbeContext) -> Result<(), ProbeError> {
        Ok(())
    }

    /// Perform one measurement.
    fn measure(&mut self, ctx: &ProbeContext) -> Result<StatusRecord, ProbeError>;

    /// Soft reset of probe-internal state, requested by the engine.
    fn quick_reset(&mut self, _ctx: &ProbeContext) -> Result<(), ProbeError> {
        Ok(())
    }
}

/// Lifecycle call in which a probe failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum LifecyclePhase {
    Start,
    Arm,
    Measure,
    Stop,
    QuickReset,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "start()",
            Self::Arm => "arm()",
            Self::Measure => "measure()",
            Self::Stop => "stop()",
            Self::QuickReset => "quick_reset()",
        };
        f.write_str(name)
    }
}

pub mod capability;
pub mod event;
pub mod handshake;
pub mod registry;
pub mod runner;
pub mod status;

pub use capability::{Handle, LifecyclePhase, Probe, ProbeContext, ProbeError};
pub use handshake::{HandshakePhase, HandshakeSignal, WaitOutcome};
pub use registry::{ExecutionMode, ProbeRegistration, ProbeRegistry, RegistryError};
pub use runner::{ProbeFailure, ProbeFn, ProbeLaunch};
pub use status::{StatusRecord, StatusUpdate};

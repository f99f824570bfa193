//! Worker loops wrapping a `Probe` into a schedulable runner.
//!
//! Two strategies exist, chosen per probe at registration:
//! - free-running: measures on its own timer, independent of transmissions.
//! - synchronized: locks each measurement to the engine's transmission cycle
//!   through a `HandshakeSignal`.
//!
//! Every lifecycle call goes through `contain`: errors and panics are
//! reported with the phase and the probe name, recorded in the registry, and
//! the probe is reset so it can be started again. Nothing escapes the worker.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::capability::{LifecyclePhase, Probe, ProbeContext, ProbeError};
use crate::event::StopSignal;
use crate::handshake::HandshakeSignal;
use crate::registry::{ExecutionMode, ProbeRegistry, DEFAULT_PROBE_DELAY};

/// A probe object shared between its registry entry and its worker.
pub type SharedProbe = Arc<Mutex<Box<dyn Probe>>>;

/// Runnable entry point stored in the registry for each bound probe.
pub type ProbeFn = Arc<dyn Fn(ProbeLaunch) + Send + Sync>;

/// Everything a worker needs, handed over by the monitor at launch.
pub struct ProbeLaunch {
    pub registry: Arc<ProbeRegistry>,
    pub stop: Arc<StopSignal>,
    /// Present for synchronized probes only.
    pub handshake: Option<Arc<HandshakeSignal>>,
    pub context: ProbeContext,
}

/// A contained lifecycle failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeFailure {
    pub phase: LifecyclePhase,
    pub message: String,
    pub at: DateTime<Utc>,
}

pub(crate) fn build_runner(mode: ExecutionMode, name: String, probe: SharedProbe) -> ProbeFn {
    match mode {
        ExecutionMode::FreeRunning => Arc::new(move |launch| run_free(&name, &probe, launch)),
        ExecutionMode::Synchronized => {
            Arc::new(move |launch| run_synchronized(&name, &probe, launch))
        }
    }
}

// A panicking probe poisons its own mutex; the probe object is still the
// only owner of its state, so keep using it.
pub(crate) fn lock_probe(probe: &SharedProbe) -> MutexGuard<'_, Box<dyn Probe>> {
    probe.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Run one lifecycle call, turning errors and panics into a reported failure.
pub(crate) fn contain<T>(
    name: &str,
    phase: LifecyclePhase,
    call: impl FnOnce() -> Result<T, ProbeError>,
) -> Result<T, ProbeFailure> {
    let message = match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(value)) => return Ok(value),
        Ok(Err(err)) => err.to_string(),
        Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
    };
    error!(probe = %name, phase = %phase, error = %message, "exception in probe '{name}' (during {phase})");
    Err(ProbeFailure {
        phase,
        message,
        at: Utc::now(),
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn run_free(name: &str, probe: &SharedProbe, launch: ProbeLaunch) {
    let ProbeLaunch {
        registry,
        stop,
        context,
        ..
    } = launch;

    if !start_phase(&registry, name, probe, &context) {
        return;
    }

    while !stop.is_set() {
        let delay = registry.probe_delay(name).unwrap_or(DEFAULT_PROBE_DELAY);

        match contain(name, LifecyclePhase::Measure, || {
            lock_probe(probe).measure(&context)
        }) {
            Ok(record) => registry.set_probe_status(name, record),
            Err(failure) => {
                abandon(&registry, name, failure);
                return;
            }
        }

        stop.wait_timeout(delay);
    }

    stop_phase(&registry, name, probe, &context);
}

fn run_synchronized(name: &str, probe: &SharedProbe, launch: ProbeLaunch) {
    let ProbeLaunch {
        registry,
        stop,
        handshake,
        context,
    } = launch;

    let Some(handshake) = handshake else {
        error!(probe = %name, "synchronized probe launched without a handshake");
        registry.reset_probe(name);
        return;
    };

    if !start_phase(&registry, name, probe, &context) {
        return;
    }

    let stopping = || stop.is_set();

    while !stop.is_set() {
        let delay = registry.probe_delay(name).unwrap_or(DEFAULT_PROBE_DELAY);

        if !handshake.wait_for_data_ready(stopping).reached() || stop.is_set() {
            handshake.lets_fuzz_continue();
            break;
        }

        if let Err(failure) = contain(name, LifecyclePhase::Arm, || lock_probe(probe).arm(&context)) {
            // The engine is about to transmit and will wait for this cycle.
            handshake.wait_until_data_is_emitted(stopping);
            abandon(&registry, name, failure);
            handshake.lets_fuzz_continue();
            return;
        }

        if !handshake.wait_until_data_is_emitted(stopping).reached() || stop.is_set() {
            handshake.lets_fuzz_continue();
            break;
        }

        match contain(name, LifecyclePhase::Measure, || {
            lock_probe(probe).measure(&context)
        }) {
            Ok(record) => registry.set_probe_status(name, record),
            Err(failure) => {
                abandon(&registry, name, failure);
                handshake.lets_fuzz_continue();
                return;
            }
        }

        handshake.lets_fuzz_continue();
        debug!(probe = %name, "cycle closed");
        stop.wait_timeout(delay);
    }

    stop_phase(&registry, name, probe, &context);
}

fn start_phase(
    registry: &ProbeRegistry,
    name: &str,
    probe: &SharedProbe,
    context: &ProbeContext,
) -> bool {
    info!(probe = %name, "__ probe '{name}' is starting __");
    match contain(name, LifecyclePhase::Start, || lock_probe(probe).start(context)) {
        Ok(Some(record)) => {
            registry.set_probe_status(name, record);
            true
        }
        Ok(None) => true,
        Err(failure) => {
            abandon(registry, name, failure);
            false
        }
    }
}

fn stop_phase(registry: &ProbeRegistry, name: &str, probe: &SharedProbe, context: &ProbeContext) {
    info!(probe = %name, "__ probe '{name}' is stopping __");
    if let Err(failure) = contain(name, LifecyclePhase::Stop, || lock_probe(probe).stop(context)) {
        registry.record_failure(name, failure);
    }
    registry.reset_probe(name);
}

fn abandon(registry: &ProbeRegistry, name: &str, failure: ProbeFailure) {
    registry.record_failure(name, failure);
    registry.reset_probe(name);
}

//! Per-probe handshake between the fuzzing engine and a synchronized probe.
//!
//! One cycle walks four phases:
//!
//! ```text
//! Idle --notify_data_ready--> Armed --notify_data_emission--> Emitted --lets_fuzz_continue--> Resumed
//! ```
//!
//! The engine drives the first two transitions, the probe the last one. The
//! two multi-flag transitions run under a shared guard so an engine call can
//! never interleave with a probe completing its cycle.
//!
//! Every wait is a bounded poll: it sleeps at most one poll period at a time
//! and re-checks a caller-supplied abort predicate in between, so a dead
//! peer can never block the other side forever.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::event::Event;

/// Default poll period for handshake waits.
pub const DEFAULT_POLL: Duration = Duration::from_secs(1);

/// Observable state of a handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    /// No cycle in progress.
    Idle,
    /// The engine announced imminent transmission.
    Armed,
    /// The engine finished transmitting; the probe may measure.
    Emitted,
    /// The probe finished its cycle; the engine may send again.
    Resumed,
}

/// How a bounded wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The awaited phase was reached.
    Reached,
    /// The abort predicate fired first.
    Aborted,
}

impl WaitOutcome {
    pub fn reached(self) -> bool {
        self == WaitOutcome::Reached
    }
}

#[derive(Debug)]
pub struct HandshakeSignal {
    armed: Event,
    data_emitted: Event,
    resume_fuzzing: Event,
    transition: Mutex<()>,
    poll: Duration,
}

impl HandshakeSignal {
    pub fn new(poll: Duration) -> Self {
        Self {
            armed: Event::new(),
            data_emitted: Event::new(),
            resume_fuzzing: Event::new(),
            transition: Mutex::new(()),
            poll,
        }
    }

    pub fn poll_period(&self) -> Duration {
        self.poll
    }

    /// Engine side: transmission is imminent.
    pub fn notify_data_ready(&self) {
        self.armed.set();
    }

    /// Engine side: transmission completed.
    pub fn notify_data_emission(&self) {
        let _guard = self.transition.lock().unwrap_or_else(PoisonError::into_inner);
        self.data_emitted.set();
        self.resume_fuzzing.clear();
    }

    /// Probe side: post-transmission measurement is done, the engine may go on.
    pub fn lets_fuzz_continue(&self) {
        let _guard = self.transition.lock().unwrap_or_else(PoisonError::into_inner);
        self.resume_fuzzing.set();
        self.data_emitted.clear();
        self.armed.clear();
    }

    /// Probe side: wait for the engine to arm this cycle.
    pub fn wait_for_data_ready(&self, abort: impl Fn() -> bool) -> WaitOutcome {
        self.poll_until(&self.armed, abort)
    }

    /// Probe side: wait for the engine to finish transmitting.
    pub fn wait_until_data_is_emitted(&self, abort: impl Fn() -> bool) -> WaitOutcome {
        self.poll_until(&self.data_emitted, abort)
    }

    /// Engine side: wait for the probe to close the cycle.
    pub fn wait_until_data_can_be_emitted(&self, abort: impl Fn() -> bool) -> WaitOutcome {
        self.poll_until(&self.resume_fuzzing, abort)
    }

    pub fn phase(&self) -> HandshakePhase {
        let _guard = self.transition.lock().unwrap_or_else(PoisonError::into_inner);
        if self.data_emitted.is_set() {
            HandshakePhase::Emitted
        } else if self.armed.is_set() {
            HandshakePhase::Armed
        } else if self.resume_fuzzing.is_set() {
            HandshakePhase::Resumed
        } else {
            HandshakePhase::Idle
        }
    }

    fn poll_until(&self, event: &Event, abort: impl Fn() -> bool) -> WaitOutcome {
        loop {
            if event.is_set() {
                return WaitOutcome::Reached;
            }
            if abort() {
                return WaitOutcome::Aborted;
            }
            if event.wait_timeout(self.poll) {
                return WaitOutcome::Reached;
            }
        }
    }
}

impl Default for HandshakeSignal {
    fn default() -> Self {
        Self::new(DEFAULT_POLL)
    }
}

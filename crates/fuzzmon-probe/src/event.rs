//! Binary signals with interruptible waits.
//!
//! `Event` is a level-triggered flag: `set` wakes every waiter, and the flag
//! stays set until `clear`. Waits are always bounded by a timeout so callers
//! can re-check their own stop conditions.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// A flag threads can set, clear and wait on.
#[derive(Debug, Default)]
pub struct Event {
    flag: Mutex<bool>,
    cond: Condvar,
}

impl Event {
    /// A new, clear event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag and wake every waiter.
    pub fn set(&self) {
        *self.guard() = true;
        self.cond.notify_all();
    }

    /// Lower the flag. Waiters are not woken.
    pub fn clear(&self) {
        *self.guard() = false;
    }

    /// Current flag value, without waiting.
    pub fn is_set(&self) -> bool {
        *self.guard()
    }

    /// Block until the flag is set or `timeout` elapses.
    /// Returns the flag value at wake-up.
    ///
    /// A `timeout` too large to be represented as a deadline waits for `set`
    /// alone.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.wait();
        };
        let mut flag = self.guard();
        while !*flag {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            flag = self
                .cond
                .wait_timeout(flag, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    fn wait(&self) -> bool {
        let mut flag = self.guard();
        while !*flag {
            flag = self.cond.wait(flag).unwrap_or_else(PoisonError::into_inner);
        }
        true
    }

    // A bool cannot be left half-written, so a poisoned flag is still valid.
    fn guard(&self) -> MutexGuard<'_, bool> {
        self.flag.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The per-probe stop condition.
///
/// Runners poll it at every suspension point and sleep on it between
/// measurement cycles, so setting it ends a probe within one poll period.
pub type StopSignal = Event;

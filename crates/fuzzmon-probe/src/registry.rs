//! Probe registry: one owned record per probe name.
//!
//! The name map is only write-locked while probes are registered. Everything
//! on the hot path (status publication, delay reads, started flag) goes
//! through the per-probe entry lock, so probes never contend with each other.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::capability::{LifecyclePhase, Probe, ProbeContext};
use crate::event::StopSignal;
use crate::runner::{self, ProbeFailure, ProbeFn, SharedProbe};
use crate::status::{StatusRecord, StatusUpdate};

/// Delay between measurement cycles when a registration does not set one.
pub const DEFAULT_PROBE_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Probe '{0}' does not exist")]
    UnknownProbe(String),

    #[error("Probe '{0}' is already registered")]
    DuplicateProbe(String),

    #[error("Probe '{0}' already has an implementation")]
    AlreadyBound(String),

    #[error("Probe '{0}' has no implementation bound")]
    Unbound(String),
}

/// How a probe's worker is scheduled. Fixed at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// Measures on its own timer.
    FreeRunning,
    /// Measures once per transmission through the handshake ("blocking" probe).
    Synchronized,
}

impl ExecutionMode {
    pub fn is_blocking(self) -> bool {
        self == ExecutionMode::Synchronized
    }
}

/// Builder binding a probe implementation to a name and an execution mode.
pub struct ProbeRegistration {
    name: String,
    probe: Box<dyn Probe>,
    mode: ExecutionMode,
    delay: Duration,
}

impl ProbeRegistration {
    pub fn new(name: impl Into<String>, probe: impl Probe) -> Self {
        Self {
            name: name.into(),
            probe: Box::new(probe),
            mode: ExecutionMode::FreeRunning,
            delay: DEFAULT_PROBE_DELAY,
        }
    }

    pub fn free_running(mut self) -> Self {
        self.mode = ExecutionMode::FreeRunning;
        self
    }

    pub fn synchronized(mut self) -> Self {
        self.mode = ExecutionMode::Synchronized;
        self
    }

    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Debug)]
struct EntryState {
    started: bool,
    status: Option<StatusRecord>,
    delay: Duration,
    failure: Option<ProbeFailure>,
}

struct Binding {
    probe: SharedProbe,
    runner: ProbeFn,
}

struct ProbeEntry {
    mode: ExecutionMode,
    state: Mutex<EntryState>,
    stop: Arc<StopSignal>,
    binding: OnceLock<Binding>,
}

impl ProbeEntry {
    fn new(mode: ExecutionMode, delay: Duration) -> Self {
        Self {
            mode,
            state: Mutex::new(EntryState {
                started: false,
                status: None,
                delay,
                failure: None,
            }),
            stop: Arc::new(StopSignal::new()),
            binding: OnceLock::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, EntryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Registry of every probe known to a fuzzing project.
#[derive(Default)]
pub struct ProbeRegistry {
    entries: RwLock<BTreeMap<String, Arc<ProbeEntry>>>,
    subscribers: Mutex<Vec<Sender<StatusUpdate>>>,
}

impl ProbeRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a probe and build its runner for the chosen execution mode.
    pub fn register(&self, registration: ProbeRegistration) -> Result<(), RegistryError> {
        let ProbeRegistration {
            name,
            probe,
            mode,
            delay,
        } = registration;

        let entry = ProbeEntry::new(mode, delay);
        bind_entry(&entry, &name, probe)?;
        self.insert(name, entry)
    }

    /// Declare a probe name without an implementation. It cannot be started
    /// until `bind` supplies one.
    pub fn reserve(&self, name: impl Into<String>, mode: ExecutionMode) -> Result<(), RegistryError> {
        self.insert(name.into(), ProbeEntry::new(mode, DEFAULT_PROBE_DELAY))
    }

    /// Bind an implementation to a reserved name.
    pub fn bind(&self, name: &str, probe: impl Probe) -> Result<(), RegistryError> {
        let entry = self.entry(name)?;
        bind_entry(&entry, name, Box::new(probe))
    }

    fn insert(&self, name: String, entry: ProbeEntry) -> Result<(), RegistryError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(&name) {
            return Err(RegistryError::DuplicateProbe(name));
        }
        debug!(probe = %name, mode = ?entry.mode, "probe registered");
        entries.insert(name, Arc::new(entry));
        Ok(())
    }

    fn entry(&self, name: &str) -> Result<Arc<ProbeEntry>, RegistryError> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownProbe(name.to_string()))
    }

    /// All registered probe names, in name order.
    pub fn probe_names(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Whether `name` is registered or reserved.
    pub fn contains(&self, name: &str) -> bool {
        self.entry(name).is_ok()
    }

    /// Number of registered and reserved names.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// True when no name is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runnable entry point, `None` while the name is only reserved.
    pub fn probe_func(&self, name: &str) -> Result<Option<ProbeFn>, RegistryError> {
        Ok(self.entry(name)?.binding.get().map(|b| Arc::clone(&b.runner)))
    }

    /// Mode fixed at registration.
    pub fn execution_mode(&self, name: &str) -> Result<ExecutionMode, RegistryError> {
        Ok(self.entry(name)?.mode)
    }

    /// Whether `name` is a synchronized probe.
    pub fn is_blocking(&self, name: &str) -> Result<bool, RegistryError> {
        Ok(self.execution_mode(name)?.is_blocking())
    }

    /// The stop signal handed to the probe's worker.
    pub fn stop_signal(&self, name: &str) -> Result<Arc<StopSignal>, RegistryError> {
        Ok(Arc::clone(&self.entry(name)?.stop))
    }

    /// Unknown names are reported as not launched.
    pub fn is_probe_launched(&self, name: &str) -> bool {
        self.entry(name).map(|e| e.state().started).unwrap_or(false)
    }

    /// Atomically flag the probe as started and arm a fresh stop signal.
    /// Returns `false` if it was already started.
    pub fn mark_started(&self, name: &str) -> Result<bool, RegistryError> {
        let entry = self.entry(name)?;
        let mut state = entry.state();
        if state.started {
            return Ok(false);
        }
        state.started = true;
        state.failure = None;
        entry.stop.clear();
        Ok(true)
    }

    /// Raise the probe's stop signal. Returns `false` for unknown names,
    /// in which case nothing is touched.
    pub fn stop_probe(&self, name: &str) -> bool {
        match self.entry(name) {
            Ok(entry) => {
                entry.stop.set();
                true
            }
            Err(_) => false,
        }
    }

    /// Return the entry to not-started so the probe can be launched again.
    pub fn reset_probe(&self, name: &str) {
        if let Ok(entry) = self.entry(name) {
            let mut state = entry.state();
            state.started = false;
            entry.stop.clear();
        }
    }

    /// Publish a probe's latest status and notify subscribers.
    pub fn set_probe_status(&self, name: &str, record: StatusRecord) {
        let Ok(entry) = self.entry(name) else {
            return;
        };
        entry.state().status = Some(record.clone());

        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| {
            tx.send(StatusUpdate {
                probe: name.to_string(),
                record: record.clone(),
            })
            .is_ok()
        });
    }

    /// Latest published record, `None` before the first publication.
    pub fn get_probe_status(&self, name: &str) -> Result<Option<StatusRecord>, RegistryError> {
        Ok(self.entry(name)?.state().status.clone())
    }

    /// Pause between measurement cycles.
    pub fn probe_delay(&self, name: &str) -> Result<Duration, RegistryError> {
        Ok(self.entry(name)?.state().delay)
    }

    /// Change the pause; workers pick it up at their next cycle.
    pub fn set_probe_delay(&self, name: &str, delay: Duration) -> Result<(), RegistryError> {
        self.entry(name)?.state().delay = delay;
        Ok(())
    }

    /// Store `failure` as the probe's last failure. Unknown names are ignored.
    pub fn record_failure(&self, name: &str, failure: ProbeFailure) {
        if let Ok(entry) = self.entry(name) {
            entry.state().failure = Some(failure);
        }
    }

    /// The last contained failure since the probe was started.
    pub fn last_failure(&self, name: &str) -> Result<Option<ProbeFailure>, RegistryError> {
        Ok(self.entry(name)?.state().failure.clone())
    }

    /// Run the probe's `quick_reset` under failure containment.
    /// Returns whether the reset completed cleanly.
    pub fn quick_reset_probe(&self, name: &str, ctx: &ProbeContext) -> Result<bool, RegistryError> {
        let entry = self.entry(name)?;
        let binding = entry
            .binding
            .get()
            .ok_or_else(|| RegistryError::Unbound(name.to_string()))?;

        match runner::contain(name, LifecyclePhase::QuickReset, || {
            runner::lock_probe(&binding.probe).quick_reset(ctx)
        }) {
            Ok(()) => Ok(true),
            Err(failure) => {
                entry.state().failure = Some(failure);
                Ok(false)
            }
        }
    }

    /// Receive every status record published from now on.
    pub fn subscribe(&self) -> Receiver<StatusUpdate> {
        let (tx, rx) = channel::unbounded();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }
}

fn bind_entry(entry: &ProbeEntry, name: &str, probe: Box<dyn Probe>) -> Result<(), RegistryError> {
    let probe: SharedProbe = Arc::new(Mutex::new(probe));
    let runner = runner::build_runner(entry.mode, name.to_string(), Arc::clone(&probe));
    entry
        .binding
        .set(Binding { probe, runner })
        .map_err(|_| RegistryError::AlreadyBound(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::ProbeError;

    struct Constant(i64);

    impl Probe for Constant {
        fn measure(&mut self, _ctx: &ProbeContext) -> Result<StatusRecord, ProbeError> {
            Ok(StatusRecord::new(self.0))
        }
    }

    struct FailingReset;

    impl Probe for FailingReset {
        fn measure(&mut self, _ctx: &ProbeContext) -> Result<StatusRecord, ProbeError> {
            Ok(StatusRecord::nominal())
        }

        fn quick_reset(&mut self, _ctx: &ProbeContext) -> Result<(), ProbeError> {
            Err(ProbeError::failed("reset refused"))
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = ProbeRegistry::new();
        registry
            .register(ProbeRegistration::new("cpu", Constant(0)))
            .unwrap();
        registry
            .register(ProbeRegistration::new("pid", Constant(0)).synchronized())
            .unwrap();

        assert_eq!(registry.probe_names(), vec!["cpu", "pid"]);
        assert!(!registry.is_blocking("cpu").unwrap());
        assert!(registry.is_blocking("pid").unwrap());
        assert!(registry.probe_func("cpu").unwrap().is_some());
        assert_eq!(registry.probe_delay("cpu").unwrap(), DEFAULT_PROBE_DELAY);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let registry = ProbeRegistry::new();
        registry
            .register(ProbeRegistration::new("cpu", Constant(0)))
            .unwrap();
        let err = registry
            .register(ProbeRegistration::new("cpu", Constant(1)))
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateProbe("cpu".into()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_reserved_probe_is_not_runnable_until_bound() {
        let registry = ProbeRegistry::new();
        registry.reserve("mem", ExecutionMode::FreeRunning).unwrap();
        assert!(registry.probe_func("mem").unwrap().is_none());

        registry.bind("mem", Constant(0)).unwrap();
        assert!(registry.probe_func("mem").unwrap().is_some());

        assert_eq!(
            registry.bind("mem", Constant(1)).unwrap_err(),
            RegistryError::AlreadyBound("mem".into())
        );
    }

    #[test]
    fn test_unknown_probe_errors() {
        let registry = ProbeRegistry::new();
        assert_eq!(
            registry.probe_delay("ghost").unwrap_err(),
            RegistryError::UnknownProbe("ghost".into())
        );
        assert!(!registry.stop_probe("ghost"));
        assert!(!registry.is_probe_launched("ghost"));
    }

    #[test]
    fn test_started_flag_lifecycle() {
        let registry = ProbeRegistry::new();
        registry
            .register(ProbeRegistration::new("cpu", Constant(0)))
            .unwrap();

        assert!(registry.mark_started("cpu").unwrap());
        assert!(!registry.mark_started("cpu").unwrap());
        assert!(registry.is_probe_launched("cpu"));

        assert!(registry.stop_probe("cpu"));
        assert!(registry.stop_signal("cpu").unwrap().is_set());

        registry.reset_probe("cpu");
        assert!(!registry.is_probe_launched("cpu"));
        assert!(!registry.stop_signal("cpu").unwrap().is_set());
    }

    #[test]
    fn test_status_publication_reaches_subscribers() {
        let registry = ProbeRegistry::new();
        registry
            .register(ProbeRegistration::new("cpu", Constant(0)))
            .unwrap();
        let rx = registry.subscribe();

        registry.set_probe_status("cpu", StatusRecord::new(-3));

        let update = rx.try_recv().unwrap();
        assert_eq!(update.probe, "cpu");
        assert_eq!(update.record.status(), Some(-3));
        assert_eq!(
            registry.get_probe_status("cpu").unwrap().unwrap().status(),
            Some(-3)
        );
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let registry = ProbeRegistry::new();
        registry
            .register(ProbeRegistration::new("cpu", Constant(0)))
            .unwrap();
        drop(registry.subscribe());

        registry.set_probe_status("cpu", StatusRecord::nominal());
        assert!(registry.subscribers.lock().unwrap().is_empty());
    }

    #[test]
    fn test_delay_is_mutable() {
        let registry = ProbeRegistry::new();
        registry
            .register(ProbeRegistration::new("cpu", Constant(0)).delay(Duration::ZERO))
            .unwrap();
        assert_eq!(registry.probe_delay("cpu").unwrap(), Duration::ZERO);

        registry
            .set_probe_delay("cpu", Duration::from_millis(250))
            .unwrap();
        assert_eq!(registry.probe_delay("cpu").unwrap(), Duration::from_millis(250));
    }

    #[test]
    fn test_quick_reset_failure_is_contained() {
        let registry = ProbeRegistry::new();
        registry
            .register(ProbeRegistration::new("ok", Constant(0)))
            .unwrap();
        registry
            .register(ProbeRegistration::new("bad", FailingReset))
            .unwrap();
        let ctx = ProbeContext::new();

        assert!(registry.quick_reset_probe("ok", &ctx).unwrap());
        assert!(!registry.quick_reset_probe("bad", &ctx).unwrap());

        let failure = registry.last_failure("bad").unwrap().unwrap();
        assert_eq!(failure.phase, LifecyclePhase::QuickReset);
        assert_eq!(failure.message, "reset refused");
    }
}

//! Engine-side orchestration of probe workers.
//!
//! The engine brackets every transmission with three hooks:
//!
//! ```text
//! do_before_sending_data()          -> every handshake: Armed
//! <send data to the target>
//! do_after_sending_data()           -> every handshake: Emitted
//! do_before_resuming_sending_data() -> block until every handshake: Resumed
//! ```
//!
//! Free-running probes ignore the hooks; synchronized probes measure exactly
//! once per bracket, and the engine does not send again before they finish.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use fuzzmon_probe::{
    Handle, HandshakeSignal, ProbeContext, ProbeFailure, ProbeLaunch, ProbeRegistry,
    StatusRecord,
};
use tracing::{debug, error, info, warn};

use crate::config::MonitorConfig;
use crate::error::MonitorError;

/// Aggregate verdict over every launched probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetHealth {
    Healthy,
    Unhealthy,
}

impl TargetHealth {
    /// Unhealthy as soon as one record carries a negative status.
    /// Absent records are non-reporting, not failing.
    pub fn aggregate<I>(records: I) -> Self
    where
        I: IntoIterator<Item = Option<StatusRecord>>,
    {
        if records.into_iter().flatten().any(|r| r.is_anomaly()) {
            TargetHealth::Unhealthy
        } else {
            TargetHealth::Healthy
        }
    }

    /// `1` healthy, `-1` unhealthy.
    pub fn code(self) -> i64 {
        match self {
            TargetHealth::Healthy => 1,
            TargetHealth::Unhealthy => -1,
        }
    }

    /// True when healthy.
    pub fn is_ok(self) -> bool {
        self == TargetHealth::Healthy
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn release(handshake: &HandshakeSignal) {
    handshake.notify_data_ready();
    handshake.notify_data_emission();
}

/// Drives probe workers around the engine's transmission loop.
pub struct Monitor {
    registry: Mutex<Arc<ProbeRegistry>>,
    config: MonitorConfig,
    context: Mutex<ProbeContext>,
    /// One handshake per launched synchronized probe.
    handshakes: Mutex<BTreeMap<String, Arc<HandshakeSignal>>>,
    /// Cleared at the start of every transmission cycle.
    target_status: Mutex<Option<TargetHealth>>,
    hooks_enabled: AtomicBool,
}

impl Monitor {
    /// A monitor over `registry` with default timings.
    pub fn new(registry: Arc<ProbeRegistry>) -> Self {
        Self::with_config(registry, MonitorConfig::default())
    }

    pub fn with_config(registry: Arc<ProbeRegistry>, config: MonitorConfig) -> Self {
        Self {
            registry: Mutex::new(registry),
            config,
            context: Mutex::new(ProbeContext::new()),
            handshakes: Mutex::new(BTreeMap::new()),
            target_status: Mutex::new(None),
            hooks_enabled: AtomicBool::new(true),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// The registry currently monitored.
    pub fn registry(&self) -> Arc<ProbeRegistry> {
        Arc::clone(&lock(&self.registry))
    }

    /// Data model handle passed to probes launched from now on.
    pub fn set_data_model(&self, dm: Handle) {
        lock(&self.context).set_data_model(Some(dm));
    }

    pub fn set_target(&self, target: Handle) {
        lock(&self.context).set_target(Some(target));
    }

    pub fn set_logger(&self, logger: Handle) {
        lock(&self.context).set_logger(Some(logger));
    }

    /// Stop every probe of the current registry, then switch to `registry`.
    ///
    /// The switch happens even if some worker failed to exit in time; the
    /// timeout is still reported.
    pub fn set_registry(&self, registry: Arc<ProbeRegistry>) -> Result<(), MonitorError> {
        info!("*** Monitor refresh in progress... ***");
        let stopped = self.stop_all_probes();
        *lock(&self.registry) = registry;
        stopped
    }

    /// Arm the hooks and forget any state of a previous session.
    pub fn start(&self) {
        self.hooks_enabled.store(true, Ordering::SeqCst);
        *lock(&self.target_status) = None;
        lock(&self.handshakes).clear();
        info!("*** Monitor is started ***");
    }

    /// Stop every probe of the current registry.
    pub fn stop(&self) -> Result<(), MonitorError> {
        info!("*** Monitor stopping in progress... ***");
        let stopped = self.stop_all_probes();
        info!("*** Monitor is stopped ***");
        stopped
    }

    pub fn enable_hooks(&self) {
        self.hooks_enabled.store(true, Ordering::SeqCst);
    }

    pub fn disable_hooks(&self) {
        self.hooks_enabled.store(false, Ordering::SeqCst);
    }

    /// Launch the worker of `name` using the strategy fixed at registration.
    ///
    /// A synchronized probe joins at the next `do_before_sending_data`: its
    /// handshake starts Idle. Starting one between `do_before_sending_data`
    /// and `do_after_sending_data` leaves it unarmed for the transmission in
    /// flight, so `do_before_resuming_sending_data` waits on it until the next
    /// cycle arms it or it is stopped. Start synchronized probes outside a
    /// transmission bracket.
    pub fn start_probe(&self, name: &str) -> Result<(), MonitorError> {
        let registry = self.registry();
        let mode = registry.execution_mode(name)?;

        if registry.is_probe_launched(name) {
            return Err(MonitorError::AlreadyStarted(name.to_string()));
        }
        let runner = registry
            .probe_func(name)?
            .ok_or_else(|| MonitorError::NotRunnable(name.to_string()))?;
        let stop = registry.stop_signal(name)?;

        if !registry.mark_started(name)? {
            return Err(MonitorError::AlreadyStarted(name.to_string()));
        }

        // A fresh handshake per launch: a previous worker may have died mid-cycle.
        let handshake = mode.is_blocking().then(|| {
            let hs = Arc::new(HandshakeSignal::new(self.config.handshake_poll()));
            lock(&self.handshakes).insert(name.to_string(), Arc::clone(&hs));
            hs
        });

        let launch = ProbeLaunch {
            registry: Arc::clone(&registry),
            stop,
            handshake,
            context: lock(&self.context).clone(),
        };

        let spawned = thread::Builder::new()
            .name(format!("probe.{name}"))
            .spawn(move || runner(launch));

        if let Err(source) = spawned {
            registry.reset_probe(name);
            lock(&self.handshakes).remove(name);
            error!(probe = %name, error = %source, "failed to spawn probe worker");
            return Err(MonitorError::Spawn {
                name: name.to_string(),
                source,
            });
        }

        debug!(probe = %name, mode = ?mode, "probe worker spawned");
        Ok(())
    }

    /// Ask `name` to stop, release its handshake and wait for its worker.
    pub fn stop_probe(&self, name: &str) -> Result<(), MonitorError> {
        let registry = self.registry();
        if !registry.stop_probe(name) {
            error!(probe = %name, "Probe '{name}' does not exist");
            return Err(fuzzmon_probe::RegistryError::UnknownProbe(name.to_string()).into());
        }

        if let Some(handshake) = lock(&self.handshakes).remove(name) {
            debug!(probe = %name, "releasing handshake");
            release(&handshake);
        }

        self.wait_for_probe_termination(&registry, &[name.to_string()])
    }

    /// Stop every registered probe with one combined bounded wait.
    pub fn stop_all_probes(&self) -> Result<(), MonitorError> {
        let registry = self.registry();
        let names = registry.probe_names();

        {
            let mut handshakes = lock(&self.handshakes);
            for name in &names {
                registry.stop_probe(name);
                if let Some(handshake) = handshakes.get(name) {
                    release(handshake);
                }
            }
            handshakes.clear();
        }

        self.wait_for_probe_termination(&registry, &names)
    }

    fn wait_for_probe_termination(
        &self,
        registry: &ProbeRegistry,
        names: &[String],
    ) -> Result<(), MonitorError> {
        let timeout = self.config.termination_timeout();
        let start = Instant::now();

        loop {
            let running: Vec<String> = names
                .iter()
                .filter(|n| registry.is_probe_launched(n))
                .cloned()
                .collect();

            if running.is_empty() {
                return Ok(());
            }

            if start.elapsed() > timeout {
                error!(
                    probes = ?running,
                    "Timeout! Probe(s) seem to be stuck in their measurement loop"
                );
                return Err(MonitorError::TerminationTimeout {
                    probes: running,
                    waited: timeout,
                });
            }

            thread::sleep(self.config.termination_poll());
        }
    }

    /// The handshake of a launched synchronized probe.
    pub fn handshake(&self, name: &str) -> Option<Arc<HandshakeSignal>> {
        lock(&self.handshakes).get(name).cloned()
    }

    pub fn is_probe_launched(&self, name: &str) -> bool {
        self.registry().is_probe_launched(name)
    }

    pub fn get_probe_status(&self, name: &str) -> Result<Option<StatusRecord>, MonitorError> {
        Ok(self.registry().get_probe_status(name)?)
    }

    pub fn probe_failure(&self, name: &str) -> Result<Option<ProbeFailure>, MonitorError> {
        Ok(self.registry().last_failure(name)?)
    }

    pub fn get_probe_delay(&self, name: &str) -> Result<Duration, MonitorError> {
        Ok(self.registry().probe_delay(name)?)
    }

    pub fn set_probe_delay(&self, name: &str, delay: Duration) -> Result<(), MonitorError> {
        Ok(self.registry().set_probe_delay(name, delay)?)
    }

    /// Run the probe's `quick_reset`. Returns whether it completed cleanly;
    /// failures are contained and recorded like any lifecycle failure.
    pub fn quick_reset_probe(&self, name: &str) -> Result<bool, MonitorError> {
        let context = lock(&self.context).clone();
        Ok(self.registry().quick_reset_probe(name, &context)?)
    }

    /// Transmission is imminent.
    pub fn do_before_sending_data(&self) {
        *lock(&self.target_status) = None;
        for handshake in lock(&self.handshakes).values() {
            handshake.notify_data_ready();
        }
    }

    /// Transmission completed.
    pub fn do_after_sending_data(&self) {
        for handshake in lock(&self.handshakes).values() {
            handshake.notify_data_emission();
        }
    }

    /// Block until every synchronized probe has closed the current cycle.
    ///
    /// A probe that is no longer launched is not waited for, and its
    /// handshake is dropped.
    pub fn do_before_resuming_sending_data(&self) {
        let registry = self.registry();
        let pending: Vec<(String, Arc<HandshakeSignal>)> = lock(&self.handshakes)
            .iter()
            .map(|(name, hs)| (name.clone(), Arc::clone(hs)))
            .collect();

        for (name, handshake) in pending {
            let outcome =
                handshake.wait_until_data_can_be_emitted(|| !registry.is_probe_launched(&name));
            if !outcome.reached() {
                warn!(probe = %name, "probe is gone, not waiting for it");
                let mut handshakes = lock(&self.handshakes);
                if handshakes
                    .get(&name)
                    .is_some_and(|current| Arc::ptr_eq(current, &handshake))
                {
                    handshakes.remove(&name);
                }
            }
        }
    }

    /// Interactive-session hook: `true` to carry on.
    pub fn do_after_sending_and_logging_data(&self) -> bool {
        if !self.hooks_enabled.load(Ordering::SeqCst) {
            return true;
        }
        self.is_target_ok()
    }

    /// Aggregate health, computed at most once per transmission cycle.
    pub fn target_status(&self) -> TargetHealth {
        let mut cached = lock(&self.target_status);
        if let Some(health) = *cached {
            return health;
        }

        let registry = self.registry();
        let health = TargetHealth::aggregate(
            registry
                .probe_names()
                .iter()
                .filter(|n| registry.is_probe_launched(n))
                .map(|n| registry.get_probe_status(n).ok().flatten()),
        );
        *cached = Some(health);
        health
    }

    pub fn is_target_ok(&self) -> bool {
        self.target_status().is_ok()
    }
}

//! Launcher service: instance registry, launch/stop/list/health operations,
//! and the resync/backoff reconciliation loop.
//!
//! The registry is the sole shared mutable state. Mutations are serialized
//! per instance key through an admission mutex; reads (List/Health) go
//! through a separate instance lock so they never queue behind a slow
//! launch. Health polling across distinct instances runs concurrently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::config::LauncherConfig;
use crate::error::{Error, Result};
use crate::isolation::IsolationPolicy;
use crate::manifest::{PatternEntry, PatternRegistry};
use crate::metrics::Metrics;
use crate::supervisor::{
    self, ProcessEvent, ProcessHandle, Supervisor, EVENT_CHANNEL_CAPACITY,
};
use crate::types::{
    HealthStatus, InstanceKey, InstanceState, InstanceSummary, IsolationLevel, ListFilter,
};
use crate::wire::{self, HealthResponse, StopRequest};

/// Per-probe HTTP timeout.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
/// Poll interval while waiting for a fresh process to become serving.
const STARTUP_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Consecutive failed probes before a live process is killed for restart.
const PROBE_FAILURE_KILL_THRESHOLD: u32 = 3;

/// A launch request as accepted by the control API.
#[derive(Debug, Clone, Deserialize)]
pub struct LaunchRequest {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub session_id: String,
    /// Overrides the pattern's declared isolation level for this key.
    #[serde(default)]
    pub isolation: Option<IsolationLevel>,
}

/// Aggregate launcher health, as returned by `Health`.
#[derive(Debug, Clone, Serialize)]
pub struct LauncherHealth {
    pub healthy: bool,
    pub total_processes: usize,
    pub running_processes: usize,
    pub failed_processes: usize,
    pub uptime_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processes: Option<Vec<InstanceSummary>>,
}

/// One tracked pattern instance. Owned exclusively by the registry; mutated
/// only under its slot's admission lock.
struct PatternInstance {
    id: String,
    key: InstanceKey,
    namespace: String,
    session_id: String,
    state: InstanceState,
    handle: Arc<dyn ProcessHandle>,
    started_at: DateTime<Utc>,
    spawned_at: Instant,
    last_health_check: Option<Instant>,
    last_health_check_at: Option<DateTime<Utc>>,
    consecutive_probe_failures: u32,
    consecutive_healthy: u32,
    /// Consecutive failures feeding the backoff schedule.
    failure_count: u32,
    backoff_until: Option<Instant>,
    restart_count: u32,
    last_error: Option<String>,
    /// Last time a caller asked for this instance; drives session GC.
    last_touched: Instant,
}

impl PatternInstance {
    fn summary(&self) -> InstanceSummary {
        InstanceSummary {
            id: self.id.clone(),
            name: self.key.name.clone(),
            namespace: self.namespace.clone(),
            session_id: self.session_id.clone(),
            isolation: self.key.level(),
            state: self.state,
            pid: self.state.has_process().then(|| self.handle.pid()),
            address: self
                .state
                .has_process()
                .then(|| format!("127.0.0.1:{}", self.handle.control_port())),
            started_at: self.started_at,
            last_health_check: self.last_health_check_at,
            restart_count: self.restart_count,
            uptime_seconds: self.spawned_at.elapsed().as_secs(),
            last_error: self.last_error.clone(),
        }
    }
}

/// Registry slot for one isolation key.
struct Slot {
    /// Serializes Launch/Stop/reconcile for this key (single writer).
    /// Shared so waiters can hold an owned guard while [`Launcher::admit`]
    /// re-checks that the slot is still the registered one.
    admission: Arc<Mutex<()>>,
    /// The instance itself; readable without the admission lock.
    inst: RwLock<Option<PatternInstance>>,
}

impl Slot {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            admission: Arc::new(Mutex::new(())),
            inst: RwLock::new(None),
        })
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Option<PatternInstance>> {
        self.inst.read().expect("instance lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Option<PatternInstance>> {
        self.inst.write().expect("instance lock poisoned")
    }
}

/// The launcher service.
pub struct Launcher {
    config: LauncherConfig,
    registry: Arc<PatternRegistry>,
    supervisor: Arc<dyn Supervisor>,
    policy: IsolationPolicy,
    backoff: Backoff,
    instances: RwLock<HashMap<InstanceKey, Arc<Slot>>>,
    events_tx: mpsc::Sender<ProcessEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<ProcessEvent>>>,
    metrics: Arc<Metrics>,
    http: reqwest::Client,
    started_at: Instant,
    first_resync_done: AtomicBool,
    tasks: RwLock<Vec<tokio::task::AbortHandle>>,
}

impl Launcher {
    pub fn new(
        config: LauncherConfig,
        registry: Arc<PatternRegistry>,
        supervisor: Arc<dyn Supervisor>,
    ) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let policy = IsolationPolicy::new(config.resource_limits());
        let backoff = Backoff::new(
            config.backoff_period,
            config.backoff_factor,
            config.backoff_ceiling,
        );

        Arc::new(Self {
            config,
            registry,
            supervisor,
            policy,
            backoff,
            instances: RwLock::new(HashMap::new()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            metrics: Arc::new(Metrics::new()),
            http: reqwest::Client::new(),
            started_at: Instant::now(),
            first_resync_done: AtomicBool::new(false),
            tasks: RwLock::new(Vec::new()),
        })
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// True once the first reconciliation pass has completed.
    pub fn ready(&self) -> bool {
        self.first_resync_done.load(Ordering::Acquire)
    }

    /// Launch a pattern instance, or return the existing one for the same
    /// isolation key. Blocks until the spawned process answers its first
    /// health probe or the startup deadline elapses; on failure no instance
    /// is left registered.
    pub async fn launch(&self, req: LaunchRequest) -> Result<InstanceSummary> {
        let entry = self
            .registry
            .get(&req.name)
            .ok_or_else(|| Error::PatternNotFound(req.name.clone()))?;

        let level = req
            .isolation
            .or_else(|| entry.manifest.isolation_level())
            .unwrap_or(self.config.default_isolation);

        self.config.resource_limits().validate()?;
        let key = InstanceKey::new(level, &req.name, &req.namespace, &req.session_id)?;

        let (slot, _admission) = self.admit(&key).await;

        // Idempotent: an identical isolation key returns the existing handle.
        {
            let mut inst = slot.write();
            match inst.as_mut() {
                Some(existing) if existing.state == InstanceState::Failed => {
                    return Err(Error::PermanentlyFailed {
                        restarts: existing.restart_count,
                        last_error: existing
                            .last_error
                            .clone()
                            .unwrap_or_else(|| "unknown".into()),
                    });
                }
                Some(existing) => {
                    existing.last_touched = Instant::now();
                    debug!(key = %key, id = %existing.id, "launch returned existing instance");
                    return Ok(existing.summary());
                }
                None => {}
            }
        }

        let handle = match self.spawn_process(&key, &entry).await {
            Ok(handle) => handle,
            Err(e) => {
                // Roll back: never leave an empty slot behind a failed launch.
                self.remove_slot_if_empty(&key);
                self.metrics.record_spawn_failure();
                return Err(e);
            }
        };

        let instance = PatternInstance {
            id: uuid::Uuid::new_v4().to_string(),
            key: key.clone(),
            namespace: req.namespace.clone(),
            session_id: req.session_id.clone(),
            state: InstanceState::Running,
            handle,
            started_at: Utc::now(),
            spawned_at: Instant::now(),
            last_health_check: None,
            last_health_check_at: None,
            consecutive_probe_failures: 0,
            consecutive_healthy: 0,
            failure_count: 0,
            backoff_until: None,
            restart_count: 0,
            last_error: None,
            last_touched: Instant::now(),
        };

        info!(key = %key, id = %instance.id, pid = instance.handle.pid(), "launched pattern instance");
        self.metrics.record_launch();

        let summary = instance.summary();
        *slot.write() = Some(instance);
        Ok(summary)
    }

    /// Stop an instance: best-effort control-plane drain, then graceful kill
    /// escalating to forceful past the grace period. The instance is removed
    /// from the registry on every path.
    pub async fn stop(&self, instance_id: &str) -> Result<()> {
        let (key, slot) = self
            .find_by_id(instance_id)
            .ok_or_else(|| Error::InstanceNotFound(instance_id.to_string()))?;

        let _admission = slot.admission.lock().await;

        let instance = match slot.write().take() {
            Some(mut inst) => {
                inst.state = InstanceState::Stopping;
                inst
            }
            None => return Err(Error::InstanceNotFound(instance_id.to_string())),
        };

        if instance.handle.is_alive() {
            // Ask the control plane to drain before signalling.
            let stop_url = format!(
                "http://127.0.0.1:{}{}",
                instance.handle.control_port(),
                wire::PATH_STOP
            );
            let drain = self
                .http
                .post(&stop_url)
                .timeout(PROBE_TIMEOUT)
                .json(&StopRequest {
                    timeout_seconds: self.config.stop_grace_period.as_secs(),
                })
                .send()
                .await;
            if let Err(e) = drain {
                debug!(key = %key, error = %e, "control-plane stop request failed");
            }

            if let Err(e) = supervisor::kill_with_event(
                &key,
                &instance.handle,
                true,
                self.config.stop_grace_period,
                &self.events_tx,
            )
            .await
            {
                warn!(key = %key, error = %e, "kill during stop failed");
            }
        }

        self.remove_slot(&key);
        self.metrics.record_stop();
        info!(key = %key, id = %instance_id, "stopped pattern instance");
        Ok(())
    }

    /// Snapshot of instance summaries matching the filter, ordered by key.
    /// Re-invoking restarts the sequence.
    pub fn list(&self, filter: &ListFilter) -> Vec<InstanceSummary> {
        let slots: Vec<(InstanceKey, Arc<Slot>)> = {
            let map = self.instances.read().expect("registry lock poisoned");
            map.iter().map(|(k, s)| (k.clone(), s.clone())).collect()
        };

        let mut summaries: Vec<(String, InstanceSummary)> = slots
            .iter()
            .filter_map(|(key, slot)| {
                let inst = slot.read();
                inst.as_ref().map(|i| (key.to_string(), i.summary()))
            })
            .filter(|(_, s)| filter.matches(s))
            .collect();

        summaries.sort_by(|a, b| a.0.cmp(&b.0));
        summaries.into_iter().map(|(_, s)| s).collect()
    }

    /// Aggregate health: Healthy iff every tracked instance reported
    /// Healthy/Degraded within twice the resync interval.
    pub fn health(&self, include_processes: bool) -> LauncherHealth {
        let staleness_bound = self.config.resync_interval * 2;
        let summaries = self.list(&ListFilter::default());

        let mut healthy = true;
        let mut running = 0usize;
        let mut failed = 0usize;

        let slots: Vec<Arc<Slot>> = {
            let map = self.instances.read().expect("registry lock poisoned");
            map.values().cloned().collect()
        };

        for slot in &slots {
            let inst = slot.read();
            let Some(inst) = inst.as_ref() else { continue };

            match inst.state {
                InstanceState::Running | InstanceState::Degraded | InstanceState::Starting => {
                    running += 1
                }
                InstanceState::Failed => {
                    failed += 1;
                    healthy = false;
                }
                InstanceState::Unhealthy => healthy = false,
                InstanceState::Stopping => {}
            }

            let last_seen = inst.last_health_check.unwrap_or(inst.spawned_at);
            if last_seen.elapsed() > staleness_bound {
                healthy = false;
            }
        }

        LauncherHealth {
            healthy,
            total_processes: summaries.len(),
            running_processes: running,
            failed_processes: failed,
            uptime_seconds: self.started_at.elapsed().as_secs(),
            processes: include_processes.then_some(summaries),
        }
    }

    /// Start the reconciliation loop and supervisor-event consumer.
    pub fn start_background(self: &Arc<Self>) {
        let launcher = Arc::clone(self);
        let resync = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(launcher.config.resync_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                launcher.resync_once().await;
            }
        });

        let launcher = Arc::clone(self);
        let events = tokio::spawn(async move {
            launcher.consume_events().await;
        });

        let mut tasks = self.tasks.write().expect("task lock poisoned");
        tasks.push(resync.abort_handle());
        tasks.push(events.abort_handle());
    }

    /// One reconciliation pass. Instances are reconciled concurrently; a
    /// slot busy with Launch/Stop is skipped until the next cycle.
    pub async fn resync_once(self: &Arc<Self>) {
        let slots: Vec<(InstanceKey, Arc<Slot>)> = {
            let map = self.instances.read().expect("registry lock poisoned");
            map.iter().map(|(k, s)| (k.clone(), s.clone())).collect()
        };

        let mut joins = Vec::with_capacity(slots.len());
        for (key, slot) in slots {
            let launcher = Arc::clone(self);
            joins.push(tokio::spawn(async move {
                launcher.reconcile_instance(&key, &slot).await;
            }));
        }
        for join in joins {
            let _ = join.await;
        }

        self.first_resync_done.store(true, Ordering::Release);
    }

    /// Gracefully stop every instance and cancel background tasks.
    pub async fn shutdown(&self) {
        for task in self.tasks.write().expect("task lock poisoned").drain(..) {
            task.abort();
        }

        let slots: Vec<(InstanceKey, Arc<Slot>)> = {
            let map = self.instances.read().expect("registry lock poisoned");
            map.iter().map(|(k, s)| (k.clone(), s.clone())).collect()
        };

        for (key, slot) in slots {
            let _admission = slot.admission.lock().await;
            let taken = slot.write().take();
            if let Some(inst) = taken {
                if let Err(e) = inst
                    .handle
                    .kill(true, self.config.stop_grace_period)
                    .await
                {
                    warn!(key = %key, error = %e, "kill during shutdown failed");
                }
            }
            self.remove_slot(&key);
        }
        info!("launcher shutdown complete");
    }

    // ── internals ──────────────────────────────────────────────────────

    fn slot_for(&self, key: &InstanceKey) -> Arc<Slot> {
        let mut map = self.instances.write().expect("registry lock poisoned");
        map.entry(key.clone()).or_insert_with(Slot::new).clone()
    }

    /// Acquire the admission lock for `key`'s registered slot.
    ///
    /// A failed launch, Stop, or session collection can remove a slot from
    /// the registry while another caller is queued on its admission mutex;
    /// an instance registered through that stale handle would be invisible
    /// to List/Stop and the reconciler. So after the lock is granted, the
    /// slot is checked against the registry and the wait restarts on a
    /// fresh slot if it was dropped.
    async fn admit(&self, key: &InstanceKey) -> (Arc<Slot>, OwnedMutexGuard<()>) {
        loop {
            let slot = self.slot_for(key);
            let guard = Arc::clone(&slot.admission).lock_owned().await;
            let current = {
                let map = self.instances.read().expect("registry lock poisoned");
                map.get(key).is_some_and(|s| Arc::ptr_eq(s, &slot))
            };
            if current {
                return (slot, guard);
            }
            debug!(key = %key, "slot removed while awaiting admission, retrying");
        }
    }

    fn remove_slot(&self, key: &InstanceKey) {
        let mut map = self.instances.write().expect("registry lock poisoned");
        map.remove(key);
    }

    fn remove_slot_if_empty(&self, key: &InstanceKey) {
        let mut map = self.instances.write().expect("registry lock poisoned");
        if let Some(slot) = map.get(key) {
            if slot.read().is_none() {
                map.remove(key);
            }
        }
    }

    fn find_by_id(&self, instance_id: &str) -> Option<(InstanceKey, Arc<Slot>)> {
        let map = self.instances.read().expect("registry lock poisoned");
        for (key, slot) in map.iter() {
            let matches = slot
                .read()
                .as_ref()
                .map(|i| i.id == instance_id)
                .unwrap_or(false);
            if matches {
                return Some((key.clone(), slot.clone()));
            }
        }
        None
    }

    /// Spawn a process for `key` and wait until its health endpoint serves.
    /// The process is killed before an error is returned, so a failed spawn
    /// never leaks an untracked process.
    async fn spawn_process(
        &self,
        key: &InstanceKey,
        entry: &PatternEntry,
    ) -> Result<Arc<dyn ProcessHandle>> {
        let executable = entry.executable_path()?;
        let ctx = self.policy.execution_context(
            key,
            entry.dir.clone(),
            entry.manifest.env.clone(),
        );

        let handle = self.supervisor.start(&executable, &ctx).await?;

        if let Err(e) = self.wait_for_serving(&handle).await {
            let _ = handle.kill(false, Duration::from_secs(2)).await;
            return Err(e);
        }

        supervisor::spawn_monitor(key.clone(), handle.clone(), self.events_tx.clone());
        Ok(handle)
    }

    /// Poll the health-check endpoint until it reports SERVING or the
    /// startup deadline elapses.
    async fn wait_for_serving(&self, handle: &Arc<dyn ProcessHandle>) -> Result<()> {
        let url = format!(
            "http://127.0.0.1:{}{}",
            handle.control_port(),
            wire::PATH_HEALTHZ
        );
        let deadline = Instant::now() + self.config.startup_timeout;

        loop {
            if !handle.is_alive() {
                return Err(Error::Spawn("process exited during startup".into()));
            }

            let resp = self.http.get(&url).timeout(PROBE_TIMEOUT).send().await;
            if let Ok(resp) = resp {
                if resp.status().is_success() {
                    return Ok(());
                }
            }

            if Instant::now() >= deadline {
                return Err(Error::StartupTimeout(self.config.startup_timeout));
            }
            tokio::time::sleep(STARTUP_POLL_INTERVAL).await;
        }
    }

    async fn reconcile_instance(self: &Arc<Self>, key: &InstanceKey, slot: &Arc<Slot>) {
        // Busy slots (mid-Launch/Stop) are picked up next cycle.
        let Ok(_admission) = slot.admission.try_lock() else {
            return;
        };

        let (state, alive, idle_for) = {
            let inst = slot.read();
            let Some(inst) = inst.as_ref() else { return };
            (
                inst.state,
                inst.handle.is_alive(),
                inst.last_touched.elapsed(),
            )
        };

        if state == InstanceState::Failed || state == InstanceState::Stopping {
            return;
        }

        // Idle-session garbage collection.
        if key.level() == IsolationLevel::Session && idle_for > self.config.session_idle_ttl {
            info!(key = %key, idle_secs = idle_for.as_secs(), "collecting idle session instance");
            let taken = slot.write().take();
            if let Some(inst) = taken {
                let _ = supervisor::kill_with_event(
                    key,
                    &inst.handle,
                    true,
                    self.config.stop_grace_period,
                    &self.events_tx,
                )
                .await;
            }
            self.remove_slot(key);
            self.metrics.record_session_collected();
            return;
        }

        if !alive {
            self.reconcile_dead(key, slot).await;
        } else {
            self.probe_health(key, slot).await;
        }
    }

    /// Handle a dead process: mark Unhealthy, then restart only when the
    /// restart ceiling permits and the backoff deadline has elapsed.
    async fn reconcile_dead(self: &Arc<Self>, key: &InstanceKey, slot: &Arc<Slot>) {
        let now = Instant::now();

        // Decide under the instance lock, spawn outside it.
        enum Decision {
            Wait,
            Fail,
            Restart,
        }

        let decision = {
            let mut inst = slot.write();
            let Some(inst) = inst.as_mut() else { return };

            if inst.state != InstanceState::Unhealthy {
                warn!(key = %key, "process died, marking unhealthy");
                inst.state = InstanceState::Unhealthy;
                inst.consecutive_healthy = 0;
                if inst.last_error.is_none() {
                    inst.last_error = Some("process exited".into());
                }
            }

            if inst.restart_count >= self.config.restart_ceiling {
                inst.state = InstanceState::Failed;
                Decision::Fail
            } else if inst.backoff_until.map(|b| now < b).unwrap_or(false) {
                Decision::Wait
            } else {
                // Advance the backoff schedule before attempting, so a failed
                // attempt cannot retry immediately. backoff_until never
                // decreases across consecutive failures.
                inst.failure_count += 1;
                let next = now + self.backoff.delay(inst.failure_count);
                inst.backoff_until = Some(inst.backoff_until.map_or(next, |b| b.max(next)));
                inst.restart_count += 1;
                Decision::Restart
            }
        };

        match decision {
            Decision::Wait => {}
            Decision::Fail => {
                warn!(key = %key, ceiling = self.config.restart_ceiling,
                    "restart ceiling exhausted, instance permanently failed");
            }
            Decision::Restart => {
                let Some(entry) = self.registry.get(&key.name) else {
                    let mut inst = slot.write();
                    if let Some(inst) = inst.as_mut() {
                        inst.last_error = Some(format!("pattern {} no longer registered", key.name));
                    }
                    return;
                };

                self.metrics.record_restart();
                match self.spawn_process(key, &entry).await {
                    Ok(handle) => {
                        let mut inst = slot.write();
                        if let Some(inst) = inst.as_mut() {
                            info!(key = %key, pid = handle.pid(), restarts = inst.restart_count,
                                "restarted pattern instance");
                            inst.handle = handle;
                            inst.state = InstanceState::Running;
                            inst.spawned_at = Instant::now();
                            inst.started_at = Utc::now();
                            inst.last_health_check = None;
                            inst.last_health_check_at = None;
                            inst.consecutive_probe_failures = 0;
                            inst.consecutive_healthy = 0;
                        }
                    }
                    Err(e) => {
                        warn!(key = %key, error = %e, "restart attempt failed");
                        let mut inst = slot.write();
                        if let Some(inst) = inst.as_mut() {
                            inst.last_error = Some(e.to_string());
                        }
                    }
                }
            }
        }
    }

    /// Poll a live instance's control-plane health and fold the result into
    /// its state. Repeated failures force a kill so the dead path restarts
    /// it under backoff.
    async fn probe_health(self: &Arc<Self>, key: &InstanceKey, slot: &Arc<Slot>) {
        let port = {
            let inst = slot.read();
            let Some(inst) = inst.as_ref() else { return };
            inst.handle.control_port()
        };

        let url = format!("http://127.0.0.1:{}{}", port, wire::PATH_HEALTH);
        let result: std::result::Result<HealthResponse, String> = async {
            let resp = self
                .http
                .get(&url)
                .timeout(PROBE_TIMEOUT)
                .send()
                .await
                .map_err(|e| e.to_string())?;
            resp.json::<HealthResponse>()
                .await
                .map_err(|e| format!("malformed health response: {}", e))
        }
        .await;

        let kill_needed = {
            let mut inst = slot.write();
            let Some(inst) = inst.as_mut() else { return };

            let now = Instant::now();
            match &result {
                Ok(health) if health.status.is_serving() => {
                    inst.last_health_check = Some(now);
                    inst.last_health_check_at = Some(Utc::now());
                    inst.consecutive_probe_failures = 0;
                    inst.state = match health.status {
                        HealthStatus::Degraded => InstanceState::Degraded,
                        _ => InstanceState::Running,
                    };

                    if health.status == HealthStatus::Healthy {
                        inst.consecutive_healthy += 1;
                        inst.last_error = None;
                        // Sustained Healthy resets the backoff state.
                        if inst.consecutive_healthy >= self.config.healthy_reset_threshold {
                            inst.failure_count = 0;
                            inst.backoff_until = None;
                            inst.restart_count = 0;
                        }
                    } else {
                        inst.consecutive_healthy = 0;
                        inst.last_error = Some(health.message.clone());
                    }
                    false
                }
                Ok(health) => {
                    // Self-reported Unhealthy.
                    inst.last_health_check = Some(now);
                    inst.last_health_check_at = Some(Utc::now());
                    inst.state = InstanceState::Unhealthy;
                    inst.consecutive_healthy = 0;
                    inst.consecutive_probe_failures += 1;
                    inst.last_error = Some(health.message.clone());
                    self.metrics.record_health_check_failure();
                    inst.consecutive_probe_failures >= PROBE_FAILURE_KILL_THRESHOLD
                }
                Err(e) => {
                    inst.state = InstanceState::Unhealthy;
                    inst.consecutive_healthy = 0;
                    inst.consecutive_probe_failures += 1;
                    inst.last_error = Some(e.clone());
                    self.metrics.record_health_check_failure();
                    inst.consecutive_probe_failures >= PROBE_FAILURE_KILL_THRESHOLD
                }
            }
        };

        if kill_needed {
            warn!(key = %key, "recurring health-probe failures, killing for restart");
            let handle = {
                let inst = slot.read();
                inst.as_ref().map(|i| i.handle.clone())
            };
            if let Some(handle) = handle {
                let _ = supervisor::kill_with_event(
                    key,
                    &handle,
                    false,
                    Duration::from_secs(2),
                    &self.events_tx,
                )
                .await;
            }
        }
    }

    /// Consume supervisor transitions so crashes are observed between
    /// resync ticks.
    async fn consume_events(self: &Arc<Self>) {
        let Some(mut rx) = self.events_rx.lock().await.take() else {
            return;
        };

        while let Some(event) = rx.recv().await {
            match event {
                ProcessEvent::Spawned { key, pid } => {
                    debug!(key = %key, pid = pid, "supervisor reported spawn");
                }
                ProcessEvent::Killed { key } => {
                    debug!(key = %key, "supervisor reported kill");
                }
                ProcessEvent::Exited { key, code } => {
                    let slot = {
                        let map = self.instances.read().expect("registry lock poisoned");
                        map.get(&key).cloned()
                    };
                    let Some(slot) = slot else { continue };

                    let _admission = slot.admission.lock().await;
                    let mut inst = slot.write();
                    if let Some(inst) = inst.as_mut() {
                        // Ignore stale events from a handle we already replaced.
                        if inst.handle.is_alive() {
                            continue;
                        }
                        if inst.state.has_process() {
                            warn!(key = %key, code = ?code, "process exit observed");
                            inst.state = InstanceState::Unhealthy;
                            inst.consecutive_healthy = 0;
                            inst.last_error =
                                Some(format!("process exited with code {:?}", code));
                        }
                    }
                }
            }
        }
    }
}

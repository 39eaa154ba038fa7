//! Launcher behavior against an in-process supervisor.
//!
//! The fake supervisor stands in for the OS one: each "process" is a real
//! control-plane server (backed by the in-memory store) running inside the
//! test, with a kill switch standing in for process death. This exercises
//! the launcher's real HTTP probing without spawning binaries.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::Notify;

use padl_core::config::LauncherConfig;
use padl_core::error::{Error, Result};
use padl_core::isolation::ExecutionContext;
use padl_core::launcher::{LaunchRequest, Launcher};
use padl_core::manifest::PatternRegistry;
use padl_core::supervisor::{ProcessHandle, Supervisor};
use padl_core::types::{HealthStatus, InstanceState, IsolationLevel, ListFilter};
use padl_core::wire::{HealthResponse, PatternMetadata};

use padl_sdk::server::ControlPlaneServer;
use padl_sdk::{LifecycleHost, MemStore, Pattern};

/// A fake process: alive until its kill switch flips.
#[derive(Debug)]
struct FakeHandle {
    pid: u32,
    port: u16,
    alive: AtomicBool,
    exited: Notify,
    server: Mutex<Option<ControlPlaneServer>>,
}

impl FakeHandle {
    /// Simulate a crash (or honor a kill).
    fn terminate(&self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            if let Some(server) = self.server.lock().unwrap().take() {
                server.shutdown();
            }
            self.exited.notify_waiters();
        }
    }
}

#[async_trait]
impl ProcessHandle for FakeHandle {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn control_port(&self) -> u16 {
        self.port
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn wait(&self) -> Option<i32> {
        loop {
            let notified = self.exited.notified();
            if !self.alive.load(Ordering::SeqCst) {
                return None;
            }
            notified.await;
        }
    }

    async fn kill(&self, _graceful: bool, _timeout: Duration) -> Result<()> {
        self.terminate();
        Ok(())
    }
}

/// Memstore whose self-reported health the test can flip at runtime.
struct ReportingStore {
    inner: MemStore,
    status: Arc<RwLock<HealthStatus>>,
}

#[async_trait]
impl Pattern for ReportingStore {
    fn metadata(&self) -> PatternMetadata {
        self.inner.metadata()
    }

    async fn initialize(&self, config: HashMap<String, String>) -> padl_sdk::Result<()> {
        self.inner.initialize(config).await
    }

    async fn start(&self) -> padl_sdk::Result<String> {
        self.inner.start().await
    }

    async fn stop(&self, timeout: Duration) -> padl_sdk::Result<()> {
        self.inner.stop(timeout).await
    }

    async fn health(&self) -> HealthResponse {
        HealthResponse {
            status: *self.status.read().unwrap(),
            message: String::new(),
        }
    }
}

/// Supervisor whose processes are in-process control-plane servers.
struct FakeSupervisor {
    /// When false, spawned "processes" never answer health probes.
    serve_health: bool,
    /// Health every spawned pattern reports; shared across restarts.
    pattern_status: Arc<RwLock<HealthStatus>>,
    spawns: AtomicU32,
    next_pid: AtomicU32,
    handles: Mutex<Vec<Arc<FakeHandle>>>,
}

impl FakeSupervisor {
    fn new(serve_health: bool) -> Arc<Self> {
        Arc::new(Self {
            serve_health,
            pattern_status: Arc::new(RwLock::new(HealthStatus::Healthy)),
            spawns: AtomicU32::new(0),
            next_pid: AtomicU32::new(1000),
            handles: Mutex::new(Vec::new()),
        })
    }

    fn set_pattern_health(&self, status: HealthStatus) {
        *self.pattern_status.write().unwrap() = status;
    }

    fn spawn_count(&self) -> u32 {
        self.spawns.load(Ordering::SeqCst)
    }

    fn last_handle(&self) -> Arc<FakeHandle> {
        self.handles.lock().unwrap().last().unwrap().clone()
    }
}

#[async_trait]
impl Supervisor for FakeSupervisor {
    async fn start(
        &self,
        _executable: &Path,
        _ctx: &ExecutionContext,
    ) -> Result<Arc<dyn ProcessHandle>> {
        self.spawns.fetch_add(1, Ordering::SeqCst);

        let (port, server) = if self.serve_health {
            let host = LifecycleHost::new(Arc::new(ReportingStore {
                inner: MemStore::new(),
                status: self.pattern_status.clone(),
            }));
            host.initialize(HashMap::new())
                .await
                .map_err(|e| Error::Spawn(e.to_string()))?;
            host.start().await.map_err(|e| Error::Spawn(e.to_string()))?;
            let server = padl_sdk::serve(host, 0)
                .await
                .map_err(|e| Error::Spawn(e.to_string()))?;
            (server.addr.port(), Some(server))
        } else {
            // A port nothing listens on: probes will never succeed.
            let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
            let port = listener.local_addr()?.port();
            drop(listener);
            (port, None)
        };

        let handle = Arc::new(FakeHandle {
            pid: self.next_pid.fetch_add(1, Ordering::SeqCst),
            port,
            alive: AtomicBool::new(true),
            exited: Notify::new(),
            server: Mutex::new(server),
        });
        self.handles.lock().unwrap().push(handle.clone());
        Ok(handle)
    }
}

/// Parks the first spawn until released, then fails it. Lets a test hold a
/// key's admission lock mid-launch while another launch queues behind it.
struct GatedSupervisor {
    inner: Arc<FakeSupervisor>,
    gate: Arc<Notify>,
    calls: AtomicU32,
}

#[async_trait]
impl Supervisor for GatedSupervisor {
    async fn start(
        &self,
        executable: &Path,
        ctx: &ExecutionContext,
    ) -> Result<Arc<dyn ProcessHandle>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            self.gate.notified().await;
            return Err(Error::Spawn("injected spawn failure".into()));
        }
        self.inner.start(executable, ctx).await
    }
}

fn write_pattern(dir: &Path, name: &str) {
    let pattern_dir = dir.join(name);
    fs::create_dir_all(&pattern_dir).unwrap();
    fs::write(
        pattern_dir.join("pattern.toml"),
        format!(
            "name = \"{}\"\nversion = \"0.1.0\"\nexecutable = \"pattern-bin\"\n",
            name
        ),
    )
    .unwrap();
    // The fake supervisor never execs this, it just has to resolve.
    fs::write(pattern_dir.join("pattern-bin"), "").unwrap();
}

fn test_config(patterns_dir: &Path) -> LauncherConfig {
    LauncherConfig {
        patterns_dir: patterns_dir.to_path_buf(),
        startup_timeout: Duration::from_secs(5),
        stop_grace_period: Duration::from_secs(1),
        backoff_period: Duration::from_millis(10),
        healthy_reset_threshold: 1,
        ..Default::default()
    }
}

fn setup(config: LauncherConfig, sup: Arc<FakeSupervisor>) -> Arc<Launcher> {
    let registry = Arc::new(PatternRegistry::new(&config.patterns_dir));
    registry.discover().unwrap();
    Launcher::new(config, registry, sup)
}

fn launch_req(namespace: &str, session_id: &str, isolation: IsolationLevel) -> LaunchRequest {
    LaunchRequest {
        name: "memstore".into(),
        namespace: namespace.into(),
        session_id: session_id.into(),
        isolation: Some(isolation),
    }
}

#[tokio::test]
async fn test_launch_is_idempotent_per_key() {
    let dir = tempfile::tempdir().unwrap();
    write_pattern(dir.path(), "memstore");
    let sup = FakeSupervisor::new(true);
    let launcher = setup(test_config(dir.path()), sup.clone());

    let a = launcher
        .launch(launch_req("ns1", "", IsolationLevel::Namespace))
        .await
        .unwrap();
    let b = launcher
        .launch(launch_req("ns1", "", IsolationLevel::Namespace))
        .await
        .unwrap();

    assert_eq!(a.id, b.id);
    assert_eq!(sup.spawn_count(), 1);
    assert_eq!(a.state, InstanceState::Running);
}

#[tokio::test]
async fn test_isolation_levels_scope_instances() {
    let dir = tempfile::tempdir().unwrap();
    write_pattern(dir.path(), "memstore");
    let sup = FakeSupervisor::new(true);
    let launcher = setup(test_config(dir.path()), sup.clone());

    // Distinct sessions get distinct processes.
    let s1 = launcher
        .launch(launch_req("ns1", "sess-a", IsolationLevel::Session))
        .await
        .unwrap();
    let s2 = launcher
        .launch(launch_req("ns1", "sess-b", IsolationLevel::Session))
        .await
        .unwrap();
    assert_ne!(s1.id, s2.id);

    // None isolation collapses every caller onto one process.
    let n1 = launcher
        .launch(launch_req("ns1", "", IsolationLevel::None))
        .await
        .unwrap();
    let n2 = launcher
        .launch(launch_req("ns2", "", IsolationLevel::None))
        .await
        .unwrap();
    assert_eq!(n1.id, n2.id);

    assert_eq!(sup.spawn_count(), 3);
    assert_eq!(launcher.list(&ListFilter::default()).len(), 3);
}

#[tokio::test]
async fn test_stop_removes_instance_and_kills_process() {
    let dir = tempfile::tempdir().unwrap();
    write_pattern(dir.path(), "memstore");
    let sup = FakeSupervisor::new(true);
    let launcher = setup(test_config(dir.path()), sup.clone());

    let summary = launcher
        .launch(launch_req("ns1", "", IsolationLevel::Namespace))
        .await
        .unwrap();

    launcher.stop(&summary.id).await.unwrap();
    assert!(launcher.list(&ListFilter::default()).is_empty());
    assert!(!sup.last_handle().is_alive());

    // Stopping again is an error: the instance is gone.
    assert!(matches!(
        launcher.stop(&summary.id).await.unwrap_err(),
        Error::InstanceNotFound(_)
    ));
}

#[tokio::test]
async fn test_startup_timeout_is_spawn_error_with_no_registration() {
    let dir = tempfile::tempdir().unwrap();
    write_pattern(dir.path(), "memstore");
    let sup = FakeSupervisor::new(false);
    let config = LauncherConfig {
        startup_timeout: Duration::from_millis(300),
        ..test_config(dir.path())
    };
    let launcher = setup(config, sup.clone());

    let err = launcher
        .launch(launch_req("ns1", "", IsolationLevel::Namespace))
        .await
        .unwrap_err();
    assert!(err.is_spawn_error(), "got {:?}", err);
    assert!(matches!(err, Error::StartupTimeout(_)));

    // Nothing registered, and the spawned process was reaped.
    assert!(launcher.list(&ListFilter::default()).is_empty());
    assert!(!sup.last_handle().is_alive());
}

#[tokio::test]
async fn test_dead_process_restarts_on_resync() {
    let dir = tempfile::tempdir().unwrap();
    write_pattern(dir.path(), "memstore");
    let sup = FakeSupervisor::new(true);
    let launcher = setup(test_config(dir.path()), sup.clone());

    launcher
        .launch(launch_req("ns1", "", IsolationLevel::Namespace))
        .await
        .unwrap();

    sup.last_handle().terminate();
    launcher.resync_once().await;

    let instances = launcher.list(&ListFilter::default());
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0].state, InstanceState::Running);
    assert_eq!(instances[0].restart_count, 1);
    assert_eq!(sup.spawn_count(), 2);

    // A healthy poll past the reset threshold clears the restart budget.
    launcher.resync_once().await;
    let instances = launcher.list(&ListFilter::default());
    assert_eq!(instances[0].restart_count, 0);
}

#[tokio::test]
async fn test_restart_ceiling_makes_instance_permanently_failed() {
    let dir = tempfile::tempdir().unwrap();
    write_pattern(dir.path(), "memstore");
    let sup = FakeSupervisor::new(true);
    let config = LauncherConfig {
        restart_ceiling: 0,
        ..test_config(dir.path())
    };
    let launcher = setup(config, sup.clone());

    let summary = launcher
        .launch(launch_req("ns1", "", IsolationLevel::Namespace))
        .await
        .unwrap();

    sup.last_handle().terminate();
    launcher.resync_once().await;

    let instances = launcher.list(&ListFilter::default());
    assert_eq!(instances[0].state, InstanceState::Failed);
    // No respawn happened.
    assert_eq!(sup.spawn_count(), 1);

    // Failed instances are excluded from restart: another pass changes nothing.
    launcher.resync_once().await;
    assert_eq!(sup.spawn_count(), 1);

    // Launch on a Failed key is refused until the operator stops it.
    let err = launcher
        .launch(launch_req("ns1", "", IsolationLevel::Namespace))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PermanentlyFailed { .. }));

    launcher.stop(&summary.id).await.unwrap();
    let relaunched = launcher
        .launch(launch_req("ns1", "", IsolationLevel::Namespace))
        .await
        .unwrap();
    assert_eq!(relaunched.state, InstanceState::Running);
    assert_eq!(sup.spawn_count(), 2);
}

#[tokio::test]
async fn test_backoff_defers_second_restart() {
    let dir = tempfile::tempdir().unwrap();
    write_pattern(dir.path(), "memstore");
    let sup = FakeSupervisor::new(true);
    let config = LauncherConfig {
        // Long enough that the second restart cannot happen inside this test.
        backoff_period: Duration::from_secs(60),
        ..test_config(dir.path())
    };
    let launcher = setup(config, sup.clone());

    launcher
        .launch(launch_req("ns1", "", IsolationLevel::Namespace))
        .await
        .unwrap();

    // First death restarts immediately and arms the backoff.
    sup.last_handle().terminate();
    launcher.resync_once().await;
    assert_eq!(sup.spawn_count(), 2);

    // Second death inside the backoff window is not restarted yet.
    sup.last_handle().terminate();
    launcher.resync_once().await;
    assert_eq!(sup.spawn_count(), 2);

    let instances = launcher.list(&ListFilter::default());
    assert_eq!(instances[0].state, InstanceState::Unhealthy);
}

#[tokio::test]
async fn test_idle_session_is_collected() {
    let dir = tempfile::tempdir().unwrap();
    write_pattern(dir.path(), "memstore");
    let sup = FakeSupervisor::new(true);
    let config = LauncherConfig {
        session_idle_ttl: Duration::from_millis(100),
        ..test_config(dir.path())
    };
    let launcher = setup(config, sup.clone());

    launcher
        .launch(launch_req("ns1", "sess-a", IsolationLevel::Session))
        .await
        .unwrap();
    // Namespace instances are never idle-collected.
    launcher
        .launch(launch_req("ns1", "", IsolationLevel::Namespace))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    launcher.resync_once().await;

    let instances = launcher.list(&ListFilter::default());
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0].isolation, IsolationLevel::Namespace);
}

#[tokio::test]
async fn test_list_filters() {
    let dir = tempfile::tempdir().unwrap();
    write_pattern(dir.path(), "memstore");
    let sup = FakeSupervisor::new(true);
    let launcher = setup(test_config(dir.path()), sup);

    launcher
        .launch(launch_req("ns1", "", IsolationLevel::Namespace))
        .await
        .unwrap();
    launcher
        .launch(launch_req("ns2", "", IsolationLevel::Namespace))
        .await
        .unwrap();

    let all = launcher.list(&ListFilter::default());
    assert_eq!(all.len(), 2);

    let ns1_only = launcher.list(&ListFilter {
        namespace: Some("ns1".into()),
        ..Default::default()
    });
    assert_eq!(ns1_only.len(), 1);
    assert_eq!(ns1_only[0].namespace, "ns1");

    let running = launcher.list(&ListFilter {
        state: Some(InstanceState::Running),
        ..Default::default()
    });
    assert_eq!(running.len(), 2);
}

#[tokio::test]
async fn test_aggregate_health_flags_stale_instances() {
    let dir = tempfile::tempdir().unwrap();
    write_pattern(dir.path(), "memstore");
    let sup = FakeSupervisor::new(true);
    let config = LauncherConfig {
        resync_interval: Duration::from_millis(50),
        ..test_config(dir.path())
    };
    let launcher = setup(config, sup);

    launcher
        .launch(launch_req("ns1", "", IsolationLevel::Namespace))
        .await
        .unwrap();
    assert!(launcher.health(false).healthy);

    // No reconciliation runs, so the last observation ages past twice the
    // resync interval.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!launcher.health(false).healthy);

    // A reconciliation pass refreshes the observation.
    launcher.resync_once().await;
    assert!(launcher.health(false).healthy);
}

#[tokio::test]
async fn test_failed_launch_does_not_strand_concurrent_launch() {
    let dir = tempfile::tempdir().unwrap();
    write_pattern(dir.path(), "memstore");
    let inner = FakeSupervisor::new(true);
    let gate = Arc::new(Notify::new());
    let sup = Arc::new(GatedSupervisor {
        inner: inner.clone(),
        gate: gate.clone(),
        calls: AtomicU32::new(0),
    });
    let registry = Arc::new(PatternRegistry::new(dir.path()));
    registry.discover().unwrap();
    let launcher = Launcher::new(test_config(dir.path()), registry, sup);

    // First launch parks inside the supervisor, holding the key's admission.
    let first = {
        let launcher = launcher.clone();
        tokio::spawn(async move {
            launcher
                .launch(launch_req("ns1", "", IsolationLevel::Namespace))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Second launch for the same key queues behind it.
    let second = {
        let launcher = launcher.clone();
        tokio::spawn(async move {
            launcher
                .launch(launch_req("ns1", "", IsolationLevel::Namespace))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    gate.notify_one();

    let err = first.await.unwrap().unwrap_err();
    assert!(err.is_spawn_error(), "got {:?}", err);

    // The queued launch must come out fully tracked, never orphaned: it
    // appears in List, its process is spawned, and Stop can reach it.
    let summary = second.await.unwrap().unwrap();
    let listed = launcher.list(&ListFilter::default());
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, summary.id);
    assert_eq!(inner.spawn_count(), 1);

    launcher.stop(&summary.id).await.unwrap();
    assert!(launcher.list(&ListFilter::default()).is_empty());
    assert!(!inner.last_handle().is_alive());
}

#[tokio::test]
async fn test_recurring_probe_failures_force_restart() {
    let dir = tempfile::tempdir().unwrap();
    write_pattern(dir.path(), "memstore");
    let sup = FakeSupervisor::new(true);
    let launcher = setup(test_config(dir.path()), sup.clone());

    launcher
        .launch(launch_req("ns1", "", IsolationLevel::Namespace))
        .await
        .unwrap();

    sup.set_pattern_health(HealthStatus::Unhealthy);

    // Two failed polls leave the process alive but marked Unhealthy.
    launcher.resync_once().await;
    launcher.resync_once().await;
    assert!(sup.last_handle().is_alive());
    let instances = launcher.list(&ListFilter::default());
    assert_eq!(instances[0].state, InstanceState::Unhealthy);
    assert_eq!(sup.spawn_count(), 1);

    // The third consecutive failure kills the process for restart.
    launcher.resync_once().await;
    assert!(!sup.last_handle().is_alive());

    // The dead path restarts it on the next pass; healthy again, it runs.
    sup.set_pattern_health(HealthStatus::Healthy);
    launcher.resync_once().await;
    assert_eq!(sup.spawn_count(), 2);
    let instances = launcher.list(&ListFilter::default());
    assert_eq!(instances[0].state, InstanceState::Running);
    assert_eq!(instances[0].restart_count, 1);
}

#[tokio::test]
async fn test_aggregate_health_tracks_failures() {
    let dir = tempfile::tempdir().unwrap();
    write_pattern(dir.path(), "memstore");
    let sup = FakeSupervisor::new(true);
    let config = LauncherConfig {
        restart_ceiling: 0,
        ..test_config(dir.path())
    };
    let launcher = setup(config, sup.clone());

    launcher
        .launch(launch_req("ns1", "", IsolationLevel::Namespace))
        .await
        .unwrap();
    assert!(launcher.health(false).healthy);

    sup.last_handle().terminate();
    launcher.resync_once().await;

    let health = launcher.health(true);
    assert!(!health.healthy);
    assert_eq!(health.failed_processes, 1);
    assert_eq!(health.processes.unwrap().len(), 1);
}

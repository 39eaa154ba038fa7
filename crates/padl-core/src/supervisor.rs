//! Process supervision.
//!
//! The supervisor spawns a pattern binary inside an execution context,
//! allocates its control/data ports, and reports observed transitions over
//! a bounded channel. It never decides retry policy - that belongs to the
//! launcher.
//!
//! `Supervisor`/`ProcessHandle` are traits so tests can substitute an
//! in-process fake for the OS implementation.

use async_trait::async_trait;
use std::net::TcpListener;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::isolation::ExecutionContext;
use crate::types::InstanceKey;
use crate::wire;

/// Capacity of the supervisor-to-launcher event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// State transitions observed by the supervisor.
#[derive(Debug, Clone)]
pub enum ProcessEvent {
    Spawned { key: InstanceKey, pid: u32 },
    Exited { key: InstanceKey, code: Option<i32> },
    Killed { key: InstanceKey },
}

/// Handle to a single supervised process.
#[async_trait]
pub trait ProcessHandle: Send + Sync + std::fmt::Debug {
    fn pid(&self) -> u32;

    /// Port the pattern's control plane listens on.
    fn control_port(&self) -> u16;

    /// Whether the process has not yet been observed to exit.
    fn is_alive(&self) -> bool;

    /// Suspend until the process exits, yielding its exit code (`None` when
    /// terminated by a signal). Only blocks the calling task.
    async fn wait(&self) -> Option<i32>;

    /// Terminate the process. With `graceful`, sends SIGTERM and waits up to
    /// `timeout` before escalating to SIGKILL.
    async fn kill(&self, graceful: bool, timeout: Duration) -> Result<()>;
}

/// Spawns pattern processes.
#[async_trait]
pub trait Supervisor: Send + Sync {
    async fn start(
        &self,
        executable: &Path,
        ctx: &ExecutionContext,
    ) -> Result<Arc<dyn ProcessHandle>>;
}

/// Forward transitions for one process onto the launcher's event channel.
/// Sends `Spawned` immediately and `Exited` once the process dies.
pub fn spawn_monitor(
    key: InstanceKey,
    handle: Arc<dyn ProcessHandle>,
    events: mpsc::Sender<ProcessEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let pid = handle.pid();
        let _ = events
            .send(ProcessEvent::Spawned {
                key: key.clone(),
                pid,
            })
            .await;

        let code = handle.wait().await;
        debug!(key = %key, pid = pid, code = ?code, "process exited");
        let _ = events.send(ProcessEvent::Exited { key, code }).await;
    })
}

/// Kill a process and report the `Killed` transition.
pub async fn kill_with_event(
    key: &InstanceKey,
    handle: &Arc<dyn ProcessHandle>,
    graceful: bool,
    timeout: Duration,
    events: &mpsc::Sender<ProcessEvent>,
) -> Result<()> {
    handle.kill(graceful, timeout).await?;
    let _ = events
        .send(ProcessEvent::Killed { key: key.clone() })
        .await;
    Ok(())
}

/// Production supervisor backed by `tokio::process`.
#[derive(Debug, Default)]
pub struct OsSupervisor;

impl OsSupervisor {
    pub fn new() -> Self {
        Self
    }

    /// Bind port 0 and read back the OS-assigned value.
    fn allocate_port() -> Result<u16> {
        let listener = TcpListener::bind(("127.0.0.1", 0))
            .map_err(|e| Error::PortAllocation(e.to_string()))?;
        let port = listener
            .local_addr()
            .map_err(|e| Error::PortAllocation(e.to_string()))?
            .port();
        Ok(port)
    }
}

#[async_trait]
impl Supervisor for OsSupervisor {
    async fn start(
        &self,
        executable: &Path,
        ctx: &ExecutionContext,
    ) -> Result<Arc<dyn ProcessHandle>> {
        let control_port = Self::allocate_port()?;
        let data_port = Self::allocate_port()?;

        let mut cmd = Command::new(executable);
        cmd.current_dir(&ctx.working_dir)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        for (k, v) in &ctx.env {
            cmd.env(k, v);
        }
        cmd.env(wire::ENV_CONTROL_PORT, control_port.to_string());
        cmd.env(wire::ENV_DATA_PORT, data_port.to_string());

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::BinaryMissing(executable.display().to_string())
            } else {
                Error::Spawn(format!("{}: {}", executable.display(), e))
            }
        })?;

        let pid = child
            .id()
            .ok_or_else(|| Error::Spawn("child exited before pid was read".into()))?;

        info!(
            executable = %executable.display(),
            pid = pid,
            control_port = control_port,
            scope = %ctx.scope_token,
            "spawned pattern process"
        );

        // Single reaper task owns the child; everyone else observes exit
        // through the watch channel.
        let (exit_tx, exit_rx) = watch::channel::<Option<Option<i32>>>(None);
        tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    warn!(pid = pid, error = %e, "wait on child failed");
                    None
                }
            };
            let _ = exit_tx.send(Some(code));
        });

        Ok(Arc::new(OsProcessHandle {
            pid,
            control_port,
            exit: exit_rx,
        }))
    }
}

/// Handle to a process spawned by [`OsSupervisor`].
#[derive(Debug)]
pub struct OsProcessHandle {
    pid: u32,
    control_port: u16,
    exit: watch::Receiver<Option<Option<i32>>>,
}

impl OsProcessHandle {
    fn signal(&self, sig: libc::c_int) {
        // Safe: sending a signal to a pid we spawned.
        unsafe {
            libc::kill(self.pid as libc::pid_t, sig);
        }
    }
}

#[async_trait]
impl ProcessHandle for OsProcessHandle {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn control_port(&self) -> u16 {
        self.control_port
    }

    fn is_alive(&self) -> bool {
        self.exit.borrow().is_none()
    }

    async fn wait(&self) -> Option<i32> {
        let mut rx = self.exit.clone();
        loop {
            if let Some(code) = *rx.borrow() {
                return code;
            }
            if rx.changed().await.is_err() {
                return None;
            }
        }
    }

    async fn kill(&self, graceful: bool, timeout: Duration) -> Result<()> {
        if !self.is_alive() {
            return Ok(());
        }

        if graceful {
            self.signal(libc::SIGTERM);
            if tokio::time::timeout(timeout, self.wait()).await.is_ok() {
                return Ok(());
            }
            warn!(pid = self.pid, "process outlived grace period, escalating to SIGKILL");
        }

        self.signal(libc::SIGKILL);
        tokio::time::timeout(Duration::from_secs(5), self.wait())
            .await
            .map_err(|_| Error::Other(format!("process {} did not die after SIGKILL", self.pid)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IsolationLevel, ResourceLimits};
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn test_ctx(dir: &Path) -> ExecutionContext {
        let key = InstanceKey::new(IsolationLevel::None, "test", "", "").unwrap();
        crate::isolation::IsolationPolicy::new(ResourceLimits {
            cpu_fraction: 1.0,
            memory_bytes: 1024 * 1024,
        })
        .execution_context(&key, dir.to_path_buf(), vec![])
    }

    #[tokio::test]
    async fn test_wait_yields_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let exe = script(dir.path(), "exit7.sh", "exit 7");
        let sup = OsSupervisor::new();

        let handle = sup.start(&exe, &test_ctx(dir.path())).await.unwrap();
        assert_eq!(handle.wait().await, Some(7));
        assert!(!handle.is_alive());
    }

    #[tokio::test]
    async fn test_graceful_kill_terminates_process() {
        let dir = tempfile::tempdir().unwrap();
        let exe = script(dir.path(), "sleep.sh", "sleep 30");
        let sup = OsSupervisor::new();

        let handle = sup.start(&exe, &test_ctx(dir.path())).await.unwrap();
        assert!(handle.is_alive());

        handle.kill(true, Duration::from_secs(5)).await.unwrap();
        assert!(!handle.is_alive());
        // Terminated by signal, so no exit code.
        assert_eq!(handle.wait().await, None);
    }

    #[tokio::test]
    async fn test_kill_is_idempotent_after_exit() {
        let dir = tempfile::tempdir().unwrap();
        let exe = script(dir.path(), "exit0.sh", "exit 0");
        let sup = OsSupervisor::new();

        let handle = sup.start(&exe, &test_ctx(dir.path())).await.unwrap();
        handle.wait().await;
        assert!(handle.kill(true, Duration::from_millis(100)).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let sup = OsSupervisor::new();
        let err = sup
            .start(Path::new("/nonexistent/binary-xyz"), &test_ctx(dir.path()))
            .await
            .unwrap_err();
        assert!(err.is_spawn_error());
    }

    #[tokio::test]
    async fn test_monitor_reports_spawn_and_exit() {
        let dir = tempfile::tempdir().unwrap();
        let exe = script(dir.path(), "exit3.sh", "exit 3");
        let sup = OsSupervisor::new();
        let key = InstanceKey::new(IsolationLevel::None, "test", "", "").unwrap();

        let handle = sup.start(&exe, &test_ctx(dir.path())).await.unwrap();
        let (tx, mut rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        spawn_monitor(key.clone(), handle, tx);

        match rx.recv().await.unwrap() {
            ProcessEvent::Spawned { key: k, pid } => {
                assert_eq!(k, key);
                assert!(pid > 0);
            }
            other => panic!("expected Spawned, got {:?}", other),
        }
        match rx.recv().await.unwrap() {
            ProcessEvent::Exited { key: k, code } => {
                assert_eq!(k, key);
                assert_eq!(code, Some(3));
            }
            other => panic!("expected Exited, got {:?}", other),
        }
    }

    #[test]
    fn test_port_allocation_reads_back_os_port() {
        let a = OsSupervisor::allocate_port().unwrap();
        let b = OsSupervisor::allocate_port().unwrap();
        assert!(a > 0);
        assert!(b > 0);
    }
}

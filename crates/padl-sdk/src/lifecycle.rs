//! Pattern lifecycle contract.
//!
//! A pattern implements [`Pattern`]; the [`LifecycleHost`] wraps it in the
//! state machine every pattern process must obey:
//!
//! ```text
//! Created -> Initialized -> Running -> Stopping -> Stopped
//! ```
//!
//! Operations arriving in the wrong state fail with a precondition error
//! rather than being reordered or silently absorbed. Stop is the one
//! idempotent operation: stopping an already-stopped pattern succeeds.
//!
//! The host also owns the serving projection behind the synchronized
//! health-check endpoint: a cached SERVING/NOT_SERVING flag refreshed on a
//! fixed cadence and forced to NOT_SERVING the moment a stop begins.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

use padl_core::types::HealthStatus;
use padl_core::wire::{HealthResponse, PatternMetadata};

use crate::capability::{KeyValueBasic, KeyValueScan, KeyValueTtl};
use crate::error::{Error, Result};

/// Cadence of the background health refresh feeding the health-check
/// endpoint.
pub const HEALTH_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// A pattern implementation hosted behind the control plane.
#[async_trait]
pub trait Pattern: Send + Sync + 'static {
    /// Name, version, and ordered capability list.
    fn metadata(&self) -> PatternMetadata;

    /// One-time setup. Called exactly once, before `start`.
    async fn initialize(&self, config: HashMap<String, String>) -> Result<()>;

    /// Begin serving. Returns the data-plane endpoint, or an empty string
    /// when data traffic shares the control port.
    async fn start(&self) -> Result<String>;

    /// Drain and release resources within `timeout`.
    async fn stop(&self, timeout: Duration) -> Result<()>;

    /// Self-reported health. Only consulted while running.
    async fn health(&self) -> HealthResponse;

    fn keyvalue_basic(&self) -> Option<&dyn KeyValueBasic> {
        None
    }

    fn keyvalue_ttl(&self) -> Option<&dyn KeyValueTtl> {
        None
    }

    fn keyvalue_scan(&self) -> Option<&dyn KeyValueScan> {
        None
    }
}

/// Lifecycle states, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Initialized,
    Running,
    Stopping,
    Stopped,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Created => "created",
            LifecycleState::Initialized => "initialized",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Stopped => "stopped",
        }
    }
}

/// Hosts one pattern behind the lifecycle state machine.
pub struct LifecycleHost {
    pattern: Arc<dyn Pattern>,
    state: RwLock<LifecycleState>,
    /// Latest health observation; refreshed by the ticker and on start.
    health_cache: RwLock<HealthResponse>,
    /// Set at the start of `stop`, before the pattern drains, so the
    /// health-check endpoint flips to NOT_SERVING first.
    shutting_down: AtomicBool,
    /// Where the pattern serves data traffic once started.
    data_endpoint: RwLock<String>,
}

impl LifecycleHost {
    pub fn new(pattern: Arc<dyn Pattern>) -> Arc<Self> {
        Arc::new(Self {
            pattern,
            state: RwLock::new(LifecycleState::Created),
            health_cache: RwLock::new(HealthResponse {
                status: HealthStatus::Unhealthy,
                message: "not started".into(),
            }),
            shutting_down: AtomicBool::new(false),
            data_endpoint: RwLock::new(String::new()),
        })
    }

    pub fn metadata(&self) -> PatternMetadata {
        self.pattern.metadata()
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.read().expect("state lock poisoned")
    }

    fn set_state(&self, next: LifecycleState) {
        let mut state = self.state.write().expect("state lock poisoned");
        debug!(from = state.as_str(), to = next.as_str(), "lifecycle transition");
        *state = next;
    }

    /// Guard a transition: the operation is only legal from `expected`.
    fn expect_state(&self, expected: LifecycleState, op: &'static str) -> Result<()> {
        let current = self.state();
        if current != expected {
            return Err(Error::InvalidTransition {
                op,
                state: current.as_str(),
            });
        }
        Ok(())
    }

    /// Initialize the pattern. Legal exactly once, from Created.
    pub async fn initialize(&self, config: HashMap<String, String>) -> Result<PatternMetadata> {
        self.expect_state(LifecycleState::Created, "initialize")?;
        self.pattern.initialize(config).await?;
        self.set_state(LifecycleState::Initialized);
        info!(pattern = %self.pattern.metadata().name, "pattern initialized");
        Ok(self.pattern.metadata())
    }

    /// Start serving. Legal only from Initialized.
    pub async fn start(&self) -> Result<String> {
        self.expect_state(LifecycleState::Initialized, "start")?;
        let endpoint = self.pattern.start().await?;
        *self.data_endpoint.write().expect("endpoint lock poisoned") = endpoint.clone();
        self.set_state(LifecycleState::Running);
        // Prime the cache so the health-check endpoint serves immediately,
        // before the first ticker refresh.
        self.refresh_health().await;
        info!(pattern = %self.pattern.metadata().name, "pattern started");
        Ok(endpoint)
    }

    /// Stop the pattern. Idempotent: already stopped (or never started)
    /// succeeds without touching the pattern.
    pub async fn stop(&self, timeout: Duration) -> Result<()> {
        let was_running = {
            let current = self.state();
            match current {
                LifecycleState::Stopping | LifecycleState::Stopped => return Ok(()),
                LifecycleState::Running => true,
                _ => false,
            }
        };

        // NOT_SERVING must be observable before the drain begins.
        self.shutting_down.store(true, Ordering::Release);
        self.set_state(LifecycleState::Stopping);

        if was_running {
            if let Err(e) = self.pattern.stop(timeout).await {
                warn!(error = %e, "pattern stop reported an error");
            }
        }

        self.set_state(LifecycleState::Stopped);
        info!(pattern = %self.pattern.metadata().name, "pattern stopped");
        Ok(())
    }

    /// Live health, projected through the lifecycle state: anything other
    /// than Running is Unhealthy regardless of what the pattern would say.
    pub async fn health(&self) -> HealthResponse {
        match self.state() {
            LifecycleState::Running => self.pattern.health().await,
            other => HealthResponse {
                status: HealthStatus::Unhealthy,
                message: format!("pattern is {}", other.as_str()),
            },
        }
    }

    /// Whether the synchronized health-check endpoint should answer SERVING.
    pub fn is_serving(&self) -> bool {
        if self.shutting_down.load(Ordering::Acquire) {
            return false;
        }
        if self.state() != LifecycleState::Running {
            return false;
        }
        self.health_cache
            .read()
            .expect("health lock poisoned")
            .status
            .is_serving()
    }

    pub fn data_endpoint(&self) -> String {
        self.data_endpoint
            .read()
            .expect("endpoint lock poisoned")
            .clone()
    }

    pub fn pattern(&self) -> &Arc<dyn Pattern> {
        &self.pattern
    }

    async fn refresh_health(&self) {
        if self.state() != LifecycleState::Running {
            return;
        }
        let health = self.pattern.health().await;
        *self.health_cache.write().expect("health lock poisoned") = health;
    }

    /// Keep the cached serving projection fresh. Runs until aborted.
    pub fn spawn_health_ticker(self: &Arc<Self>) -> tokio::task::AbortHandle {
        let host = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEALTH_REFRESH_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                host.refresh_health().await;
            }
        })
        .abort_handle()
    }
}

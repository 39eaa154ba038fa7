//! Launcher configuration.
//!
//! Modeled as an explicit immutable value passed into the launcher at
//! construction so independently configured launchers can coexist in tests.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::error::{Error, Result};
use crate::types::{parse_memory_limit, IsolationLevel, ResourceLimits};

/// Process-wide launcher configuration, immutable after load.
#[derive(Debug, Clone)]
pub struct LauncherConfig {
    /// Directory scanned for pattern manifests.
    pub patterns_dir: PathBuf,
    /// Isolation level used when a launch request does not override it.
    pub default_isolation: IsolationLevel,
    /// Reconciliation loop period.
    pub resync_interval: Duration,
    /// Base restart backoff delay.
    pub backoff_period: Duration,
    /// Multiplier applied to the backoff per consecutive failure.
    pub backoff_factor: f64,
    /// Upper bound on any single backoff delay.
    pub backoff_ceiling: Duration,
    /// Restarts allowed before an instance becomes permanently Failed.
    pub restart_ceiling: u32,
    /// Consecutive Healthy polls that count as "sustained Healthy" and reset
    /// the backoff state.
    pub healthy_reset_threshold: u32,
    /// How long a freshly spawned process has to answer its first health
    /// probe before Launch fails with a SpawnError.
    pub startup_timeout: Duration,
    /// Graceful-termination wait before escalating to a forceful kill.
    pub stop_grace_period: Duration,
    /// Idle TTL after which Session-isolated instances are collected.
    pub session_idle_ttl: Duration,
    /// CPU limit in fractional cores, applied to every spawn.
    pub cpu_limit: f64,
    /// Memory ceiling in bytes, applied to every spawn.
    pub memory_limit: u64,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            patterns_dir: PathBuf::from("./patterns"),
            default_isolation: IsolationLevel::Namespace,
            resync_interval: Duration::from_secs(30),
            backoff_period: Duration::from_secs(5),
            backoff_factor: 2.0,
            backoff_ceiling: Duration::from_secs(300),
            restart_ceiling: 5,
            healthy_reset_threshold: 3,
            startup_timeout: Duration::from_secs(10),
            stop_grace_period: Duration::from_secs(10),
            session_idle_ttl: Duration::from_secs(15 * 60),
            cpu_limit: 2.0,
            memory_limit: 1024 * 1024 * 1024, // 1Gi
        }
    }
}

impl LauncherConfig {
    /// Resource limits applied to every spawned process.
    pub fn resource_limits(&self) -> ResourceLimits {
        ResourceLimits {
            cpu_fraction: self.cpu_limit,
            memory_bytes: self.memory_limit,
        }
    }

    /// Load configuration from a TOML file, filling unset fields from
    /// defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("read {}: {}", path.display(), e)))?;
        let file: ConfigFile = toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("parse {}: {}", path.display(), e)))?;
        file.into_config()
    }

    /// Validate startup invariants. A missing patterns directory is fatal.
    pub fn validate(&self) -> Result<()> {
        if !self.patterns_dir.is_dir() {
            return Err(Error::PatternsDirNotFound(
                self.patterns_dir.display().to_string(),
            ));
        }
        self.resource_limits().validate()?;
        if self.backoff_factor < 1.0 {
            return Err(Error::Config(format!(
                "backoff factor must be >= 1.0, got {}",
                self.backoff_factor
            )));
        }
        Ok(())
    }
}

/// Parse an isolation level string, warning and falling back to `namespace`
/// on invalid values.
pub fn parse_isolation_or_default(s: &str) -> IsolationLevel {
    match IsolationLevel::parse(s) {
        Some(level) => level,
        None => {
            warn!(value = %s, "invalid isolation level, falling back to namespace");
            IsolationLevel::Namespace
        }
    }
}

/// On-disk representation. All fields optional; durations in seconds.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    pub patterns_dir: Option<PathBuf>,
    pub default_isolation: Option<String>,
    pub resync_interval_secs: Option<u64>,
    pub backoff_period_secs: Option<u64>,
    pub backoff_factor: Option<f64>,
    pub backoff_ceiling_secs: Option<u64>,
    pub restart_ceiling: Option<u32>,
    pub healthy_reset_threshold: Option<u32>,
    pub startup_timeout_secs: Option<u64>,
    pub stop_grace_period_secs: Option<u64>,
    pub session_idle_ttl_secs: Option<u64>,
    pub cpu_limit: Option<f64>,
    pub memory_limit: Option<String>,
}

impl ConfigFile {
    pub fn into_config(self) -> Result<LauncherConfig> {
        let defaults = LauncherConfig::default();

        let memory_limit = match self.memory_limit {
            Some(s) => parse_memory_limit(&s)?,
            None => defaults.memory_limit,
        };

        Ok(LauncherConfig {
            patterns_dir: self.patterns_dir.unwrap_or(defaults.patterns_dir),
            default_isolation: self
                .default_isolation
                .map(|s| parse_isolation_or_default(&s))
                .unwrap_or(defaults.default_isolation),
            resync_interval: self
                .resync_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.resync_interval),
            backoff_period: self
                .backoff_period_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.backoff_period),
            backoff_factor: self.backoff_factor.unwrap_or(defaults.backoff_factor),
            backoff_ceiling: self
                .backoff_ceiling_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.backoff_ceiling),
            restart_ceiling: self.restart_ceiling.unwrap_or(defaults.restart_ceiling),
            healthy_reset_threshold: self
                .healthy_reset_threshold
                .unwrap_or(defaults.healthy_reset_threshold),
            startup_timeout: self
                .startup_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.startup_timeout),
            stop_grace_period: self
                .stop_grace_period_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.stop_grace_period),
            session_idle_ttl: self
                .session_idle_ttl_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.session_idle_ttl),
            cpu_limit: self.cpu_limit.unwrap_or(defaults.cpu_limit),
            memory_limit,
        })
    }
}

//! Core data model: isolation levels and keys, instance state, health
//! status, and resource limits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// How pattern processes are shared across callers, least to most isolated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationLevel {
    /// All callers of a pattern name share one process.
    None,
    /// One process per (namespace, pattern name).
    Namespace,
    /// One process per (namespace, session, pattern name).
    Session,
}

impl IsolationLevel {
    /// Parse an isolation level string; `None` for unrecognized values so the
    /// caller can decide the fallback.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Some(IsolationLevel::None),
            "namespace" => Some(IsolationLevel::Namespace),
            "session" => Some(IsolationLevel::Session),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IsolationLevel::None => "none",
            IsolationLevel::Namespace => "namespace",
            IsolationLevel::Session => "session",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The sharing key a pattern instance is registered under.
///
/// Two launch requests that map to the same key share one process; the key
/// therefore encodes exactly the scope the isolation level demands.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceKey {
    pub name: String,
    pub scope: ScopeToken,
}

/// Scope portion of an [`InstanceKey`], derived from the isolation level.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeToken {
    Shared,
    Namespace(String),
    Session { namespace: String, session: String },
}

impl InstanceKey {
    /// Build the key for a launch request at the given isolation level.
    ///
    /// Namespace isolation requires a namespace; Session additionally
    /// requires a session id.
    pub fn new(
        level: IsolationLevel,
        name: &str,
        namespace: &str,
        session_id: &str,
    ) -> Result<Self> {
        let scope = match level {
            IsolationLevel::None => ScopeToken::Shared,
            IsolationLevel::Namespace => {
                if namespace.is_empty() {
                    return Err(Error::InvalidRequest(
                        "namespace is required for namespace isolation".into(),
                    ));
                }
                ScopeToken::Namespace(namespace.to_string())
            }
            IsolationLevel::Session => {
                if namespace.is_empty() {
                    return Err(Error::InvalidRequest(
                        "namespace is required for session isolation".into(),
                    ));
                }
                if session_id.is_empty() {
                    return Err(Error::InvalidRequest(
                        "session_id is required for session isolation".into(),
                    ));
                }
                ScopeToken::Session {
                    namespace: namespace.to_string(),
                    session: session_id.to_string(),
                }
            }
        };

        Ok(Self {
            name: name.to_string(),
            scope,
        })
    }

    pub fn level(&self) -> IsolationLevel {
        match self.scope {
            ScopeToken::Shared => IsolationLevel::None,
            ScopeToken::Namespace(_) => IsolationLevel::Namespace,
            ScopeToken::Session { .. } => IsolationLevel::Session,
        }
    }

    /// Scope token string, unique per isolation key.
    pub fn scope_token(&self) -> String {
        match &self.scope {
            ScopeToken::Shared => "shared".to_string(),
            ScopeToken::Namespace(ns) => format!("ns:{}", ns),
            ScopeToken::Session { namespace, session } => {
                format!("session:{}:{}", namespace, session)
            }
        }
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scope_token(), self.name)
    }
}

/// Lifecycle state of a tracked pattern instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Starting,
    Running,
    Degraded,
    Unhealthy,
    Stopping,
    /// Restart ceiling exhausted; excluded from auto-restart until an
    /// operator issues Stop then Launch.
    Failed,
}

impl InstanceState {
    /// States in which the instance has a live process (pid is non-nil).
    pub fn has_process(&self) -> bool {
        matches!(
            self,
            InstanceState::Starting | InstanceState::Running | InstanceState::Degraded
        )
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceState::Starting => "starting",
            InstanceState::Running => "running",
            InstanceState::Degraded => "degraded",
            InstanceState::Unhealthy => "unhealthy",
            InstanceState::Stopping => "stopping",
            InstanceState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Self-reported health of a pattern process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Healthy and Degraded both count as serving.
    pub fn is_serving(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }
}

/// CPU/memory limits applied to a pattern process at spawn time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Fractional cores (e.g. 2.0 = two full cores).
    pub cpu_fraction: f64,
    /// Memory ceiling in bytes.
    pub memory_bytes: u64,
}

impl ResourceLimits {
    pub fn validate(&self) -> Result<()> {
        if !self.cpu_fraction.is_finite() || self.cpu_fraction <= 0.0 {
            return Err(Error::InvalidResourceLimits(format!(
                "cpu fraction must be positive, got {}",
                self.cpu_fraction
            )));
        }
        if self.memory_bytes == 0 {
            return Err(Error::InvalidResourceLimits(
                "memory ceiling must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Parse a human-readable byte quantity like `512Mi`, `1Gi`, `2G`, or a
/// plain byte count.
pub fn parse_memory_limit(s: &str) -> Result<u64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::Config("empty memory limit".into()));
    }

    let (digits, suffix) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => s.split_at(idx),
        None => (s, ""),
    };

    let value: u64 = digits
        .parse()
        .map_err(|_| Error::Config(format!("invalid memory limit: {}", s)))?;

    let multiplier: u64 = match suffix.trim() {
        "" | "B" => 1,
        "Ki" => 1024,
        "Mi" => 1024 * 1024,
        "Gi" => 1024 * 1024 * 1024,
        "k" | "K" | "KB" => 1000,
        "M" | "MB" => 1_000_000,
        "G" | "GB" => 1_000_000_000,
        other => {
            return Err(Error::Config(format!(
                "unknown memory unit '{}' in limit: {}",
                other, s
            )))
        }
    };

    value
        .checked_mul(multiplier)
        .ok_or_else(|| Error::Config(format!("memory limit overflows: {}", s)))
}

/// Filter for `List`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListFilter {
    pub name: Option<String>,
    pub namespace: Option<String>,
    pub state: Option<InstanceState>,
}

impl ListFilter {
    pub fn matches(&self, summary: &InstanceSummary) -> bool {
        if let Some(name) = &self.name {
            if &summary.name != name {
                return false;
            }
        }
        if let Some(ns) = &self.namespace {
            if &summary.namespace != ns {
                return false;
            }
        }
        if let Some(state) = self.state {
            if summary.state != state {
                return false;
            }
        }
        true
    }
}

/// Point-in-time view of a tracked instance, as returned by List/Health.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSummary {
    pub id: String,
    pub name: String,
    pub namespace: String,
    pub session_id: String,
    pub isolation: IsolationLevel,
    pub state: InstanceState,
    pub pid: Option<u32>,
    pub address: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_health_check: Option<DateTime<Utc>>,
    pub restart_count: u32,
    pub uptime_seconds: u64,
    pub last_error: Option<String>,
}

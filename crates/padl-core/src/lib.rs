//! padl-core - Core library for the Padl pattern launcher
//!
//! This crate provides shared functionality between the launcher daemon,
//! the pattern SDK, and the conformance harness:
//!
//! - **config**: Launcher configuration
//! - **types**: Isolation levels/keys, instance state, resource limits
//! - **wire**: JSON shapes shared across the control and data planes
//! - **manifest**: Pattern manifests and directory discovery
//! - **isolation**: Execution-context construction
//! - **supervisor**: Process spawning and signal handling
//! - **backoff**: Restart backoff schedule
//! - **launcher**: Instance registry and reconciliation loop
//! - **metrics**: Launcher counters with Prometheus exposition

pub mod backoff;
pub mod config;
pub mod error;
pub mod isolation;
pub mod launcher;
pub mod manifest;
pub mod metrics;
pub mod supervisor;
pub mod types;
pub mod wire;

// Re-export commonly used types
pub use config::LauncherConfig;
pub use error::{Error, Result};
pub use launcher::{LaunchRequest, Launcher, LauncherHealth};
pub use manifest::PatternRegistry;
pub use supervisor::{OsSupervisor, ProcessHandle, Supervisor};
pub use types::{InstanceKey, InstanceState, IsolationLevel};

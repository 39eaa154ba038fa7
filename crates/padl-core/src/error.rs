//! Error types for padl-core.

use std::time::Duration;
use thiserror::Error;

/// Result type alias using padl-core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for launcher operations
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors - fatal at startup
    #[error("Patterns directory not found: {0}")]
    PatternsDirNotFound(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid manifest for pattern {name}: {reason}")]
    Manifest { name: String, reason: String },

    // Launch request validation
    #[error("Invalid launch request: {0}")]
    InvalidRequest(String),

    // Spawn errors - returned synchronously from launch, no instance registered
    #[error("Pattern not found: {0}")]
    PatternNotFound(String),

    #[error("Pattern binary missing: {0}")]
    BinaryMissing(String),

    #[error("Invalid resource limits: {0}")]
    InvalidResourceLimits(String),

    #[error("Port allocation failed: {0}")]
    PortAllocation(String),

    #[error("Process failed to spawn: {0}")]
    Spawn(String),

    #[error("Pattern did not answer its first health probe within {0:?}")]
    StartupTimeout(Duration),

    // Runtime failures
    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    #[error("Instance permanently failed after {restarts} restarts (stop it before relaunching): {last_error}")]
    PermanentlyFailed { restarts: u32, last_error: String },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for errors in the SpawnError taxonomy: launch failed before an
    /// instance was registered.
    pub fn is_spawn_error(&self) -> bool {
        matches!(
            self,
            Error::PatternNotFound(_)
                | Error::BinaryMissing(_)
                | Error::InvalidResourceLimits(_)
                | Error::PortAllocation(_)
                | Error::Spawn(_)
                | Error::StartupTimeout(_)
        )
    }
}

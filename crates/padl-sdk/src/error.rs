//! Error types for padl-sdk.

use thiserror::Error;

/// Result type alias using padl-sdk Error
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A lifecycle operation arrived in a state that does not permit it.
    #[error("cannot {op} while {state}")]
    InvalidTransition {
        op: &'static str,
        state: &'static str,
    },

    #[error("capability not supported: {0}")]
    UnsupportedCapability(String),

    /// Failure inside the pattern implementation itself.
    #[error("pattern error: {0}")]
    Pattern(String),

    #[error("control-plane server error: {0}")]
    Server(String),
}

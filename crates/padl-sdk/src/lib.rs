//! padl-sdk - Pattern SDK for the Padl launcher
//!
//! Everything a pattern process needs to participate in the platform:
//!
//! - **lifecycle**: the `Pattern` trait and the lifecycle state machine
//! - **server**: the control-plane HTTP server
//! - **capability**: key-value capability interfaces
//! - **memstore**: the in-memory reference pattern

pub mod capability;
pub mod error;
pub mod lifecycle;
pub mod memstore;
pub mod server;

// Re-export commonly used types
pub use capability::{KeyValueBasic, KeyValueScan, KeyValueTtl};
pub use error::{Error, Result};
pub use lifecycle::{LifecycleHost, LifecycleState, Pattern};
pub use memstore::MemStore;
pub use server::{serve, ControlPlaneServer};

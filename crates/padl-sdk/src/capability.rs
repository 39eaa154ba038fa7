//! Capability interfaces a pattern may implement.
//!
//! Capabilities are the unit of conformance: a pattern advertises an ordered
//! list of capability names, and the harness runs the matching suite against
//! each. The traits here are the server-side contracts those suites exercise.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Basic key-value operations: set, get, delete, exists.
///
/// `set` overwrites unconditionally; `delete` reports whether the key was
/// present. The optional TTL is honored only by patterns that also advertise
/// the TTL capability.
#[async_trait]
pub trait KeyValueBasic: Send + Sync {
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn delete(&self, key: &str) -> Result<bool>;
    async fn exists(&self, key: &str) -> Result<bool>;
}

/// Marker for patterns whose `set` honors the TTL argument: an entry past
/// its TTL behaves exactly like a missing key.
#[async_trait]
pub trait KeyValueTtl: KeyValueBasic {}

/// Prefix scans over the keyspace.
#[async_trait]
pub trait KeyValueScan: Send + Sync {
    /// Keys starting with `prefix`, lexicographically ordered, truncated to
    /// `limit` when given. An empty prefix matches every key.
    async fn scan(&self, prefix: &str, limit: Option<usize>) -> Result<Vec<String>>;
}

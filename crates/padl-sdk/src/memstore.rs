//! In-memory key-value pattern.
//!
//! The reference pattern used by the conformance harness and the launcher's
//! integration tests. Implements the full key-value capability set with
//! lazy TTL expiry: expired entries are dropped when touched, so a key past
//! its TTL is indistinguishable from a missing one.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::debug;

use padl_core::types::HealthStatus;
use padl_core::wire::{self, HealthResponse, PatternMetadata};

use crate::capability::{KeyValueBasic, KeyValueScan, KeyValueTtl};
use crate::error::Result;
use crate::lifecycle::Pattern;

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.map(|at| Instant::now() >= at).unwrap_or(false)
    }
}

/// An in-memory store, one keyspace per process.
#[derive(Default)]
pub struct MemStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<R>(&self, f: impl FnOnce(&mut HashMap<String, Entry>) -> R) -> R {
        let mut entries = self.entries.write().expect("entries lock poisoned");
        f(&mut entries)
    }

    /// Drop `key` if its TTL has passed; returns whether a live entry remains.
    fn prune(entries: &mut HashMap<String, Entry>, key: &str) -> bool {
        match entries.get(key) {
            Some(entry) if entry.expired() => {
                entries.remove(key);
                false
            }
            Some(_) => true,
            None => false,
        }
    }
}

#[async_trait]
impl Pattern for MemStore {
    fn metadata(&self) -> PatternMetadata {
        PatternMetadata {
            name: "memstore".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            capabilities: vec![
                wire::CAP_KEYVALUE_BASIC.into(),
                wire::CAP_KEYVALUE_TTL.into(),
                wire::CAP_KEYVALUE_SCAN.into(),
            ],
        }
    }

    async fn initialize(&self, config: HashMap<String, String>) -> Result<()> {
        debug!(config_keys = config.len(), "memstore initialized");
        Ok(())
    }

    async fn start(&self) -> Result<String> {
        // Data traffic shares the control port.
        Ok(String::new())
    }

    async fn stop(&self, _timeout: Duration) -> Result<()> {
        self.with_entries(|entries| entries.clear());
        Ok(())
    }

    async fn health(&self) -> HealthResponse {
        HealthResponse {
            status: HealthStatus::Healthy,
            message: String::new(),
        }
    }

    fn keyvalue_basic(&self) -> Option<&dyn KeyValueBasic> {
        Some(self)
    }

    fn keyvalue_ttl(&self) -> Option<&dyn KeyValueTtl> {
        Some(self)
    }

    fn keyvalue_scan(&self) -> Option<&dyn KeyValueScan> {
        Some(self)
    }
}

#[async_trait]
impl KeyValueBasic for MemStore {
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.with_entries(|entries| {
            entries.insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    expires_at: ttl.map(|t| Instant::now() + t),
                },
            );
        });
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.with_entries(|entries| {
            if !Self::prune(entries, key) {
                return None;
            }
            entries.get(key).map(|e| e.value.clone())
        }))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.with_entries(|entries| {
            if !Self::prune(entries, key) {
                return false;
            }
            entries.remove(key).is_some()
        }))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.with_entries(|entries| Self::prune(entries, key)))
    }
}

#[async_trait]
impl KeyValueTtl for MemStore {}

#[async_trait]
impl KeyValueScan for MemStore {
    async fn scan(&self, prefix: &str, limit: Option<usize>) -> Result<Vec<String>> {
        Ok(self.with_entries(|entries| {
            let mut keys: Vec<String> = entries
                .iter()
                .filter(|(k, e)| k.starts_with(prefix) && !e.expired())
                .map(|(k, _)| k.clone())
                .collect();
            keys.sort();
            if let Some(limit) = limit {
                keys.truncate(limit);
            }
            keys
        }))
    }
}

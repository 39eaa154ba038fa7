//! Wire types shared between the launcher, the pattern control plane, and
//! the conformance harness.
//!
//! All three planes speak JSON over HTTP. The shapes here are the whole
//! contract: the harness and launcher never see anything but these.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::HealthStatus;

// Capability interface names. Ordered lists of these are what patterns
// declare and the harness discovers.
pub const CAP_KEYVALUE_BASIC: &str = "keyvalue_basic";
pub const CAP_KEYVALUE_TTL: &str = "keyvalue_ttl";
pub const CAP_KEYVALUE_SCAN: &str = "keyvalue_scan";

// Control-plane endpoint paths.
pub const PATH_INITIALIZE: &str = "/lifecycle/initialize";
pub const PATH_START: &str = "/lifecycle/start";
pub const PATH_STOP: &str = "/lifecycle/stop";
pub const PATH_HEALTH: &str = "/lifecycle/health";
pub const PATH_HEALTHZ: &str = "/healthz";
pub const PATH_CAPABILITIES: &str = "/capabilities";

// Health-check endpoint bodies, kept from the standard health protocol.
pub const SERVING: &str = "SERVING";
pub const NOT_SERVING: &str = "NOT_SERVING";

// Environment variables the launcher sets for spawned pattern processes.
pub const ENV_PATTERN_NAME: &str = "PADL_PATTERN_NAME";
pub const ENV_NAMESPACE: &str = "PADL_NAMESPACE";
pub const ENV_SESSION_ID: &str = "PADL_SESSION_ID";
pub const ENV_SCOPE: &str = "PADL_SCOPE";
pub const ENV_CONTROL_PORT: &str = "PADL_CONTROL_PORT";
pub const ENV_DATA_PORT: &str = "PADL_DATA_PORT";
pub const ENV_CPU_LIMIT: &str = "PADL_CPU_LIMIT";
pub const ENV_MEMORY_LIMIT: &str = "PADL_MEMORY_LIMIT";

/// Metadata a pattern reports about itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternMetadata {
    pub name: String,
    pub version: String,
    /// Ordered capability-interface names.
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeRequest {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub config: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResponse {
    pub success: bool,
    #[serde(default)]
    pub error: String,
    pub metadata: Option<PatternMetadata>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartRequest {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartResponse {
    pub success: bool,
    #[serde(default)]
    pub error: String,
    /// Where data-plane traffic is served, if separate from control.
    #[serde(default)]
    pub data_endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopRequest {
    #[serde(default)]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopResponse {
    pub success: bool,
    #[serde(default)]
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    #[serde(default)]
    pub message: String,
}

/// Response of the dedicated capability-introspection call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilitiesResponse {
    pub capabilities: Vec<String>,
}

// Key-value data plane.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvSetRequest {
    pub key: String,
    pub value: String,
    /// Time-to-live in milliseconds; absent or zero means no expiry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvSetResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvGetRequest {
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvGetResponse {
    pub found: bool,
    pub value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvDeleteRequest {
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvDeleteResponse {
    pub deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvExistsRequest {
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvExistsResponse {
    pub exists: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvScanRequest {
    #[serde(default)]
    pub prefix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvScanResponse {
    /// Matching keys in lexicographic order.
    pub keys: Vec<String>,
}

/// Generic error body for data-plane failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

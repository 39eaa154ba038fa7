//! padl-harness - Conformance harness for pattern control planes
//!
//! Connects to a running pattern, discovers its advertised capabilities,
//! and runs the matching interface suite against each. Capabilities without
//! a registered suite are reported as untested rather than failed, so new
//! capability names can roll out ahead of their suites.

pub mod suites;

use anyhow::{bail, Context};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use padl_core::wire::{
    self, CapabilitiesResponse, KvDeleteRequest, KvDeleteResponse, KvExistsRequest,
    KvExistsResponse, KvGetRequest, KvGetResponse, KvScanRequest, KvScanResponse, KvSetRequest,
    KvSetResponse,
};

/// Per-request timeout for everything the harness sends.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection to one pattern's control plane.
pub struct Connection {
    client: reqwest::Client,
    base: String,
    capabilities: OnceCell<Vec<String>>,
}

impl Connection {
    /// `endpoint` is the control-plane address, e.g. `http://127.0.0.1:5310`.
    pub fn new(endpoint: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: endpoint.trim_end_matches('/').to_string(),
            capabilities: OnceCell::new(),
        }
    }

    async fn post<Req: Serialize, Resp: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        req: &Req,
    ) -> anyhow::Result<Resp> {
        let url = format!("{}{}", self.base, path);
        let resp = self
            .client
            .post(&url)
            .timeout(REQUEST_TIMEOUT)
            .json(req)
            .send()
            .await
            .with_context(|| format!("POST {}", url))?;
        if !resp.status().is_success() {
            bail!("POST {} returned {}", url, resp.status());
        }
        resp.json().await.with_context(|| format!("decode {}", url))
    }

    /// Discover the pattern's advertised capabilities, in declared order.
    /// The result is fetched once and cached for the connection's lifetime.
    pub async fn capabilities(&self) -> anyhow::Result<&[String]> {
        let caps = self
            .capabilities
            .get_or_try_init(|| async {
                let url = format!("{}{}", self.base, wire::PATH_CAPABILITIES);
                let resp: CapabilitiesResponse = self
                    .client
                    .get(&url)
                    .timeout(REQUEST_TIMEOUT)
                    .send()
                    .await
                    .with_context(|| format!("GET {}", url))?
                    .json()
                    .await
                    .with_context(|| format!("decode {}", url))?;
                anyhow::Ok(resp.capabilities)
            })
            .await?;
        Ok(caps)
    }

    pub async fn set(&self, key: &str, value: &str, ttl_ms: Option<u64>) -> anyhow::Result<()> {
        let resp: KvSetResponse = self
            .post(
                "/kv/set",
                &KvSetRequest {
                    key: key.into(),
                    value: value.into(),
                    ttl_ms,
                },
            )
            .await?;
        if !resp.success {
            bail!("set {} was not acknowledged", key);
        }
        Ok(())
    }

    pub async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let resp: KvGetResponse = self.post("/kv/get", &KvGetRequest { key: key.into() }).await?;
        Ok(if resp.found { resp.value } else { None })
    }

    pub async fn delete(&self, key: &str) -> anyhow::Result<bool> {
        let resp: KvDeleteResponse = self
            .post("/kv/delete", &KvDeleteRequest { key: key.into() })
            .await?;
        Ok(resp.deleted)
    }

    pub async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        let resp: KvExistsResponse = self
            .post("/kv/exists", &KvExistsRequest { key: key.into() })
            .await?;
        Ok(resp.exists)
    }

    pub async fn scan(&self, prefix: &str, limit: Option<usize>) -> anyhow::Result<Vec<String>> {
        let resp: KvScanResponse = self
            .post(
                "/kv/scan",
                &KvScanRequest {
                    prefix: prefix.into(),
                    limit,
                },
            )
            .await?;
        Ok(resp.keys)
    }
}

/// Result of one sub-test.
#[derive(Debug, Clone, Serialize)]
pub struct SubTestResult {
    pub name: &'static str,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Outcome for one advertised capability.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum CapabilityOutcome {
    Tested { results: Vec<SubTestResult> },
    Untested { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct CapabilityReport {
    pub capability: String,
    #[serde(flatten)]
    pub outcome: CapabilityOutcome,
}

impl CapabilityReport {
    pub fn has_failures(&self) -> bool {
        match &self.outcome {
            CapabilityOutcome::Tested { results } => results.iter().any(|r| !r.passed),
            CapabilityOutcome::Untested { .. } => false,
        }
    }
}

/// Full harness run against one pattern.
#[derive(Debug, Clone, Serialize)]
pub struct HarnessReport {
    pub endpoint: String,
    pub capabilities: Vec<CapabilityReport>,
}

impl HarnessReport {
    pub fn has_failures(&self) -> bool {
        self.capabilities.iter().any(|c| c.has_failures())
    }
}

/// Discover capabilities and run the matching suite for each, in the order
/// the pattern declared them.
pub async fn run(conn: &Connection) -> anyhow::Result<HarnessReport> {
    let capabilities = conn.capabilities().await?.to_vec();
    info!(count = capabilities.len(), "discovered capabilities");

    let mut reports = Vec::with_capacity(capabilities.len());
    for capability in capabilities {
        let outcome = match suites::suite_for(&capability) {
            Some(suite) => {
                let mut results = Vec::with_capacity(suite.len());
                for (name, test) in suite {
                    let result = match test(conn).await {
                        Ok(()) => SubTestResult {
                            name,
                            passed: true,
                            detail: None,
                        },
                        Err(e) => {
                            warn!(capability = %capability, test = name, error = %e, "sub-test failed");
                            SubTestResult {
                                name,
                                passed: false,
                                detail: Some(e.to_string()),
                            }
                        }
                    };
                    results.push(result);
                }
                CapabilityOutcome::Tested { results }
            }
            None => {
                warn!(capability = %capability, "no suite registered");
                CapabilityOutcome::Untested {
                    reason: "no suite registered for this capability".into(),
                }
            }
        };
        reports.push(CapabilityReport {
            capability,
            outcome,
        });
    }

    Ok(HarnessReport {
        endpoint: conn.base.clone(),
        capabilities: reports,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_failure_detection() {
        let report = HarnessReport {
            endpoint: "http://127.0.0.1:1".into(),
            capabilities: vec![
                CapabilityReport {
                    capability: "keyvalue_basic".into(),
                    outcome: CapabilityOutcome::Tested {
                        results: vec![SubTestResult {
                            name: "set_and_get",
                            passed: true,
                            detail: None,
                        }],
                    },
                },
                CapabilityReport {
                    capability: "mystery".into(),
                    outcome: CapabilityOutcome::Untested {
                        reason: "no suite registered for this capability".into(),
                    },
                },
            ],
        };
        // Untested never counts as failure.
        assert!(!report.has_failures());

        let mut failing = report.clone();
        failing.capabilities.push(CapabilityReport {
            capability: "keyvalue_ttl".into(),
            outcome: CapabilityOutcome::Tested {
                results: vec![SubTestResult {
                    name: "entry_expires",
                    passed: false,
                    detail: Some("still present".into()),
                }],
            },
        });
        assert!(failing.has_failures());
    }
}

//! Control-plane HTTP server hosted inside every pattern process.
//!
//! Exposes the lifecycle contract, capability introspection, the
//! synchronized health-check endpoint, and the key-value data plane for
//! patterns that implement it. The launcher and the conformance harness are
//! the only clients.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use padl_core::wire::{
    self, CapabilitiesResponse, ErrorResponse, InitializeRequest, InitializeResponse,
    KvDeleteRequest, KvDeleteResponse, KvExistsRequest, KvExistsResponse, KvGetRequest,
    KvGetResponse, KvScanRequest, KvScanResponse, KvSetRequest, KvSetResponse, StartResponse,
    StopRequest, StopResponse,
};

use crate::error::{Error, Result};
use crate::lifecycle::{LifecycleHost, LifecycleState};

/// Fallback drain window when a stop request carries no timeout.
const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

type KvError = (StatusCode, Json<ErrorResponse>);

/// A running control-plane server.
#[derive(Debug)]
pub struct ControlPlaneServer {
    pub addr: SocketAddr,
    server: tokio::task::JoinHandle<()>,
    health_ticker: tokio::task::AbortHandle,
}

impl ControlPlaneServer {
    pub fn shutdown(&self) {
        self.health_ticker.abort();
        self.server.abort();
    }
}

impl Drop for ControlPlaneServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Bind `127.0.0.1:port` (0 for an OS-assigned port) and serve the control
/// plane until shut down.
pub async fn serve(host: Arc<LifecycleHost>, port: u16) -> Result<ControlPlaneServer> {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .map_err(|e| Error::Server(format!("bind port {}: {}", port, e)))?;
    let addr = listener
        .local_addr()
        .map_err(|e| Error::Server(e.to_string()))?;

    let health_ticker = host.spawn_health_ticker();
    let app = router(host);

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "control-plane server exited");
        }
    });

    info!(addr = %addr, "control plane listening");
    Ok(ControlPlaneServer {
        addr,
        server,
        health_ticker,
    })
}

/// Build the control-plane router.
pub fn router(host: Arc<LifecycleHost>) -> Router {
    Router::new()
        .route(wire::PATH_INITIALIZE, post(initialize))
        .route(wire::PATH_START, post(start))
        .route(wire::PATH_STOP, post(stop))
        .route(wire::PATH_HEALTH, get(health))
        .route(wire::PATH_HEALTHZ, get(healthz))
        .route(wire::PATH_CAPABILITIES, get(capabilities))
        .route("/kv/set", post(kv_set))
        .route("/kv/get", post(kv_get))
        .route("/kv/delete", post(kv_delete))
        .route("/kv/exists", post(kv_exists))
        .route("/kv/scan", post(kv_scan))
        .with_state(host)
}

async fn initialize(
    State(host): State<Arc<LifecycleHost>>,
    Json(req): Json<InitializeRequest>,
) -> Json<InitializeResponse> {
    match host.initialize(req.config).await {
        Ok(metadata) => Json(InitializeResponse {
            success: true,
            error: String::new(),
            metadata: Some(metadata),
        }),
        Err(e) => Json(InitializeResponse {
            success: false,
            error: e.to_string(),
            metadata: None,
        }),
    }
}

async fn start(State(host): State<Arc<LifecycleHost>>) -> Json<StartResponse> {
    match host.start().await {
        Ok(data_endpoint) => Json(StartResponse {
            success: true,
            error: String::new(),
            data_endpoint,
        }),
        Err(e) => Json(StartResponse {
            success: false,
            error: e.to_string(),
            data_endpoint: String::new(),
        }),
    }
}

async fn stop(
    State(host): State<Arc<LifecycleHost>>,
    Json(req): Json<StopRequest>,
) -> Json<StopResponse> {
    let timeout = if req.timeout_seconds == 0 {
        DEFAULT_STOP_TIMEOUT
    } else {
        Duration::from_secs(req.timeout_seconds)
    };
    match host.stop(timeout).await {
        Ok(()) => Json(StopResponse {
            success: true,
            error: String::new(),
        }),
        Err(e) => Json(StopResponse {
            success: false,
            error: e.to_string(),
        }),
    }
}

async fn health(State(host): State<Arc<LifecycleHost>>) -> Response {
    Json(host.health().await).into_response()
}

#[derive(Serialize)]
struct HealthzBody {
    status: &'static str,
}

/// Synchronized health check: SERVING only while Running and not draining.
async fn healthz(State(host): State<Arc<LifecycleHost>>) -> Response {
    if host.is_serving() {
        (StatusCode::OK, Json(HealthzBody { status: wire::SERVING })).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthzBody {
                status: wire::NOT_SERVING,
            }),
        )
            .into_response()
    }
}

async fn capabilities(State(host): State<Arc<LifecycleHost>>) -> Json<CapabilitiesResponse> {
    Json(CapabilitiesResponse {
        capabilities: host.metadata().capabilities,
    })
}

// ── key-value data plane ───────────────────────────────────────────────

fn kv_unavailable(msg: &str) -> KvError {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorResponse { error: msg.into() }),
    )
}

fn kv_unsupported(cap: &str) -> KvError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: Error::UnsupportedCapability(cap.to_string()).to_string(),
        }),
    )
}

fn kv_failure(e: Error) -> KvError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
}

fn require_running(host: &LifecycleHost) -> std::result::Result<(), KvError> {
    if host.state() != LifecycleState::Running {
        return Err(kv_unavailable("pattern is not running"));
    }
    Ok(())
}

async fn kv_set(
    State(host): State<Arc<LifecycleHost>>,
    Json(req): Json<KvSetRequest>,
) -> std::result::Result<Json<KvSetResponse>, KvError> {
    require_running(&host)?;
    let kv = host
        .pattern()
        .keyvalue_basic()
        .ok_or_else(|| kv_unsupported(wire::CAP_KEYVALUE_BASIC))?;
    let ttl = req.ttl_ms.filter(|ms| *ms > 0).map(Duration::from_millis);
    kv.set(&req.key, &req.value, ttl).await.map_err(kv_failure)?;
    Ok(Json(KvSetResponse { success: true }))
}

async fn kv_get(
    State(host): State<Arc<LifecycleHost>>,
    Json(req): Json<KvGetRequest>,
) -> std::result::Result<Json<KvGetResponse>, KvError> {
    require_running(&host)?;
    let kv = host
        .pattern()
        .keyvalue_basic()
        .ok_or_else(|| kv_unsupported(wire::CAP_KEYVALUE_BASIC))?;
    let value = kv.get(&req.key).await.map_err(kv_failure)?;
    Ok(Json(KvGetResponse {
        found: value.is_some(),
        value,
    }))
}

async fn kv_delete(
    State(host): State<Arc<LifecycleHost>>,
    Json(req): Json<KvDeleteRequest>,
) -> std::result::Result<Json<KvDeleteResponse>, KvError> {
    require_running(&host)?;
    let kv = host
        .pattern()
        .keyvalue_basic()
        .ok_or_else(|| kv_unsupported(wire::CAP_KEYVALUE_BASIC))?;
    let deleted = kv.delete(&req.key).await.map_err(kv_failure)?;
    Ok(Json(KvDeleteResponse { deleted }))
}

async fn kv_exists(
    State(host): State<Arc<LifecycleHost>>,
    Json(req): Json<KvExistsRequest>,
) -> std::result::Result<Json<KvExistsResponse>, KvError> {
    require_running(&host)?;
    let kv = host
        .pattern()
        .keyvalue_basic()
        .ok_or_else(|| kv_unsupported(wire::CAP_KEYVALUE_BASIC))?;
    let exists = kv.exists(&req.key).await.map_err(kv_failure)?;
    Ok(Json(KvExistsResponse { exists }))
}

async fn kv_scan(
    State(host): State<Arc<LifecycleHost>>,
    Json(req): Json<KvScanRequest>,
) -> std::result::Result<Json<KvScanResponse>, KvError> {
    require_running(&host)?;
    let kv = host
        .pattern()
        .keyvalue_scan()
        .ok_or_else(|| kv_unsupported(wire::CAP_KEYVALUE_SCAN))?;
    let keys = kv.scan(&req.prefix, req.limit).await.map_err(kv_failure)?;
    Ok(Json(KvScanResponse { keys }))
}

//! Daemon health and readiness endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

use crate::state::AppState;

#[derive(Serialize)]
pub struct DaemonHealth {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub tracked_patterns: usize,
    pub running_patterns: usize,
    pub failed_patterns: usize,
}

/// Health check endpoint. 503 once any tracked pattern is unhealthy or
/// stale so load balancers see the degradation.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Response {
    let health = state.launcher.health(false);
    let (code, status) = if health.healthy {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        code,
        Json(DaemonHealth {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: health.uptime_seconds,
            tracked_patterns: health.total_processes,
            running_patterns: health.running_processes,
            failed_patterns: health.failed_processes,
        }),
    )
        .into_response()
}

/// Ready once the first reconciliation pass has completed.
pub async fn readiness(State(state): State<Arc<AppState>>) -> Response {
    if state.launcher.ready() {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "reconciling").into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use padl_core::{Launcher, LauncherConfig, OsSupervisor, PatternRegistry};

    #[tokio::test]
    async fn test_health_reports_process_counts() {
        let dir = tempfile::tempdir().unwrap();
        let config = LauncherConfig {
            patterns_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let registry = Arc::new(PatternRegistry::new(dir.path()));
        registry.discover().unwrap();
        let launcher = Launcher::new(config, registry, Arc::new(OsSupervisor::new()));
        let state = AppState::new(launcher);

        let resp = health_check(State(state)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["status"], "healthy");
        assert_eq!(v["tracked_patterns"], 0);
        assert_eq!(v["running_patterns"], 0);
        assert_eq!(v["failed_patterns"], 0);
    }
}

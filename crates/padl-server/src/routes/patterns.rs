//! Pattern instance endpoints: launch, stop, list, aggregate health.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;

use padl_core::types::{InstanceSummary, ListFilter};
use padl_core::wire::ErrorResponse;
use padl_core::{Error, LaunchRequest, LauncherHealth};

use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/patterns/launch", post(launch))
        .route("/patterns/{id}/stop", post(stop))
        .route("/patterns", get(list))
        .route("/patterns/health", get(health))
}

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Map launcher errors onto HTTP statuses: caller mistakes are 4xx, spawn
/// failures are 502 (the pattern process is the upstream that failed).
fn map_error(e: Error) -> ApiError {
    let status = match &e {
        Error::PatternNotFound(_) | Error::InstanceNotFound(_) => StatusCode::NOT_FOUND,
        Error::InvalidRequest(_) | Error::InvalidResourceLimits(_) => StatusCode::BAD_REQUEST,
        Error::PermanentlyFailed { .. } => StatusCode::CONFLICT,
        Error::BinaryMissing(_)
        | Error::Spawn(_)
        | Error::StartupTimeout(_)
        | Error::PortAllocation(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
}

async fn launch(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LaunchRequest>,
) -> Result<Json<InstanceSummary>, ApiError> {
    let summary = state.launcher.launch(req).await.map_err(map_error)?;
    Ok(Json(summary))
}

async fn stop(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.launcher.stop(&id).await.map_err(map_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ListFilter>,
) -> Json<Vec<InstanceSummary>> {
    Json(state.launcher.list(&filter))
}

#[derive(Deserialize)]
struct HealthQuery {
    #[serde(default)]
    include_processes: bool,
}

async fn health(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HealthQuery>,
) -> Json<LauncherHealth> {
    Json(state.launcher.health(query.include_processes))
}

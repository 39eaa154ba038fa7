//! Prometheus metrics endpoint.

use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

use padl_core::types::ListFilter;

use crate::state::AppState;

pub async fn render(State(state): State<Arc<AppState>>) -> Response {
    let running = state.launcher.list(&ListFilter::default()).len();
    let uptime = state.launcher.uptime().as_secs();
    let body = state.launcher.metrics().render_prometheus(running, uptime);

    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response()
}

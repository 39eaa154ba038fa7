//! API route modules.

pub mod health;
pub mod metrics;
pub mod patterns;

use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Create the main router with all routes
pub fn create_router(state: Arc<AppState>) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness))
        .route("/metrics", get(metrics::render));

    Router::new()
        .merge(public_routes)
        .nest("/api", patterns::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

//! Readiness and metrics endpoints for the farm store.
//!
//! Liveness (`/health`) is the shared handler from `farmstand-web`.

use super::state::AppState;
use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use farmstand_runtime::HealthReport;
use farmstand_web::handlers::readiness_response;

/// Readiness check endpoint.
///
/// Reports the checkout store's health: unhealthy while shutting down or
/// when the dead letter queue is full, degraded above half capacity.
///
/// # Example
///
/// ```bash
/// curl http://localhost:3000/ready
/// # {"status":"healthy","checks":[{"component":"store",...}]}
/// ```
pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    readiness_response(vec![state.store.health()])
}

/// Prometheus metrics endpoint.
///
/// Returns 404 when this process did not install the recorder.
pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.as_ref().and_then(|m| m.render()) {
        Some(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

//! Health check endpoints.
//!
//! These endpoints are used by load balancers and monitoring systems
//! to verify service health.

use axum::{Json, http::StatusCode};
use farmstand_runtime::{HealthCheck, HealthReport, HealthStatus};
use serde::Serialize;

/// Liveness body.
#[derive(Debug, Serialize)]
pub struct Liveness {
    /// Always `"ok"` while the process serves requests
    pub status: &'static str,
}

/// Simple health check endpoint (for basic liveness).
///
/// Returns 200 OK to indicate the service is running. Dependencies are
/// not checked.
///
/// ```text
/// GET /health
/// {"status": "ok"}
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, Json<Liveness>) {
    (StatusCode::OK, Json(Liveness { status: "ok" }))
}

/// Build a readiness response from component checks.
///
/// # Status Codes
///
/// - 200 OK: Healthy or Degraded
/// - 503 Service Unavailable: any component Unhealthy
#[must_use]
pub fn readiness_response(checks: Vec<HealthCheck>) -> (StatusCode, Json<HealthReport>) {
    let report = HealthReport::new(checks);

    let status = match report.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    if status != StatusCode::OK {
        tracing::warn!(status = %report.status, "Readiness check failed");
    }

    (status, Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simple_health_check() {
        let (status, Json(body)) = health_check().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "ok");
    }

    #[test]
    fn test_degraded_is_still_ready() {
        let (status, Json(report)) = readiness_response(vec![
            HealthCheck::healthy("store"),
            HealthCheck::degraded("store", "Dead letter queue is 60% full"),
        ]);

        assert_eq!(status, StatusCode::OK);
        assert_eq!(report.status, HealthStatus::Degraded);
    }

    #[test]
    fn test_unhealthy_component_fails_readiness() {
        let (status, Json(report)) = readiness_response(vec![
            HealthCheck::healthy("store"),
            HealthCheck::unhealthy("database", "connection refused"),
        ]);

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(report.checks.len(), 2);
    }
}

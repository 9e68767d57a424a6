//! HTTP error type.
//!
//! Every handler in the store returns `Result<_, AppError>`. The response
//! body is always `{"code": "...", "message": "..."}`: `code` is stable and
//! meant for clients to branch on (`OUT_OF_STOCK`, `INVALID_SIGNATURE`, ...),
//! `message` is for people. Server-side causes attached with
//! [`AppError::with_source`] are logged for 5xx responses and never sent.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use farmstand_runtime::StoreError;
use serde::Serialize;
use std::fmt;

/// Error returned by HTTP handlers.
///
/// ```ignore
/// let order = state
///     .store
///     .state(|s| s.order(&id).cloned())
///     .await
///     .ok_or_else(|| AppError::not_found("Order", id))?;
/// ```
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    code: String,
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Error with an explicit status, message and code.
    #[must_use]
    pub const fn new(status: StatusCode, message: String, code: String) -> Self {
        Self {
            status,
            message,
            code,
            source: None,
        }
    }

    fn with_status(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self::new(status, message.into(), code.to_string())
    }

    /// Replace the default code of a constructor.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    /// Attach the underlying cause (logged, not returned).
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// HTTP status.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Client-facing error code.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Client-facing message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 400 `BAD_REQUEST`.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    /// 401 `UNAUTHORIZED`.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    /// 403 `FORBIDDEN`.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::FORBIDDEN, "FORBIDDEN", message)
    }

    /// 404 `NOT_FOUND`, worded as "`resource` with id `id` not found".
    #[must_use]
    pub fn not_found(resource: impl fmt::Display, id: impl fmt::Display) -> Self {
        Self::with_status(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("{resource} with id {id} not found"),
        )
    }

    /// 409 `CONFLICT`.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::CONFLICT, "CONFLICT", message)
    }

    /// 422 `VALIDATION_ERROR`.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR", message)
    }

    /// 502 `BAD_GATEWAY`: an upstream provider (Stripe, Google) failed.
    #[must_use]
    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::BAD_GATEWAY, "BAD_GATEWAY", message)
    }

    /// 504 `TIMEOUT`: the store did not reach the awaited outcome in time.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::GATEWAY_TIMEOUT, "TIMEOUT", message)
    }

    /// 500 `INTERNAL_SERVER_ERROR`.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_SERVER_ERROR", message)
    }

    /// 503 `SERVICE_UNAVAILABLE`.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'a str,
    message: &'a str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            let cause = self.source.as_ref().map(|e| format!("{e:#}"));
            tracing::error!(
                status = self.status.as_u16(),
                code = %self.code,
                message = %self.message,
                cause = cause.as_deref().unwrap_or("none"),
                "Request failed"
            );
        }

        let body = ErrorBody {
            code: &self.code,
            message: &self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Timeout => Self::timeout("The request did not complete in time"),
            StoreError::ShutdownInProgress | StoreError::ChannelClosed => {
                Self::unavailable("The store is shutting down, please retry")
            },
            StoreError::ShutdownTimeout(_) => {
                Self::internal("An internal error occurred").with_source(err.into())
            },
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("An internal error occurred").with_source(err)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn body_of(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn test_not_found_wording() {
        let err = AppError::not_found("Order", "42");
        assert_eq!(err.to_string(), "[NOT_FOUND] Order with id 42 not found");
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_store_errors_map_to_status() {
        assert_eq!(AppError::from(StoreError::Timeout).status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            AppError::from(StoreError::ShutdownInProgress).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::from(StoreError::ChannelClosed).code(),
            "SERVICE_UNAVAILABLE"
        );
    }

    #[tokio::test]
    async fn test_body_uses_overridden_code() {
        let (status, body) = body_of(
            AppError::conflict("only 2 left in stock, 3 requested").with_code("OUT_OF_STOCK"),
        )
        .await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "OUT_OF_STOCK");
        assert_eq!(body["message"], "only 2 left in stock, 3 requested");
    }

    #[tokio::test]
    async fn test_source_is_not_exposed() {
        let err = AppError::from(anyhow::anyhow!("connection refused: db:5432"));
        assert!(std::error::Error::source(&err).is_some());

        let (status, body) = body_of(err).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "An internal error occurred");
        assert!(!body.to_string().contains("db:5432"));
    }
}

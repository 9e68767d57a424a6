//! Correlation-id middleware.
//!
//! Every request leaves the layer with a valid `X-Correlation-ID` header: the
//! caller's id if it parses as a UUID, a fresh one otherwise. The id is
//! written back into the request before the handler runs, so the
//! [`CorrelationId`](crate::CorrelationId) extractor sees the same value the
//! response carries. The handler runs inside an `http_request` span tagged
//! with the id, and each response is counted in `http_responses_total` by
//! status class.

use axum::{extract::Request, http::HeaderValue, response::Response};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::Instrument;
use uuid::Uuid;

/// Header carrying the correlation id on requests and responses.
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

/// Layer that assigns correlation ids.
///
/// ```ignore
/// let app = Router::new()
///     .nest("/api", api)
///     .layer(correlation_id_layer());
/// ```
#[must_use]
pub const fn correlation_id_layer() -> CorrelationIdLayer {
    CorrelationIdLayer
}

/// See [`correlation_id_layer`].
#[derive(Clone, Copy, Debug, Default)]
pub struct CorrelationIdLayer;

impl<S> Layer<S> for CorrelationIdLayer {
    type Service = CorrelationIdService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CorrelationIdService { inner }
    }
}

/// Service produced by [`CorrelationIdLayer`].
#[derive(Clone, Debug)]
pub struct CorrelationIdService<S> {
    inner: S,
}

type BoxFuture<T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send>>;

impl<S> Service<Request> for CorrelationIdService<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<Response, S::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let id = assign(&mut req);
        let span = tracing::info_span!(
            "http_request",
            correlation_id = %id,
            method = %req.method(),
            path = %req.uri().path(),
        );
        let response = self.inner.call(req);

        Box::pin(async move {
            let mut response = response.instrument(span).await?;

            metrics::counter!("http_responses_total", "class" => status_class(response.status().as_u16()))
                .increment(1);
            if let Ok(value) = HeaderValue::from_str(&id.to_string()) {
                response.headers_mut().insert(CORRELATION_ID_HEADER, value);
            }
            Ok(response)
        })
    }
}

/// Resolve the request's correlation id and store it back on the request.
fn assign(req: &mut Request) -> Uuid {
    let existing = req
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok());

    existing.unwrap_or_else(|| {
        let id = Uuid::new_v4();
        if let Ok(value) = HeaderValue::from_str(&id.to_string()) {
            req.headers_mut().insert(CORRELATION_ID_HEADER, value);
        }
        id
    })
}

const fn status_class(status: u16) -> &'static str {
    match status {
        500.. => "5xx",
        400..=499 => "4xx",
        300..=399 => "3xx",
        _ => "2xx",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::CorrelationId;
    use axum::{Router, body::Body, routing::get};
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route("/echo", get(|CorrelationId(id): CorrelationId| async move { id.to_string() }))
            .layer(correlation_id_layer())
    }

    async fn call(header: Option<&str>) -> (String, String) {
        let mut request = Request::builder().uri("/echo");
        if let Some(value) = header {
            request = request.header(CORRELATION_ID_HEADER, value);
        }
        let response = app().oneshot(request.body(Body::empty()).unwrap()).await.unwrap();

        let returned = response
            .headers()
            .get(CORRELATION_ID_HEADER)
            .expect("correlation id header")
            .to_str()
            .unwrap()
            .to_string();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (returned, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_caller_id_is_kept() {
        let id = Uuid::new_v4().to_string();
        let (returned, seen_by_handler) = call(Some(&id)).await;
        assert_eq!(returned, id);
        assert_eq!(seen_by_handler, id);
    }

    #[tokio::test]
    async fn test_generated_id_matches_what_the_handler_saw() {
        let (returned, seen_by_handler) = call(None).await;
        assert!(Uuid::parse_str(&returned).is_ok());
        assert_eq!(returned, seen_by_handler);
    }

    #[tokio::test]
    async fn test_malformed_id_is_replaced() {
        let (returned, seen_by_handler) = call(Some("not-a-uuid")).await;
        assert_ne!(returned, "not-a-uuid");
        assert_eq!(returned, seen_by_handler);
    }

    #[test]
    fn test_status_classes() {
        assert_eq!(status_class(201), "2xx");
        assert_eq!(status_class(302), "3xx");
        assert_eq!(status_class(409), "4xx");
        assert_eq!(status_class(503), "5xx");
    }
}

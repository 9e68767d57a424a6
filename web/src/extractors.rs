//! Request metadata extractors.
//!
//! None of these reject a request: missing or malformed headers fall back to
//! a generated or placeholder value, so handlers can always log them.
//!
//! ```ignore
//! use farmstand_web::{ClientIp, CorrelationId, UserAgent};
//!
//! async fn webhook(
//!     correlation_id: CorrelationId,
//!     ClientIp(ip): ClientIp,
//!     UserAgent(agent): UserAgent,
//!     body: Bytes,
//! ) -> StatusCode {
//!     tracing::warn!(correlation_id = %correlation_id.0, client_ip = %ip, user_agent = %agent, "Rejected");
//!     StatusCode::BAD_REQUEST
//! }
//! ```

use crate::middleware::CORRELATION_ID_HEADER;
use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, header, request::Parts},
};
use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use uuid::Uuid;

/// Correlation ID of the current request.
///
/// Read from the `X-Correlation-ID` header (set by
/// [`correlation_id_layer`](crate::correlation_id_layer) when absent), or a
/// fresh UUID v4 if the header is missing or not a UUID.
#[derive(Debug, Clone, Copy)]
pub struct CorrelationId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .unwrap_or_else(Uuid::new_v4);

        Ok(Self(id))
    }
}

/// Address of the caller, for security logs.
///
/// Checked in order: first entry of `X-Forwarded-For`, `X-Real-IP`, the
/// socket address (only when served with connect info), then `127.0.0.1`.
#[derive(Debug, Clone, Copy)]
pub struct ClientIp(pub IpAddr);

#[async_trait]
impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(client_ip(&parts.headers, parts.extensions.get())))
    }
}

fn client_ip(headers: &HeaderMap, connect_info: Option<&ConnectInfo<SocketAddr>>) -> IpAddr {
    let header_ip = |name: &str, first_of_list: bool| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| if first_of_list { v.split(',').next().unwrap_or(v) } else { v })
            .and_then(|v| v.trim().parse::<IpAddr>().ok())
    };

    header_ip("X-Forwarded-For", true)
        .or_else(|| header_ip("X-Real-IP", false))
        .or_else(|| connect_info.map(|info| info.0.ip()))
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// `User-Agent` header, or `"Unknown"`.
#[derive(Debug, Clone)]
pub struct UserAgent(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for UserAgent
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("Unknown");

        Ok(Self(agent.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(builder: axum::http::request::Builder) -> Parts {
        builder.body(()).expect("valid request").into_parts().0
    }

    #[tokio::test]
    async fn test_correlation_id_round_trips_valid_header() {
        let id = Uuid::new_v4();
        let mut parts = parts(Request::builder().header(CORRELATION_ID_HEADER, id.to_string()));

        let CorrelationId(extracted) = CorrelationId::from_request_parts(&mut parts, &())
            .await
            .expect("infallible");
        assert_eq!(extracted, id);
    }

    #[tokio::test]
    async fn test_correlation_id_replaces_garbage() {
        let mut parts = parts(Request::builder().header(CORRELATION_ID_HEADER, "not-a-uuid"));

        let CorrelationId(extracted) = CorrelationId::from_request_parts(&mut parts, &())
            .await
            .expect("infallible");
        assert_ne!(extracted, Uuid::nil());
    }

    #[test]
    fn test_client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Forwarded-For", "203.0.113.1, 198.51.100.1".parse().expect("header"));
        headers.insert("X-Real-IP", "198.51.100.42".parse().expect("header"));

        assert_eq!(client_ip(&headers, None).to_string(), "203.0.113.1");
    }

    #[test]
    fn test_client_ip_falls_through_unparseable_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Forwarded-For", "unknown".parse().expect("header"));
        headers.insert("X-Real-IP", "198.51.100.42".parse().expect("header"));
        assert_eq!(client_ip(&headers, None).to_string(), "198.51.100.42");

        let socket = ConnectInfo(SocketAddr::from(([192, 0, 2, 7], 443)));
        assert_eq!(client_ip(&HeaderMap::new(), Some(&socket)).to_string(), "192.0.2.7");
        assert_eq!(client_ip(&HeaderMap::new(), None).to_string(), "127.0.0.1");
    }

    #[tokio::test]
    async fn test_user_agent_defaults_to_unknown() {
        let mut parts = parts(Request::builder());

        let UserAgent(agent) = UserAgent::from_request_parts(&mut parts, &())
            .await
            .expect("infallible");
        assert_eq!(agent, "Unknown");
    }
}

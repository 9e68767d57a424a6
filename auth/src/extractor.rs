//! Axum extractor for authenticated requests.
//!
//! # Usage
//!
//! ```rust,ignore
//! use farmstand_auth::SessionUser;
//!
//! async fn my_orders(
//!     State(state): State<AppState>,
//!     session: SessionUser,
//! ) -> Result<Json<Vec<Order>>, AppError> {
//!     // session.user is guaranteed to hold a live session
//!     Ok(Json(state.orders_for(session.user.id).await))
//! }
//! ```

use crate::error::AuthError;
use crate::service::AuthService;
use crate::state::{Session, SessionId, User};
use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{HeaderMap, header, request::Parts},
};
use farmstand_web::AppError;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "farmstand_session";

/// Authenticated session user.
///
/// Reads the session id from `Authorization: Bearer <session id>`, falling
/// back to the `farmstand_session` cookie, and resolves it through the
/// [`AuthService`] in the router state. Rejects with `401` otherwise.
#[derive(Debug, Clone)]
pub struct SessionUser {
    /// The authenticated user.
    pub user: User,
    /// The session the request presented.
    pub session: Session,
}

#[async_trait]
impl<S> FromRequestParts<S> for SessionUser
where
    AuthService: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = session_token(&parts.headers)
            .ok_or_else(|| AppError::unauthorized("Missing session token"))?;

        let session_id: SessionId = token
            .parse()
            .map_err(|_| AppError::unauthorized("Invalid session token format"))?;

        let auth = AuthService::from_ref(state);
        let (user, session) = auth.authenticate(session_id).await.map_err(|err| match err {
            AuthError::UserNotFound => AppError::unauthorized("Not signed in"),
            other => AppError::from(other),
        })?;

        Ok(Self { user, session })
    }
}

/// The session token presented by a request, bearer header first.
pub(crate) fn session_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());

    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
        .filter(|token| !token.is_empty())
}

//! `/auth/*` routes.
//!
//! | Method | Path                    | Handler          |
//! |--------|-------------------------|------------------|
//! | GET    | `/auth/google/login`    | redirect to Google |
//! | GET    | `/auth/google/callback` | finish sign-in, set cookie |
//! | POST   | `/auth/logout`          | end session, clear cookie |
//! | GET    | `/auth/me`              | current user |

use crate::error::AuthError;
use crate::extractor::{SESSION_COOKIE, SessionUser};
use crate::service::AuthService;
use crate::state::User;
use axum::{
    Json, Router,
    extract::{FromRef, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Redirect},
    routing::{get, post},
};
use farmstand_web::{AppError, ClientIp, UserAgent};
use serde::{Deserialize, Serialize};

/// Build the auth router.
///
/// Mount it on any router whose state can produce an [`AuthService`].
pub fn auth_router<S>() -> Router<S>
where
    AuthService: FromRef<S>,
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/auth/google/login", get(google_login))
        .route("/auth/google/callback", get(google_callback))
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me))
}

/// `OAuth` callback query parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    /// Authorization code from Google.
    pub code: Option<String>,

    /// State parameter (CSRF protection).
    pub state: Option<String>,

    /// Error from Google (e.g. `access_denied`).
    pub error: Option<String>,
}

/// Response after a successful sign-in.
#[derive(Debug, Clone, Serialize)]
pub struct SignInResponse {
    /// Session id, usable as a bearer token.
    pub session_token: String,

    /// Session expiration timestamp (RFC 3339).
    pub expires_at: String,

    /// The signed-in user.
    pub user: User,
}

/// `GET /auth/google/login`: redirect to Google's consent page.
async fn google_login(State(auth): State<AuthService>) -> Result<Redirect, AppError> {
    let redirect = auth.begin_login()?;
    Ok(Redirect::to(&redirect.authorization_url))
}

/// `GET /auth/google/callback?code=...&state=...`
async fn google_callback(
    State(auth): State<AuthService>,
    ClientIp(client_ip): ClientIp,
    UserAgent(user_agent): UserAgent,
    Query(query): Query<CallbackQuery>,
) -> Result<impl IntoResponse, AppError> {
    if let Some(error) = query.error {
        tracing::info!(client_ip = %client_ip, error = %error, "Google sign-in declined");
        return Err(AuthError::OAuthDenied(error).into());
    }

    let (Some(code), Some(state)) = (query.code, query.state) else {
        return Err(AppError::bad_request("Missing code or state parameter"));
    };

    let signed_in = auth.complete_login(&code, &state).await?;
    tracing::info!(
        user_id = %signed_in.user.id,
        client_ip = %client_ip,
        user_agent = %user_agent,
        "User signed in"
    );
    let max_age = signed_in.session.expires_at - signed_in.session.created_at;
    let cookie = session_cookie(
        &signed_in.session.session_id.to_string(),
        max_age.num_seconds(),
        auth.config().secure_cookies,
    );

    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(SignInResponse {
            session_token: signed_in.session.session_id.to_string(),
            expires_at: signed_in.session.expires_at.to_rfc3339(),
            user: signed_in.user,
        }),
    ))
}

/// `POST /auth/logout`
async fn logout(
    State(auth): State<AuthService>,
    session: SessionUser,
) -> Result<impl IntoResponse, AppError> {
    auth.logout(session.session.session_id).await?;
    Ok((
        StatusCode::NO_CONTENT,
        [(
            header::SET_COOKIE,
            session_cookie("", 0, auth.config().secure_cookies),
        )],
    ))
}

/// `GET /auth/me`
async fn me(session: SessionUser) -> Json<User> {
    Json(session.user)
}

fn session_cookie(value: &str, max_age_secs: i64, secure: bool) -> String {
    let mut cookie =
        format!("{SESSION_COOKIE}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_secs}");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_cookie_attributes() {
        let cookie = session_cookie("abc", 3600, true);
        assert_eq!(
            cookie,
            "farmstand_session=abc; Path=/; HttpOnly; SameSite=Lax; Max-Age=3600; Secure"
        );
        assert!(!session_cookie("", 0, false).contains("Secure"));
    }
}

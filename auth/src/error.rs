//! Error types for authentication operations.

use farmstand_web::AppError;
use thiserror::Error;

/// Result type alias for authentication operations.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Failure modes of sign-in and session handling.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// `OAuth` state parameter is unknown, reused or expired (CSRF protection).
    #[error("Invalid OAuth state parameter")]
    OAuthStateInvalid,

    /// The provider redirected back with an error instead of a code.
    #[error("OAuth provider returned an error: {0}")]
    OAuthDenied(String),

    /// `OAuth` token exchange failed.
    #[error("OAuth token exchange failed: {0}")]
    OAuthTokenExchangeFailed(String),

    /// `OAuth` user info fetch failed.
    #[error("OAuth user info fetch failed: {0}")]
    OAuthUserInfoFailed(String),

    /// The Google account's email address is not verified.
    #[error("Email address not verified")]
    EmailNotVerified,

    /// Session does not exist.
    #[error("Session not found")]
    SessionNotFound,

    /// Session has expired.
    #[error("Session has expired")]
    SessionExpired,

    /// User does not exist.
    #[error("User not found")]
    UserNotFound,

    /// Storage failure.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Anything else.
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl AuthError {
    /// Whether the error was caused by the caller rather than the system.
    #[must_use]
    pub const fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::OAuthStateInvalid
                | Self::OAuthDenied(_)
                | Self::EmailNotVerified
                | Self::SessionNotFound
                | Self::SessionExpired
                | Self::UserNotFound
        )
    }

    /// Whether the error should be logged as a security event.
    #[must_use]
    pub const fn is_security_issue(&self) -> bool {
        matches!(self, Self::OAuthStateInvalid)
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        Self::DatabaseError(err.to_string())
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        if err.is_security_issue() {
            tracing::warn!(security_event = true, error = %err, "Rejected sign-in attempt");
        }

        match err {
            AuthError::OAuthStateInvalid => {
                Self::bad_request("Sign-in link is invalid or has expired")
                    .with_code("OAUTH_STATE_INVALID")
            },
            AuthError::OAuthDenied(reason) => {
                Self::bad_request(format!("Sign-in was cancelled: {reason}")).with_code("OAUTH_DENIED")
            },
            AuthError::EmailNotVerified => {
                Self::forbidden("Your Google email address is not verified")
                    .with_code("EMAIL_NOT_VERIFIED")
            },
            AuthError::SessionNotFound | AuthError::UserNotFound => {
                Self::unauthorized("Not signed in")
            },
            AuthError::SessionExpired => {
                Self::unauthorized("Session has expired").with_code("SESSION_EXPIRED")
            },
            AuthError::OAuthTokenExchangeFailed(_) | AuthError::OAuthUserInfoFailed(_) => {
                Self::bad_gateway("Google sign-in is unavailable, please try again")
                    .with_code("OAUTH_UPSTREAM")
                    .with_source(err.into())
            },
            AuthError::DatabaseError(_) | AuthError::InternalError(_) => {
                Self::internal("An internal error occurred").with_source(err.into())
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_user_errors_map_to_client_statuses() {
        assert_eq!(
            AppError::from(AuthError::OAuthStateInvalid).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::from(AuthError::SessionExpired).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::from(AuthError::EmailNotVerified).status(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn test_system_errors_are_not_user_errors() {
        let err = AuthError::DatabaseError("connection reset".to_string());
        assert!(!err.is_user_error());
        assert_eq!(AppError::from(err).status(), StatusCode::INTERNAL_SERVER_ERROR);

        let upstream = AppError::from(AuthError::OAuthTokenExchangeFailed("503".to_string()));
        assert_eq!(upstream.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(upstream.code(), "OAUTH_UPSTREAM");
    }
}

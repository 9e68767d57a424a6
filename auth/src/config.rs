//! Authentication settings.

use chrono::Duration;

/// Sign-in and session settings.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Callback URL registered with Google (`.../auth/google/callback`).
    pub redirect_uri: String,

    /// Lifetime of a session from sign-in.
    ///
    /// Default: 7 days
    pub session_ttl: Duration,

    /// How long an issued CSRF `state` stays redeemable.
    ///
    /// Default: 10 minutes
    pub oauth_state_ttl: Duration,

    /// Mark the session cookie `Secure` (HTTPS only).
    ///
    /// Default: true
    pub secure_cookies: bool,
}

impl AuthConfig {
    /// Settings with defaults for everything except the callback URL.
    #[must_use]
    pub fn new(redirect_uri: impl Into<String>) -> Self {
        Self {
            redirect_uri: redirect_uri.into(),
            session_ttl: Duration::days(7),
            oauth_state_ttl: Duration::minutes(10),
            secure_cookies: true,
        }
    }

    /// Override the session lifetime.
    #[must_use]
    pub const fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Allow the cookie over plain HTTP (local development).
    #[must_use]
    pub const fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.secure_cookies = secure;
        self
    }
}

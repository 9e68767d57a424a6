//! Provider traits for external dependencies.
//!
//! Everything the [`AuthService`](crate::AuthService) talks to sits behind one
//! of these traits and is injected as an `Arc<dyn ...>`, so production wiring
//! (Google, `PostgreSQL`) and test wiring (scripted provider, in-memory
//! stores) share all of the service code.

use crate::error::Result;
use crate::state::{Session, SessionId, User, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub mod google;

pub use google::GoogleOAuthProvider;

/// `OAuth` 2.0 identity provider.
#[async_trait]
pub trait OAuth2Provider: Send + Sync {
    /// Build the URL the browser is redirected to for consent.
    ///
    /// # Errors
    ///
    /// Returns error if URL construction fails.
    fn authorization_url(&self, state: &str, redirect_uri: &str) -> Result<String>;

    /// Exchange an authorization code for tokens.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Network request fails
    /// - Provider rejects the code
    /// - Response is malformed
    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<OAuthTokenResponse>;

    /// Fetch the signed-in account's profile.
    ///
    /// # Errors
    ///
    /// Returns error if the token is rejected, the response is malformed, or
    /// the email address is not verified.
    async fn fetch_user_info(&self, access_token: &str) -> Result<OAuthUserInfo>;
}

/// `OAuth` token response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthTokenResponse {
    /// Access token.
    pub access_token: String,

    /// Expiration timestamp (if provided).
    pub expires_at: Option<DateTime<Utc>>,
}

/// Profile returned by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthUserInfo {
    /// Provider's stable user id (`sub`).
    pub subject: String,

    /// Email address.
    pub email: String,

    /// Whether the provider verified the email address.
    pub email_verified: bool,

    /// Display name, if shared.
    pub name: Option<String>,
}

/// User account storage.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Look up a user by id.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UserNotFound`](crate::AuthError::UserNotFound) if
    /// absent, or a storage error.
    async fn get(&self, user_id: UserId) -> Result<User>;

    /// Look up a user by Google subject id.
    ///
    /// # Errors
    ///
    /// Returns error on storage failure.
    async fn find_by_google_subject(&self, subject: &str) -> Result<Option<User>>;

    /// Create the user for `info.subject`, or refresh email and name of the
    /// existing one.
    ///
    /// # Errors
    ///
    /// Returns error on storage failure.
    async fn upsert_google_user(&self, info: &OAuthUserInfo, now: DateTime<Utc>) -> Result<User>;

    /// Record the Stripe customer created for this user.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UserNotFound`](crate::AuthError::UserNotFound) if
    /// absent, or a storage error.
    async fn set_stripe_customer_id(&self, user_id: UserId, customer_id: &str) -> Result<()>;
}

/// Session storage.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a new session.
    ///
    /// # Errors
    ///
    /// Returns error on storage failure or if the id is already taken.
    async fn create(&self, session: &Session) -> Result<()>;

    /// Look up a session, expired or not.
    ///
    /// # Errors
    ///
    /// Returns error on storage failure.
    async fn get(&self, session_id: SessionId) -> Result<Option<Session>>;

    /// Remove a session. Removing an unknown session is not an error.
    ///
    /// # Errors
    ///
    /// Returns error on storage failure.
    async fn delete(&self, session_id: SessionId) -> Result<()>;

    /// Remove every session that expired at or before `now`.
    ///
    /// # Errors
    ///
    /// Returns error on storage failure.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

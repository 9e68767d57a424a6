//! Sign-in orchestration.
//!
//! # Flow
//!
//! 1. [`AuthService::begin_login`] issues a CSRF state and builds the Google
//!    consent URL
//! 2. Google redirects back with `code` and `state`
//! 3. [`AuthService::complete_login`] redeems the state, exchanges the code,
//!    fetches the profile, upserts the user and opens a session
//! 4. Later requests present the session id; [`AuthService::authenticate`]
//!    resolves it (expired sessions are deleted and rejected)
//! 5. [`AuthService::logout`] deletes the session

use crate::config::AuthConfig;
use crate::csrf::CsrfStateStore;
use crate::error::{AuthError, Result};
use crate::providers::{OAuth2Provider, SessionStore, UserRepository};
use crate::state::{Session, SessionId, User, UserId};
use farmstand_core::environment::Clock;
use std::sync::Arc;

/// Where to send the browser to start signing in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRedirect {
    /// Google consent URL.
    pub authorization_url: String,

    /// The CSRF state embedded in the URL.
    pub state: String,
}

/// A completed sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedIn {
    /// The signed-in user.
    pub user: User,

    /// The new session.
    pub session: Session,
}

/// Sign-in, session and logout operations.
///
/// Cheap to clone; all dependencies are shared.
#[derive(Clone)]
pub struct AuthService {
    oauth: Arc<dyn OAuth2Provider>,
    users: Arc<dyn UserRepository>,
    sessions: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    csrf: Arc<CsrfStateStore>,
    config: Arc<AuthConfig>,
}

impl AuthService {
    /// Wire the service from its providers.
    #[must_use]
    pub fn new(
        oauth: Arc<dyn OAuth2Provider>,
        users: Arc<dyn UserRepository>,
        sessions: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        config: AuthConfig,
    ) -> Self {
        Self {
            oauth,
            users,
            sessions,
            clock,
            csrf: Arc::new(CsrfStateStore::new(config.oauth_state_ttl)),
            config: Arc::new(config),
        }
    }

    /// Settings this service was built with.
    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Start a sign-in.
    ///
    /// # Errors
    ///
    /// Returns error if the provider cannot build the consent URL.
    pub fn begin_login(&self) -> Result<LoginRedirect> {
        let state = self.csrf.issue(self.clock.now());
        let authorization_url = self
            .oauth
            .authorization_url(&state, &self.config.redirect_uri)?;

        tracing::debug!("Issued OAuth state for sign-in");
        Ok(LoginRedirect {
            authorization_url,
            state,
        })
    }

    /// Finish a sign-in from the provider callback.
    ///
    /// # Errors
    ///
    /// - [`AuthError::OAuthStateInvalid`] for unknown, reused or expired states
    /// - provider errors from the code exchange or profile fetch
    /// - storage errors
    pub async fn complete_login(&self, code: &str, state: &str) -> Result<SignedIn> {
        self.csrf.consume(state, self.clock.now())?;

        let tokens = self
            .oauth
            .exchange_code(code, &self.config.redirect_uri)
            .await?;
        let info = self.oauth.fetch_user_info(&tokens.access_token).await?;
        if !info.email_verified {
            return Err(AuthError::EmailNotVerified);
        }

        let now = self.clock.now();
        let user = self.users.upsert_google_user(&info, now).await?;
        let session = Session {
            session_id: SessionId::new(),
            user_id: user.id,
            created_at: now,
            expires_at: now + self.config.session_ttl,
        };
        self.sessions.create(&session).await?;

        tracing::debug!(user_id = %user.id, expires_at = %session.expires_at, "Session created");
        Ok(SignedIn { user, session })
    }

    /// Resolve a presented session id to its user.
    ///
    /// # Errors
    ///
    /// - [`AuthError::SessionNotFound`] if the session does not exist
    /// - [`AuthError::SessionExpired`] if it has expired (it is deleted)
    /// - [`AuthError::UserNotFound`] if the owner was removed
    pub async fn authenticate(&self, session_id: SessionId) -> Result<(User, Session)> {
        let session = self
            .sessions
            .get(session_id)
            .await?
            .ok_or(AuthError::SessionNotFound)?;

        if session.is_expired(self.clock.now()) {
            self.sessions.delete(session_id).await?;
            tracing::debug!(user_id = %session.user_id, "Rejected expired session");
            return Err(AuthError::SessionExpired);
        }

        let user = self.users.get(session.user_id).await?;
        Ok((user, session))
    }

    /// End a session.
    ///
    /// # Errors
    ///
    /// Returns error on storage failure.
    pub async fn logout(&self, session_id: SessionId) -> Result<()> {
        self.sessions.delete(session_id).await?;
        tracing::info!("Session ended");
        Ok(())
    }

    /// Look up a user.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UserNotFound`] or a storage error.
    pub async fn user(&self, user_id: UserId) -> Result<User> {
        self.users.get(user_id).await
    }

    /// Record the Stripe customer created for a user.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UserNotFound`] or a storage error.
    pub async fn link_stripe_customer(&self, user_id: UserId, customer_id: &str) -> Result<()> {
        self.users.set_stripe_customer_id(user_id, customer_id).await
    }

    /// Delete sessions that have expired.
    ///
    /// # Errors
    ///
    /// Returns error on storage failure.
    pub async fn purge_expired_sessions(&self) -> Result<u64> {
        let removed = self.sessions.delete_expired(self.clock.now()).await?;
        if removed > 0 {
            tracing::debug!(removed, "Purged expired sessions");
        }
        Ok(removed)
    }
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("redirect_uri", &self.config.redirect_uri)
            .field("pending_states", &self.csrf.len())
            .finish_non_exhaustive()
    }
}

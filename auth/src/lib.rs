//! # Farmstand Auth
//!
//! Google sign-in for the Farmstand store.
//!
//! The store never handles passwords. Customers authenticate with Google
//! (`OAuth` 2.0 authorization code flow), the callback upserts a [`User`]
//! keyed by the Google subject id, and an opaque [`Session`] id is handed
//! back as both a bearer token and the `farmstand_session` cookie.
//!
//! # Architecture
//!
//! - [`providers`]: the injected seams (`OAuth2Provider`, `UserRepository`,
//!   `SessionStore`) plus the Google implementation
//! - [`stores`]: in-memory and `PostgreSQL` user/session storage
//! - [`AuthService`]: login start, callback completion, session validation
//!   and logout
//! - [`SessionUser`]: axum extractor that requires a live session
//! - [`auth_router`]: the `/auth/*` routes
//!
//! # Example
//!
//! ```ignore
//! use farmstand_auth::{AuthConfig, AuthService, auth_router};
//!
//! let auth = AuthService::new(
//!     Arc::new(GoogleOAuthProvider::new(client_id, client_secret)),
//!     Arc::new(InMemoryUserRepository::new()),
//!     Arc::new(InMemorySessionStore::new()),
//!     Arc::new(SystemClock),
//!     AuthConfig::new("http://localhost:3000/auth/google/callback"),
//! );
//!
//! let app = Router::new().merge(auth_router()).with_state(auth);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod csrf;
pub mod error;
pub mod extractor;
pub mod providers;
pub mod router;
pub mod service;
pub mod state;
pub mod stores;

pub use config::AuthConfig;
pub use error::{AuthError, Result};
pub use extractor::{SESSION_COOKIE, SessionUser};
pub use router::auth_router;
pub use service::{AuthService, LoginRedirect, SignedIn};
pub use state::{Session, SessionId, User, UserId};

//! CSRF `state` parameters for the `OAuth` redirect.
//!
//! Every login start issues a random state that Google echoes back on the
//! callback. A state is redeemable once, and only within its TTL.

use crate::error::{AuthError, Result};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use std::collections::HashMap;
use std::sync::Mutex;

/// Length of generated state strings.
const STATE_LEN: usize = 43;

/// Outstanding states kept before the oldest is evicted.
pub const DEFAULT_MAX_OUTSTANDING: usize = 10_000;

/// Outstanding `OAuth` states.
#[derive(Debug)]
pub struct CsrfStateStore {
    ttl: Duration,
    max_outstanding: usize,
    issued: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl CsrfStateStore {
    /// Create an empty store whose states expire after `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            max_outstanding: DEFAULT_MAX_OUTSTANDING,
            issued: Mutex::new(HashMap::new()),
        }
    }

    /// Keep at most `max` outstanding states (at least one).
    #[must_use]
    pub fn with_max_outstanding(mut self, max: usize) -> Self {
        self.max_outstanding = max.max(1);
        self
    }

    /// Issue a fresh state at `now`.
    ///
    /// Expired states are pruned on the way. When the store is full the
    /// state closest to expiry is evicted, which invalidates that login.
    pub fn issue(&self, now: DateTime<Utc>) -> String {
        let state: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(STATE_LEN)
            .map(char::from)
            .collect();

        let mut issued = self
            .issued
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        issued.retain(|_, expires_at| *expires_at > now);
        while issued.len() >= self.max_outstanding {
            let Some(oldest) = issued
                .iter()
                .min_by_key(|(_, expires_at)| **expires_at)
                .map(|(state, _)| state.clone())
            else {
                break;
            };
            issued.remove(&oldest);
            tracing::debug!("OAuth state store full, evicted the oldest state");
        }
        issued.insert(state.clone(), now + self.ttl);
        state
    }

    /// Redeem `state` at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::OAuthStateInvalid`] if the state was never issued,
    /// was already redeemed, or has expired.
    pub fn consume(&self, state: &str, now: DateTime<Utc>) -> Result<()> {
        let expires_at = self
            .issued
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(state)
            .ok_or(AuthError::OAuthStateInvalid)?;

        if expires_at <= now {
            return Err(AuthError::OAuthStateInvalid);
        }
        Ok(())
    }

    /// Number of outstanding states.
    #[must_use]
    pub fn len(&self) -> usize {
        self.issued
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Whether no states are outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! In-memory user and session stores.

use crate::error::{AuthError, Result};
use crate::providers::{OAuthUserInfo, SessionStore, UserRepository};
use crate::state::{Session, SessionId, User, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory user repository.
///
/// Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct InMemoryUserRepository {
    users: Arc<RwLock<HashMap<UserId, User>>>,
}

impl InMemoryUserRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored users.
    pub async fn user_count(&self) -> usize {
        self.users.read().await.len()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn get(&self, user_id: UserId) -> Result<User> {
        self.users
            .read()
            .await
            .get(&user_id)
            .cloned()
            .ok_or(AuthError::UserNotFound)
    }

    async fn find_by_google_subject(&self, subject: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.google_subject == subject)
            .cloned())
    }

    async fn upsert_google_user(&self, info: &OAuthUserInfo, now: DateTime<Utc>) -> Result<User> {
        let mut users = self.users.write().await;
        let name = info.name.clone().unwrap_or_else(|| info.email.clone());

        if let Some(existing) = users.values_mut().find(|u| u.google_subject == info.subject) {
            existing.email.clone_from(&info.email);
            existing.name = name;
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let user = User {
            id: UserId::new(),
            email: info.email.clone(),
            name,
            google_subject: info.subject.clone(),
            stripe_customer_id: None,
            created_at: now,
            updated_at: now,
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn set_stripe_customer_id(&self, user_id: UserId, customer_id: &str) -> Result<()> {
        let mut users = self.users.write().await;
        let user = users.get_mut(&user_id).ok_or(AuthError::UserNotFound)?;
        user.stripe_customer_id = Some(customer_id.to_string());
        Ok(())
    }
}

/// In-memory session store.
///
/// Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<SessionId, Session>>>,
}

impl InMemorySessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions, expired ones included.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, session: &Session) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.session_id) {
            return Err(AuthError::DatabaseError(
                "Session ID already exists".to_string(),
            ));
        }
        sessions.insert(session.session_id, session.clone());
        Ok(())
    }

    async fn get(&self, session_id: SessionId) -> Result<Option<Session>> {
        Ok(self.sessions.read().await.get(&session_id).cloned())
    }

    async fn delete(&self, session_id: SessionId) -> Result<()> {
        self.sessions.write().await.remove(&session_id);
        Ok(())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(now));
        Ok((before - sessions.len()) as u64)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use farmstand_testing::test_epoch;

    fn google_user(subject: &str, email: &str) -> OAuthUserInfo {
        OAuthUserInfo {
            subject: subject.to_string(),
            email: email.to_string(),
            email_verified: true,
            name: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_keys_on_google_subject() {
        let repo = InMemoryUserRepository::new();
        let now = test_epoch();

        let first = repo
            .upsert_google_user(&google_user("sub-1", "old@example.com"), now)
            .await
            .unwrap();
        let second = repo
            .upsert_google_user(
                &google_user("sub-1", "new@example.com"),
                now + chrono::Duration::days(1),
            )
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.email, "new@example.com");
        assert_eq!(second.name, "new@example.com");
        assert_eq!(second.created_at, now);
        assert_eq!(repo.user_count().await, 1);
    }

    #[tokio::test]
    async fn test_stripe_customer_id_recorded() {
        let repo = InMemoryUserRepository::new();
        let user = repo
            .upsert_google_user(&google_user("sub-2", "b@example.com"), test_epoch())
            .await
            .unwrap();

        repo.set_stripe_customer_id(user.id, "cus_42").await.unwrap();
        assert_eq!(
            repo.get(user.id).await.unwrap().stripe_customer_id.as_deref(),
            Some("cus_42")
        );
        assert_eq!(
            repo.set_stripe_customer_id(UserId::new(), "cus_0").await,
            Err(AuthError::UserNotFound)
        );
    }

    #[tokio::test]
    async fn test_delete_expired_sessions() {
        let store = InMemorySessionStore::new();
        let now = test_epoch();
        let user_id = UserId::new();

        for hours in [-1, 1] {
            store
                .create(&Session {
                    session_id: SessionId::new(),
                    user_id,
                    created_at: now - chrono::Duration::days(1),
                    expires_at: now + chrono::Duration::hours(hours),
                })
                .await
                .unwrap();
        }

        assert_eq!(store.delete_expired(now).await.unwrap(), 1);
        assert_eq!(store.session_count().await, 1);
    }
}

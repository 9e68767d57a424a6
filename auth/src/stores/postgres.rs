//! `PostgreSQL` user and session stores.
//!
//! Both stores expect the `users` and `sessions` tables created by the
//! shop's migrations.
//!
//! # Example
//!
//! ```no_run
//! use farmstand_auth::stores::{PostgresSessionStore, PostgresUserRepository};
//! use sqlx::PgPool;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = PgPool::connect("postgresql://localhost/farmstand").await?;
//! let users = PostgresUserRepository::new(pool.clone());
//! let sessions = PostgresSessionStore::new(pool);
//! # Ok(())
//! # }
//! ```

use crate::error::{AuthError, Result};
use crate::providers::{OAuthUserInfo, SessionStore, UserRepository};
use crate::state::{Session, SessionId, User, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

/// Row shape of the `users` table.
#[derive(sqlx::FromRow)]
struct UserRow {
    id: uuid::Uuid,
    email: String,
    name: String,
    google_subject: String,
    stripe_customer_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: UserId(row.id),
            email: row.email,
            name: row.name,
            google_subject: row.google_subject,
            stripe_customer_id: row.stripe_customer_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// `PostgreSQL` user repository.
#[derive(Clone)]
pub struct PostgresUserRepository {
    /// `PostgreSQL` connection pool.
    pool: PgPool,
}

impl PostgresUserRepository {
    /// Create a new `PostgreSQL` user repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PostgresUserRepository {
    async fn get(&self, user_id: UserId) -> Result<User> {
        sqlx::query_as::<_, UserRow>(
            r"
            SELECT id, email, name, google_subject, stripe_customer_id, created_at, updated_at
            FROM users
            WHERE id = $1
            ",
        )
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await?
        .map(User::from)
        .ok_or(AuthError::UserNotFound)
    }

    async fn find_by_google_subject(&self, subject: &str) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            r"
            SELECT id, email, name, google_subject, stripe_customer_id, created_at, updated_at
            FROM users
            WHERE google_subject = $1
            ",
        )
        .bind(subject)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(User::from))
    }

    async fn upsert_google_user(&self, info: &OAuthUserInfo, now: DateTime<Utc>) -> Result<User> {
        let name = info.name.clone().unwrap_or_else(|| info.email.clone());

        let row = sqlx::query_as::<_, UserRow>(
            r"
            INSERT INTO users (id, email, name, google_subject, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            ON CONFLICT (google_subject) DO UPDATE
                SET email = EXCLUDED.email,
                    name = EXCLUDED.name,
                    updated_at = EXCLUDED.updated_at
            RETURNING id, email, name, google_subject, stripe_customer_id, created_at, updated_at
            ",
        )
        .bind(UserId::new().0)
        .bind(&info.email)
        .bind(&name)
        .bind(&info.subject)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn set_stripe_customer_id(&self, user_id: UserId, customer_id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE users SET stripe_customer_id = $2 WHERE id = $1")
            .bind(user_id.0)
            .bind(customer_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AuthError::UserNotFound);
        }
        Ok(())
    }
}

/// `PostgreSQL` session store.
#[derive(Clone)]
pub struct PostgresSessionStore {
    /// `PostgreSQL` connection pool.
    pool: PgPool,
}

impl PostgresSessionStore {
    /// Create a new `PostgreSQL` session store.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PostgresSessionStore {
    async fn create(&self, session: &Session) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO sessions (session_id, user_id, created_at, expires_at)
            VALUES ($1, $2, $3, $4)
            ",
        )
        .bind(session.session_id.0)
        .bind(session.user_id.0)
        .bind(session.created_at)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, session_id: SessionId) -> Result<Option<Session>> {
        let row: Option<(uuid::Uuid, uuid::Uuid, DateTime<Utc>, DateTime<Utc>)> = sqlx::query_as(
            r"
            SELECT session_id, user_id, created_at, expires_at
            FROM sessions
            WHERE session_id = $1
            ",
        )
        .bind(session_id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(session_id, user_id, created_at, expires_at)| Session {
            session_id: SessionId(session_id),
            user_id: UserId(user_id),
            created_at,
            expires_at,
        }))
    }

    async fn delete(&self, session_id: SessionId) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE session_id = $1")
            .bind(session_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

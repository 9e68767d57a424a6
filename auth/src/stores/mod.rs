//! User and session storage implementations.
//!
//! - [`memory`]: process-local maps, used in development and tests
//! - `postgres` (feature `postgres`): the `users` and `sessions` tables

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::{InMemorySessionStore, InMemoryUserRepository};

#[cfg(feature = "postgres")]
pub use postgres::{PostgresSessionStore, PostgresUserRepository};

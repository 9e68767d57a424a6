//! Durable storage for the catalog and orders.
//!
//! The checkout reducer is the source of truth while the server runs; the
//! repository is written from effects after every transition and read once
//! at bootstrap. Every row carries a `version` and writes with an older
//! version than the stored one are ignored, so effects finishing out of
//! order never roll a row back.

use crate::types::{Order, Product};
use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryCheckoutRepository;
#[cfg(feature = "postgres")]
pub use postgres::PostgresCheckoutRepository;

/// Repository errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// The database rejected the operation or was unreachable
    #[error("database error: {0}")]
    Database(String),

    /// A stored row could not be turned back into a domain value
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

/// Everything needed to rebuild checkout state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CheckoutSnapshot {
    /// All products
    pub products: Vec<Product>,
    /// All orders
    pub orders: Vec<Order>,
}

/// Storage for products and orders.
#[async_trait]
pub trait CheckoutRepository: Send + Sync {
    /// Load every product and order.
    async fn load_snapshot(&self) -> Result<CheckoutSnapshot, RepositoryError>;

    /// Insert or update a product.
    async fn save_product(&self, product: &Product) -> Result<(), RepositoryError>;

    /// Write an order and its product's stock counters in one transaction.
    async fn save_order(&self, order: &Order, product: &Product) -> Result<(), RepositoryError>;
}

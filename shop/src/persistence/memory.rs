//! In-memory repository.

use super::{CheckoutRepository, CheckoutSnapshot, RepositoryError};
use crate::types::{Order, OrderId, Product, ProductId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Tables {
    products: HashMap<ProductId, Product>,
    orders: HashMap<OrderId, Order>,
}

/// Repository that keeps rows in memory.
///
/// Used when `DATABASE_URL` is not set, and by tests. Clones share storage.
#[derive(Clone, Debug, Default)]
pub struct InMemoryCheckoutRepository {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryCheckoutRepository {
    /// Create an empty repository
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored copy of a product
    pub async fn product(&self, id: ProductId) -> Option<Product> {
        self.tables.read().await.products.get(&id).cloned()
    }

    /// Stored copy of an order
    pub async fn order(&self, id: OrderId) -> Option<Order> {
        self.tables.read().await.orders.get(&id).cloned()
    }
}

fn upsert_product(products: &mut HashMap<ProductId, Product>, product: &Product) {
    match products.get(&product.id) {
        Some(stored) if stored.version > product.version => {},
        _ => {
            products.insert(product.id, product.clone());
        },
    }
}

#[async_trait]
impl CheckoutRepository for InMemoryCheckoutRepository {
    async fn load_snapshot(&self) -> Result<CheckoutSnapshot, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(CheckoutSnapshot {
            products: tables.products.values().cloned().collect(),
            orders: tables.orders.values().cloned().collect(),
        })
    }

    async fn save_product(&self, product: &Product) -> Result<(), RepositoryError> {
        upsert_product(&mut self.tables.write().await.products, product);
        Ok(())
    }

    async fn save_order(&self, order: &Order, product: &Product) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        match tables.orders.get(&order.id) {
            Some(stored) if stored.version > order.version => {},
            _ => {
                tables.orders.insert(order.id, order.clone());
            },
        }
        upsert_product(&mut tables.products, product);
        Ok(())
    }
}

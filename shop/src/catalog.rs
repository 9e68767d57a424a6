//! Read access to the catalog, and seeding it.
//!
//! Stock counters only change inside the checkout reducer. This module reads
//! them from the store and lists new products through it.

use crate::checkout::{CheckoutAction, CheckoutStore};
use crate::types::{Money, Product, ProductId};
use farmstand_runtime::StoreError;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// All products, sorted by name.
pub async fn list_products(store: &CheckoutStore) -> Vec<Product> {
    store
        .state(|s| {
            let mut products: Vec<Product> = s.products.values().cloned().collect();
            products.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
            products
        })
        .await
}

/// One product, if listed.
pub async fn get_product(store: &CheckoutStore, id: ProductId) -> Option<Product> {
    store.state(|s| s.product(&id).cloned()).await
}

/// Errors reading a seed file.
#[derive(Error, Debug)]
pub enum SeedError {
    /// File could not be read
    #[error("failed to read catalog seed {path}: {source}")]
    Io {
        /// Seed path
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// File is not a JSON list of products
    #[error("invalid catalog seed: {0}")]
    Parse(#[from] serde_json::Error),

    /// The store refused the listing
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A product as written in the seed file.
#[derive(Clone, Debug, Deserialize)]
pub struct SeedProduct {
    /// Fixed ID, so re-seeding updates instead of duplicating
    #[serde(default)]
    pub id: Option<uuid::Uuid>,
    /// Display name
    pub name: String,
    /// Description
    #[serde(default)]
    pub description: String,
    /// Price per unit in cents
    pub unit_price_cents: u64,
    /// Units on hand
    pub inventory: u32,
}

impl From<SeedProduct> for Product {
    fn from(seed: SeedProduct) -> Self {
        let mut product = Self::new(
            seed.name,
            seed.description,
            Money::from_cents(seed.unit_price_cents),
            seed.inventory,
        );
        if let Some(id) = seed.id {
            product.id = ProductId::from_uuid(id);
        }
        product
    }
}

/// Parse a seed file body.
///
/// # Errors
///
/// Returns [`SeedError::Parse`] if the JSON is not a list of products.
pub fn parse_seed(json: &str) -> Result<Vec<Product>, SeedError> {
    let seeds: Vec<SeedProduct> = serde_json::from_str(json)?;
    Ok(seeds.into_iter().map(Product::from).collect())
}

/// List every product in the seed file, if the catalog is empty.
///
/// Returns how many products were listed.
///
/// # Errors
///
/// Returns a [`SeedError`] if the file cannot be read or parsed, or the
/// store is shutting down.
pub async fn seed_if_empty(store: &CheckoutStore, path: &Path) -> Result<usize, SeedError> {
    if store.state(|s| !s.products.is_empty()).await {
        return Ok(0);
    }

    let json = tokio::fs::read_to_string(path).await.map_err(|source| SeedError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let products = parse_seed(&json)?;
    let count = products.len();

    for product in products {
        store.send(CheckoutAction::ProductListed { product }).await?;
    }

    tracing::info!(count, path = %path.display(), "Catalog seeded");
    Ok(count)
}

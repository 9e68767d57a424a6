//! Catalog API endpoints.
//!
//! - GET /api/products - List the catalog
//! - GET /api/products/:id - One product
//!
//! Both are public. `available` is what can be ordered right now
//! (inventory minus units held by pending orders).

use crate::catalog;
use crate::server::state::AppState;
use crate::types::{Product, ProductId};
use axum::{
    Json,
    extract::{Path, State},
};
use farmstand_web::{AppError, WebResult};
use serde::Serialize;
use uuid::Uuid;

// ============================================================================
// Response Types
// ============================================================================

/// A catalog entry as shown to shoppers.
#[derive(Debug, Serialize)]
pub struct ProductResponse {
    /// Product ID
    pub id: Uuid,
    /// Display name
    pub name: String,
    /// Description
    pub description: String,
    /// Price per unit in cents
    pub unit_price_cents: u64,
    /// Price per unit, formatted
    pub unit_price: String,
    /// Units that can be ordered now
    pub available: u32,
    /// Convenience flag for the storefront
    pub in_stock: bool,
}

impl From<Product> for ProductResponse {
    fn from(product: Product) -> Self {
        let available = product.available();
        Self {
            id: *product.id.as_uuid(),
            name: product.name,
            description: product.description,
            unit_price_cents: product.unit_price.cents(),
            unit_price: product.unit_price.to_string(),
            available,
            in_stock: available > 0,
        }
    }
}

/// Catalog listing.
#[derive(Debug, Serialize)]
pub struct ListProductsResponse {
    /// Products sorted by name
    pub products: Vec<ProductResponse>,
}

// ============================================================================
// Handlers
// ============================================================================

/// List the catalog.
///
/// # Example
///
/// ```bash
/// curl http://localhost:3000/api/products
/// ```
pub async fn list_products(State(state): State<AppState>) -> Json<ListProductsResponse> {
    let products = catalog::list_products(&state.store)
        .await
        .into_iter()
        .map(ProductResponse::from)
        .collect();

    Json(ListProductsResponse { products })
}

/// Get one product.
///
/// # Errors
///
/// Returns 404 if the product is not listed.
pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> WebResult<Json<ProductResponse>> {
    catalog::get_product(&state.store, ProductId::from_uuid(id))
        .await
        .map(|product| Json(ProductResponse::from(product)))
        .ok_or_else(|| AppError::not_found("Product", id))
}

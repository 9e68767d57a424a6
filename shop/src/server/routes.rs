//! Router configuration for the farm store.
//!
//! Builds the complete Axum router with all endpoints.

use super::health::{metrics, readiness_check};
use super::state::AppState;
use crate::api::{orders, products, stripe};
use axum::{
    Router,
    routing::{get, post},
};
use farmstand_auth::auth_router;
use farmstand_web::{correlation_id_layer, handlers::health_check};
use tower_http::trace::TraceLayer;

/// Build the complete Axum router.
///
/// | Method | Path | Auth |
/// |--------|------|------|
/// | GET | `/api/products` | - |
/// | GET | `/api/products/:id` | - |
/// | POST | `/api/orders` | session |
/// | GET | `/api/orders/:id` | session, owner |
/// | GET | `/api/user/orders` | session |
/// | POST | `/api/stripe/create-payment-intent` | session, owner |
/// | POST | `/api/stripe/webhook` | Stripe signature |
/// | * | `/auth/*` | see `farmstand_auth::auth_router` |
/// | GET | `/health`, `/ready`, `/metrics` | - |
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Catalog
        .route("/products", get(products::list_products))
        .route("/products/:id", get(products::get_product))
        // Orders
        .route("/orders", post(orders::place_order))
        .route("/orders/:id", get(orders::get_order))
        .route("/user/orders", get(orders::list_user_orders))
        // Payments
        .route(
            "/stripe/create-payment-intent",
            post(stripe::create_payment_intent),
        )
        .route("/stripe/webhook", post(stripe::stripe_webhook));

    Router::new()
        // Health checks (no authentication)
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics))
        // Google sign-in
        .merge(auth_router())
        // API routes under /api prefix
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(correlation_id_layer())
        .with_state(state)
}

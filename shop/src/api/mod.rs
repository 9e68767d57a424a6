//! API endpoints for the farm store.
//!
//! Handlers are organized by domain:
//! - Products: the public catalog
//! - Orders: placing and viewing orders
//! - Stripe: payment intents and webhooks

pub mod orders;
pub mod products;
pub mod stripe;

pub use orders::{get_order, list_user_orders, place_order};
pub use products::{get_product, list_products};
pub use stripe::{create_payment_intent, stripe_webhook};

//! Farm Stand - online checkout for a small farm store
//!
//! Customers sign in with Google, browse the catalog, and pay for a single
//! product per order with Stripe. Payment confirmation arrives by signed
//! webhook, after which the order is completed, stock is committed, and a
//! confirmation email goes out.
//!
//! # Architecture
//!
//! ```text
//!   HTTP (axum)                         Stripe
//!   ┌───────────┐  PlaceOrder    ┌──────────────────┐  webhook
//!   │ /api/...  │ ─────────────▶ │  CheckoutStore   │ ◀────────
//!   └───────────┘                │ (CheckoutReducer)│
//!                                └──────────────────┘
//!                                     │ effects
//!            ┌──────────────┬─────────┴────┬──────────────┐
//!            ▼              ▼              ▼              ▼
//!     PaymentGateway  CheckoutRepository  OrderMailer   timers
//!       (Stripe)        (PostgreSQL)       (SMTP)    (reservations)
//! ```
//!
//! # Stock Accounting
//!
//! ```text
//! available = inventory - reserved
//!
//! PlaceOrder        reserved += quantity         (rejected if available < quantity)
//! PaymentSucceeded  inventory -= quantity, reserved -= quantity
//! PaymentFailed /   reserved -= quantity
//! expiry
//! ```
//!
//! Every transition runs under the store's lock, so two customers racing
//! for the last units can never both get them, and a payment notification
//! delivered twice commits stock once.
//!
//! # Modules
//!
//! - [`types`]: domain types (products, orders, money)
//! - [`checkout`]: the order state machine
//! - [`catalog`]: catalog queries and seeding
//! - [`payments`]: Stripe gateway and webhook verification
//! - [`notifications`]: confirmation email
//! - [`persistence`]: durable storage
//! - [`api`] / [`server`]: the HTTP surface
//! - [`app`]: startup wiring
//! - [`config`]: environment configuration

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod app;
pub mod catalog;
pub mod checkout;
pub mod config;
pub mod notifications;
pub mod payments;
pub mod persistence;
pub mod server;
pub mod types;

pub use app::{Resources, build_state};
pub use checkout::{CheckoutAction, CheckoutEnvironment, CheckoutReducer, CheckoutStore};
pub use config::Config;
pub use server::{AppState, build_router};
pub use types::{CheckoutState, Money, Order, OrderId, OrderStatus, Product, ProductId};

//! HTTP surface of the farm store.
//!
//! [`build_router`] wires the catalog, order, auth and Stripe webhook
//! routes onto an [`AppState`]; `/health`, `/ready` and `/metrics` live in
//! [`health`].

pub mod health;
pub mod routes;
pub mod state;

pub use routes::build_router;
pub use state::{AppState, WebhookSettings};

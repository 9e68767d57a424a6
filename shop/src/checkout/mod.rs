//! The checkout engine: orders, stock reservations and payment outcomes.
//!
//! All checkout actions for every order go through one [`CheckoutStore`].

pub mod actions;
pub mod environment;
pub mod reducer;

pub use actions::{CheckoutAction, RejectReason};
pub use environment::{CheckoutEnvironment, CheckoutSettings, DEFAULT_RESERVATION_TTL};
pub use reducer::CheckoutReducer;

use farmstand_runtime::Store;

/// Store running the checkout reducer.
pub type CheckoutStore = Store<CheckoutReducer>;

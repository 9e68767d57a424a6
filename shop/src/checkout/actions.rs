//! Checkout actions (commands and events).

use crate::types::{CustomerContact, Order, OrderId, PaymentIntentId, Product, ProductId};
use farmstand_auth::UserId;
use farmstand_macros::Action;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why an order was not placed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectReason {
    /// Not enough unreserved stock
    OutOfStock {
        /// Units asked for
        requested: u32,
        /// Units that could be ordered
        available: u32,
    },
    /// No such product in the catalog
    UnknownProduct,
    /// Quantity was zero or the total would overflow
    InvalidQuantity,
}

impl RejectReason {
    /// Metric label
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::OutOfStock { .. } => "out_of_stock",
            Self::UnknownProduct => "unknown_product",
            Self::InvalidQuantity => "invalid_quantity",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfStock {
                requested,
                available,
            } => write!(f, "only {available} left in stock, {requested} requested"),
            Self::UnknownProduct => f.write_str("product not found"),
            Self::InvalidQuantity => f.write_str("quantity must be at least 1"),
        }
    }
}

/// Actions for the checkout engine.
///
/// Commands come from HTTP handlers, webhooks and timers. Events are fed
/// back by effects once the outside world has answered.
#[derive(Action, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CheckoutAction {
    // Commands
    /// Place an order and reserve its stock
    #[command]
    PlaceOrder {
        /// ID chosen by the caller so it can wait for the outcome
        order_id: OrderId,
        /// Customer placing the order
        user_id: UserId,
        /// Product to buy
        product_id: ProductId,
        /// Units to buy
        quantity: u32,
        /// Shipping and email details
        contact: CustomerContact,
        /// Processor customer to attach the payment to
        customer: Option<String>,
    },

    /// The processor reports a payment intent as paid
    #[command]
    PaymentSucceeded {
        /// Intent that was paid
        payment_intent_id: PaymentIntentId,
    },

    /// The processor reports a payment intent as failed or cancelled
    #[command]
    PaymentFailed {
        /// Intent that failed
        payment_intent_id: PaymentIntentId,
        /// Processor's explanation
        reason: String,
    },

    /// A pending order's reservation timer fired
    #[command]
    ReservationExpired {
        /// Order whose reservation lapsed
        order_id: OrderId,
    },

    /// Schedule expiry timers for pending orders loaded at startup
    #[command]
    RearmReservations,

    /// Add a product to the catalog, or update its listing
    #[command]
    ProductListed {
        /// Product to list
        product: Product,
    },

    /// Add units to a product's inventory
    #[command]
    ProductRestocked {
        /// Product restocked
        product_id: ProductId,
        /// Units added
        quantity: u32,
    },

    // Events
    /// Order created and stock reserved
    #[event]
    OrderPlaced {
        /// The new order
        order: Order,
    },

    /// Order was not placed
    #[event]
    OrderRejected {
        /// Order ID the caller chose
        order_id: OrderId,
        /// Why
        reason: RejectReason,
    },

    /// The processor created the payment intent
    #[event]
    PaymentIntentCreated {
        /// Order being paid
        order_id: OrderId,
        /// Processor's intent id
        payment_intent_id: PaymentIntentId,
        /// Secret for the browser
        client_secret: String,
    },

    /// The processor refused to create the payment intent
    #[event]
    PaymentIntentFailed {
        /// Order being paid
        order_id: OrderId,
        /// Processor's explanation
        reason: String,
    },

    /// Confirmation email delivered
    #[event]
    ConfirmationSent {
        /// Order confirmed
        order_id: OrderId,
    },

    /// Confirmation email gave up after retries
    #[event]
    ConfirmationFailed {
        /// Order affected
        order_id: OrderId,
        /// Last error
        error: String,
    },

    /// Compensating refund issued for a payment on a failed order
    #[event]
    RefundIssued {
        /// Order affected
        order_id: OrderId,
        /// Processor's refund id
        refund_id: String,
    },

    /// Compensating refund gave up after retries
    #[event]
    RefundFailed {
        /// Order affected
        order_id: OrderId,
        /// Last error
        error: String,
    },
}

impl CheckoutAction {
    /// Order this action is about, when it names one directly
    #[must_use]
    pub const fn order_id(&self) -> Option<OrderId> {
        match self {
            Self::PlaceOrder { order_id, .. }
            | Self::ReservationExpired { order_id }
            | Self::OrderRejected { order_id, .. }
            | Self::PaymentIntentCreated { order_id, .. }
            | Self::PaymentIntentFailed { order_id, .. }
            | Self::ConfirmationSent { order_id }
            | Self::ConfirmationFailed { order_id, .. }
            | Self::RefundIssued { order_id, .. }
            | Self::RefundFailed { order_id, .. } => Some(*order_id),
            Self::OrderPlaced { order } => Some(order.id),
            Self::PaymentSucceeded { .. }
            | Self::PaymentFailed { .. }
            | Self::RearmReservations
            | Self::ProductListed { .. }
            | Self::ProductRestocked { .. } => None,
        }
    }

    /// Whether this is how a `PlaceOrder` for `order_id` was settled.
    ///
    /// HTTP handlers wait for one of these before answering.
    #[must_use]
    pub fn settles_placement_of(&self, order_id: OrderId) -> bool {
        matches!(
            self,
            Self::PaymentIntentCreated { .. }
                | Self::PaymentIntentFailed { .. }
                | Self::OrderRejected { .. }
        ) && self.order_id() == Some(order_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_classification() {
        let expire = CheckoutAction::ReservationExpired {
            order_id: OrderId::new(),
        };
        assert!(expire.is_command());
        assert_eq!(expire.name(), "ReservationExpired");

        let sent = CheckoutAction::ConfirmationSent {
            order_id: OrderId::new(),
        };
        assert!(sent.is_event());
        assert_eq!(sent.event_type(), "confirmation_sent");
    }

    #[test]
    fn test_settles_placement_only_for_matching_order() {
        let order_id = OrderId::new();
        let rejected = CheckoutAction::OrderRejected {
            order_id,
            reason: RejectReason::UnknownProduct,
        };
        assert!(rejected.settles_placement_of(order_id));
        assert!(!rejected.settles_placement_of(OrderId::new()));

        let sent = CheckoutAction::ConfirmationSent { order_id };
        assert!(!sent.settles_placement_of(order_id));
    }

    #[test]
    fn test_reject_reason_messages() {
        let reason = RejectReason::OutOfStock {
            requested: 3,
            available: 2,
        };
        assert_eq!(reason.to_string(), "only 2 left in stock, 3 requested");
        assert_eq!(reason.label(), "out_of_stock");
    }
}

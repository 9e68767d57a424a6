//! Payment processor integration.
//!
//! The checkout engine talks to the processor through the [`PaymentGateway`]
//! trait. [`StripeGateway`] is the production implementation;
//! [`MockPaymentGateway`] records calls for tests and local development.
//! Incoming processor notifications are authenticated and decoded by
//! [`webhook`].

use crate::types::{Money, OrderId, PaymentIntentId};
use async_trait::async_trait;
use thiserror::Error;

pub mod mock;
pub mod stripe;
pub mod webhook;

pub use mock::{GatewayCall, MockPaymentGateway};
pub use stripe::StripeGateway;

/// Errors returned by a payment gateway.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaymentGatewayError {
    /// The processor answered with an error status
    #[error("payment processor error ({status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Error message from the processor
        message: String,
    },

    /// The request never got an answer
    #[error("payment processor unreachable: {0}")]
    Network(String),

    /// The processor answered with something we could not decode
    #[error("invalid payment processor response: {0}")]
    InvalidResponse(String),
}

impl PaymentGatewayError {
    /// Whether retrying the same request may succeed.
    ///
    /// Network failures, rate limiting and 5xx answers are transient. Card
    /// declines and validation errors are not.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::InvalidResponse(_) => false,
        }
    }
}

/// What the processor needs to create a payment intent for an order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentIntentRequest {
    /// Order being paid; also used for the idempotency key
    pub order_id: OrderId,
    /// Amount to charge
    pub amount: Money,
    /// ISO currency code, lowercase
    pub currency: String,
    /// Processor customer to attach the intent to
    pub customer: Option<String>,
}

/// A payment intent as created by the processor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentIntent {
    /// Processor id (`pi_...`)
    pub id: PaymentIntentId,
    /// Secret the browser uses to confirm the payment
    pub client_secret: String,
}

/// Where a payment intent stands at the processor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaymentIntentStatus {
    /// Funds captured
    Succeeded,
    /// Cancelled or abandoned
    Canceled,
    /// Still awaiting payment or processing
    Open,
}

impl PaymentIntentStatus {
    /// Maps the processor's `status` field.
    #[must_use]
    pub fn from_stripe(status: &str) -> Self {
        match status {
            "succeeded" => Self::Succeeded,
            "canceled" => Self::Canceled,
            _ => Self::Open,
        }
    }
}

/// Payment processor operations used by checkout.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a processor customer and return its id.
    async fn create_customer(&self, email: &str, name: &str) -> Result<String, PaymentGatewayError>;

    /// Create a payment intent for an order total.
    async fn create_payment_intent(
        &self,
        request: &PaymentIntentRequest,
    ) -> Result<PaymentIntent, PaymentGatewayError>;

    /// Cancel an unpaid payment intent.
    async fn cancel_payment_intent(&self, intent: &PaymentIntentId) -> Result<(), PaymentGatewayError>;

    /// Look up an intent's current status.
    async fn payment_intent_status(
        &self,
        intent: &PaymentIntentId,
    ) -> Result<PaymentIntentStatus, PaymentGatewayError>;

    /// Refund the full amount captured by an intent and return the refund id.
    async fn refund(&self, intent: &PaymentIntentId) -> Result<String, PaymentGatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        assert!(PaymentGatewayError::Network("reset".into()).is_transient());
        assert!(
            PaymentGatewayError::Api {
                status: 503,
                message: "unavailable".into()
            }
            .is_transient()
        );
        assert!(
            PaymentGatewayError::Api {
                status: 429,
                message: "slow down".into()
            }
            .is_transient()
        );
        assert!(
            !PaymentGatewayError::Api {
                status: 402,
                message: "card declined".into()
            }
            .is_transient()
        );
        assert!(!PaymentGatewayError::InvalidResponse("eof".into()).is_transient());
    }

    #[test]
    fn test_intent_status_mapping() {
        assert_eq!(PaymentIntentStatus::from_stripe("succeeded"), PaymentIntentStatus::Succeeded);
        assert_eq!(PaymentIntentStatus::from_stripe("canceled"), PaymentIntentStatus::Canceled);
        assert_eq!(PaymentIntentStatus::from_stripe("requires_payment_method"), PaymentIntentStatus::Open);
        assert_eq!(PaymentIntentStatus::from_stripe("processing"), PaymentIntentStatus::Open);
    }
}

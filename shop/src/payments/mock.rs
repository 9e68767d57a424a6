//! In-memory payment gateway for tests and local development.

use super::{PaymentGateway, PaymentGatewayError, PaymentIntent, PaymentIntentRequest, PaymentIntentStatus};
use crate::types::{Money, OrderId, PaymentIntentId};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A call the mock gateway received.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GatewayCall {
    /// `create_customer`
    CreateCustomer {
        /// Customer email
        email: String,
    },
    /// `create_payment_intent`
    CreatePaymentIntent {
        /// Order being paid
        order_id: OrderId,
        /// Amount requested
        amount: Money,
    },
    /// `cancel_payment_intent`
    Cancel(PaymentIntentId),
    /// `refund`
    Refund(PaymentIntentId),
}

/// Payment gateway that succeeds instantly and records every call.
///
/// Clones share their call log, so a test can keep one handle and give
/// another to the environment under test.
#[derive(Clone, Debug, Default)]
pub struct MockPaymentGateway {
    calls: Arc<Mutex<Vec<GatewayCall>>>,
    next_id: Arc<AtomicU64>,
    fail_intents: Arc<AtomicBool>,
    transient_failures: Arc<AtomicUsize>,
    captured: Arc<Mutex<HashSet<PaymentIntentId>>>,
}

impl MockPaymentGateway {
    /// Creates a gateway that accepts everything
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `create_payment_intent` decline every request
    pub fn fail_payment_intents(&self, fail: bool) {
        self.fail_intents.store(fail, Ordering::SeqCst);
    }

    /// Fail the next `count` calls with a retryable network error
    pub fn fail_next_transiently(&self, count: usize) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    /// Mark an intent as paid, as if the customer had confirmed it.
    /// Cancelling it afterwards fails the way the processor does.
    pub fn capture(&self, intent: &PaymentIntentId) {
        self.captured().insert(intent.clone());
    }

    /// Every call received so far
    #[must_use]
    pub fn calls(&self) -> Vec<GatewayCall> {
        self.lock().clone()
    }

    /// Number of refunds issued
    #[must_use]
    pub fn refund_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, GatewayCall::Refund(_)))
            .count()
    }

    /// Number of cancellations issued
    #[must_use]
    pub fn cancel_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, GatewayCall::Cancel(_)))
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<GatewayCall>> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn captured(&self) -> std::sync::MutexGuard<'_, HashSet<PaymentIntentId>> {
        self.captured
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn record(&self, call: GatewayCall) -> Result<(), PaymentGatewayError> {
        self.lock().push(call);
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(PaymentGatewayError::Network("connection reset".to_string()));
        }
        Ok(())
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn create_customer(&self, email: &str, _name: &str) -> Result<String, PaymentGatewayError> {
        self.record(GatewayCall::CreateCustomer {
            email: email.to_string(),
        })?;
        Ok(format!("cus_mock_{}", self.next_id()))
    }

    async fn create_payment_intent(
        &self,
        request: &PaymentIntentRequest,
    ) -> Result<PaymentIntent, PaymentGatewayError> {
        self.record(GatewayCall::CreatePaymentIntent {
            order_id: request.order_id,
            amount: request.amount,
        })?;
        if self.fail_intents.load(Ordering::SeqCst) {
            return Err(PaymentGatewayError::Api {
                status: 402,
                message: "Your card was declined.".to_string(),
            });
        }

        let n = self.next_id();
        tracing::debug!(order_id = %request.order_id, "Mock payment intent created");
        Ok(PaymentIntent {
            id: PaymentIntentId::new(format!("pi_mock_{n}")),
            client_secret: format!("pi_mock_{n}_secret"),
        })
    }

    async fn cancel_payment_intent(&self, intent: &PaymentIntentId) -> Result<(), PaymentGatewayError> {
        self.record(GatewayCall::Cancel(intent.clone()))?;
        if self.captured().contains(intent) {
            return Err(PaymentGatewayError::Api {
                status: 400,
                message: "This PaymentIntent's status is succeeded".to_string(),
            });
        }
        Ok(())
    }

    async fn payment_intent_status(
        &self,
        intent: &PaymentIntentId,
    ) -> Result<PaymentIntentStatus, PaymentGatewayError> {
        if self.captured().contains(intent) {
            Ok(PaymentIntentStatus::Succeeded)
        } else {
            Ok(PaymentIntentStatus::Open)
        }
    }

    async fn refund(&self, intent: &PaymentIntentId) -> Result<String, PaymentGatewayError> {
        self.record(GatewayCall::Refund(intent.clone()))?;
        Ok(format!("re_mock_{}", self.next_id()))
    }
}

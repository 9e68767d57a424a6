//! Dependencies injected into the checkout reducer.

use crate::notifications::OrderMailer;
use crate::payments::PaymentGateway;
use crate::persistence::CheckoutRepository;
use farmstand_core::environment::Clock;
use farmstand_runtime::{DeadLetterQueue, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;

/// Default time a pending order holds its stock.
pub const DEFAULT_RESERVATION_TTL: Duration = Duration::from_secs(30 * 60);

/// Checkout tunables.
#[derive(Clone, Debug)]
pub struct CheckoutSettings {
    /// ISO currency code sent to the processor, lowercase
    pub currency: String,
    /// How long a pending order holds its stock
    pub reservation_ttl: Duration,
    /// Backoff for processor, database and mail calls
    pub retry: RetryPolicy,
}

impl Default for CheckoutSettings {
    fn default() -> Self {
        Self {
            currency: "usd".to_string(),
            reservation_ttl: DEFAULT_RESERVATION_TTL,
            retry: RetryPolicy::default(),
        }
    }
}

/// Environment dependencies for the checkout engine.
#[derive(Clone)]
pub struct CheckoutEnvironment {
    /// Clock for timestamps
    pub clock: Arc<dyn Clock>,
    /// Payment processor
    pub gateway: Arc<dyn PaymentGateway>,
    /// Durable storage
    pub repository: Arc<dyn CheckoutRepository>,
    /// Confirmation email
    pub mailer: Arc<dyn OrderMailer>,
    /// Where effects that exhausted their retries are recorded
    pub dead_letters: DeadLetterQueue,
    /// Tunables
    pub settings: CheckoutSettings,
}

impl CheckoutEnvironment {
    /// Creates a new `CheckoutEnvironment` with default settings
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        gateway: Arc<dyn PaymentGateway>,
        repository: Arc<dyn CheckoutRepository>,
        mailer: Arc<dyn OrderMailer>,
    ) -> Self {
        Self {
            clock,
            gateway,
            repository,
            mailer,
            dead_letters: DeadLetterQueue::new(1000),
            settings: CheckoutSettings::default(),
        }
    }

    /// Replace the settings
    #[must_use]
    pub fn with_settings(mut self, settings: CheckoutSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Share a dead letter queue, normally the store's
    #[must_use]
    pub fn with_dead_letter_queue(mut self, dlq: DeadLetterQueue) -> Self {
        self.dead_letters = dlq;
        self
    }
}

impl std::fmt::Debug for CheckoutEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckoutEnvironment")
            .field("settings", &self.settings)
            .field("dead_letters", &self.dead_letters.len())
            .finish_non_exhaustive()
    }
}

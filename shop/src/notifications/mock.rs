//! Recording mailer for tests.

use super::{MailerError, OrderConfirmation, OrderMailer};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Keeps every confirmation it is asked to send.
///
/// Clones share the outbox.
#[derive(Clone, Debug, Default)]
pub struct RecordingMailer {
    sent: Arc<Mutex<Vec<OrderConfirmation>>>,
    failures: Arc<AtomicUsize>,
}

impl RecordingMailer {
    /// Create an empty outbox
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` sends with a transport error
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Confirmations delivered so far
    #[must_use]
    pub fn sent(&self) -> Vec<OrderConfirmation> {
        self.sent
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl OrderMailer for RecordingMailer {
    async fn send_order_confirmation(&self, confirmation: &OrderConfirmation) -> Result<(), MailerError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(MailerError::Transport("relay unavailable".to_string()));
        }

        self.sent
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(confirmation.clone());
        Ok(())
    }
}

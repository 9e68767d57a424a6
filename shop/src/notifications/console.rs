//! Console mailer for development.

use super::{MailerError, OrderConfirmation, OrderMailer};
use async_trait::async_trait;
use tracing::info;

/// Logs confirmations instead of sending them.
///
/// Used when `SMTP_HOST` is not configured.
#[derive(Clone, Debug, Default)]
pub struct ConsoleMailer;

impl ConsoleMailer {
    /// Create a new console mailer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl OrderMailer for ConsoleMailer {
    async fn send_order_confirmation(&self, confirmation: &OrderConfirmation) -> Result<(), MailerError> {
        info!(
            to = %confirmation.email,
            order_id = %confirmation.order_id,
            subject = %confirmation.subject(),
            "Order confirmation (development mode)\n{}",
            confirmation.text_body()
        );
        Ok(())
    }
}

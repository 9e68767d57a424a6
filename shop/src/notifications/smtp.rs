//! SMTP mailer using Lettre.

use super::{MailerError, OrderConfirmation, OrderMailer};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

/// SMTP mailer.
///
/// # Configuration
///
/// - `SMTP_HOST`: relay host (STARTTLS/TLS via rustls)
/// - `SMTP_PORT`: relay port (usually 587)
/// - `SMTP_USERNAME` / `SMTP_PASSWORD`: relay credentials
/// - `EMAIL_FROM`: sender, e.g. `Green Acres <orders@greenacres.farm>`
#[derive(Clone)]
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl std::fmt::Debug for SmtpMailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpMailer")
            .field("from", &self.from.to_string())
            .finish_non_exhaustive()
    }
}

impl SmtpMailer {
    /// Create a mailer for the given relay.
    ///
    /// # Errors
    ///
    /// Returns [`MailerError::InvalidAddress`] if `from` does not parse, or
    /// [`MailerError::Transport`] if the relay host is invalid.
    pub fn new(
        host: &str,
        port: u16,
        username: String,
        password: String,
        from: &str,
    ) -> Result<Self, MailerError> {
        let from: Mailbox = from
            .parse()
            .map_err(|e| MailerError::InvalidAddress(format!("{from}: {e}")))?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(host)
            .map_err(|e| MailerError::Transport(format!("SMTP relay error: {e}")))?
            .port(port)
            .credentials(Credentials::new(username, password))
            .build();

        Ok(Self { transport, from })
    }

    fn build_message(&self, confirmation: &OrderConfirmation) -> Result<Message, MailerError> {
        let to: Mailbox = confirmation
            .email
            .parse()
            .map_err(|e| MailerError::InvalidAddress(format!("{}: {e}", confirmation.email)))?;

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(confirmation.subject())
            .header(ContentType::TEXT_PLAIN)
            .body(confirmation.text_body())
            .map_err(|e| MailerError::Build(e.to_string()))
    }
}

#[async_trait]
impl OrderMailer for SmtpMailer {
    async fn send_order_confirmation(&self, confirmation: &OrderConfirmation) -> Result<(), MailerError> {
        let message = self.build_message(confirmation)?;

        self.transport
            .send(message)
            .await
            .map_err(|e| MailerError::Transport(e.to_string()))?;

        tracing::info!(order_id = %confirmation.order_id, "Confirmation email sent");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{Money, OrderId};

    fn mailer() -> SmtpMailer {
        SmtpMailer::new(
            "smtp.example.com",
            587,
            "user".to_string(),
            "pass".to_string(),
            "Green Acres <orders@greenacres.example>",
        )
        .unwrap()
    }

    fn confirmation(email: &str) -> OrderConfirmation {
        OrderConfirmation {
            order_id: OrderId::new(),
            customer_name: "Ada".to_string(),
            email: email.to_string(),
            product_name: "Eggs".to_string(),
            quantity: 1,
            unit_price: Money::from_cents(600),
            total: Money::from_cents(600),
            shipping_address: None,
        }
    }

    #[tokio::test]
    async fn test_rejects_bad_sender() {
        let err = SmtpMailer::new("smtp.example.com", 587, "u".into(), "p".into(), "not an address")
            .unwrap_err();
        assert!(matches!(err, MailerError::InvalidAddress(_)));
    }

    #[tokio::test]
    async fn test_builds_message_for_customer() {
        let message = mailer().build_message(&confirmation("ada@example.com")).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("To: ada@example.com"));
        assert!(raw.contains("is confirmed"));
    }

    #[tokio::test]
    async fn test_rejects_bad_recipient() {
        let err = mailer().build_message(&confirmation("nope")).unwrap_err();
        assert!(matches!(err, MailerError::InvalidAddress(_)));
    }
}

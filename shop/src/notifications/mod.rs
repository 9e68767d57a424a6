//! Order confirmation email.
//!
//! The checkout engine sends one confirmation per completed order through an
//! [`OrderMailer`]. Sending happens inside an effect with retry, so a slow or
//! failing mail relay never delays the webhook acknowledgement.

use crate::types::{Money, Order, OrderId, Product};
use async_trait::async_trait;
use thiserror::Error;

pub mod console;
pub mod mock;
pub mod smtp;

pub use console::ConsoleMailer;
pub use mock::RecordingMailer;
pub use smtp::SmtpMailer;

/// Errors raised while sending mail.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MailerError {
    /// Recipient or sender address did not parse
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Message could not be assembled
    #[error("failed to build email: {0}")]
    Build(String),

    /// The relay refused or the connection failed
    #[error("failed to send email: {0}")]
    Transport(String),
}

/// Everything a confirmation email shows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderConfirmation {
    /// Order reference
    pub order_id: OrderId,
    /// Customer name
    pub customer_name: String,
    /// Recipient
    pub email: String,
    /// Product bought
    pub product_name: String,
    /// Units bought
    pub quantity: u32,
    /// Price per unit
    pub unit_price: Money,
    /// Amount charged
    pub total: Money,
    /// Where it ships, if anywhere
    pub shipping_address: Option<String>,
}

impl OrderConfirmation {
    /// Assemble the confirmation for a completed order.
    #[must_use]
    pub fn new(order: &Order, product: &Product) -> Self {
        Self {
            order_id: order.id,
            customer_name: order.contact.name.clone(),
            email: order.contact.email.clone(),
            product_name: product.name.clone(),
            quantity: order.quantity,
            unit_price: order.unit_price,
            total: order.total,
            shipping_address: order.contact.shipping_address.clone(),
        }
    }

    /// Subject line
    #[must_use]
    pub fn subject(&self) -> String {
        format!("Your farm stand order {} is confirmed", self.order_id)
    }

    /// Plain-text body
    #[must_use]
    pub fn text_body(&self) -> String {
        let delivery = self.shipping_address.as_deref().map_or_else(
            || "Pick up at the farm stand during opening hours.".to_string(),
            |address| format!("Shipping to: {address}"),
        );
        format!(
            "Hi {name},\n\n\
             Thanks for your order! Your payment went through.\n\n\
             Order:    {order_id}\n\
             Item:     {quantity} x {product} @ {unit_price}\n\
             Total:    {total}\n\n\
             {delivery}\n",
            name = self.customer_name,
            order_id = self.order_id,
            quantity = self.quantity,
            product = self.product_name,
            unit_price = self.unit_price,
            total = self.total,
        )
    }
}

/// Sends order confirmations.
#[async_trait]
pub trait OrderMailer: Send + Sync {
    /// Send the confirmation for a completed order.
    async fn send_order_confirmation(&self, confirmation: &OrderConfirmation) -> Result<(), MailerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn confirmation(shipping_address: Option<&str>) -> OrderConfirmation {
        OrderConfirmation {
            order_id: OrderId::new(),
            customer_name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            product_name: "Honey".to_string(),
            quantity: 2,
            unit_price: Money::from_cents(900),
            total: Money::from_cents(1800),
            shipping_address: shipping_address.map(str::to_string),
        }
    }

    #[test]
    fn test_text_body_lists_items_and_total() {
        let body = confirmation(None).text_body();
        assert!(body.contains("2 x Honey @ $9.00"));
        assert!(body.contains("Total:    $18.00"));
        assert!(body.contains("Pick up at the farm stand"));
    }

    #[test]
    fn test_text_body_mentions_shipping_address() {
        let body = confirmation(Some("1 Orchard Lane")).text_body();
        assert!(body.contains("Shipping to: 1 Orchard Lane"));
    }
}

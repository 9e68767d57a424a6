//! Domain types for the farm store.
//!
//! All money is held in integer minor units (cents). Inventory counters are
//! unsigned, and the checkout reducer is the only code that changes them.

use chrono::{DateTime, Utc};
use farmstand_auth::UserId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a product
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(uuid::Uuid);

impl ProductId {
    /// Creates a new random `ProductId`
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Creates a `ProductId` from an existing UUID
    #[must_use]
    pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for ProductId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(uuid::Uuid);

impl OrderId {
    /// Creates a new random `OrderId`
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Creates an `OrderId` from an existing UUID
    #[must_use]
    pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for OrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Payment processor's id for a payment intent (`pi_...`)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentIntentId(String);

impl PaymentIntentId {
    /// Wraps a processor-issued id
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as sent to the processor
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PaymentIntentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Money Value Object (cents-based to avoid floating point errors)
// ============================================================================

/// Represents money in cents to avoid floating-point arithmetic errors
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Creates a `Money` value from cents
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Multiplies money by a quantity with overflow checking
    #[must_use]
    pub const fn checked_multiply(self, quantity: u32) -> Option<Self> {
        match self.0.checked_mul(quantity as u64) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// A product for sale, with its stock counters.
///
/// `reserved` counts units held by pending orders, so what can still be
/// ordered is `inventory - reserved`. The counters always satisfy
/// `reserved <= inventory`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// Product ID
    pub id: ProductId,
    /// Display name
    pub name: String,
    /// Description shown in the catalog
    pub description: String,
    /// Price per unit
    pub unit_price: Money,
    /// Units on hand
    pub inventory: u32,
    /// Units held by pending orders
    pub reserved: u32,
    /// Bumped on every change; persistence ignores stale writes
    #[serde(default)]
    pub version: u64,
}

impl Product {
    /// A product with no reservations
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>, unit_price: Money, inventory: u32) -> Self {
        Self {
            id: ProductId::new(),
            name: name.into(),
            description: description.into(),
            unit_price,
            inventory,
            reserved: 0,
            version: 0,
        }
    }

    /// Units that can still be ordered
    #[must_use]
    pub const fn available(&self) -> u32 {
        self.inventory.saturating_sub(self.reserved)
    }
}

// ============================================================================
// Orders
// ============================================================================

/// Lifecycle of an order.
///
/// Orders start `Pending` and move exactly once to `Completed` or `Failed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Inventory reserved, waiting for payment
    Pending,
    /// Paid; inventory committed
    Completed,
    /// Payment failed, was cancelled, or the reservation expired
    Failed,
}

impl OrderStatus {
    /// Whether no further transition is possible
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Lowercase name used in storage and JSON
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}

/// Who to ship to and email.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerContact {
    /// Customer name
    pub name: String,
    /// Email for the confirmation
    pub email: String,
    /// Phone number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// Shipping address, if not picking up at the stand
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipping_address: Option<String>,
}

/// A single-product order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Order ID
    pub id: OrderId,
    /// Customer who placed the order
    pub user_id: UserId,
    /// Product ordered
    pub product_id: ProductId,
    /// Units ordered (> 0)
    pub quantity: u32,
    /// Catalog price per unit when the order was placed
    pub unit_price: Money,
    /// `quantity * unit_price`, fixed at creation
    pub total: Money,
    /// Status
    pub status: OrderStatus,
    /// Why the order failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Payment intent, once the processor created it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_intent_id: Option<PaymentIntentId>,
    /// Secret the browser needs to confirm the payment intent
    #[serde(default, skip_serializing)]
    pub client_secret: Option<String>,
    /// Shipping and email details
    pub contact: CustomerContact,
    /// When the order was placed
    pub created_at: DateTime<Utc>,
    /// Last change
    pub updated_at: DateTime<Utc>,
    /// When the reservation lapses if unpaid
    pub reservation_expires_at: DateTime<Utc>,
    /// When payment was confirmed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// When the confirmation email went out
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation_sent_at: Option<DateTime<Utc>>,
    /// When a compensating refund was requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refund_requested_at: Option<DateTime<Utc>>,
    /// Processor's refund id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refund_id: Option<String>,
    /// Bumped on every change; persistence ignores stale writes
    #[serde(default)]
    pub version: u64,
}

impl Order {
    /// Whether the order is waiting for payment
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == OrderStatus::Pending
    }

    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
        self.version += 1;
    }
}

// ============================================================================
// Checkout state
// ============================================================================

/// Everything the checkout reducer owns: the catalog with its stock
/// counters and every order.
#[derive(Clone, Debug, Default)]
pub struct CheckoutState {
    /// Products by ID
    pub products: HashMap<ProductId, Product>,
    /// Orders by ID
    pub orders: HashMap<OrderId, Order>,
    /// Payment intent index for webhook lookups
    pub orders_by_intent: HashMap<PaymentIntentId, OrderId>,
}

impl CheckoutState {
    /// Creates an empty state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds state from persisted products and orders
    #[must_use]
    pub fn from_snapshot(products: Vec<Product>, orders: Vec<Order>) -> Self {
        let mut state = Self::new();
        for product in products {
            state.products.insert(product.id, product);
        }
        for order in orders {
            if let Some(intent) = &order.payment_intent_id {
                state.orders_by_intent.insert(intent.clone(), order.id);
            }
            state.orders.insert(order.id, order);
        }
        state
    }

    /// Looks up a product
    #[must_use]
    pub fn product(&self, id: &ProductId) -> Option<&Product> {
        self.products.get(id)
    }

    /// Looks up an order
    #[must_use]
    pub fn order(&self, id: &OrderId) -> Option<&Order> {
        self.orders.get(id)
    }

    /// Looks up the order paid by a payment intent
    #[must_use]
    pub fn order_for_intent(&self, intent: &PaymentIntentId) -> Option<&Order> {
        self.orders_by_intent
            .get(intent)
            .and_then(|id| self.orders.get(id))
    }

    /// Orders placed by a user, newest first
    #[must_use]
    pub fn orders_for_user(&self, user_id: UserId) -> Vec<Order> {
        let mut orders: Vec<Order> = self
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        orders
    }

    /// Whether every product satisfies `reserved <= inventory`
    #[must_use]
    pub fn inventory_is_consistent(&self) -> bool {
        self.products.values().all(|p| p.reserved <= p.inventory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_display_and_multiply() {
        let price = Money::from_cents(450);
        assert_eq!(price.to_string(), "$4.50");
        assert_eq!(price.checked_multiply(3), Some(Money::from_cents(1350)));
        assert_eq!(Money::from_cents(u64::MAX).checked_multiply(2), None);
    }

    #[test]
    fn test_available_subtracts_reserved() {
        let mut eggs = Product::new("Eggs", "A dozen", Money::from_cents(600), 5);
        eggs.reserved = 3;
        assert_eq!(eggs.available(), 2);
    }

    #[test]
    fn test_order_status_round_trips_through_storage_name() {
        for status in [OrderStatus::Pending, OrderStatus::Completed, OrderStatus::Failed] {
            assert_eq!(status.as_str().parse::<OrderStatus>(), Ok(status));
        }
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(OrderStatus::Failed.is_terminal());
    }
}

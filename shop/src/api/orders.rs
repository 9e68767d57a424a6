//! Order API endpoints.
//!
//! - POST /api/orders - Place an order and reserve stock (requires auth)
//! - GET /api/orders/:id - Order details (requires auth + ownership)
//! - GET /api/user/orders - The signed-in customer's orders (requires auth)
//!
//! # Checkout Flow
//!
//! 1. **Place**: `POST /api/orders` reserves stock and creates a payment
//!    intent; the response carries its `client_secret`
//! 2. **Pay**: the browser confirms the intent with Stripe.js
//! 3. **Settle**: Stripe's webhook completes the order (stock committed,
//!    confirmation emailed) or fails it (stock released)
//!
//! Unpaid orders fail when their reservation expires.

use crate::checkout::{CheckoutAction, RejectReason};
use crate::server::state::AppState;
use crate::types::{CheckoutState, CustomerContact, Order, OrderId, OrderStatus, ProductId};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use farmstand_auth::{SessionUser, User};
use farmstand_web::AppError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request to place an order.
#[derive(Debug, Deserialize)]
pub struct PlaceOrderRequest {
    /// Product to buy
    pub product_id: Uuid,
    /// Units to buy
    pub quantity: u32,
    /// Shipping and email details; defaults to the account's name and email
    #[serde(default)]
    pub contact: Option<CustomerContact>,
}

/// An order as shown to its owner.
#[derive(Debug, Serialize)]
pub struct OrderResponse {
    /// Order ID
    pub id: Uuid,
    /// Product ordered
    pub product_id: Uuid,
    /// Units ordered
    pub quantity: u32,
    /// Price per unit in cents
    pub unit_price_cents: u64,
    /// Total in cents
    pub total_cents: u64,
    /// Total, formatted
    pub total: String,
    /// Current status
    pub status: OrderStatus,
    /// Why the order failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Shipping and email details
    pub contact: CustomerContact,
    /// When the order was placed
    pub created_at: DateTime<Utc>,
    /// When an unpaid order gives its stock back
    pub reservation_expires_at: DateTime<Utc>,
    /// When payment was confirmed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            id: *order.id.as_uuid(),
            product_id: *order.product_id.as_uuid(),
            quantity: order.quantity,
            unit_price_cents: order.unit_price.cents(),
            total_cents: order.total.cents(),
            total: order.total.to_string(),
            status: order.status,
            failure_reason: order.failure_reason,
            contact: order.contact,
            created_at: order.created_at,
            reservation_expires_at: order.reservation_expires_at,
            completed_at: order.completed_at,
        }
    }
}

/// Response after placing an order.
#[derive(Debug, Serialize)]
pub struct PlaceOrderResponse {
    /// The pending order
    pub order: OrderResponse,
    /// Pass to Stripe.js to collect payment
    pub client_secret: String,
}

/// The signed-in customer's orders.
#[derive(Debug, Serialize)]
pub struct ListOrdersResponse {
    /// Orders, newest first
    pub orders: Vec<OrderResponse>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Place an order.
///
/// Requires authentication. Reserves the stock, creates a payment intent
/// for `quantity x unit price` and returns its client secret.
///
/// # Example
///
/// ```bash
/// curl -X POST http://localhost:3000/api/orders \
///   -H "Authorization: Bearer <session_token>" \
///   -H "Content-Type: application/json" \
///   -d '{
///     "product_id": "0b6f3a52-2f7e-4c1a-9d61-1d0c5a7e9b01",
///     "quantity": 2,
///     "contact": {"name": "Ada Farmer", "email": "ada@example.com"}
///   }'
/// ```
///
/// # Errors
///
/// - 409 `OUT_OF_STOCK`: not enough unreserved stock
/// - 404: unknown product
/// - 422: zero quantity or an unusable contact
/// - 502: the payment processor refused to create the intent
/// - 504: the intent was not created in time (the order stays pending)
#[tracing::instrument(skip_all, fields(user_id = %session.user.id, product_id = %req.product_id))]
pub async fn place_order(
    session: SessionUser,
    State(state): State<AppState>,
    Json(req): Json<PlaceOrderRequest>,
) -> Result<(StatusCode, Json<PlaceOrderResponse>), AppError> {
    let contact = contact_for(&session.user, req.contact)?;
    let customer = ensure_stripe_customer(&state, &session.user).await;

    let order_id = OrderId::new();
    let product_id = ProductId::from_uuid(req.product_id);
    let action = CheckoutAction::PlaceOrder {
        order_id,
        user_id: session.user.id,
        product_id,
        quantity: req.quantity,
        contact,
        customer,
    };

    let outcome = state
        .store
        .send_and_wait_or_recheck(
            action,
            move |a| a.settles_placement_of(order_id),
            move |s| placement_outcome(s, order_id),
            state.placement_timeout,
        )
        .await?;

    match outcome {
        CheckoutAction::PaymentIntentCreated { client_secret, .. } => {
            let order = state
                .store
                .state(|s| s.order(&order_id).cloned())
                .await
                .ok_or_else(|| AppError::internal("Order disappeared after placement"))?;

            Ok((
                StatusCode::CREATED,
                Json(PlaceOrderResponse {
                    order: order.into(),
                    client_secret,
                }),
            ))
        },
        CheckoutAction::OrderRejected { reason, .. } => Err(rejection_error(&reason, req.product_id)),
        CheckoutAction::PaymentIntentFailed { reason, .. } => {
            tracing::warn!(order_id = %order_id, reason = %reason, "Order failed at payment setup");
            Err(AppError::bad_gateway("The payment processor is unavailable, please try again")
                .with_code("PAYMENT_UNAVAILABLE"))
        },
        other => Err(AppError::internal(format!(
            "Unexpected placement outcome: {}",
            other.name()
        ))),
    }
}

/// Placement outcome read back from the state, for when the feedback
/// announcing it was dropped.
///
/// A rejected order never enters the state, so only created intents and
/// setup failures can be recovered.
fn placement_outcome(state: &CheckoutState, order_id: OrderId) -> Option<CheckoutAction> {
    let order = state.order(&order_id)?;
    match order.status {
        OrderStatus::Failed => Some(CheckoutAction::PaymentIntentFailed {
            order_id,
            reason: order.failure_reason.clone().unwrap_or_default(),
        }),
        OrderStatus::Pending | OrderStatus::Completed => Some(CheckoutAction::PaymentIntentCreated {
            order_id,
            payment_intent_id: order.payment_intent_id.clone()?,
            client_secret: order.client_secret.clone()?,
        }),
    }
}

/// Get an order.
///
/// Requires authentication. Orders of other customers are reported as
/// missing.
///
/// # Example
///
/// ```bash
/// curl http://localhost:3000/api/orders/<order_id> \
///   -H "Authorization: Bearer <session_token>"
/// ```
///
/// # Errors
///
/// Returns 404 if the order does not exist or belongs to someone else.
pub async fn get_order(
    session: SessionUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderResponse>, AppError> {
    let order_id = OrderId::from_uuid(id);
    let user_id = session.user.id;

    state
        .store
        .state(|s| s.order(&order_id).filter(|o| o.user_id == user_id).cloned())
        .await
        .map(|order| Json(order.into()))
        .ok_or_else(|| AppError::not_found("Order", id))
}

/// List the signed-in customer's orders, newest first.
///
/// ```bash
/// curl http://localhost:3000/api/user/orders \
///   -H "Authorization: Bearer <session_token>"
/// ```
pub async fn list_user_orders(
    session: SessionUser,
    State(state): State<AppState>,
) -> Json<ListOrdersResponse> {
    let user_id = session.user.id;
    let orders = state
        .store
        .state(|s| s.orders_for_user(user_id))
        .await
        .into_iter()
        .map(OrderResponse::from)
        .collect();

    Json(ListOrdersResponse { orders })
}

// ============================================================================
// Helpers
// ============================================================================

fn contact_for(user: &User, contact: Option<CustomerContact>) -> Result<CustomerContact, AppError> {
    let contact = contact.unwrap_or_else(|| CustomerContact {
        name: user.name.clone(),
        email: user.email.clone(),
        phone: None,
        shipping_address: None,
    });

    if contact.name.trim().is_empty() {
        return Err(AppError::validation("Contact name is required"));
    }
    if !contact.email.contains('@') {
        return Err(AppError::validation("Contact email is not a valid address"));
    }
    Ok(contact)
}

/// The customer's Stripe id, created on first checkout.
///
/// Checkout works without one, so failures are logged and skipped.
async fn ensure_stripe_customer(state: &AppState, user: &User) -> Option<String> {
    if let Some(customer) = &user.stripe_customer_id {
        return Some(customer.clone());
    }

    match state.gateway.create_customer(&user.email, &user.name).await {
        Ok(customer) => {
            if let Err(error) = state.auth.link_stripe_customer(user.id, &customer).await {
                tracing::warn!(user_id = %user.id, error = %error, "Failed to store Stripe customer id");
            }
            Some(customer)
        },
        Err(error) => {
            tracing::warn!(user_id = %user.id, error = %error, "Failed to create Stripe customer");
            None
        },
    }
}

pub(crate) fn rejection_error(reason: &RejectReason, product_id: Uuid) -> AppError {
    match reason {
        RejectReason::OutOfStock { .. } => {
            AppError::conflict(reason.to_string()).with_code("OUT_OF_STOCK")
        },
        RejectReason::UnknownProduct => AppError::not_found("Product", product_id),
        RejectReason::InvalidQuantity => AppError::validation(reason.to_string()),
    }
}

//! Stripe-facing endpoints.
//!
//! - POST /api/stripe/create-payment-intent - Client secret for an order (requires auth)
//! - POST /api/stripe/webhook - Payment notifications from Stripe (signed)
//!
//! # Webhook Handling
//!
//! 1. **Verify**: the `Stripe-Signature` header is checked against the raw
//!    body before anything is parsed. Failures get `400` and change nothing
//! 2. **Decode**: payment intent events become checkout actions; other event
//!    types are acknowledged and ignored
//! 3. **Dispatch**: the action goes to the checkout store and the delivery
//!    is acknowledged without waiting for its effects
//!
//! Duplicate deliveries and unknown intents are acknowledged with `200` so
//! Stripe stops retrying them. The checkout reducer makes them no-ops.

use crate::payments::webhook::{self, SIGNATURE_HEADER};
use crate::server::state::AppState;
use crate::types::{OrderId, OrderStatus};
use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use farmstand_auth::SessionUser;
use farmstand_runtime::metrics::WebhookMetrics;
use farmstand_web::{AppError, ClientIp, CorrelationId, UserAgent};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request for an order's payment intent.
#[derive(Debug, Deserialize)]
pub struct CreatePaymentIntentRequest {
    /// The pending order to pay for
    pub order_id: Uuid,
}

/// Client-side payment details.
#[derive(Debug, Serialize)]
pub struct PaymentIntentResponse {
    /// Order being paid
    pub order_id: Uuid,
    /// Payment intent ID
    pub payment_intent_id: String,
    /// Pass to Stripe.js `confirmPayment`
    pub client_secret: String,
    /// Amount to be charged, in cents
    pub amount_cents: u64,
}

/// Webhook acknowledgement.
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    /// Always `true`
    pub received: bool,
}

// ============================================================================
// Handlers
// ============================================================================

/// Get the payment intent of a pending order.
///
/// Lets the storefront resume payment for an order placed earlier (for
/// example after a page reload).
///
/// # Example
///
/// ```bash
/// curl -X POST http://localhost:3000/api/stripe/create-payment-intent \
///   -H "Authorization: Bearer <session_token>" \
///   -H "Content-Type: application/json" \
///   -d '{"order_id": "660e8400-e29b-41d4-a716-446655440001"}'
/// ```
///
/// # Errors
///
/// - 404: no such order for this customer
/// - 409 `ORDER_NOT_PENDING`: the order is already completed or failed
/// - 503: the payment intent has not been created yet
pub async fn create_payment_intent(
    session: SessionUser,
    State(state): State<AppState>,
    Json(req): Json<CreatePaymentIntentRequest>,
) -> Result<Json<PaymentIntentResponse>, AppError> {
    let order_id = OrderId::from_uuid(req.order_id);
    let user_id = session.user.id;

    let order = state
        .store
        .state(|s| s.order(&order_id).filter(|o| o.user_id == user_id).cloned())
        .await
        .ok_or_else(|| AppError::not_found("Order", req.order_id))?;

    if order.status != OrderStatus::Pending {
        return Err(
            AppError::conflict(format!("Order is already {}", order.status)).with_code("ORDER_NOT_PENDING"),
        );
    }

    match (order.payment_intent_id, order.client_secret) {
        (Some(intent), Some(client_secret)) => Ok(Json(PaymentIntentResponse {
            order_id: req.order_id,
            payment_intent_id: intent.as_str().to_string(),
            client_secret,
            amount_cents: order.total.cents(),
        })),
        _ => Err(AppError::unavailable("Payment is still being set up, please retry")),
    }
}

/// Receive a Stripe webhook delivery.
///
/// # Example
///
/// ```bash
/// stripe listen --forward-to localhost:3000/api/stripe/webhook
/// ```
///
/// # Errors
///
/// - 400 `INVALID_SIGNATURE`: missing, stale or wrong signature
/// - 400: signed body that is not a Stripe event
/// - 503: the store is shutting down (Stripe will redeliver)
#[tracing::instrument(skip_all, fields(correlation_id = %correlation_id.0))]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    correlation_id: CorrelationId,
    ClientIp(client_ip): ClientIp,
    UserAgent(user_agent): UserAgent,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<WebhookAck>), AppError> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());

    if let Err(error) = webhook::verify_signature(
        &body,
        signature,
        &state.webhook.secret,
        state.webhook.tolerance,
        state.clock.now(),
    ) {
        WebhookMetrics::record_signature_rejected();
        tracing::warn!(
            security_event = true,
            client_ip = %client_ip,
            user_agent = %user_agent,
            error = %error,
            body_len = body.len(),
            "Rejected webhook with invalid signature"
        );
        return Err(AppError::bad_request("Invalid webhook signature").with_code("INVALID_SIGNATURE"));
    }

    let event = webhook::parse_event(&body).map_err(|error| {
        tracing::warn!(error = %error, "Signed webhook body is not a Stripe event");
        AppError::bad_request("Malformed webhook payload")
    })?;

    WebhookMetrics::record_received(event.event_type());
    tracing::info!(event_type = event.event_type(), "Webhook received");

    if let Some(action) = event.into_action() {
        state.store.send(action).await?;
    }

    Ok((StatusCode::OK, Json(WebhookAck { received: true })))
}

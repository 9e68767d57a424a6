//! Stripe webhook authentication and event decoding.
//!
//! Stripe signs each delivery with the endpoint's shared secret and sends
//! the result in the `Stripe-Signature` header:
//!
//! ```text
//! Stripe-Signature: t=1735689600,v1=5257a869...,v1=...
//! ```
//!
//! The signed payload is `"{t}.{raw body}"` and the signature is its
//! HMAC-SHA256, hex-encoded. Several `v1` entries appear while a secret is
//! being rolled; any one of them matching is enough.

use crate::checkout::CheckoutAction;
use crate::types::PaymentIntentId;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

/// Header carrying the signature.
pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// How far a signature timestamp may drift from our clock.
pub const DEFAULT_TOLERANCE: chrono::Duration = chrono::Duration::seconds(300);

type HmacSha256 = Hmac<Sha256>;

/// Why a delivery was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    /// No `Stripe-Signature` header
    #[error("missing Stripe-Signature header")]
    MissingHeader,

    /// Header could not be parsed
    #[error("malformed Stripe-Signature header")]
    Malformed,

    /// Header had no `v1` entries
    #[error("no v1 signatures in header")]
    NoSignatures,

    /// Timestamp is outside the tolerance window
    #[error("signature timestamp outside tolerance")]
    TimestampOutOfTolerance,

    /// No `v1` entry matched the expected signature
    #[error("signature mismatch")]
    Mismatch,
}

/// Verify a delivery's `Stripe-Signature` header against the raw body.
///
/// # Errors
///
/// Returns a [`SignatureError`] describing the first check that failed.
pub fn verify_signature(
    payload: &[u8],
    header: Option<&str>,
    secret: &str,
    tolerance: chrono::Duration,
    now: DateTime<Utc>,
) -> Result<(), SignatureError> {
    let header = header.ok_or(SignatureError::MissingHeader)?;

    let mut timestamp = None;
    let mut signatures = Vec::new();
    for item in header.split(',') {
        let (key, value) = item.trim().split_once('=').ok_or(SignatureError::Malformed)?;
        match key {
            "t" => {
                timestamp = Some(value.parse::<i64>().map_err(|_| SignatureError::Malformed)?);
            },
            "v1" => signatures.push(value),
            _ => {},
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    if signatures.is_empty() {
        return Err(SignatureError::NoSignatures);
    }
    let drift = now.timestamp().checked_sub(timestamp).map(i64::unsigned_abs);
    let allowed = u64::try_from(tolerance.num_seconds()).unwrap_or(0);
    if drift.is_none_or(|drift| drift > allowed) {
        return Err(SignatureError::TimestampOutOfTolerance);
    }

    let expected = compute_signature(payload, secret, timestamp);
    let matched = signatures
        .iter()
        .any(|candidate| constant_time_eq::constant_time_eq(candidate.as_bytes(), expected.as_bytes()));

    if matched {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Build a `Stripe-Signature` header value for `payload`.
///
/// Used by tests and local tooling to produce deliveries the server accepts.
#[must_use]
pub fn signature_header(payload: &[u8], secret: &str, timestamp: i64) -> String {
    format!("t={timestamp},v1={}", compute_signature(payload, secret, timestamp))
}

fn compute_signature(payload: &[u8], secret: &str, timestamp: i64) -> String {
    // HMAC accepts keys of any length, so this cannot fail
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

// ============================================================================
// Events
// ============================================================================

#[derive(Deserialize)]
struct RawEvent {
    #[serde(default)]
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: RawEventData,
}

#[derive(Deserialize)]
struct RawEventData {
    object: RawPaymentIntent,
}

#[derive(Deserialize)]
struct RawPaymentIntent {
    #[serde(default)]
    id: String,
    #[serde(default)]
    last_payment_error: Option<RawPaymentError>,
    #[serde(default)]
    cancellation_reason: Option<String>,
}

#[derive(Deserialize)]
struct RawPaymentError {
    message: Option<String>,
}

/// A verified webhook event, reduced to what checkout cares about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WebhookEvent {
    /// `payment_intent.succeeded`
    PaymentSucceeded {
        /// Stripe event id
        event_id: String,
        /// Intent that was paid
        payment_intent_id: PaymentIntentId,
    },
    /// `payment_intent.payment_failed` or `payment_intent.canceled`
    PaymentFailed {
        /// Stripe event id
        event_id: String,
        /// Intent that failed
        payment_intent_id: PaymentIntentId,
        /// Processor's explanation
        reason: String,
    },
    /// Any other event type; acknowledged and dropped
    Ignored {
        /// Stripe event type
        event_type: String,
    },
}

impl WebhookEvent {
    /// Event type label for logs and metrics
    #[must_use]
    pub fn event_type(&self) -> &str {
        match self {
            Self::PaymentSucceeded { .. } => "payment_intent.succeeded",
            Self::PaymentFailed { .. } => "payment_intent.payment_failed",
            Self::Ignored { event_type } => event_type,
        }
    }

    /// The checkout action this event drives, if any
    #[must_use]
    pub fn into_action(self) -> Option<CheckoutAction> {
        match self {
            Self::PaymentSucceeded {
                payment_intent_id, ..
            } => Some(CheckoutAction::PaymentSucceeded { payment_intent_id }),
            Self::PaymentFailed {
                payment_intent_id,
                reason,
                ..
            } => Some(CheckoutAction::PaymentFailed {
                payment_intent_id,
                reason,
            }),
            Self::Ignored { .. } => None,
        }
    }
}

/// Decode a verified webhook body.
///
/// # Errors
///
/// Returns the JSON error if the body is not a Stripe event.
pub fn parse_event(payload: &[u8]) -> Result<WebhookEvent, serde_json::Error> {
    let raw: RawEvent = serde_json::from_slice(payload)?;
    let intent = raw.data.object;
    let payment_intent_id = PaymentIntentId::new(intent.id);

    let event = match raw.event_type.as_str() {
        "payment_intent.succeeded" => WebhookEvent::PaymentSucceeded {
            event_id: raw.id,
            payment_intent_id,
        },
        "payment_intent.payment_failed" => WebhookEvent::PaymentFailed {
            event_id: raw.id,
            payment_intent_id,
            reason: intent
                .last_payment_error
                .and_then(|e| e.message)
                .unwrap_or_else(|| "payment failed".to_string()),
        },
        "payment_intent.canceled" => WebhookEvent::PaymentFailed {
            event_id: raw.id,
            payment_intent_id,
            reason: intent
                .cancellation_reason
                .map_or_else(|| "payment canceled".to_string(), |r| format!("canceled: {r}")),
        },
        _ => WebhookEvent::Ignored {
            event_type: raw.event_type,
        },
    };
    Ok(event)
}

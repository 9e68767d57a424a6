//! Stripe REST API gateway.

use super::{PaymentGateway, PaymentGatewayError, PaymentIntent, PaymentIntentRequest, PaymentIntentStatus};
use crate::types::PaymentIntentId;
use async_trait::async_trait;
use farmstand_runtime::metrics::CheckoutMetrics;
use reqwest::{Client, Response};
use serde::Deserialize;
use std::time::Instant;

const STRIPE_API_BASE: &str = "https://api.stripe.com";

/// Stripe payment gateway.
///
/// Requests are form-encoded and authenticated with the secret key. Every
/// mutating request carries an `Idempotency-Key` derived from the order or
/// intent, so retried effects never create a second intent or refund.
///
/// ```no_run
/// use farmstand_shop::payments::StripeGateway;
///
/// let stripe = StripeGateway::new("sk_test_...".to_string());
/// ```
#[derive(Clone)]
pub struct StripeGateway {
    client: Client,
    secret_key: String,
    api_base: String,
}

impl std::fmt::Debug for StripeGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeGateway")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Deserialize)]
struct PaymentIntentResponse {
    id: String,
    client_secret: Option<String>,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl StripeGateway {
    /// Create a gateway using the given secret key.
    #[must_use]
    pub fn new(secret_key: String) -> Self {
        Self {
            client: Client::new(),
            secret_key,
            api_base: STRIPE_API_BASE.to_string(),
        }
    }

    /// Point the gateway at another host (e.g. `stripe-mock`).
    #[must_use]
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    async fn post(
        &self,
        operation: &'static str,
        path: &str,
        idempotency_key: &str,
        params: &[(&str, String)],
    ) -> Result<Response, PaymentGatewayError> {
        let request = self
            .client
            .post(format!("{}{path}", self.api_base))
            .header("Idempotency-Key", idempotency_key)
            .form(params);
        self.send(operation, request).await
    }

    async fn get(&self, operation: &'static str, path: &str) -> Result<Response, PaymentGatewayError> {
        let request = self.client.get(format!("{}{path}", self.api_base));
        self.send(operation, request).await
    }

    async fn send(
        &self,
        operation: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<Response, PaymentGatewayError> {
        let start = Instant::now();
        let result = request.bearer_auth(&self.secret_key).send().await;
        CheckoutMetrics::record_gateway_call(operation, start.elapsed());

        let response = result.map_err(|e| PaymentGatewayError::Network(e.to_string()))?;
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorEnvelope>(&body)
            .ok()
            .and_then(|envelope| envelope.error.message)
            .unwrap_or(body);
        tracing::warn!(operation, status, message = %message, "Stripe request failed");
        Err(PaymentGatewayError::Api { status, message })
    }
}

async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, PaymentGatewayError> {
    response
        .json::<T>()
        .await
        .map_err(|e| PaymentGatewayError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_customer(&self, email: &str, name: &str) -> Result<String, PaymentGatewayError> {
        let params = [("email", email.to_string()), ("name", name.to_string())];
        let key = format!("customer-{email}");
        let response = self.post("create_customer", "/v1/customers", &key, &params).await?;
        let customer: IdResponse = decode(response).await?;

        tracing::info!(customer_id = %customer.id, "Stripe customer created");
        Ok(customer.id)
    }

    async fn create_payment_intent(
        &self,
        request: &PaymentIntentRequest,
    ) -> Result<PaymentIntent, PaymentGatewayError> {
        let mut params = vec![
            ("amount", request.amount.cents().to_string()),
            ("currency", request.currency.clone()),
            ("metadata[order_id]", request.order_id.to_string()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
        ];
        if let Some(customer) = &request.customer {
            params.push(("customer", customer.clone()));
        }

        let key = format!("order-{}-intent", request.order_id);
        let response = self
            .post("create_payment_intent", "/v1/payment_intents", &key, &params)
            .await?;
        let intent: PaymentIntentResponse = decode(response).await?;
        let client_secret = intent.client_secret.ok_or_else(|| {
            PaymentGatewayError::InvalidResponse("payment intent without client_secret".to_string())
        })?;

        tracing::info!(
            order_id = %request.order_id,
            payment_intent_id = %intent.id,
            amount = request.amount.cents(),
            "Stripe payment intent created"
        );
        Ok(PaymentIntent {
            id: PaymentIntentId::new(intent.id),
            client_secret,
        })
    }

    async fn cancel_payment_intent(&self, intent: &PaymentIntentId) -> Result<(), PaymentGatewayError> {
        let path = format!("/v1/payment_intents/{intent}/cancel");
        let key = format!("cancel-{intent}");
        self.post("cancel_payment_intent", &path, &key, &[]).await?;

        tracing::info!(payment_intent_id = %intent, "Stripe payment intent cancelled");
        Ok(())
    }

    async fn payment_intent_status(
        &self,
        intent: &PaymentIntentId,
    ) -> Result<PaymentIntentStatus, PaymentGatewayError> {
        let path = format!("/v1/payment_intents/{intent}");
        let response = self.get("retrieve_payment_intent", &path).await?;
        let body: StatusResponse = decode(response).await?;
        Ok(PaymentIntentStatus::from_stripe(&body.status))
    }

    async fn refund(&self, intent: &PaymentIntentId) -> Result<String, PaymentGatewayError> {
        let params = [("payment_intent", intent.to_string())];
        let key = format!("refund-{intent}");
        let response = self.post("refund", "/v1/refunds", &key, &params).await?;
        let refund: IdResponse = decode(response).await?;

        tracing::info!(payment_intent_id = %intent, refund_id = %refund.id, "Stripe refund issued");
        Ok(refund.id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{Money, OrderId};
    use axum::{
        Form, Json, Router,
        extract::Path,
        http::{HeaderMap, StatusCode},
        routing::{get, post},
    };
    use serde_json::json;
    use std::collections::HashMap;

    fn authorized(headers: &HeaderMap) -> bool {
        headers.get("authorization").and_then(|v| v.to_str().ok()) == Some("Bearer sk_test_123")
            && headers.contains_key("idempotency-key")
    }

    /// Serve a stand-in for the Stripe endpoints checkout uses.
    async fn fake_stripe() -> String {
        let app = Router::new()
            .route(
                "/v1/customers",
                post(|headers: HeaderMap, Form(form): Form<HashMap<String, String>>| async move {
                    if !authorized(&headers) {
                        return Err(StatusCode::UNAUTHORIZED);
                    }
                    assert_eq!(form["email"], "ada@example.com");
                    Ok(Json(json!({ "id": "cus_123" })))
                }),
            )
            .route(
                "/v1/payment_intents",
                post(|headers: HeaderMap, Form(form): Form<HashMap<String, String>>| async move {
                    if !authorized(&headers) {
                        return Err((StatusCode::UNAUTHORIZED, Json(json!({}))));
                    }
                    if form["amount"] == "0" {
                        return Err((
                            StatusCode::BAD_REQUEST,
                            Json(json!({ "error": { "message": "Amount must be at least 50 cents" } })),
                        ));
                    }
                    assert_eq!(form["currency"], "usd");
                    assert_eq!(form["automatic_payment_methods[enabled]"], "true");
                    Ok(Json(json!({
                        "id": "pi_123",
                        "client_secret": "pi_123_secret_abc",
                        "amount": form["amount"],
                    })))
                }),
            )
            .route(
                "/v1/payment_intents/:id",
                get(|headers: HeaderMap, Path(id): Path<String>| async move {
                    if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Bearer sk_test_123") {
                        return Err(StatusCode::UNAUTHORIZED);
                    }
                    let status = if id == "pi_123" { "succeeded" } else { "requires_payment_method" };
                    Ok(Json(json!({ "id": id, "status": status })))
                }),
            )
            .route(
                "/v1/payment_intents/:id/cancel",
                post(|Path(id): Path<String>| async move {
                    if id == "pi_gone" {
                        Err(StatusCode::SERVICE_UNAVAILABLE)
                    } else {
                        Ok(Json(json!({ "id": id, "status": "canceled" })))
                    }
                }),
            )
            .route(
                "/v1/refunds",
                post(|Form(form): Form<HashMap<String, String>>| async move {
                    assert_eq!(form["payment_intent"], "pi_123");
                    Json(json!({ "id": "re_123" }))
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn gateway() -> StripeGateway {
        StripeGateway::new("sk_test_123".to_string()).with_api_base(fake_stripe().await)
    }

    fn intent_request(cents: u64) -> PaymentIntentRequest {
        PaymentIntentRequest {
            order_id: OrderId::new(),
            amount: Money::from_cents(cents),
            currency: "usd".to_string(),
            customer: Some("cus_123".to_string()),
        }
    }

    #[tokio::test]
    async fn test_create_customer_and_intent() {
        let stripe = gateway().await;

        let customer = stripe.create_customer("ada@example.com", "Ada").await.unwrap();
        assert_eq!(customer, "cus_123");

        let intent = stripe.create_payment_intent(&intent_request(1800)).await.unwrap();
        assert_eq!(intent.id.as_str(), "pi_123");
        assert_eq!(intent.client_secret, "pi_123_secret_abc");
    }

    #[tokio::test]
    async fn test_api_error_message_is_surfaced() {
        let stripe = gateway().await;

        let err = stripe.create_payment_intent(&intent_request(0)).await.unwrap_err();
        assert_eq!(
            err,
            PaymentGatewayError::Api {
                status: 400,
                message: "Amount must be at least 50 cents".to_string()
            }
        );
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_cancel_and_refund() {
        let stripe = gateway().await;

        stripe
            .cancel_payment_intent(&PaymentIntentId::new("pi_123"))
            .await
            .unwrap();
        let err = stripe
            .cancel_payment_intent(&PaymentIntentId::new("pi_gone"))
            .await
            .unwrap_err();
        assert!(err.is_transient());

        let refund = stripe.refund(&PaymentIntentId::new("pi_123")).await.unwrap();
        assert_eq!(refund, "re_123");
    }

    #[tokio::test]
    async fn test_payment_intent_status() {
        let stripe = gateway().await;

        let paid = stripe.payment_intent_status(&PaymentIntentId::new("pi_123")).await.unwrap();
        assert_eq!(paid, PaymentIntentStatus::Succeeded);
        let open = stripe.payment_intent_status(&PaymentIntentId::new("pi_456")).await.unwrap();
        assert_eq!(open, PaymentIntentStatus::Open);
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        let stripe = StripeGateway::new("sk_test_123".to_string()).with_api_base("http://127.0.0.1:1");

        let err = stripe.refund(&PaymentIntentId::new("pi_123")).await.unwrap_err();
        assert!(matches!(err, PaymentGatewayError::Network(_)));
    }
}

//! Shared harness for the HTTP and engine integration tests.
//!
//! Builds the full router over in-memory storage, the mock payment gateway
//! and a recording mailer, on a clock frozen at the test epoch.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
    response::Response,
};
use farmstand_auth::providers::{GoogleOAuthProvider, OAuthUserInfo, SessionStore, UserRepository};
use farmstand_auth::stores::{InMemorySessionStore, InMemoryUserRepository};
use farmstand_auth::{Session, SessionId, User};
use farmstand_core::environment::Clock;
use farmstand_shop::app::{Resources, build_state};
use farmstand_shop::checkout::CheckoutAction;
use farmstand_shop::config::Config;
use farmstand_shop::notifications::RecordingMailer;
use farmstand_shop::payments::MockPaymentGateway;
use farmstand_shop::payments::webhook::{SIGNATURE_HEADER, signature_header};
use farmstand_shop::persistence::InMemoryCheckoutRepository;
use farmstand_shop::server::{AppState, build_router};
use farmstand_shop::types::{Money, OrderId, Product, ProductId};
use farmstand_testing::{FixedClock, test_epoch};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

pub struct TestShop {
    pub app: Router,
    pub state: AppState,
    pub gateway: MockPaymentGateway,
    pub mailer: RecordingMailer,
    pub repository: Arc<InMemoryCheckoutRepository>,
    users: Arc<InMemoryUserRepository>,
    sessions: Arc<InMemorySessionStore>,
    clock: Arc<FixedClock>,
}

pub fn test_config() -> Config {
    test_config_with(&[])
}

pub fn test_config_with(overrides: &[(&'static str, &'static str)]) -> Config {
    let mut vars: HashMap<&str, &str> = [
        ("PAYMENTS_MOCK", "true"),
        ("STRIPE_WEBHOOK_SECRET", WEBHOOK_SECRET),
        ("GOOGLE_CLIENT_ID", "test-client"),
        ("GOOGLE_CLIENT_SECRET", "test-secret"),
        ("SECURE_COOKIES", "false"),
        ("RETRY_MAX_ATTEMPTS", "2"),
        ("RETRY_INITIAL_DELAY_MS", "1"),
        ("ORDER_PLACEMENT_TIMEOUT_MS", "5000"),
    ]
    .into_iter()
    .collect();
    vars.extend(overrides.iter().copied());

    Config::from_lookup(|key| vars.get(key).map(ToString::to_string))
}

impl TestShop {
    pub async fn start() -> Self {
        Self::start_with(Arc::new(InMemoryCheckoutRepository::new()), test_config()).await
    }

    /// Start over existing storage, as after a restart.
    pub async fn start_with(repository: Arc<InMemoryCheckoutRepository>, config: Config) -> Self {
        Self::start_with_gateway(repository, config, MockPaymentGateway::new()).await
    }

    /// Start over existing storage with a gateway prepared by the test.
    pub async fn start_with_gateway(
        repository: Arc<InMemoryCheckoutRepository>,
        config: Config,
        gateway: MockPaymentGateway,
    ) -> Self {
        farmstand_testing::init_test_tracing();

        let mailer = RecordingMailer::new();
        let users = Arc::new(InMemoryUserRepository::new());
        let sessions = Arc::new(InMemorySessionStore::new());
        let clock = Arc::new(FixedClock::new(test_epoch()));

        let resources = Resources {
            clock: clock.clone(),
            gateway: Arc::new(gateway.clone()),
            repository: repository.clone(),
            mailer: Arc::new(mailer.clone()),
            oauth: Arc::new(GoogleOAuthProvider::new(
                "test-client".to_string(),
                "test-secret".to_string(),
            )),
            users: users.clone(),
            sessions: sessions.clone(),
        };

        let state = build_state(&config, resources).await.unwrap();
        let app = build_router(state.clone());

        Self {
            app,
            state,
            gateway,
            mailer,
            repository,
            users,
            sessions,
            clock,
        }
    }

    /// Create a user with a live session and return its bearer token.
    pub async fn sign_in(&self, subject: &str, email: &str) -> (User, String) {
        let now = self.clock.now();
        let user = self
            .users
            .upsert_google_user(
                &OAuthUserInfo {
                    subject: subject.to_string(),
                    email: email.to_string(),
                    email_verified: true,
                    name: Some(format!("Customer {subject}")),
                },
                now,
            )
            .await
            .unwrap();

        let session = Session {
            session_id: SessionId::new(),
            user_id: user.id,
            created_at: now,
            expires_at: now + chrono::Duration::days(1),
        };
        self.sessions.create(&session).await.unwrap();

        (user, session.session_id.to_string())
    }

    /// List a product and return its id.
    pub async fn list_product(&self, name: &str, cents: u64, inventory: u32) -> ProductId {
        let product = Product::new(name, "", Money::from_cents(cents), inventory);
        let id = product.id;
        self.state
            .store
            .send(CheckoutAction::ProductListed { product })
            .await
            .unwrap();
        id
    }

    pub async fn product(&self, id: ProductId) -> Product {
        self.state
            .store
            .state(|s| s.product(&id).cloned())
            .await
            .unwrap()
    }

    pub async fn order_intent(&self, order_id: OrderId) -> String {
        self.state
            .store
            .state(|s| s.order(&order_id).and_then(|o| o.payment_intent_id.clone()))
            .await
            .unwrap()
            .as_str()
            .to_string()
    }

    pub async fn request(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        read_json(response).await
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        self.request(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn post_json(&self, uri: &str, token: Option<&str>, body: &Value) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        self.request(builder.body(Body::from(body.to_string())).unwrap()).await
    }

    pub async fn place_order(&self, token: &str, product_id: ProductId, quantity: u32) -> (StatusCode, Value) {
        self.post_json(
            "/api/orders",
            Some(token),
            &serde_json::json!({
                "product_id": product_id.to_string(),
                "quantity": quantity,
            }),
        )
        .await
    }

    /// Deliver a webhook body signed with the shared secret at the test clock's time.
    pub async fn deliver_webhook(&self, payload: &str) -> (StatusCode, Value) {
        let signature = signature_header(payload.as_bytes(), WEBHOOK_SECRET, self.clock.now().timestamp());
        self.deliver_raw_webhook(payload, Some(&signature)).await
    }

    pub async fn deliver_raw_webhook(&self, payload: &str, signature: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/stripe/webhook")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(signature) = signature {
            builder = builder.header(SIGNATURE_HEADER, signature);
        }
        self.request(builder.body(Body::from(payload.to_string())).unwrap()).await
    }

    /// Wait until the store has no effects in flight.
    pub async fn settle(&self) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                tokio::time::sleep(Duration::from_millis(10)).await;
                if self.state.store.pending_effects() == 0 {
                    break;
                }
            }
        })
        .await
        .expect("effects did not settle");
    }
}

pub async fn read_json(response: Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

pub fn succeeded_event(event_id: &str, intent: &str) -> String {
    serde_json::json!({
        "id": event_id,
        "type": "payment_intent.succeeded",
        "data": {"object": {"id": intent, "object": "payment_intent", "status": "succeeded"}}
    })
    .to_string()
}

pub fn failed_event(event_id: &str, intent: &str, message: &str) -> String {
    serde_json::json!({
        "id": event_id,
        "type": "payment_intent.payment_failed",
        "data": {"object": {
            "id": intent,
            "object": "payment_intent",
            "last_payment_error": {"message": message}
        }}
    })
    .to_string()
}

pub fn order_id_of(body: &Value) -> OrderId {
    let id = body["order"]["id"].as_str().unwrap();
    OrderId::from_uuid(id.parse().unwrap())
}

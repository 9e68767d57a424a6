//! Application state for the farm store HTTP server.
//!
//! Contains the shared resources handlers need:
//! - The checkout store (catalog and orders)
//! - The auth service (session validation)
//! - The payment gateway (lazy Stripe customers)
//! - Webhook verification settings

use crate::checkout::CheckoutStore;
use crate::payments::PaymentGateway;
use axum::extract::FromRef;
use farmstand_auth::AuthService;
use farmstand_core::environment::Clock;
use farmstand_runtime::metrics::MetricsServer;
use std::sync::Arc;
use std::time::Duration;

/// Default time `POST /api/orders` waits for the payment intent.
pub const DEFAULT_PLACEMENT_TIMEOUT: Duration = Duration::from_secs(15);

/// Webhook signature settings.
#[derive(Clone)]
pub struct WebhookSettings {
    /// Endpoint signing secret (`whsec_...`)
    pub secret: String,
    /// Accepted distance between the signed timestamp and now
    pub tolerance: chrono::Duration,
}

impl std::fmt::Debug for WebhookSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookSettings")
            .field("secret", &"<redacted>")
            .field("tolerance", &self.tolerance)
            .finish()
    }
}

/// Application state shared across all HTTP handlers.
///
/// Cloned for each request; every field is shared.
#[derive(Clone)]
pub struct AppState {
    /// Checkout store: catalog, orders and the payment state machine
    pub store: Arc<CheckoutStore>,

    /// Sign-in and session validation
    pub auth: AuthService,

    /// Payment processor, used directly only to create customers
    pub gateway: Arc<dyn PaymentGateway>,

    /// Clock for webhook timestamp checks
    pub clock: Arc<dyn Clock>,

    /// Webhook verification
    pub webhook: WebhookSettings,

    /// How long order placement waits for the payment intent
    pub placement_timeout: Duration,

    /// Prometheus recorder, if this process installed one
    pub metrics: Option<Arc<MetricsServer>>,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(
        store: Arc<CheckoutStore>,
        auth: AuthService,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
        webhook: WebhookSettings,
    ) -> Self {
        Self {
            store,
            auth,
            gateway,
            clock,
            webhook,
            placement_timeout: DEFAULT_PLACEMENT_TIMEOUT,
            metrics: None,
        }
    }

    /// Override the order placement timeout.
    #[must_use]
    pub const fn with_placement_timeout(mut self, timeout: Duration) -> Self {
        self.placement_timeout = timeout;
        self
    }

    /// Serve metrics from this recorder at `/metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<MetricsServer>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

// Lets the `SessionUser` extractor and `auth_router` find the auth service
impl FromRef<AppState> for AuthService {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.auth.clone()
    }
}

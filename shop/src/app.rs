//! Application wiring.
//!
//! Startup runs in two steps:
//!
//! 1. [`Resources::from_config`] picks the integrations: Stripe or the mock
//!    gateway, `PostgreSQL` or in-memory storage, SMTP or the console mailer
//! 2. [`build_state`] loads the persisted catalog and orders into a new
//!    checkout store, seeds an empty catalog, re-arms reservation timers and
//!    assembles the [`AppState`] the router serves
//!
//! Tests skip step 1 and hand [`build_state`] in-memory resources.

use crate::catalog;
use crate::checkout::{CheckoutAction, CheckoutEnvironment, CheckoutReducer, CheckoutSettings, CheckoutStore};
use crate::config::Config;
use crate::notifications::{ConsoleMailer, OrderMailer, SmtpMailer};
use crate::payments::{MockPaymentGateway, PaymentGateway, StripeGateway};
use crate::persistence::{CheckoutRepository, InMemoryCheckoutRepository};
use crate::server::{AppState, WebhookSettings};
use crate::types::CheckoutState;
use anyhow::Context;
use farmstand_auth::providers::{GoogleOAuthProvider, OAuth2Provider, SessionStore, UserRepository};
use farmstand_auth::stores::{InMemorySessionStore, InMemoryUserRepository};
use farmstand_auth::{AuthConfig, AuthService};
use farmstand_core::environment::{Clock, SystemClock};
use farmstand_runtime::{DeadLetterQueue, RetryPolicy, Store, StoreConfig};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// External integrations the store runs against.
#[derive(Clone)]
pub struct Resources {
    /// Clock for timestamps and timers
    pub clock: Arc<dyn Clock>,
    /// Payment processor
    pub gateway: Arc<dyn PaymentGateway>,
    /// Catalog and order storage
    pub repository: Arc<dyn CheckoutRepository>,
    /// Confirmation email
    pub mailer: Arc<dyn OrderMailer>,
    /// Google sign-in
    pub oauth: Arc<dyn OAuth2Provider>,
    /// User accounts
    pub users: Arc<dyn UserRepository>,
    /// Sessions
    pub sessions: Arc<dyn SessionStore>,
}

impl Resources {
    /// Build the production integrations described by `config`.
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be reached or migrated, or the
    /// SMTP settings are unusable.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let gateway: Arc<dyn PaymentGateway> = match &config.stripe.secret_key {
            Some(secret) if !config.stripe.use_mock => {
                info!(api_base = %config.stripe.api_base, "Using Stripe payment gateway");
                Arc::new(StripeGateway::new(secret.clone()).with_api_base(config.stripe.api_base.clone()))
            },
            _ => {
                tracing::warn!("Using mock payment gateway; no real payments will be taken");
                Arc::new(MockPaymentGateway::new())
            },
        };

        let mailer: Arc<dyn OrderMailer> = match &config.email.smtp_host {
            Some(host) => {
                info!(host = %host, port = config.email.smtp_port, "Using SMTP mailer");
                Arc::new(
                    SmtpMailer::new(
                        host,
                        config.email.smtp_port,
                        config.email.smtp_username.clone(),
                        config.email.smtp_password.clone(),
                        &config.email.from,
                    )
                    .context("invalid SMTP configuration")?,
                )
            },
            None => {
                info!("SMTP_HOST not set, confirmation emails will be logged");
                Arc::new(ConsoleMailer::new())
            },
        };

        let oauth: Arc<dyn OAuth2Provider> = Arc::new(GoogleOAuthProvider::new(
            config.google.client_id.clone().unwrap_or_default(),
            config.google.client_secret.clone().unwrap_or_default(),
        ));

        let (repository, users, sessions) = storage(config).await?;

        Ok(Self {
            clock: Arc::new(SystemClock),
            gateway,
            repository,
            mailer,
            oauth,
            users,
            sessions,
        })
    }

    /// In-memory storage around the given integrations.
    #[must_use]
    pub fn in_memory(
        clock: Arc<dyn Clock>,
        gateway: Arc<dyn PaymentGateway>,
        mailer: Arc<dyn OrderMailer>,
        oauth: Arc<dyn OAuth2Provider>,
    ) -> Self {
        Self {
            clock,
            gateway,
            repository: Arc::new(InMemoryCheckoutRepository::new()),
            mailer,
            oauth,
            users: Arc::new(InMemoryUserRepository::new()),
            sessions: Arc::new(InMemorySessionStore::new()),
        }
    }
}

type Storage = (
    Arc<dyn CheckoutRepository>,
    Arc<dyn UserRepository>,
    Arc<dyn SessionStore>,
);

#[cfg(feature = "postgres")]
async fn storage(config: &Config) -> anyhow::Result<Storage> {
    use crate::persistence::PostgresCheckoutRepository;
    use farmstand_auth::stores::{PostgresSessionStore, PostgresUserRepository};

    let Some(url) = &config.database.url else {
        return Ok(in_memory_storage());
    };

    info!("Connecting to PostgreSQL...");
    let repository = PostgresCheckoutRepository::connect(url, config.database.max_connections)
        .await
        .context("failed to connect to PostgreSQL")?;
    let pool = repository.pool();
    info!("PostgreSQL connected, migrations applied");

    Ok((
        Arc::new(repository),
        Arc::new(PostgresUserRepository::new(pool.clone())),
        Arc::new(PostgresSessionStore::new(pool)),
    ))
}

#[cfg(not(feature = "postgres"))]
#[allow(clippy::unused_async)]
async fn storage(config: &Config) -> anyhow::Result<Storage> {
    if config.database.url.is_some() {
        tracing::warn!("DATABASE_URL is set but the postgres feature is disabled");
    }
    Ok(in_memory_storage())
}

fn in_memory_storage() -> Storage {
    tracing::warn!("DATABASE_URL not set, using in-memory storage; data is lost on restart");
    (
        Arc::new(InMemoryCheckoutRepository::new()),
        Arc::new(InMemoryUserRepository::new()),
        Arc::new(InMemorySessionStore::new()),
    )
}

/// Checkout tunables from configuration.
#[must_use]
pub fn checkout_settings(config: &Config) -> CheckoutSettings {
    CheckoutSettings {
        currency: config.checkout.currency.clone(),
        reservation_ttl: config.reservation_ttl(),
        retry: RetryPolicy::builder()
            .max_retries(config.checkout.retry_max_attempts)
            .initial_delay(Duration::from_millis(config.checkout.retry_initial_delay_ms))
            .jitter(true)
            .build(),
    }
}

/// Load state, start the checkout store and assemble the HTTP state.
///
/// # Errors
///
/// Returns error if persisted state cannot be loaded, the seed file is
/// unreadable, or the store refuses the startup actions.
pub async fn build_state(config: &Config, resources: Resources) -> anyhow::Result<AppState> {
    let store = Arc::new(start_store(config, &resources).await?);

    if let Some(path) = &config.checkout.seed_path {
        catalog::seed_if_empty(&store, Path::new(path))
            .await
            .context("failed to seed catalog")?;
    }

    store.send(CheckoutAction::RearmReservations).await?;

    let auth_config = AuthConfig::new(config.oauth_redirect_uri())
        .with_session_ttl(chrono::Duration::seconds(
            i64::try_from(config.auth.session_ttl).unwrap_or(i64::MAX),
        ))
        .with_secure_cookies(config.auth.secure_cookies);
    let auth = AuthService::new(
        resources.oauth,
        resources.users,
        resources.sessions,
        Arc::clone(&resources.clock),
        auth_config,
    );

    let webhook = WebhookSettings {
        secret: config.stripe.webhook_secret.clone().unwrap_or_default(),
        tolerance: chrono::Duration::seconds(
            i64::try_from(config.stripe.webhook_tolerance).unwrap_or(i64::MAX),
        ),
    };

    Ok(AppState::new(store, auth, resources.gateway, resources.clock, webhook)
        .with_placement_timeout(Duration::from_millis(config.checkout.placement_timeout_ms)))
}

async fn start_store(config: &Config, resources: &Resources) -> anyhow::Result<CheckoutStore> {
    let snapshot = resources
        .repository
        .load_snapshot()
        .await
        .context("failed to load catalog and orders")?;
    info!(
        products = snapshot.products.len(),
        orders = snapshot.orders.len(),
        "Loaded persisted checkout state"
    );

    let state = CheckoutState::from_snapshot(snapshot.products, snapshot.orders);
    if !state.inventory_is_consistent() {
        tracing::error!("Persisted stock counters do not match pending orders");
    }

    let dlq = DeadLetterQueue::new(config.checkout.dead_letter_capacity);
    let environment = CheckoutEnvironment::new(
        Arc::clone(&resources.clock),
        Arc::clone(&resources.gateway),
        Arc::clone(&resources.repository),
        Arc::clone(&resources.mailer),
    )
    .with_settings(checkout_settings(config))
    .with_dead_letter_queue(dlq.clone());

    let store_config = StoreConfig::default()
        .with_dead_letter_queue(dlq)
        .with_shutdown_timeout(Duration::from_secs(config.server.shutdown_timeout));

    Ok(Store::with_config(state, CheckoutReducer::new(), environment, store_config))
}

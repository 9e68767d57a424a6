//! Farm Stand Server
//!
//! Serves the storefront API, Google sign-in and the Stripe webhook.
//!
//! # Usage
//!
//! ```bash
//! # Local development: mock payments, in-memory storage, emails logged
//! PAYMENTS_MOCK=true STRIPE_WEBHOOK_SECRET=whsec_dev \
//! GOOGLE_CLIENT_ID=... GOOGLE_CLIENT_SECRET=... \
//! CATALOG_SEED_PATH=shop/seed/products.json SECURE_COOKIES=false \
//! cargo run --bin farmstand-server
//! ```

use farmstand_runtime::metrics::MetricsServer;
use farmstand_shop::{Config, Resources, build_router, build_state};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,farmstand_shop=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Farm Stand server...");

    // Load configuration
    let config = Config::from_env();
    config.validate()?;
    tracing::info!(
        bind = %config.bind_address(),
        public_url = %config.server.public_base_url,
        database = config.database.url.is_some(),
        mock_payments = config.stripe.use_mock,
        "Configuration loaded"
    );

    // Metrics
    let mut metrics = MetricsServer::new();
    metrics.start()?;

    // Integrations, store and HTTP state
    let resources = Resources::from_config(&config).await?;
    let state = build_state(&config, resources)
        .await?
        .with_metrics(Arc::new(metrics));
    let store = Arc::clone(&state.store);
    let auth = state.auth.clone();

    // Hourly cleanup of expired sessions
    let cleanup = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60 * 60));
        loop {
            interval.tick().await;
            match auth.purge_expired_sessions().await {
                Ok(0) => {},
                Ok(purged) => tracing::info!(purged, "Expired sessions removed"),
                Err(error) => tracing::warn!(error = %error, "Session cleanup failed"),
            }
        }
    });

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;
    tracing::info!(address = %listener.local_addr()?, "Farm Stand server is listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("HTTP server stopped, draining checkout effects...");
    cleanup.abort();
    if let Err(error) = store.shutdown(None).await {
        tracing::warn!(error = %error, "Checkout store did not drain in time");
    }

    for entry in store.dlq().drain() {
        tracing::error!(
            operation = %entry.operation,
            error = %entry.error,
            attempts = entry.attempts,
            failed_at = %entry.failed_at,
            "Unresolved dead letter at shutdown"
        );
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %error, "Failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(error) => tracing::error!(error = %error, "Failed to listen for SIGTERM"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

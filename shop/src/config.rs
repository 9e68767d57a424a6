//! Configuration for the farm store server.
//!
//! Loads configuration from environment variables with sensible defaults.
//! `.env` files are read by the binary before this runs.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server
    pub server: ServerConfig,
    /// `PostgreSQL` (optional; in-memory storage without it)
    pub database: DatabaseConfig,
    /// Stripe payments
    pub stripe: StripeConfig,
    /// Google sign-in
    pub google: GoogleConfig,
    /// Confirmation email
    pub email: EmailConfig,
    /// Checkout engine
    pub checkout: CheckoutConfig,
    /// Sessions
    pub auth: AuthSettings,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Public URL of the site, used to build the OAuth redirect URI
    pub public_base_url: String,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout: u64,
}

/// `PostgreSQL` configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL; `None` selects in-memory storage
    pub url: Option<String>,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
}

/// Stripe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeConfig {
    /// Secret API key (`sk_...`)
    #[serde(skip_serializing)]
    pub secret_key: Option<String>,
    /// Webhook endpoint signing secret (`whsec_...`)
    #[serde(skip_serializing)]
    pub webhook_secret: Option<String>,
    /// API host, overridable for `stripe-mock`
    pub api_base: String,
    /// Accepted signature age in seconds
    pub webhook_tolerance: u64,
    /// Use the in-memory gateway instead of Stripe (development only)
    pub use_mock: bool,
}

/// Google OAuth configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleConfig {
    /// OAuth client ID
    pub client_id: Option<String>,
    /// OAuth client secret
    #[serde(skip_serializing)]
    pub client_secret: Option<String>,
}

/// Email configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    /// SMTP relay host; `None` logs emails to the console
    pub smtp_host: Option<String>,
    /// SMTP relay port
    pub smtp_port: u16,
    /// SMTP username
    pub smtp_username: String,
    /// SMTP password
    #[serde(skip_serializing)]
    pub smtp_password: String,
    /// Sender mailbox
    pub from: String,
}

/// Checkout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutConfig {
    /// ISO currency code, lowercase
    pub currency: String,
    /// Seconds a pending order holds its stock
    pub reservation_ttl: u64,
    /// Catalog seed file, loaded when the catalog is empty
    pub seed_path: Option<String>,
    /// Retries for processor, database and mail calls
    pub retry_max_attempts: usize,
    /// First retry delay in milliseconds
    pub retry_initial_delay_ms: u64,
    /// How long `POST /api/orders` waits for the payment intent, in milliseconds
    pub placement_timeout_ms: u64,
    /// Dead letter queue capacity
    pub dead_letter_capacity: usize,
}

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    /// Session lifetime in seconds (default: 7 days)
    pub session_ttl: u64,
    /// Mark the session cookie `Secure`
    pub secure_cookies: bool,
}

/// Configuration problems found by [`Config::validate`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Required settings are missing
    #[error("missing required configuration: {}", .0.join(", "))]
    Missing(Vec<&'static str>),

    /// A setting has an unusable value
    #[error("invalid configuration for {name}: {reason}")]
    Invalid {
        /// Variable name
        name: &'static str,
        /// What is wrong
        reason: String,
    },
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key).and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn string(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    lookup(key).unwrap_or_else(|| default.to_string())
}

fn optional(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key).filter(|s| !s.trim().is_empty())
}

impl Config {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key/value source.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let lookup = &lookup;
        Self {
            server: ServerConfig {
                host: string(lookup, "HOST", "0.0.0.0"),
                port: parsed(lookup, "PORT", 3000),
                public_base_url: string(lookup, "PUBLIC_BASE_URL", "http://localhost:3000")
                    .trim_end_matches('/')
                    .to_string(),
                shutdown_timeout: parsed(lookup, "SHUTDOWN_TIMEOUT", 30),
            },
            database: DatabaseConfig {
                url: optional(lookup, "DATABASE_URL"),
                max_connections: parsed(lookup, "DATABASE_MAX_CONNECTIONS", 10),
            },
            stripe: StripeConfig {
                secret_key: optional(lookup, "STRIPE_SECRET_KEY"),
                webhook_secret: optional(lookup, "STRIPE_WEBHOOK_SECRET"),
                api_base: string(lookup, "STRIPE_API_BASE", "https://api.stripe.com"),
                webhook_tolerance: parsed(lookup, "STRIPE_WEBHOOK_TOLERANCE", 300),
                use_mock: parsed(lookup, "PAYMENTS_MOCK", false),
            },
            google: GoogleConfig {
                client_id: optional(lookup, "GOOGLE_CLIENT_ID"),
                client_secret: optional(lookup, "GOOGLE_CLIENT_SECRET"),
            },
            email: EmailConfig {
                smtp_host: optional(lookup, "SMTP_HOST"),
                smtp_port: parsed(lookup, "SMTP_PORT", 587),
                smtp_username: string(lookup, "SMTP_USERNAME", ""),
                smtp_password: string(lookup, "SMTP_PASSWORD", ""),
                from: string(lookup, "EMAIL_FROM", "Farm Stand <orders@localhost>"),
            },
            checkout: CheckoutConfig {
                currency: string(lookup, "CURRENCY", "usd").to_lowercase(),
                reservation_ttl: parsed(lookup, "RESERVATION_TTL", 30 * 60),
                seed_path: optional(lookup, "CATALOG_SEED_PATH"),
                retry_max_attempts: parsed(lookup, "RETRY_MAX_ATTEMPTS", 3),
                retry_initial_delay_ms: parsed(lookup, "RETRY_INITIAL_DELAY_MS", 200),
                placement_timeout_ms: parsed(lookup, "ORDER_PLACEMENT_TIMEOUT_MS", 15_000),
                dead_letter_capacity: parsed(lookup, "DEAD_LETTER_CAPACITY", 1000),
            },
            auth: AuthSettings {
                session_ttl: parsed(lookup, "SESSION_TTL", 7 * 24 * 60 * 60),
                secure_cookies: parsed(lookup, "SECURE_COOKIES", true),
            },
        }
    }

    /// Check that every secret the configured integrations need is present.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] listing every absent variable, or
    /// [`ConfigError::Invalid`] for unusable values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut missing = Vec::new();

        if !self.stripe.use_mock && self.stripe.secret_key.is_none() {
            missing.push("STRIPE_SECRET_KEY");
        }
        if self.stripe.webhook_secret.is_none() {
            missing.push("STRIPE_WEBHOOK_SECRET");
        }
        if self.google.client_id.is_none() {
            missing.push("GOOGLE_CLIENT_ID");
        }
        if self.google.client_secret.is_none() {
            missing.push("GOOGLE_CLIENT_SECRET");
        }
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        if self.checkout.currency.len() != 3 {
            return Err(ConfigError::Invalid {
                name: "CURRENCY",
                reason: format!("expected a 3-letter ISO code, got {:?}", self.checkout.currency),
            });
        }
        if self.checkout.reservation_ttl == 0 {
            return Err(ConfigError::Invalid {
                name: "RESERVATION_TTL",
                reason: "must be at least one second".to_string(),
            });
        }
        Ok(())
    }

    /// Address to bind the HTTP listener to
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Where Google sends users back after consent
    #[must_use]
    pub fn oauth_redirect_uri(&self) -> String {
        format!("{}/auth/google/callback", self.server.public_base_url)
    }

    /// Reservation lifetime
    #[must_use]
    pub const fn reservation_ttl(&self) -> Duration {
        Duration::from_secs(self.checkout.reservation_ttl)
    }
}

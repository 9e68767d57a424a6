//! # Farmstand Runtime
//!
//! Executes reducers: [`Store`] serializes every reduction behind one write
//! lock, runs the returned effects on spawned tasks and feeds their results
//! back in. Around it sit the pieces effects need when they talk to the
//! outside world: [`retry`] with exponential backoff, a bounded
//! [`DeadLetterQueue`] for work that ran out of retries, [`HealthCheck`]s
//! for readiness probes and the Prometheus [`metrics`] recorder.
//!
//! ```ignore
//! use farmstand_runtime::Store;
//!
//! let store = Store::new(CheckoutState::new(), CheckoutReducer::new(), environment);
//! store.send(CheckoutAction::PaymentSucceeded { payment_intent_id }).await?;
//! let completed = store.state(|s| s.orders.len()).await;
//! ```

pub mod dead_letter;
pub mod health;
pub mod metrics;
pub mod retry;
pub mod store;

pub use dead_letter::{DeadLetter, DeadLetterQueue};
pub use health::{HealthCheck, HealthReport, HealthStatus};
pub use retry::RetryPolicy;
pub use store::{EffectHandle, Store, StoreConfig};

/// Store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// [`Store::shutdown`] was called; no new actions are accepted.
    #[error("store is shutting down")]
    ShutdownInProgress,

    /// Effects still running when the shutdown deadline passed.
    #[error("shutdown timed out with {0} effects still running")]
    ShutdownTimeout(usize),

    /// No matching action before the deadline.
    #[error("timed out waiting for the outcome")]
    Timeout,

    /// The feedback channel closed.
    #[error("action feedback channel closed")]
    ChannelClosed,
}

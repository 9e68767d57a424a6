//! Exponential backoff for effects that call out of the process.
//!
//! Payment processor calls retry only errors their predicate marks as
//! transient ([`retry_with_predicate`]); a declined card should fail at once.
//! Persistence writes, refunds and emails retry every error and, once out of
//! attempts, are recorded in the [`DeadLetterQueue`]
//! ([`retry_or_dead_letter`]).
//!
//! ```rust
//! use farmstand_runtime::retry::{RetryPolicy, retry_with_predicate};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), String> {
//! let policy = RetryPolicy::builder()
//!     .max_retries(4)
//!     .initial_delay(Duration::from_millis(200))
//!     .jitter(true)
//!     .build();
//!
//! let intent = retry_with_predicate(
//!     policy,
//!     || async { Ok::<_, String>("pi_123") },
//!     |err: &String| err.contains("timeout"),
//! )
//! .await?;
//! # Ok(())
//! # }
//! ```

use crate::DeadLetterQueue;
use crate::metrics::RetryMetrics;
use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// How often and how patiently to retry.
///
/// The delay before retry `n` (zero-based) is
/// `initial_delay * multiplier^n`, capped at `max_delay`. With `jitter` each
/// delay is scaled by a random factor in `[0.5, 1.0]` so that effects that
/// failed together do not retry together.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: usize,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Randomize delays.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    /// 3 retries starting at 100ms, doubling, capped at 30s, no jitter.
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Start from the defaults.
    #[must_use]
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder(Self::default())
    }

    /// Total attempts including the first.
    #[must_use]
    pub const fn attempts(&self) -> usize {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (zero-based).
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn delay_for_attempt(&self, retry: usize) -> Duration {
        let growth = self.multiplier.powi(retry.min(64) as i32);
        let seconds = (self.initial_delay.as_secs_f64() * growth).min(self.max_delay.as_secs_f64());
        let seconds = if self.jitter {
            seconds * rand::thread_rng().gen_range(0.5..=1.0)
        } else {
            seconds
        };
        Duration::try_from_secs_f64(seconds.max(0.0)).unwrap_or(self.max_delay)
    }
}

/// Builder returned by [`RetryPolicy::builder`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder(RetryPolicy);

impl RetryPolicyBuilder {
    /// Retries after the first attempt.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: usize) -> Self {
        self.0.max_retries = max_retries;
        self
    }

    /// Delay before the first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.0.initial_delay = delay;
        self
    }

    /// Cap on any single delay.
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.0.max_delay = delay;
        self
    }

    /// Growth factor between delays.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.0.multiplier = multiplier;
        self
    }

    /// Randomize delays.
    #[must_use]
    pub const fn jitter(mut self, jitter: bool) -> Self {
        self.0.jitter = jitter;
        self
    }

    /// Finish.
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        self.0
    }
}

/// Run `operation` until it succeeds, fails with an error `is_retryable`
/// rejects, or the policy runs out of retries.
///
/// # Errors
///
/// The first non-retryable error, or the error of the last attempt.
pub async fn retry_with_predicate<F, Fut, T, E, P>(
    policy: RetryPolicy,
    mut operation: F,
    is_retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: Fn(&E) -> bool,
{
    let mut retry = 0;
    loop {
        let err = match operation().await {
            Ok(value) => {
                if retry > 0 {
                    RetryMetrics::record_success();
                    tracing::debug!(retries = retry, "Succeeded after retrying");
                }
                return Ok(value);
            },
            Err(err) => err,
        };

        if !is_retryable(&err) {
            tracing::debug!(error = %err, "Permanent error, not retrying");
            return Err(err);
        }
        if retry >= policy.max_retries {
            RetryMetrics::record_exhausted();
            tracing::warn!(attempts = retry + 1, error = %err, "Out of retries");
            return Err(err);
        }

        let delay = policy.delay_for_attempt(retry);
        RetryMetrics::record_attempt();
        tracing::debug!(retry, delay_ms = delay.as_millis(), error = %err, "Retrying");
        tokio::time::sleep(delay).await;
        retry += 1;
    }
}

/// Retry every error, then record the failure under `operation_name`.
///
/// # Errors
///
/// The error of the last attempt, after it was dead-lettered.
pub async fn retry_or_dead_letter<F, Fut, T, E>(
    policy: RetryPolicy,
    dlq: &DeadLetterQueue,
    operation_name: impl Into<String>,
    operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let attempts = policy.attempts();
    retry_with_predicate(policy, operation, |_| true)
        .await
        .inspect_err(|err| dlq.record(operation_name, err.to_string(), attempts))
}

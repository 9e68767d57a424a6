//! # Farmstand Testing
//!
//! Testing utilities and helpers for the Farmstand checkout engine.
//!
//! This crate provides:
//! - Deterministic clocks (`FixedClock`, `ManualClock`)
//! - The Given-When-Then [`ReducerTest`] harness and effect assertions
//! - Helpers that drive effects inline so reducer tests can inspect the
//!   actions effects feed back
//!
//! ## Example
//!
//! ```ignore
//! use farmstand_testing::{ReducerTest, test_clock};
//!
//! ReducerTest::new(CheckoutReducer)
//!     .with_env(test_environment())
//!     .given_state(CheckoutState::default())
//!     .when_action(CheckoutAction::PlaceOrder { .. })
//!     .then_state(|s| assert_eq!(s.orders.len(), 1))
//!     .run();
//! ```

use chrono::{DateTime, Duration, Utc};
use farmstand_core::environment::Clock;


pub use reducer_test::{ReducerTest, assertions};

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Duration, Utc};
    use std::sync::{Arc, Mutex};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// ```
    /// use farmstand_testing::mocks::FixedClock;
    /// use farmstand_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when a test advances it.
    ///
    /// Clones share the same time, so a test can keep one handle and give
    /// another to the environment under test.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock frozen at `time`
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward
        pub fn advance(&self, by: Duration) {
            let mut time = self
                .time
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *time += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self
                .time
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
        }
    }

    /// The instant every test clock starts at (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_epoch() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or_default()
    }

    /// Create a default fixed clock for tests
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_epoch())
    }
}

/// Test helpers and utilities
pub mod helpers {
    use farmstand_core::effect::Effect;

    /// Execute effects inline and collect the actions they produce.
    ///
    /// `Future` effects are awaited in order, `Parallel` and `Sequential`
    /// children are flattened. `Delay` effects are timers and are skipped;
    /// use [`delayed_actions`] to inspect them.
    pub async fn run_effects<A, I>(effects: I) -> Vec<A>
    where
        I: IntoIterator<Item = Effect<A>>,
    {
        let mut pending: Vec<Effect<A>> = effects.into_iter().collect();
        pending.reverse();
        let mut produced = Vec::new();

        while let Some(effect) = pending.pop() {
            match effect {
                Effect::None | Effect::Delay { .. } => {},
                Effect::Future(fut) => {
                    if let Some(action) = fut.await {
                        produced.push(action);
                    }
                },
                Effect::Parallel(children) | Effect::Sequential(children) => {
                    pending.extend(children.into_iter().rev());
                },
            }
        }

        produced
    }

    /// Actions scheduled by `Delay` effects, with their delays.
    #[must_use]
    pub fn delayed_actions<A: Clone>(effects: &[Effect<A>]) -> Vec<(std::time::Duration, A)> {
        let mut found = Vec::new();
        for effect in effects {
            match effect {
                Effect::Delay { duration, action } => found.push((*duration, (**action).clone())),
                Effect::Parallel(children) | Effect::Sequential(children) => {
                    found.extend(delayed_actions(children));
                },
                Effect::None | Effect::Future(_) => {},
            }
        }
        found
    }

    /// Install a test tracing subscriber (idempotent).
    ///
    /// Honors `RUST_LOG`; output is captured by the test harness.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }
}

pub use helpers::{delayed_actions, init_test_tracing, run_effects};
pub use mocks::{FixedClock, ManualClock, test_clock, test_epoch};

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use farmstand_core::effect::Effect;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
        assert_eq!(clock.now().to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_manual_clock_advances_shared_time() {
        let clock = ManualClock::new(test_epoch());
        let observer = clock.clone();

        clock.advance(Duration::minutes(31));

        assert_eq!(observer.now() - test_epoch(), Duration::minutes(31));
    }

    #[tokio::test]
    async fn test_run_effects_flattens_and_skips_timers() {
        let effects = vec![
            Effect::Future(Box::pin(async { Some(1) })),
            Effect::Parallel(vec![
                Effect::Future(Box::pin(async { Some(2) })),
                Effect::Future(Box::pin(async { None })),
            ]),
            Effect::Delay {
                duration: std::time::Duration::from_secs(60),
                action: Box::new(99),
            },
        ];

        let delayed = delayed_actions(&effects);
        assert_eq!(delayed, vec![(std::time::Duration::from_secs(60), 99)]);

        let produced = run_effects(effects).await;
        assert_eq!(produced, vec![1, 2]);
    }
}

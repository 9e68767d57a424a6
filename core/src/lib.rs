//! # Farmstand Core
//!
//! The checkout engine is written as a reducer. A reducer receives the
//! current state, one action and its environment. It mutates the state in
//! place and answers with [`effect::Effect`] values describing the I/O that
//! should follow. It never performs that I/O itself; `farmstand-runtime`
//! runs the effects and feeds whatever action they produce back in.
//!
//! Dependencies with side effects (payment processor, mailer, database,
//! clock) reach the reducer only through its environment, which is what
//! makes reducers testable with fixed clocks and in-memory fakes.
//!
//! ```ignore
//! use farmstand_core::{SmallVec, effect::Effect, reducer::Reducer};
//!
//! impl Reducer for CheckoutReducer {
//!     type State = CheckoutState;
//!     type Action = CheckoutAction;
//!     type Environment = CheckoutEnvironment;
//!
//!     fn reduce(
//!         &self,
//!         state: &mut CheckoutState,
//!         action: CheckoutAction,
//!         env: &CheckoutEnvironment,
//!     ) -> SmallVec<[Effect<CheckoutAction>; 4]> {
//!         SmallVec::new()
//!     }
//! }
//! ```

pub use smallvec::{SmallVec, smallvec};

pub mod effect_macros;

/// The [`Reducer`](reducer::Reducer) trait.
pub mod reducer {
    use super::effect::Effect;
    use smallvec::SmallVec;

    /// State machine driven by actions.
    ///
    /// Implementations must be deterministic given the same state, action
    /// and environment; anything nondeterministic (time, ids from outside,
    /// network) comes from `Environment` or arrives inside an action.
    pub trait Reducer {
        /// State owned by the store and mutated in place.
        type State;

        /// Inputs: commands from callers and outcomes reported by effects.
        type Action;

        /// Injected dependencies.
        type Environment;

        /// Apply `action` to `state` and describe the follow-up work.
        ///
        /// Returning an empty vector means the action needed no I/O (or was
        /// ignored, e.g. a duplicate notification for a finished order).
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]>;
    }
}

/// Descriptions of side effects.
pub mod effect {
    use std::fmt;
    use std::future::Future;
    use std::pin::Pin;
    use std::time::Duration;

    /// Work for the runtime to perform after a reduction.
    pub enum Effect<Action> {
        /// Nothing.
        None,

        /// Run all children concurrently.
        Parallel(Vec<Effect<Action>>),

        /// Run children one after another; each finishes before the next starts.
        Sequential(Vec<Effect<Action>>),

        /// Send `action` back to the store after `duration`.
        Delay {
            /// Wait before sending.
            duration: Duration,
            /// The action to send.
            action: Box<Action>,
        },

        /// Async work; a `Some` result is sent back to the store.
        Future(Pin<Box<dyn Future<Output = Option<Action>> + Send>>),
    }

    impl<Action: fmt::Debug> fmt::Debug for Effect<Action> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Self::None => f.write_str("Effect::None"),
                Self::Parallel(children) => f.debug_tuple("Effect::Parallel").field(children).finish(),
                Self::Sequential(children) => f.debug_tuple("Effect::Sequential").field(children).finish(),
                Self::Delay { duration, action } => f
                    .debug_struct("Effect::Delay")
                    .field("duration", duration)
                    .field("action", action)
                    .finish(),
                Self::Future(_) => f.write_str("Effect::Future(<future>)"),
            }
        }
    }

    impl<Action> Effect<Action> {
        /// Run `effects` concurrently.
        #[must_use]
        pub const fn merge(effects: Vec<Self>) -> Self {
            Self::Parallel(effects)
        }

        /// Run `effects` in order.
        #[must_use]
        pub const fn chain(effects: Vec<Self>) -> Self {
            Self::Sequential(effects)
        }

        /// `true` for [`Effect::None`].
        #[must_use]
        pub const fn is_none(&self) -> bool {
            matches!(self, Self::None)
        }
    }
}

/// Environment traits shared by reducers.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Source of the current time.
    ///
    /// Order timestamps and reservation deadlines read the clock through
    /// this trait so tests can pin it.
    pub trait Clock: Send + Sync {
        /// Current instant.
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall clock.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::effect::Effect;
    use super::environment::{Clock, SystemClock};
    use std::time::Duration;

    #[test]
    fn merge_and_chain_keep_children() {
        let merged: Effect<u32> = Effect::merge(vec![Effect::None, Effect::None]);
        assert!(matches!(merged, Effect::Parallel(ref children) if children.len() == 2));

        let chained: Effect<u32> = Effect::chain(vec![Effect::None]);
        assert!(matches!(chained, Effect::Sequential(ref children) if children.len() == 1));
        assert!(!chained.is_none());
    }

    #[test]
    fn debug_does_not_poll_futures() {
        let future: Effect<u32> = Effect::Future(Box::pin(async { Some(1) }));
        assert_eq!(format!("{future:?}"), "Effect::Future(<future>)");

        let delay: Effect<u32> = Effect::Delay {
            duration: Duration::from_secs(1),
            action: Box::new(7),
        };
        let rendered = format!("{delay:?}");
        assert!(rendered.starts_with("Effect::Delay"));
        assert!(rendered.contains('7'));
    }

    #[test]
    fn system_clock_is_monotonic_enough() {
        let clock = SystemClock;
        let first = clock.now();
        assert!(clock.now() >= first);
    }
}

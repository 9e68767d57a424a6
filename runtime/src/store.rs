//! The store: serialized reducer execution plus effect scheduling.
//!
//! Every [`Store::send`] takes the state write lock, runs the reducer and
//! releases the lock before any effect starts. Effects run on spawned tasks;
//! an action an effect returns is sent back through the same lock and then
//! broadcast, which is what [`Store::send_and_wait_for`] listens to.
//!
//! Two counters track in-flight work:
//! - the per-send counter behind an [`EffectHandle`] (effects spawned
//!   directly by that send)
//! - the store-wide counter read by [`Store::pending_effects`] and awaited by
//!   [`Store::shutdown`]
//!
//! A task feeds its action back before it releases its slot, so a chain of
//! effects never lets the store-wide counter touch zero midway. Timers
//! (`Effect::Delay`) are not counted: shutdown does not wait for reservation
//! expiries, and a timer that fires after shutdown began is discarded.

use crate::{DeadLetterQueue, HealthCheck, StoreError};
use farmstand_core::{effect::Effect, reducer::Reducer};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, broadcast, watch};

/// Store construction options.
///
/// ```ignore
/// let dlq = DeadLetterQueue::new(500);
/// let config = StoreConfig::default()
///     .with_dead_letter_queue(dlq.clone())
///     .with_shutdown_timeout(Duration::from_secs(10));
/// ```
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Queue reported by [`Store::health`]; share it with the environment.
    pub dlq: DeadLetterQueue,
    /// Buffered feedback actions per observer before it lags.
    pub broadcast_capacity: usize,
    /// Shutdown timeout when [`Store::shutdown`] is given `None`.
    pub shutdown_timeout: Duration,
}

impl StoreConfig {
    /// Report on this dead letter queue.
    #[must_use]
    pub fn with_dead_letter_queue(mut self, dlq: DeadLetterQueue) -> Self {
        self.dlq = dlq;
        self
    }

    /// Feedback buffer per observer.
    #[must_use]
    pub const fn with_broadcast_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_capacity = capacity;
        self
    }

    /// Default shutdown timeout.
    #[must_use]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dlq: DeadLetterQueue::default(),
            broadcast_capacity: 256,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

type Counter = Arc<watch::Sender<usize>>;

fn new_counter() -> Counter {
    Arc::new(watch::Sender::new(0))
}

async fn wait_for_zero(counter: &Counter) {
    let mut rx = counter.subscribe();
    // The sender is alive while we hold `counter`, so this cannot fail.
    let _ = rx.wait_for(|n| *n == 0).await;
}

/// One running effect, counted against its send and against the store.
struct Slot {
    send: Counter,
    store: Counter,
}

impl Slot {
    fn take(send: &Counter, store: &Counter) -> Self {
        send.send_modify(|n| *n += 1);
        store.send_modify(|n| *n += 1);
        Self {
            send: Arc::clone(send),
            store: Arc::clone(store),
        }
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.send.send_modify(|n| *n = n.saturating_sub(1));
        self.store.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Completion handle for the effects started by one [`Store::send`].
///
/// Actions fed back by those effects are separate sends with their own
/// handles, so waiting here does not wait for the whole chain.
#[derive(Clone)]
pub struct EffectHandle {
    running: Counter,
}

impl EffectHandle {
    /// Effects of this send still running.
    #[must_use]
    pub fn running(&self) -> usize {
        *self.running.borrow()
    }

    /// Wait until they have all finished.
    pub async fn wait(&self) {
        wait_for_zero(&self.running).await;
    }

    /// [`wait`](Self::wait) with a deadline.
    ///
    /// # Errors
    ///
    /// [`StoreError::Timeout`] if effects are still running at the deadline.
    pub async fn wait_with_timeout(&self, timeout: Duration) -> Result<(), StoreError> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| StoreError::Timeout)
    }
}

impl std::fmt::Debug for EffectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectHandle")
            .field("running", &self.running())
            .finish()
    }
}

struct Inner<R: Reducer> {
    state: RwLock<R::State>,
    reducer: R,
    environment: R::Environment,
    dlq: DeadLetterQueue,
    accepting: AtomicBool,
    in_flight: Counter,
    shutdown_timeout: Duration,
    feedback: broadcast::Sender<R::Action>,
}

/// Runtime for one reducer. Clones share the same state.
pub struct Store<R: Reducer> {
    inner: Arc<Inner<R>>,
}

impl<R: Reducer> Clone for Store<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R> Store<R>
where
    R: Reducer + Send + Sync + 'static,
    R::State: Send + Sync + 'static,
    R::Action: Clone + Send + 'static,
    R::Environment: Send + Sync + 'static,
{
    /// Store with the default [`StoreConfig`].
    #[must_use]
    pub fn new(initial_state: R::State, reducer: R, environment: R::Environment) -> Self {
        Self::with_config(initial_state, reducer, environment, StoreConfig::default())
    }

    /// Store with explicit options.
    #[must_use]
    pub fn with_config(
        initial_state: R::State,
        reducer: R,
        environment: R::Environment,
        config: StoreConfig,
    ) -> Self {
        let (feedback, _) = broadcast::channel(config.broadcast_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(initial_state),
                reducer,
                environment,
                dlq: config.dlq,
                accepting: AtomicBool::new(true),
                in_flight: new_counter(),
                shutdown_timeout: config.shutdown_timeout,
                feedback,
            }),
        }
    }

    /// Reduce `action` and start its effects.
    ///
    /// # Errors
    ///
    /// [`StoreError::ShutdownInProgress`] once [`shutdown`](Self::shutdown)
    /// has been called.
    #[tracing::instrument(skip_all, name = "store_send")]
    pub async fn send(&self, action: R::Action) -> Result<EffectHandle, StoreError> {
        if !self.inner.accepting.load(Ordering::Acquire) {
            metrics::counter!("store.shutdown.rejected_actions").increment(1);
            return Err(StoreError::ShutdownInProgress);
        }
        metrics::counter!("store.actions.total").increment(1);

        let effects = {
            let mut state = self.inner.state.write().await;
            let started = Instant::now();
            let effects = self.inner.reducer.reduce(&mut state, action, &self.inner.environment);
            metrics::histogram!("store.reducer.duration_seconds").record(started.elapsed().as_secs_f64());
            effects
        };

        let handle = EffectHandle { running: new_counter() };
        for effect in effects {
            self.run(effect, &handle.running);
        }
        Ok(handle)
    }

    /// Send `action` and wait for the first fed-back action matching
    /// `predicate`.
    ///
    /// The subscription is taken before the send, so a fast effect cannot be
    /// missed. `action` itself is never matched. When the matching action is
    /// returned it has already been reduced.
    ///
    /// # Errors
    ///
    /// - [`StoreError::ShutdownInProgress`]: the store no longer accepts actions
    /// - [`StoreError::Timeout`]: nothing matched within `timeout`
    /// - [`StoreError::ChannelClosed`]: the feedback channel closed
    pub async fn send_and_wait_for<F>(
        &self,
        action: R::Action,
        predicate: F,
        timeout: Duration,
    ) -> Result<R::Action, StoreError>
    where
        F: Fn(&R::Action) -> bool,
    {
        self.send_and_wait_or_recheck(action, predicate, |_| None, timeout).await
    }

    /// Like [`send_and_wait_for`](Self::send_and_wait_for), but recovers
    /// from a lagging observer.
    ///
    /// A burst of feedback larger than the broadcast capacity drops the
    /// oldest actions for this observer, and the match may be among them.
    /// After a lag `recheck` is run against the current state; a `Some` is
    /// returned as the outcome, `None` keeps waiting.
    ///
    /// # Errors
    ///
    /// Same as [`send_and_wait_for`](Self::send_and_wait_for).
    pub async fn send_and_wait_or_recheck<F, C>(
        &self,
        action: R::Action,
        predicate: F,
        recheck: C,
        timeout: Duration,
    ) -> Result<R::Action, StoreError>
    where
        F: Fn(&R::Action) -> bool,
        C: Fn(&R::State) -> Option<R::Action>,
    {
        let mut feedback = self.inner.feedback.subscribe();
        self.send(action).await?;

        let matching = async {
            loop {
                match feedback.recv().await {
                    Ok(action) if predicate(&action) => return Ok(action),
                    Ok(_) => {},
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        metrics::counter!("store.feedback.lagged").increment(1);
                        tracing::warn!(missed, "Feedback observer lagged, rechecking state");
                        if let Some(outcome) = self.state(&recheck).await {
                            return Ok(outcome);
                        }
                    },
                    Err(broadcast::error::RecvError::Closed) => return Err(StoreError::ChannelClosed),
                }
            }
        };
        tokio::time::timeout(timeout, matching)
            .await
            .map_err(|_| StoreError::Timeout)?
    }

    /// Read the state under the read lock.
    pub async fn state<T>(&self, read: impl FnOnce(&R::State) -> T) -> T {
        read(&*self.inner.state.read().await)
    }

    /// Effects currently running across all sends (timers excluded).
    #[must_use]
    pub fn pending_effects(&self) -> usize {
        *self.inner.in_flight.borrow()
    }

    /// The dead letter queue this store reports on.
    #[must_use]
    pub fn dlq(&self) -> DeadLetterQueue {
        self.inner.dlq.clone()
    }

    /// `store` health: unhealthy when shutting down or the dead letter queue
    /// is full, degraded above half full.
    #[must_use]
    pub fn health(&self) -> HealthCheck {
        let dead = self.inner.dlq.len();
        let capacity = self.inner.dlq.capacity();

        let check = if !self.inner.accepting.load(Ordering::Acquire) {
            HealthCheck::unhealthy("store", "Store is shutting down")
        } else if dead >= capacity {
            HealthCheck::unhealthy("store", "Dead letter queue is full")
        } else if dead * 2 > capacity {
            HealthCheck::degraded("store", format!("Dead letter queue holds {dead} of {capacity}"))
        } else {
            HealthCheck::healthy("store")
        };

        check
            .with_metadata("dlq_size", dead)
            .with_metadata("dlq_capacity", capacity)
            .with_metadata("pending_effects", self.pending_effects())
    }

    /// Stop accepting actions and wait for running effects.
    ///
    /// `None` uses the configured timeout.
    ///
    /// # Errors
    ///
    /// [`StoreError::ShutdownTimeout`] with the number of effects still
    /// running at the deadline.
    pub async fn shutdown(&self, timeout: Option<Duration>) -> Result<(), StoreError> {
        let timeout = timeout.unwrap_or(self.inner.shutdown_timeout);
        self.inner.accepting.store(false, Ordering::Release);
        tracing::info!(
            pending_effects = self.pending_effects(),
            timeout_ms = timeout.as_millis(),
            "Store shutting down"
        );

        if tokio::time::timeout(timeout, wait_for_zero(&self.inner.in_flight))
            .await
            .is_err()
        {
            let pending = self.pending_effects();
            tracing::error!(pending_effects = pending, "Store shutdown timed out");
            return Err(StoreError::ShutdownTimeout(pending));
        }

        tracing::info!("Store drained");
        Ok(())
    }

    /// Reduce an effect's result, then publish it to observers.
    async fn feed_back(&self, action: R::Action) {
        if let Err(error) = self.send(action.clone()).await {
            tracing::warn!(error = %error, "Dropped fed-back action");
        }
        let _ = self.inner.feedback.send(action);
    }

    fn run(&self, effect: Effect<R::Action>, send: &Counter) {
        match effect {
            Effect::None => {},
            Effect::Future(future) => {
                metrics::counter!("store.effects.executed", "type" => "future").increment(1);
                let slot = Slot::take(send, &self.inner.in_flight);
                let store = self.clone();
                tokio::spawn(async move {
                    if let Some(action) = future.await {
                        store.feed_back(action).await;
                    }
                    drop(slot);
                });
            },
            Effect::Delay { duration, action } => {
                metrics::counter!("store.effects.executed", "type" => "delay").increment(1);
                let store = self.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(duration).await;
                    if store.inner.accepting.load(Ordering::Acquire) {
                        store.feed_back(*action).await;
                    }
                });
            },
            Effect::Parallel(effects) => {
                for effect in effects {
                    self.run(effect, send);
                }
            },
            Effect::Sequential(effects) => {
                metrics::counter!("store.effects.executed", "type" => "sequential").increment(1);
                let slot = Slot::take(send, &self.inner.in_flight);
                let store = self.clone();
                tokio::spawn(async move {
                    for effect in effects {
                        let step = new_counter();
                        store.run(effect, &step);
                        wait_for_zero(&step).await;
                    }
                    drop(slot);
                });
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use farmstand_core::{SmallVec, smallvec};

    /// Counts units through reserve / settle round trips.
    #[derive(Debug, Clone, PartialEq)]
    enum Unit {
        Reserve,
        Release,
        Reserved(i32),
        ReserveLater,
        ReserveThree,
        ReserveTwiceThenRelease,
        Explode,
    }

    struct Units;

    impl Reducer for Units {
        type State = i32;
        type Action = Unit;
        type Environment = ();

        fn reduce(&self, held: &mut i32, action: Unit, (): &()) -> SmallVec<[Effect<Unit>; 4]> {
            let fut = |action: Unit| Effect::Future(Box::pin(async move { Some(action) }));
            match action {
                Unit::Reserve => {
                    *held += 1;
                    let now = *held;
                    smallvec![fut(Unit::Reserved(now))]
                },
                Unit::Release => {
                    *held -= 1;
                    SmallVec::new()
                },
                Unit::Reserved(_) => SmallVec::new(),
                Unit::ReserveLater => smallvec![Effect::Delay {
                    duration: Duration::from_millis(10),
                    action: Box::new(Unit::Reserve),
                }],
                Unit::ReserveThree => {
                    smallvec![Effect::Parallel(vec![fut(Unit::Reserve), fut(Unit::Reserve), fut(Unit::Reserve)])]
                },
                Unit::ReserveTwiceThenRelease => {
                    smallvec![Effect::Sequential(vec![fut(Unit::Reserve), fut(Unit::Reserve), fut(Unit::Release)])]
                },
                Unit::Explode => smallvec![Effect::Future(Box::pin(async { panic!("effect blew up") }))],
            }
        }
    }

    fn store() -> Store<Units> {
        Store::new(0, Units, ())
    }

    #[tokio::test]
    async fn test_future_result_is_fed_back() {
        let store = store();
        let handle = store.send(Unit::ReserveThree).await.unwrap();
        handle.wait_with_timeout(Duration::from_secs(1)).await.unwrap();

        assert_eq!(store.state(|held| *held).await, 3);
    }

    #[tokio::test]
    async fn test_sequential_effects_run_in_order() {
        let store = store();
        let handle = store.send(Unit::ReserveTwiceThenRelease).await.unwrap();
        handle.wait_with_timeout(Duration::from_secs(1)).await.unwrap();

        assert_eq!(store.state(|held| *held).await, 1);
    }

    #[tokio::test]
    async fn test_timer_fires_later() {
        let store = store();
        store.send(Unit::ReserveLater).await.unwrap();
        assert_eq!(store.state(|held| *held).await, 0);
        assert_eq!(store.pending_effects(), 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.state(|held| *held).await, 1);
    }

    #[tokio::test]
    async fn test_wait_for_sees_reduced_feedback() {
        let store = store();
        let outcome = store
            .send_and_wait_for(Unit::Reserve, |a| matches!(a, Unit::Reserved(_)), Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(outcome, Unit::Reserved(1));
        assert_eq!(store.state(|held| *held).await, 1);
    }

    #[tokio::test]
    async fn test_wait_for_times_out_without_match() {
        let store = store();
        let outcome = store
            .send_and_wait_for(Unit::Release, |a| matches!(a, Unit::Reserved(_)), Duration::from_millis(50))
            .await;

        assert!(matches!(outcome, Err(StoreError::Timeout)));
    }

    #[tokio::test]
    async fn test_lagged_observer_rechecks_state() {
        let store = Store::with_config(0, Units, (), StoreConfig::default().with_broadcast_capacity(1));

        let waiting = store.send_and_wait_or_recheck(
            Unit::Release,
            |_| false,
            |held| Some(Unit::Reserved(*held)),
            Duration::from_secs(1),
        );
        let flood = async {
            tokio::task::yield_now().await;
            for _ in 0..4 {
                let _ = store.inner.feedback.send(Unit::Reserve);
            }
        };
        let (outcome, ()) = tokio::join!(waiting, flood);

        assert_eq!(outcome.unwrap(), Unit::Reserved(-1));
    }

    #[tokio::test]
    async fn test_panicking_effect_releases_its_slot() {
        let store = store();
        let handle = store.send(Unit::Explode).await.unwrap();
        handle.wait_with_timeout(Duration::from_secs(1)).await.unwrap();

        assert_eq!(store.pending_effects(), 0);
        store.send(Unit::Release).await.unwrap();
        assert_eq!(store.state(|held| *held).await, -1);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_and_reports_unhealthy() {
        let store = store();
        store.shutdown(Some(Duration::from_secs(1))).await.unwrap();

        assert!(matches!(store.send(Unit::Reserve).await, Err(StoreError::ShutdownInProgress)));
        assert!(store.health().status.is_unhealthy());
    }

    #[tokio::test]
    async fn test_health_tracks_dead_letters() {
        let dlq = DeadLetterQueue::new(4);
        let store = Store::with_config(0, Units, (), StoreConfig::default().with_dead_letter_queue(dlq.clone()));
        assert!(store.health().status.is_healthy());

        for n in 0..3 {
            dlq.record(format!("send_confirmation:{n}"), "smtp down", 3);
        }
        assert_eq!(store.health().status, crate::HealthStatus::Degraded);

        dlq.record("send_confirmation:3", "smtp down", 3);
        assert!(store.health().status.is_unhealthy());
    }
}

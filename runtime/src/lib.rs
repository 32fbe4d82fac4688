//! # Wishlist Runtime
//!
//! Runtime implementation for the wishlist coordination engine.
//!
//! This crate provides the Store runtime that coordinates reducer execution
//! and effect handling for one open list view.
//!
//! ## Core Components
//!
//! - **Store**: The runtime that manages state and executes effects
//! - **Effect Executor**: Executes effect descriptions and feeds actions back to reducers
//! - **Teardown**: `Store::close()` cancels running streams and discards late results
//!
//! ## Example
//!
//! ```ignore
//! use wishlist_runtime::Store;
//!
//! let store = Store::new(initial_state, my_reducer, environment);
//!
//! // Send an action
//! store.send(Action::DoSomething).await?;
//!
//! // Read state
//! let value = store.state(|s| s.some_field).await;
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, watch};
use wishlist_core::{effect::Effect, reducer::Reducer};

/// Retry logic with exponential backoff
pub mod retry;

/// Error types for the Store runtime
pub mod error {
    use thiserror::Error;

    /// Errors that can occur during Store operations
    #[derive(Error, Debug)]
    pub enum StoreError {
        /// An effect execution failed
        ///
        /// This error is logged but does not halt the store.
        #[error("Effect execution failed: {0}")]
        EffectFailed(String),

        /// Store is closed and not accepting new actions
        ///
        /// Returned by `send()` after `close()` was called.
        #[error("Store is shutting down")]
        ShutdownInProgress,

        /// Timeout waiting for a result action
        ///
        /// Returned by `send_and_wait_for` when the timeout expires before
        /// a matching action is received.
        #[error("Timeout waiting for action")]
        Timeout,

        /// Action broadcast channel closed
        #[error("Action broadcast channel closed")]
        ChannelClosed,
    }
}

pub use error::StoreError;
pub use retry::{RetryPolicy, retry_with_backoff};

/// Configuration for Store instances
///
/// # Example
///
/// ```
/// use wishlist_runtime::StoreConfig;
///
/// let config = StoreConfig::default().with_broadcast_capacity(256);
/// assert_eq!(config.broadcast_capacity, 256);
/// ```
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Number of actions buffered for slow observers
    pub broadcast_capacity: usize,
    /// How long `close()` waits for in-flight futures to drain
    pub shutdown_timeout: Duration,
}

impl StoreConfig {
    /// Set the action broadcast capacity
    #[must_use]
    pub const fn with_broadcast_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_capacity = capacity;
        self
    }

    /// Set the shutdown timeout
    #[must_use]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: 16,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Handle for tracking effect completion
///
/// Returned by [`Store::send()`] to allow waiting for the futures spawned by
/// that action. Stream effects are long-lived and are not tracked.
///
/// # Example
///
/// ```ignore
/// let mut handle = store.send(Action::Start).await?;
/// handle.wait_with_timeout(Duration::from_secs(5)).await?;
/// ```
#[derive(Clone)]
pub struct EffectHandle {
    effects: Arc<AtomicUsize>,
    completion: watch::Receiver<()>,
}

impl EffectHandle {
    fn new() -> (Self, EffectTracking) {
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = watch::channel(());

        let handle = Self {
            effects: Arc::clone(&counter),
            completion: rx,
        };

        let tracking = EffectTracking {
            counter,
            notifier: Arc::new(tx),
        };

        (handle, tracking)
    }

    /// Create a handle that's already complete
    #[must_use]
    pub fn completed() -> Self {
        let (tx, rx) = watch::channel(());
        let _ = tx.send(());

        Self {
            effects: Arc::new(AtomicUsize::new(0)),
            completion: rx,
        }
    }

    /// Wait for all tracked effects to complete
    pub async fn wait(&mut self) {
        while self.effects.load(Ordering::SeqCst) > 0 {
            if self.completion.changed().await.is_err() {
                break;
            }
        }
    }

    /// Wait for all tracked effects to complete with a timeout
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Timeout`] if the timeout expires first.
    pub async fn wait_with_timeout(&mut self, timeout: Duration) -> Result<(), StoreError> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| StoreError::Timeout)
    }
}

impl std::fmt::Debug for EffectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectHandle")
            .field("pending_effects", &self.effects.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Internal: Effect tracking context passed through effect execution
#[derive(Clone)]
struct EffectTracking {
    counter: Arc<AtomicUsize>,
    notifier: Arc<watch::Sender<()>>,
}

impl EffectTracking {
    fn increment(&self) {
        self.counter.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement(&self) {
        if self.counter.fetch_sub(1, Ordering::SeqCst) == 1 {
            // Counter reached zero, notify waiters
            let _ = self.notifier.send(());
        }
    }
}

/// Internal: RAII guard that decrements effect counters on drop
///
/// Ensures counters are always decremented, even if the effect panics.
struct DecrementGuard {
    tracking: EffectTracking,
    pending: Arc<AtomicUsize>,
}

impl Drop for DecrementGuard {
    fn drop(&mut self) {
        self.tracking.decrement();
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Store runtime for coordinating reducer execution and effect handling.
pub mod store {
    use super::{
        Arc, AtomicBool, AtomicUsize, DecrementGuard, Duration, Effect, EffectHandle,
        EffectTracking, Ordering, Reducer, RwLock, StoreConfig, StoreError, watch,
    };
    use futures::StreamExt;
    use tokio::sync::broadcast;

    /// The Store - runtime coordinator for a reducer
    ///
    /// The Store manages:
    /// 1. State (behind `RwLock` for concurrent access)
    /// 2. Reducer (coordination logic)
    /// 3. Environment (injected dependencies)
    /// 4. Effect execution (with feedback loop)
    ///
    /// Concurrent `send()` calls serialize at the reducer, which makes the
    /// reducer the single synchronization point of a view.
    pub struct Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E>,
    {
        state: Arc<RwLock<S>>,
        reducer: R,
        environment: E,
        config: StoreConfig,
        closed: Arc<AtomicBool>,
        close_signal: Arc<watch::Sender<bool>>,
        pending_effects: Arc<AtomicUsize>,
        /// Every action produced by an effect is broadcast to observers.
        ///
        /// This enables request-response waiting (`send_and_wait_for`).
        action_broadcast: broadcast::Sender<A>,
    }

    impl<S, A, E, R> Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Send + Sync + 'static,
        A: Send + Clone + 'static,
        S: Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        /// Create a new store with initial state, reducer, and environment
        #[must_use]
        pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
            Self::with_config(initial_state, reducer, environment, StoreConfig::default())
        }

        /// Create a new Store with custom configuration
        #[must_use]
        pub fn with_config(
            initial_state: S,
            reducer: R,
            environment: E,
            config: StoreConfig,
        ) -> Self {
            let (action_broadcast, _) = broadcast::channel(config.broadcast_capacity.max(1));
            let (close_signal, _) = watch::channel(false);

            Self {
                state: Arc::new(RwLock::new(initial_state)),
                reducer,
                environment,
                config,
                closed: Arc::new(AtomicBool::new(false)),
                close_signal: Arc::new(close_signal),
                pending_effects: Arc::new(AtomicUsize::new(0)),
                action_broadcast,
            }
        }

        /// Whether `close()` has been called
        #[must_use]
        pub fn is_closed(&self) -> bool {
            self.closed.load(Ordering::Acquire)
        }

        /// Close the store
        ///
        /// 1. Sets the closed flag (rejecting new actions, including late
        ///    results of in-flight futures)
        /// 2. Cancels every running stream effect, dropping its source
        /// 3. Waits up to the configured timeout for in-flight futures
        ///
        /// In-flight futures are not aborted: remote writes still land, only
        /// their result handling is abandoned.
        pub async fn close(&self) {
            if self.closed.swap(true, Ordering::AcqRel) {
                return;
            }

            tracing::info!("Closing store");
            metrics::counter!("store.close.initiated").increment(1);
            let _ = self.close_signal.send(true);

            let start = std::time::Instant::now();
            let poll_interval = Duration::from_millis(10);

            loop {
                let pending = self.pending_effects.load(Ordering::Acquire);

                if pending == 0 {
                    tracing::debug!("All effects drained");
                    return;
                }

                if start.elapsed() >= self.config.shutdown_timeout {
                    tracing::warn!(
                        pending_effects = pending,
                        "Close timeout: {} effects still running", pending
                    );
                    return;
                }

                tokio::time::sleep(poll_interval).await;
            }
        }

        /// Send an action to the store
        ///
        /// 1. Acquires write lock on state
        /// 2. Calls reducer with (state, action, environment)
        /// 3. Executes returned effects asynchronously
        /// 4. Effects may produce more actions (feedback loop)
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownInProgress`] if the store is closed.
        #[tracing::instrument(skip(self, action), name = "store_send")]
        pub async fn send(&self, action: A) -> Result<EffectHandle, StoreError>
        where
            R: Clone,
            E: Clone,
        {
            if self.is_closed() {
                tracing::debug!("Rejected action: store is closed");
                metrics::counter!("store.closed.rejected_actions").increment(1);
                return Err(StoreError::ShutdownInProgress);
            }

            metrics::counter!("store.commands.total").increment(1);

            let (handle, tracking) = EffectHandle::new();

            let effects = {
                let mut state = self.state.write().await;
                let span = tracing::debug_span!("reducer_execution");
                let _enter = span.enter();
                let effects = self.reducer.reduce(&mut *state, action, &self.environment);
                tracing::trace!("Reducer completed, returned {} effects", effects.len());
                effects
            };

            for effect in effects {
                self.execute_effect(effect, tracking.clone());
            }

            Ok(handle)
        }

        /// Send an action and wait for a matching result action
        ///
        /// Subscribes to the action broadcast BEFORE sending, then returns the
        /// first effect-produced action matching `predicate`.
        ///
        /// # Errors
        ///
        /// - [`StoreError::Timeout`]: Timeout expired before a matching action arrived
        /// - [`StoreError::ChannelClosed`]: Broadcast channel closed
        /// - [`StoreError::ShutdownInProgress`]: Store is closed
        pub async fn send_and_wait_for<F>(
            &self,
            action: A,
            predicate: F,
            timeout: Duration,
        ) -> Result<A, StoreError>
        where
            R: Clone,
            E: Clone,
            F: Fn(&A) -> bool,
        {
            let mut rx = self.action_broadcast.subscribe();

            self.send(action).await?;

            tokio::time::timeout(timeout, async {
                loop {
                    match rx.recv().await {
                        Ok(action) if predicate(&action) => return Ok(action),
                        Ok(_) => {},
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(
                                skipped,
                                "Action observer lagged, {} actions skipped",
                                skipped
                            );
                        },
                        Err(broadcast::error::RecvError::Closed) => {
                            return Err(StoreError::ChannelClosed);
                        },
                    }
                }
            })
            .await
            .map_err(|_| StoreError::Timeout)?
        }

        /// Subscribe to all actions produced by effects
        #[must_use]
        pub fn subscribe_actions(&self) -> broadcast::Receiver<A> {
            self.action_broadcast.subscribe()
        }

        /// Read current state via a closure
        ///
        /// ```ignore
        /// let item_count = store.state(|s| s.items.len()).await;
        /// ```
        pub async fn state<F, T>(&self, f: F) -> T
        where
            F: FnOnce(&S) -> T,
        {
            let state = self.state.read().await;
            f(&*state)
        }

        /// Feed an effect-produced action back into the store
        ///
        /// Observers are notified after the reducer has applied the action,
        /// so a waiter reading state afterwards sees its effect.
        async fn feedback(&self, action: A)
        where
            R: Clone,
            E: Clone,
        {
            if self.is_closed() {
                tracing::trace!("Discarding effect result: store is closed");
                return;
            }
            let observed = action.clone();
            if let Err(error) = self.send(action).await {
                tracing::trace!(error = %error, "Effect result not applied");
                return;
            }
            let _ = self.action_broadcast.send(observed);
        }

        /// Execute an effect with tracking
        ///
        /// - `None`: No-op
        /// - `Parallel`: Executes effects concurrently
        /// - `Future`: Executes async computation, feeds the resulting action back
        /// - `Stream`: Feeds every item back until the stream ends or the store closes
        #[allow(clippy::needless_pass_by_value)] // tracking is cloned per child effect
        fn execute_effect(&self, effect: Effect<A>, tracking: EffectTracking)
        where
            R: Clone,
            E: Clone,
        {
            match effect {
                Effect::None => {
                    metrics::counter!("store.effects.executed", "type" => "none").increment(1);
                },
                Effect::Parallel(effects) => {
                    tracing::trace!("Executing Effect::Parallel with {} effects", effects.len());
                    metrics::counter!("store.effects.executed", "type" => "parallel").increment(1);
                    for effect in effects {
                        self.execute_effect(effect, tracking.clone());
                    }
                },
                Effect::Future(fut) => {
                    metrics::counter!("store.effects.executed", "type" => "future").increment(1);
                    tracking.increment();
                    self.pending_effects.fetch_add(1, Ordering::SeqCst);
                    let guard = DecrementGuard {
                        tracking: tracking.clone(),
                        pending: Arc::clone(&self.pending_effects),
                    };
                    let store = self.clone();
                    tokio::spawn(async move {
                        let _guard = guard;
                        if let Some(action) = fut.await {
                            tracing::trace!("Effect::Future produced an action");
                            store.feedback(action).await;
                        }
                    });
                },
                Effect::Stream(mut stream) => {
                    metrics::counter!("store.effects.executed", "type" => "stream").increment(1);
                    let mut closed = self.close_signal.subscribe();
                    let store = self.clone();
                    tokio::spawn(async move {
                        if store.is_closed() {
                            return;
                        }
                        loop {
                            tokio::select! {
                                biased;
                                // The flag only ever flips to true, so any change means closed.
                                _ = closed.changed() => {
                                    tracing::debug!("Store closed, dropping stream effect");
                                    break;
                                }
                                next = stream.next() => match next {
                                    Some(action) => store.feedback(action).await,
                                    None => {
                                        tracing::trace!("Effect::Stream completed");
                                        break;
                                    }
                                },
                            }
                        }
                    });
                },
            }
        }
    }

    impl<S, A, E, R> Clone for Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Clone,
        E: Clone,
    {
        fn clone(&self) -> Self {
            Self {
                state: Arc::clone(&self.state),
                reducer: self.reducer.clone(),
                environment: self.environment.clone(),
                config: self.config.clone(),
                closed: Arc::clone(&self.closed),
                close_signal: Arc::clone(&self.close_signal),
                pending_effects: Arc::clone(&self.pending_effects),
                action_broadcast: self.action_broadcast.clone(),
            }
        }
    }
}

pub use store::Store;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use wishlist_core::{SmallVec, async_effect, smallvec, stream_effect};

    #[derive(Clone, Debug, Default)]
    struct CounterState {
        count: i64,
    }

    #[derive(Clone, Debug, PartialEq)]
    enum CounterAction {
        Increment,
        IncrementLater,
        Incremented,
        Watch { ticks: usize },
        Tick,
    }

    #[derive(Clone)]
    struct CounterReducer;

    impl Reducer for CounterReducer {
        type State = CounterState;
        type Action = CounterAction;
        type Environment = ();

        fn reduce(
            &self,
            state: &mut CounterState,
            action: CounterAction,
            _env: &(),
        ) -> SmallVec<[Effect<CounterAction>; 4]> {
            match action {
                CounterAction::Increment | CounterAction::Tick => {
                    state.count += 1;
                    SmallVec::new()
                },
                CounterAction::IncrementLater => smallvec![async_effect! {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Some(CounterAction::Incremented)
                }],
                CounterAction::Incremented => {
                    state.count += 10;
                    SmallVec::new()
                },
                CounterAction::Watch { ticks } => smallvec![stream_effect!(async_stream::stream! {
                    for _ in 0..ticks {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        yield CounterAction::Tick;
                    }
                })],
            }
        }
    }

    #[tokio::test]
    async fn send_runs_reducer() {
        let store = Store::new(CounterState::default(), CounterReducer, ());
        store.send(CounterAction::Increment).await.unwrap();
        assert_eq!(store.state(|s| s.count).await, 1);
    }

    #[tokio::test]
    async fn future_effect_feeds_back() {
        let store = Store::new(CounterState::default(), CounterReducer, ());
        let mut handle = store.send(CounterAction::IncrementLater).await.unwrap();
        handle.wait_with_timeout(Duration::from_secs(1)).await.unwrap();
        // Feedback is sent before the guard drops, so the state is already updated.
        assert_eq!(store.state(|s| s.count).await, 10);
    }

    #[tokio::test]
    async fn send_and_wait_for_returns_matching_action() {
        let store = Store::new(CounterState::default(), CounterReducer, ());
        let result = store
            .send_and_wait_for(
                CounterAction::IncrementLater,
                |a| matches!(a, CounterAction::Incremented),
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert_eq!(result, CounterAction::Incremented);
    }

    #[tokio::test]
    async fn send_and_wait_for_times_out() {
        let store = Store::new(CounterState::default(), CounterReducer, ());
        let result = store
            .send_and_wait_for(
                CounterAction::Increment,
                |a| matches!(a, CounterAction::Incremented),
                Duration::from_millis(20),
            )
            .await;
        assert!(matches!(result, Err(StoreError::Timeout)));
    }

    #[tokio::test]
    async fn stream_effect_feeds_every_item() {
        let store = Store::new(CounterState::default(), CounterReducer, ());
        store.send(CounterAction::Watch { ticks: 3 }).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.state(|s| s.count).await, 3);
    }

    #[tokio::test]
    async fn close_cancels_streams_and_rejects_actions() {
        let store = Store::new(CounterState::default(), CounterReducer, ());
        store.send(CounterAction::Watch { ticks: 1000 }).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.close().await;
        let seen = store.state(|s| s.count).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.state(|s| s.count).await, seen);
        assert!(store.is_closed());
        assert!(matches!(
            store.send(CounterAction::Increment).await,
            Err(StoreError::ShutdownInProgress)
        ));
    }

    #[tokio::test]
    async fn completed_handle_does_not_block() {
        let mut handle = EffectHandle::completed();
        handle.wait_with_timeout(Duration::from_millis(10)).await.unwrap();
    }
}

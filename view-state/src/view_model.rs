//! View models: the owner of one store plus its subscription bookkeeping
//!
//! A [`ViewModel`] creates its [`Store`] at construction and disposes it in
//! [`ViewModel::clear`] (also run on drop). Everything a view does with the
//! state goes through it:
//!
//! - `set_state` / `with_state` / `state` forward to the store
//! - `post_state` defers a write to the host's [`HostQueue`]
//! - `subscribe` registers a plain listener or a lifecycle-gated wrapper
//! - `select` narrows a subscription to a few fields
//! - `execute` runs a blocking call off-thread and records its progress

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use state_store::{Listener, ListenerId, State, Store, StoreConfig, StoreError, StoreId};
use tracing::{debug, trace};

use crate::activity::{ActivitySource, Lifecycle, LifecycleState};
use crate::async_result::Async;
use crate::delivery::DeliveryMode;
use crate::error::{Result, ViewStateError};
use crate::observer::{DeliveryExecutor, LifecycleAwareObserver};
use crate::selector::Selector;
use crate::view::HostQueue;

/// Redeliveries run as store reads, inside the same drain as new values
impl<S: State> DeliveryExecutor for Store<S> {
    fn execute(&self, job: Box<dyn FnOnce() + Send>) {
        self.read(move |_| job());
    }

    fn barrier(&self) {
        self.wait_for_drain();
    }
}

/// `UniqueOnly` ids in use, and the last value delivered under each id
///
/// Delivered values outlive their subscriptions so that a view recreated
/// with the same id does not see the same value twice.
struct UniqueSubscriptions<S> {
    active: DashSet<String>,
    last_delivered: DashMap<String, S>,
}

impl<S: State> UniqueSubscriptions<S> {
    fn new() -> Self {
        Self {
            active: DashSet::new(),
            last_delivered: DashMap::new(),
        }
    }

    fn claim(&self, id: &str) -> Result<Option<S>> {
        if !self.active.insert(id.to_string()) {
            return Err(ViewStateError::DuplicateSubscriptionId(id.to_string()));
        }
        Ok(self.last_delivered.get(id).map(|entry| entry.value().clone()))
    }

    fn release(&self, id: &str) {
        self.active.remove(id);
    }
}

/// Handle to one subscription
///
/// Dropping the handle does not unsubscribe: gated subscriptions end when
/// their activity source is destroyed, plain ones when the store is
/// disposed. Call [`Subscription::dispose`] to end one early.
pub struct Subscription {
    listener: ListenerId,
    teardown: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    fn new<F>(listener: ListenerId, teardown: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            listener,
            teardown: Mutex::new(Some(Box::new(teardown))),
        }
    }

    /// Permanently unsubscribe. Later calls do nothing.
    pub fn dispose(&self) {
        let teardown = self.teardown.lock().take();
        if let Some(teardown) = teardown {
            teardown();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.teardown.lock().is_none()
    }

    pub fn listener_id(&self) -> ListenerId {
        self.listener
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("listener", &self.listener)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Owner of a [`Store`] and of the subscriptions made against it
pub struct ViewModel<S: State> {
    store: Store<S>,
    lifecycle: Arc<Lifecycle>,
    unique: Arc<UniqueSubscriptions<S>>,
    cleared: AtomicBool,
}

impl<S: State> ViewModel<S> {
    pub fn new(initial: S, config: StoreConfig) -> Self {
        let lifecycle = Arc::new(Lifecycle::new());
        lifecycle.set_state(LifecycleState::Resumed);

        debug!(view_model = %config.name, debug_mode = config.debug_mode, "View model created");

        Self {
            store: Store::with_config(initial, config),
            lifecycle,
            unique: Arc::new(UniqueSubscriptions::new()),
            cleared: AtomicBool::new(false),
        }
    }

    /// Queue a reducer
    pub fn set_state<F>(&self, reducer: F)
    where
        F: Fn(&S) -> S + Send + 'static,
    {
        self.store.write(reducer);
    }

    /// Queue a reducer for the host to apply on its next
    /// [`HostQueue::run_pending`]
    ///
    /// Dropped if the view model is cleared before the host gets to it.
    pub fn post_state<F>(&self, host: &HostQueue, reducer: F)
    where
        F: Fn(&S) -> S + Send + 'static,
    {
        let store = self.store.clone();
        host.post(move || store.write(reducer));
    }

    /// Queue a callback that sees the state once all earlier writes landed
    pub fn with_state<F>(&self, block: F)
    where
        F: FnOnce(&S) + Send + 'static,
    {
        self.store.read(block);
    }

    /// Current state
    pub fn state(&self) -> S {
        self.store.snapshot()
    }

    pub fn config(&self) -> &StoreConfig {
        self.store.config()
    }

    pub fn store(&self) -> &Store<S> {
        &self.store
    }

    pub fn store_id(&self) -> StoreId {
        self.store.id()
    }

    /// This view model's own lifecycle: resumed until [`ViewModel::clear`]
    pub fn lifecycle(&self) -> Arc<Lifecycle> {
        Arc::clone(&self.lifecycle)
    }

    /// Subscribe to state changes
    ///
    /// With a `source`, delivery is gated on its activity according to
    /// `mode`, and the subscription ends when the source is destroyed.
    /// Without one, `callback` sees every change and `mode` is ignored.
    pub fn subscribe<F>(
        &self,
        source: Option<Arc<dyn ActivitySource>>,
        mode: DeliveryMode,
        callback: F,
    ) -> Result<Subscription>
    where
        F: Fn(&S) + Send + Sync + 'static,
    {
        self.register(source, mode, None, Arc::new(callback))
    }

    /// Subscribe to every change of this view model's state, ungated
    pub fn subscribe_self<F>(&self, callback: F) -> Result<Subscription>
    where
        F: Fn(&S) + Send + Sync + 'static,
    {
        self.register(None, DeliveryMode::RedeliverOnStart, None, Arc::new(callback))
    }

    /// Subscribe this view model to `other`, gated by this view model's
    /// lifecycle
    pub fn subscribe_to<O, F>(&self, other: &ViewModel<O>, callback: F) -> Result<Subscription>
    where
        O: State,
        F: Fn(&O) + Send + Sync + 'static,
    {
        if self.store.id() == other.store_id() {
            return Err(ViewStateError::SelfSubscription);
        }

        let source: Arc<dyn ActivitySource> = self.lifecycle.clone();
        other.subscribe(Some(source), DeliveryMode::RedeliverOnStart, callback)
    }

    /// Narrow a subscription to the fields named by `selector`
    pub fn select(&self, selector: Selector<S>) -> SelectedProperties<'_, S> {
        SelectedProperties {
            view_model: self,
            selector,
        }
    }

    /// Log every state transition at `debug`
    ///
    /// Returns `Ok(None)` unless debug mode is on.
    pub fn log_state_changes(&self) -> Result<Option<Subscription>> {
        if !self.config().debug_mode {
            return Ok(None);
        }

        let name = self.config().name.clone();
        let subscription = self.subscribe_self(move |state: &S| {
            debug!(view_model = %name, state = ?state, "New state");
        })?;
        Ok(Some(subscription))
    }

    /// Run `call` on a background thread, recording its progress with
    /// `reducer`
    ///
    /// `reducer` first sees `Async::Loading(None)` (applied before this
    /// returns), then `Async::Success` or `Async::Fail` once `call` finishes.
    /// A result arriving after [`ViewModel::clear`] is dropped.
    pub fn execute<V, E, C, R>(&self, call: C, reducer: R) -> thread::JoinHandle<()>
    where
        V: Clone + Send + Sync + 'static,
        E: Display,
        C: FnOnce() -> std::result::Result<V, E> + Send + 'static,
        R: Fn(&S, Async<V>) -> S + Send + Sync + 'static,
    {
        let reducer = Arc::new(reducer);

        let loading = Arc::clone(&reducer);
        self.store.write(move |state| loading(state, Async::Loading(None)));

        let store = self.store.clone();
        thread::spawn(move || {
            let result = match call() {
                Ok(value) => Async::Success(value),
                Err(e) => Async::fail(e.to_string()),
            };
            trace!(store = %store.config().name, complete = result.is_complete(), "Execute finished");
            store.write(move |state| reducer(state, result.clone()));
        })
    }

    /// Dispose the store and destroy this view model's lifecycle
    ///
    /// Idempotent; also run on drop.
    pub fn clear(&self) {
        if self.cleared.swap(true, Ordering::AcqRel) {
            return;
        }

        self.store.dispose();
        self.lifecycle.destroy();
        debug!(view_model = %self.config().name, "View model cleared");
    }

    pub fn is_cleared(&self) -> bool {
        self.cleared.load(Ordering::Acquire)
    }

    /// Number of live `UniqueOnly` ids
    pub fn unique_subscription_count(&self) -> usize {
        self.unique.active.len()
    }

    fn register(
        &self,
        source: Option<Arc<dyn ActivitySource>>,
        mode: DeliveryMode,
        selector: Option<Selector<S>>,
        callback: Arc<dyn Fn(&S) + Send + Sync>,
    ) -> Result<Subscription> {
        if self.store.is_disposed() {
            return Err(StoreError::Disposed(self.config().name.clone()).into());
        }

        match source {
            None => Ok(self.register_plain(selector, callback)),
            Some(source) => self.register_gated(source, mode, selector, callback),
        }
    }

    fn register_plain(
        &self,
        selector: Option<Selector<S>>,
        callback: Arc<dyn Fn(&S) + Send + Sync>,
    ) -> Subscription {
        let listener = self.store.observe(|current| {
            let filter = selector.map(|selector| selector.baseline(current));
            Arc::new(move |state: &S| {
                if filter.as_ref().map_or(true, |filter| filter.changed(state)) {
                    callback(state);
                }
            }) as Listener<S>
        });

        let store = self.store.clone();
        Subscription::new(listener, move || {
            store.remove_listener(listener);
        })
    }

    fn register_gated(
        &self,
        source: Arc<dyn ActivitySource>,
        mode: DeliveryMode,
        selector: Option<Selector<S>>,
        callback: Arc<dyn Fn(&S) + Send + Sync>,
    ) -> Result<Subscription> {
        let unique_id = mode.subscription_id().map(str::to_owned);
        let last_delivered = match &unique_id {
            Some(id) => self.unique.claim(id)?,
            None => None,
        };

        let on_change = {
            let unique = Arc::clone(&self.unique);
            let unique_id = unique_id.clone();
            move |state: &S| {
                if let Some(id) = &unique_id {
                    unique.last_delivered.insert(id.clone(), state.clone());
                }
                callback(state);
            }
        };

        // Filled in once the store listener exists
        let registration: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));

        let on_complete = {
            let store = self.store.clone();
            let unique = Arc::clone(&self.unique);
            let registration = Arc::clone(&registration);
            move || {
                let listener = registration.lock().take();
                if let Some(listener) = listener {
                    store.remove_listener(listener);
                }
                if let Some(id) = unique_id {
                    unique.release(&id);
                    debug!(subscription_id = %id, "Unique subscription released");
                }
            }
        };

        let executor: Arc<dyn DeliveryExecutor> = Arc::new(self.store.clone());
        let observer =
            LifecycleAwareObserver::new(mode, last_delivered, executor, on_change, on_complete);

        let wrapper = Arc::clone(&observer);
        let listener = self.store.observe(move |current| {
            wrapper.seed(current.clone());
            let filter = selector.map(|selector| selector.baseline(current));
            Arc::new(move |state: &S| {
                if filter.as_ref().map_or(true, |filter| filter.changed(state)) {
                    wrapper.on_next(state.clone());
                }
            }) as Listener<S>
        });
        *registration.lock() = Some(listener);

        observer.attach(source);

        trace!(listener = %listener, mode = %observer.mode(), "Gated subscription registered");

        let teardown = Arc::clone(&observer);
        Ok(Subscription::new(listener, move || teardown.destroy()))
    }
}

impl<S: State> Drop for ViewModel<S> {
    fn drop(&mut self) {
        self.clear();
    }
}

impl<S: State> std::fmt::Debug for ViewModel<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewModel")
            .field("store", &self.store)
            .field("unique_subscriptions", &self.unique.active.len())
            .field("cleared", &self.is_cleared())
            .finish()
    }
}

/// A selection of fields awaiting a subscriber
pub struct SelectedProperties<'a, S: State> {
    view_model: &'a ViewModel<S>,
    selector: Selector<S>,
}

impl<S: State> SelectedProperties<'_, S> {
    /// Subscribe to changes of the selected fields
    ///
    /// A `UniqueOnly` id is suffixed with the selected field names.
    pub fn subscribe<F>(
        self,
        source: Option<Arc<dyn ActivitySource>>,
        mode: DeliveryMode,
        callback: F,
    ) -> Result<Subscription>
    where
        F: Fn(&S) + Send + Sync + 'static,
    {
        let mode = mode.scoped_to_properties(&self.selector.names());
        self.view_model
            .register(source, mode, Some(self.selector), Arc::new(callback))
    }

    /// Ungated subscription to changes of the selected fields
    pub fn subscribe_self<F>(self, callback: F) -> Result<Subscription>
    where
        F: Fn(&S) + Send + Sync + 'static,
    {
        self.view_model.register(
            None,
            DeliveryMode::RedeliverOnStart,
            Some(self.selector),
            Arc::new(callback),
        )
    }
}

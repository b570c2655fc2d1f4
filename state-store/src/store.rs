//! The state store and its drain loop
//!
//! A [`Store`] owns the current state, the pending write and read queues,
//! and a [`ListenerRegistry`]. Producers on any thread submit reducers with
//! `write` and callbacks with `read`; both enqueue and then drive a single
//! drain loop under a re-entrant lock:
//!
//! 1. Apply every queued reducer in FIFO order, notifying listeners once per
//!    reducer that actually changed the state.
//! 2. Take exactly one read callback and run it against the current state.
//! 3. Repeat until both queues are empty.
//!
//! # Architecture
//!
//! ```text
//! Store<S>  (Clone = shared handle)
//!     │
//!     ├── jobs: Mutex<JobQueue<S>>            producers enqueue here
//!     │
//!     ├── drain: ReentrantMutex<DrainSlot<S>>  the only place state lives
//!     │       ├── state: RefCell<S>
//!     │       └── draining: Cell<bool>         nested calls only enqueue
//!     │
//!     └── listeners: ListenerRegistry<S>       notified inside the drain
//! ```
//!
//! A thread that finds another thread draining blocks on the drain lock.
//! Its job is usually applied by that other drain; once it gets the lock it
//! finds the queues empty and returns, so every caller returns only after
//! its own job has been processed.
//!
//! A panicking reducer or read callback does not abandon the queues: the
//! drain keeps going until both are empty and then resumes the first panic
//! on the thread that drove it.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};
use tracing::{debug, error, trace};

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::listener::{Listener, ListenerId, ListenerRegistry};
use crate::queue::{JobQueue, ReadBlock, Reducer};
use crate::state::{check_purity, State};

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a store instance, stable across clones of its handle
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub struct StoreId(u64);

impl std::fmt::Display for StoreId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "store-{}", self.0)
    }
}

/// Current state plus the flag marking an in-progress drain on the owning thread
struct DrainSlot<S> {
    state: RefCell<S>,
    draining: Cell<bool>,
}

type Panic = Box<dyn Any + Send + 'static>;

/// Clears the draining flag even when a reducer or callback panics
struct DrainGuard<'a>(&'a Cell<bool>);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

struct StoreInner<S: State> {
    id: StoreId,
    config: StoreConfig,
    jobs: Mutex<JobQueue<S>>,
    drain: ReentrantMutex<DrainSlot<S>>,
    listeners: ListenerRegistry<S>,
    disposed: AtomicBool,
}

/// Single-source-of-truth container for an immutable state value
///
/// Cloning a `Store` yields another handle to the same state.
///
/// # Example
///
/// ```rust
/// use std::sync::{Arc, Mutex};
/// use state_store::{State, Store};
///
/// #[derive(Clone, Debug, PartialEq)]
/// struct Counter(u32);
/// impl State for Counter {}
///
/// let store = Store::new(Counter(0));
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let sink = Arc::clone(&seen);
/// store.add_listener(move |s: &Counter| sink.lock().unwrap().push(s.0));
///
/// store.write(|s| Counter(s.0 + 1));
/// store.write(|s| Counter(s.0));      // unchanged, no notification
/// store.read(|s| assert_eq!(s.0, 1));
///
/// assert_eq!(*seen.lock().unwrap(), vec![1]);
/// ```
pub struct Store<S: State> {
    inner: Arc<StoreInner<S>>,
}

impl<S: State> Store<S> {
    /// Create a store with default configuration
    pub fn new(initial: S) -> Self {
        Self::with_config(initial, StoreConfig::default())
    }

    /// Create a store with explicit configuration
    pub fn with_config(initial: S, config: StoreConfig) -> Self {
        let id = StoreId(NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed));
        debug!(store = %config.name, id = %id, debug_mode = config.debug_mode, "Store created");

        Self {
            inner: Arc::new(StoreInner {
                id,
                config,
                jobs: Mutex::new(JobQueue::new()),
                drain: ReentrantMutex::new(DrainSlot {
                    state: RefCell::new(initial),
                    draining: Cell::new(false),
                }),
                listeners: ListenerRegistry::new(),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    // ========================================================================
    // Writing and reading
    // ========================================================================

    /// Enqueue a reducer and drive the drain loop
    ///
    /// The reducer must be pure: in debug mode it is evaluated twice against
    /// the same state and the drain panics with a [`StoreError::ImpureReducer`]
    /// report if the results differ. Dropped silently after disposal.
    pub fn write<F>(&self, reducer: F)
    where
        F: Fn(&S) -> S + Send + 'static,
    {
        if let Err(err) = self.try_write(reducer) {
            trace!(store = %self.inner.config.name, error = %err, "Write dropped");
        }
    }

    /// Like [`write`](Self::write), but reports a disposed store
    pub fn try_write<F>(&self, reducer: F) -> Result<()>
    where
        F: Fn(&S) -> S + Send + 'static,
    {
        self.ensure_live()?;
        let reducer: Reducer<S> = Box::new(reducer);
        let position = self.inner.jobs.lock().enqueue_write(reducer);
        trace!(store = %self.inner.config.name, position, "Write enqueued");
        self.flush();
        Ok(())
    }

    /// Enqueue a read callback and drive the drain loop
    ///
    /// The callback sees the state at the moment it is dequeued, after every
    /// write queued ahead of it has been applied. Dropped silently after
    /// disposal.
    pub fn read<F>(&self, block: F)
    where
        F: FnOnce(&S) + Send + 'static,
    {
        if let Err(err) = self.try_read(block) {
            trace!(store = %self.inner.config.name, error = %err, "Read dropped");
        }
    }

    /// Like [`read`](Self::read), but reports a disposed store
    pub fn try_read<F>(&self, block: F) -> Result<()>
    where
        F: FnOnce(&S) + Send + 'static,
    {
        self.ensure_live()?;
        let block: ReadBlock<S> = Box::new(block);
        let position = self.inner.jobs.lock().enqueue_read(block);
        trace!(store = %self.inner.config.name, position, "Read enqueued");
        self.flush();
        Ok(())
    }

    /// Clone the current state inside the exclusion window
    ///
    /// Called from within a read callback or listener on the draining
    /// thread, this returns the state as of that point in the drain.
    pub fn snapshot(&self) -> S {
        let slot = self.inner.drain.lock();
        let state = slot.state.borrow().clone();
        state
    }

    /// Block until no other thread is inside the drain
    ///
    /// Returns at once on the draining thread itself. Once this returns,
    /// every listener call that had started on another thread has finished.
    pub fn wait_for_drain(&self) {
        let _slot = self.inner.drain.lock();
    }

    // ========================================================================
    // Listeners
    // ========================================================================

    /// Register a listener for every accepted state change
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&S) + Send + Sync + 'static,
    {
        self.inner.listeners.add(listener)
    }

    /// Register a listener built from the current state
    ///
    /// `make` runs inside the exclusion window with the current state, and
    /// the listener it returns is registered before any other transition can
    /// be applied. The listener therefore observes exactly the transitions
    /// after the seed.
    pub fn observe<F>(&self, make: F) -> ListenerId
    where
        F: FnOnce(&S) -> Listener<S>,
    {
        let slot = self.inner.drain.lock();
        let listener = {
            let state = slot.state.borrow();
            make(&state)
        };
        let id = self.inner.listeners.add_listener(listener);
        drop(slot);
        id
    }

    /// Remove a listener, returning whether it was registered
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Clear both queues and detach every listener
    ///
    /// Safe to call more than once. Work submitted afterwards is dropped.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.jobs.lock().clear();
        self.inner.listeners.clear();
        debug!(store = %self.inner.config.name, id = %self.inner.id, "Store disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    pub fn id(&self) -> StoreId {
        self.inner.id
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Number of queued (writes, reads) not yet drained
    pub fn pending(&self) -> (usize, usize) {
        self.inner.jobs.lock().pending()
    }

    // ========================================================================
    // Drain loop
    // ========================================================================

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(StoreError::Disposed(self.inner.config.name.clone()));
        }
        Ok(())
    }

    fn flush(&self) {
        let slot = self.inner.drain.lock();
        if slot.draining.replace(true) {
            // A drain further up this thread's stack picks the job up
            return;
        }
        let failure = {
            let _guard = DrainGuard(&slot.draining);
            self.drain(&slot)
        };
        drop(slot);

        if let Some(payload) = failure {
            panic::resume_unwind(payload);
        }
    }

    /// Run queued work until both queues are empty, returning the first panic
    fn drain(&self, slot: &DrainSlot<S>) -> Option<Panic> {
        let mut failure = None;
        loop {
            if self.is_disposed() {
                break;
            }
            self.flush_writes(slot, &mut failure);

            let next = self.inner.jobs.lock().dequeue_read();
            let Some((position, block)) = next else {
                break;
            };
            if self.is_disposed() {
                break;
            }
            trace!(store = %self.inner.config.name, position, "Running read");
            let state = slot.state.borrow();
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| block(&state))) {
                error!(store = %self.inner.config.name, position, "Read callback panicked");
                failure.get_or_insert(payload);
            }
        }
        failure
    }

    fn flush_writes(&self, slot: &DrainSlot<S>, failure: &mut Option<Panic>) {
        loop {
            let batch = self.inner.jobs.lock().take_writes();
            let Some(batch) = batch else {
                return;
            };

            for (position, reducer) in batch {
                if self.is_disposed() {
                    return;
                }
                let reduced = {
                    let current = slot.state.borrow();
                    panic::catch_unwind(AssertUnwindSafe(|| self.reduce(&current, &reducer)))
                };
                let next = match reduced {
                    Ok(next) => next,
                    Err(payload) => {
                        error!(store = %self.inner.config.name, position, "Reducer panicked, write skipped");
                        failure.get_or_insert(payload);
                        continue;
                    }
                };
                if *slot.state.borrow() == next {
                    trace!(store = %self.inner.config.name, position, "Write left state unchanged");
                    continue;
                }

                if self.inner.config.debug_mode {
                    debug!(store = %self.inner.config.name, position, state = ?next, "New state");
                }
                *slot.state.borrow_mut() = next;

                let state = slot.state.borrow();
                self.inner.listeners.new_value(&state);
            }
        }
    }

    fn reduce(&self, current: &S, reducer: &Reducer<S>) -> S {
        let next = reducer(current);
        if self.inner.config.debug_mode {
            let second = reducer(current);
            if let Err(err) = check_purity(&self.inner.config.name, &next, &second) {
                panic!("{err}");
            }
        }
        next
    }
}

impl<S: State> Clone for Store<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: State> std::fmt::Debug for Store<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.inner.id)
            .field("name", &self.inner.config.name)
            .field("listener_count", &self.listener_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use crate::impl_state;

    #[derive(Clone, Debug, PartialEq)]
    struct Loader {
        loading: bool,
        count: u32,
    }

    impl_state!(Loader { loading, count });

    fn loader() -> Loader {
        Loader { loading: false, count: 0 }
    }

    fn collect(store: &Store<Loader>) -> Arc<parking_lot::Mutex<Vec<Loader>>> {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        store.add_listener(move |s: &Loader| sink.lock().push(s.clone()));
        seen
    }

    #[test]
    fn test_write_notifies_each_change() {
        let store = Store::new(loader());
        let seen = collect(&store);

        store.write(|s| Loader { count: s.count + 1, ..s.clone() });
        store.write(|s| Loader { count: s.count + 1, ..s.clone() });

        let counts: Vec<u32> = seen.lock().iter().map(|s| s.count).collect();
        assert_eq!(counts, vec![1, 2]);
        assert_eq!(store.snapshot().count, 2);
    }

    #[test]
    fn test_unchanged_write_is_silent() {
        let store = Store::new(loader());
        let seen = collect(&store);

        store.write(|s| s.clone());
        store.write(|_| loader());

        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_read_after_write_visibility() {
        let store = Store::new(loader());
        let observed = Arc::new(AtomicUsize::new(0));

        for expected in 1..=50u32 {
            store.write(|s| Loader { count: s.count + 1, ..s.clone() });
            let observed = Arc::clone(&observed);
            store.read(move |s| {
                assert_eq!(s.count, expected);
                observed.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert_eq!(observed.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn test_nested_reads_run_their_writes_first() {
        let store = Store::new(loader());
        let seen = collect(&store);
        let started = Arc::new(AtomicUsize::new(0));

        let guard_and_load = |store: &Store<Loader>, started: &Arc<AtomicUsize>| {
            let inner_store = store.clone();
            let started = Arc::clone(started);
            move |s: &Loader| {
                if s.loading {
                    return;
                }
                inner_store.write(|s| Loader { loading: true, ..s.clone() });
                started.fetch_add(1, Ordering::SeqCst);
            }
        };

        // Queue two guarded reads behind an outer read so both wait in the read queue
        let outer = store.clone();
        let first = guard_and_load(&store, &started);
        let second = guard_and_load(&store, &started);
        store.read(move |_| {
            outer.read(first);
            outer.read(second);
        });

        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(seen.lock().len(), 1);
        assert!(store.snapshot().loading);
    }

    #[test]
    fn test_write_inside_listener_is_applied_after_current() {
        let store = Store::new(loader());
        let seen = collect(&store);

        let chained = store.clone();
        store.add_listener(move |s: &Loader| {
            if s.count == 1 {
                chained.write(|s| Loader { count: 10, ..s.clone() });
            }
        });

        store.write(|s| Loader { count: s.count + 1, ..s.clone() });

        let counts: Vec<u32> = seen.lock().iter().map(|s| s.count).collect();
        assert_eq!(counts, vec![1, 10]);
    }

    #[test]
    fn test_observe_seeds_with_current_state() {
        let store = Store::new(loader());
        store.write(|s| Loader { count: 5, ..s.clone() });

        let seed = Arc::new(parking_lot::Mutex::new(None));
        let seed_sink = Arc::clone(&seed);
        let later = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let later_sink = Arc::clone(&later);

        store.observe(move |current| {
            *seed_sink.lock() = Some(current.count);
            Arc::new(move |s: &Loader| later_sink.lock().push(s.count))
        });
        store.write(|s| Loader { count: 6, ..s.clone() });

        assert_eq!(*seed.lock(), Some(5));
        assert_eq!(*later.lock(), vec![6]);
    }

    #[test]
    fn test_dispose_drops_work() {
        let store = Store::new(loader());
        let seen = collect(&store);

        store.dispose();
        store.dispose();

        store.write(|s| Loader { count: s.count + 1, ..s.clone() });
        let ran = Arc::new(AtomicBool::new(false));
        let ran_flag = Arc::clone(&ran);
        store.read(move |_| ran_flag.store(true, Ordering::SeqCst));

        assert!(seen.lock().is_empty());
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(store.listener_count(), 0);
        assert!(matches!(
            store.try_write(|s| s.clone()),
            Err(StoreError::Disposed(_))
        ));
    }

    #[test]
    fn test_dispose_inside_read_stops_drain() {
        let store = Store::new(loader());
        let seen = collect(&store);

        let disposer = store.clone();
        let writer = store.clone();
        store.read(move |_| {
            writer.write(|s| Loader { count: 99, ..s.clone() });
            disposer.dispose();
        });

        assert!(seen.lock().is_empty());
        assert_eq!(store.pending(), (0, 0));
    }

    #[test]
    #[should_panic(expected = "count changed from")]
    fn test_debug_mode_detects_impure_reducer() {
        let store = Store::with_config(loader(), StoreConfig::debug().with_name("Loader"));
        let calls = AtomicUsize::new(0);

        store.write(move |s| Loader {
            count: calls.fetch_add(1, Ordering::SeqCst) as u32 + 1,
            ..s.clone()
        });
    }

    #[test]
    fn test_store_usable_after_panicking_read() {
        let store = Store::new(loader());

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            store.read(|_| panic!("read failed"));
        }));
        assert!(result.is_err());

        store.write(|s| Loader { count: 1, ..s.clone() });
        assert_eq!(store.snapshot().count, 1);
    }

    #[test]
    fn test_impure_reducer_keeps_the_rest_of_the_batch() {
        let store = Store::with_config(loader(), StoreConfig::debug().with_name("Loader"));
        let seen = collect(&store);

        let writer = store.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            store.read(move |_| {
                let calls = AtomicUsize::new(0);
                writer.write(move |s| Loader {
                    count: calls.fetch_add(1, Ordering::SeqCst) as u32 + 1,
                    ..s.clone()
                });
                writer.write(|s| Loader { loading: true, ..s.clone() });
            });
        }));

        let message = result
            .unwrap_err()
            .downcast::<String>()
            .map(|m| *m)
            .unwrap_or_default();
        assert!(message.contains("count changed from"));

        assert_eq!(store.snapshot(), Loader { loading: true, count: 0 });
        assert_eq!(store.pending(), (0, 0));
        assert_eq!(*seen.lock(), vec![Loader { loading: true, count: 0 }]);
    }

    #[test]
    fn test_panicking_read_leaves_later_reads_running() {
        let store = Store::new(loader());
        let ran = Arc::new(AtomicBool::new(false));

        let outer = store.clone();
        let flag = Arc::clone(&ran);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            store.read(move |_| {
                outer.read(|_| panic!("read failed"));
                outer.read(move |_| flag.store(true, Ordering::SeqCst));
            });
        }));

        assert!(result.is_err());
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(store.pending(), (0, 0));
    }

    #[test]
    fn test_wait_for_drain_inside_listener() {
        let store = Store::new(loader());
        let waiter = store.clone();
        let returned = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&returned);
        store.add_listener(move |_: &Loader| {
            waiter.wait_for_drain();
            counter.fetch_add(1, Ordering::SeqCst);
        });

        store.write(|s| Loader { count: 1, ..s.clone() });
        store.wait_for_drain();

        assert_eq!(returned.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clone_shares_state() {
        let store = Store::new(loader());
        let cloned = store.clone();

        store.write(|s| Loader { count: 3, ..s.clone() });
        assert_eq!(cloned.snapshot().count, 3);
        assert_eq!(cloned.id(), store.id());
    }
}

//! Activity sources: anything with an active/inactive/destroyed lifecycle
//!
//! A delivery wrapper only needs three things from its owner: whether it is
//! active right now, a way to hear about transitions, and a terminal
//! "destroyed" signal. [`ActivitySource`] is that seam; [`Lifecycle`] is the
//! stock implementation used by view models and by tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tracing::trace;

/// Receives activity transitions from an [`ActivitySource`]
pub trait ActivityObserver: Send + Sync {
    /// The source became active (`true`) or inactive (`false`)
    fn on_activity_changed(&self, active: bool);

    /// The source reached its terminal state
    ///
    /// Called at most once per registration. No further transitions follow.
    fn on_destroyed(&self);
}

/// Handle for one observer registration
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub struct ObservationId(u64);

impl std::fmt::Display for ObservationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "observation-{}", self.0)
    }
}

/// An owner whose activity gates delivery
pub trait ActivitySource: Send + Sync {
    fn is_active(&self) -> bool;

    /// Register an observer
    ///
    /// Registering with a source that is already destroyed calls
    /// [`ActivityObserver::on_destroyed`] before returning.
    fn add_observer(&self, observer: Arc<dyn ActivityObserver>) -> ObservationId;

    fn remove_observer(&self, id: ObservationId);
}

/// Lifecycle states, ordered so that `Destroyed` is below everything
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecycleState {
    Destroyed,
    Initialized,
    Created,
    Started,
    Resumed,
}

impl LifecycleState {
    pub fn is_at_least(self, other: LifecycleState) -> bool {
        self >= other
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LifecycleState::Destroyed => "destroyed",
            LifecycleState::Initialized => "initialized",
            LifecycleState::Created => "created",
            LifecycleState::Started => "started",
            LifecycleState::Resumed => "resumed",
        };
        f.write_str(name)
    }
}

type Observers = Vec<(ObservationId, Arc<dyn ActivityObserver>)>;

enum Transition {
    Activity(bool),
    Destroyed { was_active: bool },
}

struct LifecycleInner {
    state: LifecycleState,
    observers: Observers,
    pending: VecDeque<(Transition, Observers)>,
    dispatching: bool,
}

/// Releases the dispatcher role if an observer panics
struct DispatchGuard<'a>(&'a Mutex<LifecycleInner>);

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.lock().dispatching = false;
        }
    }
}

/// A settable lifecycle implementing [`ActivitySource`]
///
/// The lifecycle counts as active once it reaches `active_state`
/// (`Started` by default). `Destroyed` is terminal: later transitions are
/// ignored and observers added afterwards are told immediately.
///
/// The state changes as soon as [`set_state`](Self::set_state) is called.
/// Notifications go out in transition order through one dispatcher at a
/// time: a transition requested while another thread (or an observer) is
/// dispatching is queued for that dispatcher, and `set_state` returns
/// without waiting. Observers run outside every lock, so they may query or
/// change the lifecycle or remove themselves.
pub struct Lifecycle {
    inner: Mutex<LifecycleInner>,
    active_state: LifecycleState,
    next_id: AtomicU64,
}

impl Lifecycle {
    /// Create a lifecycle in `Initialized`, active from `Started`
    pub fn new() -> Self {
        Self::with_active_state(LifecycleState::Started)
    }

    /// Create a lifecycle that counts as active from `active_state` upwards
    pub fn with_active_state(active_state: LifecycleState) -> Self {
        Self {
            inner: Mutex::new(LifecycleInner {
                state: LifecycleState::Initialized,
                observers: Vec::new(),
                pending: VecDeque::new(),
                dispatching: false,
            }),
            active_state,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn current_state(&self) -> LifecycleState {
        self.inner.lock().state
    }

    pub fn is_destroyed(&self) -> bool {
        self.current_state() == LifecycleState::Destroyed
    }

    pub fn observer_count(&self) -> usize {
        self.inner.lock().observers.len()
    }

    /// Move to `state`, notifying observers if activity changed
    pub fn set_state(&self, state: LifecycleState) {
        {
            let mut inner = self.inner.lock();
            if inner.state == LifecycleState::Destroyed || inner.state == state {
                return;
            }

            let was_active = inner.state.is_at_least(self.active_state);
            inner.state = state;

            let event = if state == LifecycleState::Destroyed {
                let observers = std::mem::take(&mut inner.observers);
                (Transition::Destroyed { was_active }, observers)
            } else {
                let now_active = state.is_at_least(self.active_state);
                if was_active == now_active {
                    return;
                }
                (Transition::Activity(now_active), inner.observers.clone())
            };
            trace!(state = %state, observers = event.1.len(), "Lifecycle transition");

            inner.pending.push_back(event);
            if inner.dispatching {
                return;
            }
            inner.dispatching = true;
        }

        self.dispatch();
    }

    /// Notify observers of queued transitions until none are left
    fn dispatch(&self) {
        let _guard = DispatchGuard(&self.inner);
        loop {
            let next = {
                let mut inner = self.inner.lock();
                match inner.pending.pop_front() {
                    Some(event) => event,
                    None => {
                        inner.dispatching = false;
                        return;
                    }
                }
            };

            match next {
                (Transition::Activity(active), observers) => {
                    for (_, observer) in observers {
                        observer.on_activity_changed(active);
                    }
                }
                (Transition::Destroyed { was_active }, observers) => {
                    for (_, observer) in observers {
                        if was_active {
                            observer.on_activity_changed(false);
                        }
                        observer.on_destroyed();
                    }
                }
            }
        }
    }

    pub fn create(&self) {
        self.set_state(LifecycleState::Created);
    }

    pub fn start(&self) {
        self.set_state(LifecycleState::Started);
    }

    pub fn resume(&self) {
        self.set_state(LifecycleState::Resumed);
    }

    /// Drop back to `Created`
    pub fn stop(&self) {
        self.set_state(LifecycleState::Created);
    }

    pub fn destroy(&self) {
        self.set_state(LifecycleState::Destroyed);
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivitySource for Lifecycle {
    fn is_active(&self) -> bool {
        self.current_state().is_at_least(self.active_state)
    }

    fn add_observer(&self, observer: Arc<dyn ActivityObserver>) -> ObservationId {
        let id = ObservationId(self.next_id.fetch_add(1, Ordering::Relaxed));

        let destroyed = {
            let mut inner = self.inner.lock();
            if inner.state == LifecycleState::Destroyed {
                true
            } else {
                inner.observers.push((id, Arc::clone(&observer)));
                false
            }
        };

        if destroyed {
            observer.on_destroyed();
        }
        id
    }

    fn remove_observer(&self, id: ObservationId) {
        self.inner.lock().observers.retain(|(existing, _)| *existing != id);
    }
}

impl std::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Lifecycle")
            .field("state", &inner.state)
            .field("active_state", &self.active_state)
            .field("observers", &inner.observers.len())
            .finish()
    }
}

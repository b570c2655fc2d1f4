//! Synchronous fan-out of new states to registered listeners
//!
//! The registry is not a gating layer: every listener is invoked for every
//! value, in registration order. The same callback may be added more than
//! once and is then invoked once per registration.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{error, trace};

/// A registered state callback
pub type Listener<S> = Arc<dyn Fn(&S) + Send + Sync>;

/// Handle identifying one registration in a [`ListenerRegistry`]
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ListenerId(u64);

impl ListenerId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Ordered list of listeners with panic-isolated fan-out
///
/// Mutation is safe during fan-out: `new_value` iterates over a copy of the
/// list taken before the first callback runs, so a listener added or
/// removed mid-delivery takes effect from the next value.
pub struct ListenerRegistry<S> {
    listeners: RwLock<Vec<(ListenerId, Listener<S>)>>,
    next_id: AtomicU64,
}

impl<S> ListenerRegistry<S> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a callback, returning a handle for later removal
    pub fn add<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&S) + Send + Sync + 'static,
    {
        self.add_listener(Arc::new(listener))
    }

    /// Register an already shared callback
    pub fn add_listener(&self, listener: Listener<S>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        trace!(listener = %id, "Listener added");
        id
    }

    /// Remove one registration, returning whether it existed
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        before != listeners.len()
    }

    /// Invoke every listener with `value`
    ///
    /// A panicking listener is logged and skipped; the remaining listeners
    /// still receive the value.
    pub fn new_value(&self, value: &S) {
        let snapshot: Vec<(ListenerId, Listener<S>)> = self.listeners.read().clone();

        for (id, listener) in snapshot {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener(value)));
            if let Err(payload) = outcome {
                error!(
                    listener = %id,
                    panic = panic_message(payload.as_ref()),
                    "Listener panicked during delivery"
                );
            }
        }
    }

    /// Remove all listeners
    pub fn clear(&self) {
        self.listeners.write().clear();
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }
}

impl<S> Default for ListenerRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> std::fmt::Debug for ListenerRegistry<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listener_count", &self.len())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "<non-string panic payload>"
    }
}

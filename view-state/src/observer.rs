//! Lifecycle-aware delivery wrapper
//!
//! Sits between a value stream (a store listener) and a subscriber callback,
//! holding values back while the owning [`ActivitySource`] is inactive:
//!
//! ```text
//!            on_next(v)                      activity changes
//! store ──────────────────> ┌────────────────────┐ <────────── ActivitySource
//!                           │ locked?            │
//!                           │  yes: buffer v     │
//!                           │  no:  deliver v ───┼──> subscriber
//!                           └────────────────────┘
//!                 unlock: RedeliverOnStart -> last undelivered, else last seen
//!                         UniqueOnly       -> last undelivered, if not seen
//! ```
//!
//! The wrapper starts locked. Destruction is terminal and happens at most
//! once, whether triggered by the source or by [`LifecycleAwareObserver::destroy`].
//!
//! The wrapper's own lock only guards its buffers and is never held while
//! the subscriber runs. Subscriber calls are serialized by the upstream
//! instead: values arrive one at a time from the store's drain, and the
//! redelivery that follows an activation is handed to a [`DeliveryExecutor`]
//! which runs it inside that same drain. A subscriber may therefore read or
//! write its own store, or stop its owner, from any thread.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::trace;

use crate::activity::{ActivityObserver, ActivitySource, ObservationId};
use crate::delivery::DeliveryMode;

type OnChange<T> = Box<dyn Fn(&T) + Send + Sync>;
type OnComplete = Box<dyn FnOnce() + Send>;

/// Runs wrapper work in the same exclusion window as upstream values
pub trait DeliveryExecutor: Send + Sync {
    /// Run `job` serialized with upstream deliveries
    ///
    /// May run it before returning or later on the thread that currently
    /// delivers values.
    fn execute(&self, job: Box<dyn FnOnce() + Send>);

    /// Block until no delivery is in progress on another thread
    fn barrier(&self);
}

/// Runs jobs on the calling thread
///
/// For wrappers fed by hand, where the caller already serializes `on_next`
/// and activity changes.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl DeliveryExecutor for InlineExecutor {
    fn execute(&self, job: Box<dyn FnOnce() + Send>) {
        job();
    }

    fn barrier(&self) {}
}

struct Buffer<T> {
    locked: bool,
    unlock_pending: bool,
    destroyed: bool,
    last_value: Option<T>,
    last_undelivered: Option<T>,
    last_delivered: Option<T>,
}

/// Gates a subscriber on an [`ActivitySource`] according to a [`DeliveryMode`]
pub struct LifecycleAwareObserver<T> {
    mode: DeliveryMode,
    buffer: Mutex<Buffer<T>>,
    executor: Arc<dyn DeliveryExecutor>,
    on_change: OnChange<T>,
    on_complete: Mutex<Option<OnComplete>>,
    source: Mutex<Option<(Arc<dyn ActivitySource>, ObservationId)>>,
    this: Weak<Self>,
}

impl<T> LifecycleAwareObserver<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a locked wrapper
    ///
    /// `last_delivered` seeds `UniqueOnly` suppression with the value a
    /// previous subscription under the same id already delivered.
    pub fn new<F, C>(
        mode: DeliveryMode,
        last_delivered: Option<T>,
        executor: Arc<dyn DeliveryExecutor>,
        on_change: F,
        on_complete: C,
    ) -> Arc<Self>
    where
        F: Fn(&T) + Send + Sync + 'static,
        C: FnOnce() + Send + 'static,
    {
        Arc::new_cyclic(|this| Self {
            mode,
            buffer: Mutex::new(Buffer {
                locked: true,
                unlock_pending: false,
                destroyed: false,
                last_value: None,
                last_undelivered: None,
                last_delivered,
            }),
            executor,
            on_change: Box::new(on_change),
            on_complete: Mutex::new(Some(Box::new(on_complete))),
            source: Mutex::new(None),
            this: this.clone(),
        })
    }

    /// Record the value current at subscription time
    ///
    /// It is not delivered now, but `RedeliverOnStart` hands it to the
    /// subscriber on the first activation if nothing newer arrived.
    pub fn seed(&self, value: T) {
        let mut buffer = self.buffer.lock();
        if !buffer.destroyed {
            buffer.last_value = Some(value);
        }
    }

    /// Start observing `source`
    ///
    /// If the source is already active the wrapper unlocks immediately. If it
    /// is already destroyed, the wrapper is destroyed before this returns.
    pub fn attach(self: &Arc<Self>, source: Arc<dyn ActivitySource>) {
        let observer: Arc<dyn ActivityObserver> = Arc::clone(self) as Arc<dyn ActivityObserver>;
        let id = source.add_observer(observer);

        if self.is_destroyed() {
            source.remove_observer(id);
            return;
        }

        *self.source.lock() = Some((Arc::clone(&source), id));

        // Destroyed between add_observer and the store above
        if self.is_destroyed() {
            if let Some((source, id)) = self.source.lock().take() {
                source.remove_observer(id);
            }
            return;
        }

        if source.is_active() {
            self.on_activity_changed(true);
        }
    }

    /// A new value from the upstream stream
    pub fn on_next(&self, value: T) {
        let deliverable = {
            let mut buffer = self.buffer.lock();
            if buffer.destroyed {
                return;
            }
            buffer.last_value = Some(value.clone());

            if buffer.locked {
                buffer.last_undelivered = Some(value);
                return;
            }
            // Newer than anything a pending redelivery would hand over
            buffer.unlock_pending = false;
            buffer.last_undelivered = None;
            self.claim(&mut buffer, value)
        };

        if let Some(value) = deliverable {
            (self.on_change)(&value);
        }
    }

    /// Tear down: detach from the source, drop buffers, run the completion
    /// hook. Only the first call has any effect.
    ///
    /// No subscriber call is in progress on another thread once this returns.
    pub fn destroy(&self) {
        {
            let mut buffer = self.buffer.lock();
            if buffer.destroyed {
                return;
            }
            buffer.destroyed = true;
            buffer.locked = true;
            buffer.unlock_pending = false;
            buffer.last_value = None;
            buffer.last_undelivered = None;
            buffer.last_delivered = None;
        }
        self.executor.barrier();

        if let Some((source, id)) = self.source.lock().take() {
            source.remove_observer(id);
        }

        let complete = self.on_complete.lock().take();
        if let Some(complete) = complete {
            complete();
        }
        trace!(mode = %self.mode, "Delivery wrapper destroyed");
    }

    pub fn is_locked(&self) -> bool {
        self.buffer.lock().locked
    }

    pub fn is_destroyed(&self) -> bool {
        self.buffer.lock().destroyed
    }

    pub fn mode(&self) -> &DeliveryMode {
        &self.mode
    }

    /// Hand the buffered value over after an activation
    fn unlock(&self) {
        let deliverable = {
            let mut buffer = self.buffer.lock();
            if buffer.destroyed || buffer.locked || !buffer.unlock_pending {
                return;
            }
            buffer.unlock_pending = false;

            let undelivered = buffer.last_undelivered.take();
            let candidate = match self.mode {
                DeliveryMode::RedeliverOnStart => undelivered.or_else(|| buffer.last_value.clone()),
                DeliveryMode::UniqueOnly(_) => undelivered,
            };
            match candidate {
                Some(value) => self.claim(&mut buffer, value),
                None => None,
            }
        };

        if let Some(value) = deliverable {
            (self.on_change)(&value);
        }
    }

    /// Decide whether `value` goes out, recording it for `UniqueOnly`
    fn claim(&self, buffer: &mut Buffer<T>, value: T) -> Option<T> {
        if !self.mode.is_unique_only() {
            return Some(value);
        }
        if buffer.last_delivered.as_ref() == Some(&value) {
            trace!(mode = %self.mode, "Suppressing value already delivered");
            return None;
        }
        buffer.last_delivered = Some(value.clone());
        Some(value)
    }
}

impl<T> ActivityObserver for LifecycleAwareObserver<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn on_activity_changed(&self, active: bool) {
        {
            let mut buffer = self.buffer.lock();
            if buffer.destroyed {
                return;
            }
            if !active {
                buffer.locked = true;
                buffer.unlock_pending = false;
                return;
            }
            if !buffer.locked {
                return;
            }
            buffer.locked = false;
            buffer.unlock_pending = true;
        }

        let this = self.this.clone();
        self.executor.execute(Box::new(move || {
            if let Some(observer) = this.upgrade() {
                observer.unlock();
            }
        }));
    }

    fn on_destroyed(&self) {
        self.destroy();
    }
}

impl<T> std::fmt::Debug for LifecycleAwareObserver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let buffer = self.buffer.lock();
        f.debug_struct("LifecycleAwareObserver")
            .field("mode", &self.mode)
            .field("locked", &buffer.locked)
            .field("destroyed", &buffer.destroyed)
            .finish()
    }
}

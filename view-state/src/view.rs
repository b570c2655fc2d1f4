//! Views and coalesced invalidation
//!
//! A view re-renders from view model state when invalidated. State can change
//! many times between two frames, so invalidation is coalesced: each view
//! carries its own [`InvalidationGate`], and [`InvalidateQueue::post_invalidate`]
//! enqueues a view only while its gate is not already pending. The host
//! drains the queue once per frame with [`InvalidateQueue::run_pending`].
//!
//! [`HostQueue`] is the general form: arbitrary work, such as a state write
//! posted with [`ViewModel::post_state`], waiting for the host thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

use parking_lot::Mutex;
use state_store::State;
use tracing::trace;

use crate::activity::ActivitySource;
use crate::delivery::DeliveryMode;
use crate::error::Result;
use crate::view_model::{Subscription, ViewModel};

/// Something that renders view model state
pub trait StateView: Send + Sync {
    /// Stable identifier, used to derive unique subscription ids
    fn view_id(&self) -> &str;

    /// Re-render from current state
    fn invalidate(&self);

    /// The lifecycle gating deliveries to this view
    fn activity(&self) -> Arc<dyn ActivitySource>;

    /// This view's pending-invalidation flag
    fn invalidation_gate(&self) -> &InvalidationGate;

    /// A `UniqueOnly` contract scoped to this view
    fn unique_only(&self, custom_id: Option<&str>) -> DeliveryMode {
        let id = match custom_id {
            Some(custom) => format!("{}_{}", self.view_id(), custom),
            None => self.view_id().to_string(),
        };
        DeliveryMode::UniqueOnly(id)
    }
}

/// Pending-invalidation flag owned by one view
#[derive(Debug, Default)]
pub struct InvalidationGate {
    pending: AtomicBool,
}

impl InvalidationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark pending; returns `false` if it already was
    pub fn request(&self) -> bool {
        !self.pending.swap(true, Ordering::AcqRel)
    }

    pub fn complete(&self) {
        self.pending.store(false, Ordering::Release);
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }
}

/// Host-side queue of views waiting to be invalidated
pub struct InvalidateQueue {
    sender: mpsc::Sender<Arc<dyn StateView>>,
    receiver: Mutex<mpsc::Receiver<Arc<dyn StateView>>>,
}

impl InvalidateQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
        }
    }

    /// Queue `view` unless it is already pending
    ///
    /// Returns whether the view was queued.
    pub fn post_invalidate(&self, view: &Arc<dyn StateView>) -> bool {
        if !view.invalidation_gate().request() {
            return false;
        }

        if self.sender.send(Arc::clone(view)).is_err() {
            view.invalidation_gate().complete();
            return false;
        }
        trace!(view = view.view_id(), "Invalidate posted");
        true
    }

    /// Invalidate every queued view whose activity source is active
    ///
    /// Inactive views are dropped from the queue; they are invalidated again
    /// when their subscription redelivers on start. Returns the number of
    /// views invalidated.
    pub fn run_pending(&self) -> usize {
        let pending: Vec<Arc<dyn StateView>> = self.receiver.lock().try_iter().collect();

        let mut invalidated = 0;
        for view in pending {
            view.invalidation_gate().complete();
            if view.activity().is_active() {
                view.invalidate();
                invalidated += 1;
            }
        }
        invalidated
    }
}

impl Default for InvalidateQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InvalidateQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvalidateQueue").finish_non_exhaustive()
    }
}

type HostJob = Box<dyn FnOnce() + Send>;

/// Work waiting to run on the host thread
///
/// Any thread may [`post`](Self::post); the host runs everything queued so
/// far with [`run_pending`](Self::run_pending), in posting order.
pub struct HostQueue {
    sender: mpsc::Sender<HostJob>,
    receiver: Mutex<mpsc::Receiver<HostJob>>,
}

impl HostQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
        }
    }

    pub fn post<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.sender.send(Box::new(job)).is_err() {
            trace!("Host job dropped");
            return;
        }
        trace!("Host job posted");
    }

    /// Run the jobs queued before this call, returning how many ran
    ///
    /// Jobs posted while these run wait for the next call.
    pub fn run_pending(&self) -> usize {
        let pending: Vec<HostJob> = self.receiver.lock().try_iter().collect();
        let count = pending.len();
        for job in pending {
            job();
        }
        count
    }
}

impl Default for HostQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HostQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostQueue").finish_non_exhaustive()
    }
}

/// Invalidate `view` whenever `view_model`'s state changes while it is
/// active, and once on every start
pub fn bind_view<S, V>(
    view_model: &ViewModel<S>,
    view: Arc<V>,
    queue: Arc<InvalidateQueue>,
) -> Result<Subscription>
where
    S: State,
    V: StateView + 'static,
{
    let source = view.activity();
    let target: Arc<dyn StateView> = view;
    view_model.subscribe(Some(source), DeliveryMode::RedeliverOnStart, move |_: &S| {
        queue.post_invalidate(&target);
    })
}

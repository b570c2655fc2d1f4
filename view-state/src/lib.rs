//! Lifecycle-aware state delivery
//!
//! Builds on [`state_store`] to deliver state to subscribers only while
//! their owner is active, with two redelivery policies on reactivation.
//!
//! # Features
//!
//! - **Gated Delivery**: Values are buffered while the owner is inactive
//! - **Delivery Contracts**: `RedeliverOnStart` resyncs on every start,
//!   `UniqueOnly` never repeats a value already delivered under its id
//! - **Property Selection**: Subscribe to a few fields, ignore the rest
//! - **View Models**: Store ownership, unique-id bookkeeping, background calls
//! - **Coalesced Invalidation**: One redraw per view per frame
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use view_state::prelude::*;
//!
//! #[derive(Clone, Debug, PartialEq)]
//! struct Inbox { unread: u32 }
//! impl_state!(Inbox { unread });
//!
//! let vm = ViewModel::new(Inbox { unread: 0 }, StoreConfig::default());
//! let screen = Arc::new(Lifecycle::new());
//!
//! vm.subscribe(Some(screen.clone()), DeliveryMode::RedeliverOnStart, |inbox| {
//!     println!("{} unread", inbox.unread);
//! })
//! .unwrap();
//!
//! vm.set_state(|inbox| Inbox { unread: inbox.unread + 1 }); // buffered
//! screen.start();                                          // prints "1 unread"
//! ```
//!
//! # Architecture
//!
//! ```text
//! Store<S> ──> ListenerRegistry ──> [Selector filter] ──> LifecycleAwareObserver ──> callback
//!                                                              ▲
//!                                       ActivitySource ────────┘ (active / inactive / destroyed)
//! ```

// Modules
pub mod activity;
pub mod async_result;
pub mod delivery;
pub mod error;
pub mod logging;
pub mod observer;
pub mod selector;
pub mod view;
pub mod view_model;

// Re-exports - Public API
pub use activity::{ActivityObserver, ActivitySource, Lifecycle, LifecycleState, ObservationId};
pub use async_result::{append_at, Async};
pub use delivery::DeliveryMode;
pub use error::{Result, ViewStateError};
pub use logging::{init_logging, init_logging_from_env, LoggingError, LoggingMode};
pub use observer::{DeliveryExecutor, InlineExecutor, LifecycleAwareObserver};
pub use selector::{SelectionFilter, Selector};
pub use view::{bind_view, HostQueue, InvalidateQueue, InvalidationGate, StateView};
pub use view_model::{SelectedProperties, Subscription, ViewModel};

pub use state_store::{impl_state, State, Store, StoreConfig, StoreError};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::activity::{ActivitySource, Lifecycle};
    pub use crate::async_result::Async;
    pub use crate::delivery::DeliveryMode;
    pub use crate::selector::Selector;
    pub use crate::view::{bind_view, HostQueue, InvalidateQueue, StateView};
    pub use crate::view_model::{Subscription, ViewModel};
    pub use state_store::{impl_state, State, StoreConfig};
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parking_lot::Mutex;

    #[derive(Clone, Debug, PartialEq)]
    struct Player {
        track: String,
        volume: u8,
    }

    impl_state!(Player { track, volume });

    #[test]
    fn test_full_workflow() {
        let vm = ViewModel::new(
            Player { track: "intro".into(), volume: 10 },
            StoreConfig::debug().with_name("player"),
        );
        let screen = Arc::new(Lifecycle::new());
        let tracks = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&tracks);

        vm.select(Selector::new().field("track", |p: &Player| p.track.clone()))
            .subscribe(Some(screen.clone()), DeliveryMode::RedeliverOnStart, move |p| {
                sink.lock().push(p.track.clone())
            })
            .unwrap();

        vm.set_state(|p| Player { volume: 11, ..p.clone() });
        screen.start();
        vm.set_state(|p| Player { track: "verse".into(), ..p.clone() });
        vm.set_state(|p| Player { volume: 12, ..p.clone() });
        screen.destroy();
        vm.set_state(|p| Player { track: "outro".into(), ..p.clone() });

        assert_eq!(*tracks.lock(), vec!["intro", "verse"]);
    }
}

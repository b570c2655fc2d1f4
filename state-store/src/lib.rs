//! Generic State Store
//!
//! A single-source-of-truth container for an immutable state value, with a
//! strict ordering discipline between reducing writes and state reads issued
//! from any number of threads.
//!
//! # Features
//!
//! - **Ordered Writes**: Reducers are applied in FIFO order, one notification per change
//! - **Read-your-own-writes**: A read callback's writes land before the next read runs
//! - **Change Detection**: Only emit when the new state differs by `PartialEq`
//! - **Panic-isolated Fan-out**: One failing listener never starves the others
//! - **Debug Mode**: Double-evaluates reducers to catch impurity, logs transitions
//!
//! # Quick Start
//!
//! ```rust
//! use state_store::{impl_state, Store, StoreConfig};
//!
//! #[derive(Clone, Debug, PartialEq)]
//! struct Feed {
//!     loading: bool,
//!     items: Vec<String>,
//! }
//!
//! impl_state!(Feed { loading, items });
//!
//! let store = Store::with_config(
//!     Feed { loading: false, items: vec![] },
//!     StoreConfig::debug().with_name("feed"),
//! );
//!
//! // Guard a side effect on the current state, then record it
//! let writer = store.clone();
//! store.read(move |feed| {
//!     if feed.loading {
//!         return;
//!     }
//!     writer.write(|feed| Feed { loading: true, ..feed.clone() });
//! });
//!
//! assert!(store.snapshot().loading);
//! ```
//!
//! # Architecture
//!
//! ```text
//! write(reducer) ─┐
//!                 ├──> JobQueue ──> drain loop (ReentrantMutex) ──> ListenerRegistry
//! read(callback) ─┘     writes: FIFO    │  1. apply all writes            │
//!                       reads:  FIFO    │  2. run one read                └──> listeners
//!                                       └─ 3. repeat until empty
//! ```

// Modules
pub mod config;
pub mod error;
pub mod listener;
pub mod queue;
pub mod state;
pub mod store;

// Re-exports - Public API
pub use config::{StoreConfig, DEBUG_ENV_VAR};
pub use error::{Result, StoreError};
pub use listener::{Listener, ListenerId, ListenerRegistry};
pub use queue::{ReadBlock, Reducer};
pub use state::{check_purity, FieldDiff, State};
pub use store::{Store, StoreId};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::StoreConfig;
    pub use crate::impl_state;
    pub use crate::listener::ListenerId;
    pub use crate::state::State;
    pub use crate::store::Store;
}

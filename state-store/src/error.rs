//! Error types for state-store

use thiserror::Error;

/// Errors raised by a [`Store`](crate::Store)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A reducer returned different states for the same input
    #[error(
        "Impure reducer set on {store}! {field} changed from {first} to {second}. \
         Ensure that your state fields implement PartialEq by value."
    )]
    ImpureReducer {
        store: String,
        field: &'static str,
        first: String,
        second: String,
    },

    /// A reducer returned different states but no field could be named
    #[error(
        "Impure reducer set on {store}! Differing states were provided by the same reducer. \
         First state: {first} -> Second state: {second}"
    )]
    ImpureReducerUnlocated {
        store: String,
        first: String,
        second: String,
    },

    /// The store has been disposed and no longer accepts work
    #[error("Store {0} has been disposed")]
    Disposed(String),
}

/// Result type for state-store operations
pub type Result<T> = std::result::Result<T, StoreError>;

//! Error types for view models and subscriptions

use state_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ViewStateError {
    /// Another live subscription already uses this unique-only id
    #[error(
        "Subscribing with a duplicate subscription id: {0}. \
         If you have multiple uniqueOnly subscriptions in the same view, \
         use a custom subscription id to tell them apart"
    )]
    DuplicateSubscriptionId(String),

    #[error("A view model cannot subscribe to itself through subscribe_to; use subscribe instead")]
    SelfSubscription,

    #[error("State store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, ViewStateError>;

//! State trait for immutable, value-compared snapshots
//!
//! The State trait defines the contract for values owned by a [`Store`].
//! A state is never mutated in place: every reducer returns a new value and
//! change detection is plain `PartialEq`.
//!
//! # Example
//!
//! ```rust
//! use state_store::{impl_state, State};
//!
//! #[derive(Clone, Debug, PartialEq)]
//! pub struct Profile {
//!     pub name: String,
//!     pub age: u32,
//! }
//!
//! impl_state!(Profile { name, age });
//!
//! let a = Profile { name: "Shy".into(), age: 21 };
//! let b = Profile { name: "Shy".into(), age: 22 };
//! let diff = a.first_difference(&b).unwrap();
//! assert_eq!(diff.field, "age");
//! ```
//!
//! [`Store`]: crate::Store

use std::fmt;

use crate::error::StoreError;

/// The first field found to differ between two states
///
/// Values are captured through `Debug` so the report can name both sides
/// without knowing the field's type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDiff {
    /// Name of the diverging field
    pub field: &'static str,

    /// `Debug` rendering of the field in the first state
    pub first: String,

    /// `Debug` rendering of the field in the second state
    pub second: String,
}

impl fmt::Display for FieldDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} changed from {} to {}", self.field, self.first, self.second)
    }
}

/// Marker trait for application state held by a store
///
/// States must be:
/// - Clone: snapshots are handed to subscribers on other threads
/// - Debug: transitions are logged and impurity reports render values
/// - PartialEq: a write only notifies when the new value differs
/// - Send + Sync + 'static: the store is shared across threads
///
/// `first_difference` powers the debug-mode impurity report. The default
/// cannot locate a field; use [`impl_state!`](crate::impl_state) to generate
/// a field-by-field comparator.
pub trait State: Clone + fmt::Debug + PartialEq + Send + Sync + 'static {
    /// Find the first field whose value differs between `self` and `other`
    fn first_difference(&self, other: &Self) -> Option<FieldDiff> {
        let _ = other;
        None
    }
}

/// Implement [`State`] with a field-by-field `first_difference`
///
/// Fields are compared in the order listed.
#[macro_export]
macro_rules! impl_state {
    ($ty:ty { $($field:ident),+ $(,)? }) => {
        impl $crate::State for $ty {
            fn first_difference(&self, other: &Self) -> Option<$crate::FieldDiff> {
                $(
                    if self.$field != other.$field {
                        return Some($crate::FieldDiff {
                            field: stringify!($field),
                            first: format!("{:?}", self.$field),
                            second: format!("{:?}", other.$field),
                        });
                    }
                )+
                None
            }
        }
    };
}

/// Compare two evaluations of the same reducer
///
/// Returns an error naming the diverging field when the reducer produced
/// different states from the same input.
pub fn check_purity<S: State>(store: &str, first: &S, second: &S) -> Result<(), StoreError> {
    if first == second {
        return Ok(());
    }

    match first.first_difference(second) {
        Some(diff) => Err(StoreError::ImpureReducer {
            store: store.to_string(),
            field: diff.field,
            first: diff.first,
            second: diff.second,
        }),
        None => Err(StoreError::ImpureReducerUnlocated {
            store: store.to_string(),
            first: format!("{first:?}"),
            second: format!("{second:?}"),
        }),
    }
}

//! Property selection over a state type
//!
//! A [`Selector`] names a set of fields of `S` by extractor functions. A
//! subscription through a selector only sees new states whose selected
//! fields changed:
//!
//! ```rust
//! use view_state::Selector;
//!
//! #[derive(Clone, Debug, PartialEq)]
//! struct Feed { loading: bool, items: Vec<String>, scroll: u32 }
//!
//! let content = Selector::new()
//!     .field("loading", |f: &Feed| f.loading)
//!     .field("items", |f: &Feed| f.items.clone());
//!
//! let filter = content.baseline(&Feed { loading: false, items: vec![], scroll: 0 });
//! assert!(!filter.changed(&Feed { loading: false, items: vec![], scroll: 9 }));
//! assert!(filter.changed(&Feed { loading: true, items: vec![], scroll: 9 }));
//! ```
//!
//! Extracted values are type-erased behind `Any`, each paired with an
//! equality function monomorphized for its concrete type.

use std::any::Any;
use std::sync::Arc;

use parking_lot::Mutex;

type Erased = Box<dyn Any + Send + Sync>;
type Extract<S> = Arc<dyn Fn(&S) -> Erased + Send + Sync>;
type Compare = fn(&(dyn Any + Send + Sync), &(dyn Any + Send + Sync)) -> bool;

fn values_equal<V: PartialEq + 'static>(
    first: &(dyn Any + Send + Sync),
    second: &(dyn Any + Send + Sync),
) -> bool {
    match (first.downcast_ref::<V>(), second.downcast_ref::<V>()) {
        (Some(first), Some(second)) => first == second,
        _ => false,
    }
}

struct Field<S> {
    name: &'static str,
    extract: Extract<S>,
    equals: Compare,
}

impl<S> Clone for Field<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            extract: Arc::clone(&self.extract),
            equals: self.equals,
        }
    }
}

/// A named set of fields of `S`
pub struct Selector<S> {
    fields: Vec<Field<S>>,
}

impl<S: 'static> Selector<S> {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Add a field
    ///
    /// Selecting a name twice keeps the newer extractor.
    pub fn field<V, F>(mut self, name: &'static str, extract: F) -> Self
    where
        V: PartialEq + Send + Sync + 'static,
        F: Fn(&S) -> V + Send + Sync + 'static,
    {
        let field = Field {
            name,
            extract: Arc::new(move |state: &S| Box::new(extract(state)) as Erased),
            equals: values_equal::<V>,
        };

        match self.fields.iter_mut().find(|existing| existing.name == name) {
            Some(existing) => *existing = field,
            None => self.fields.push(field),
        }
        self
    }

    /// Union of two selections, by field name
    ///
    /// Fields already in `self` win over same-named fields in `other`.
    pub fn merge(mut self, other: Selector<S>) -> Self {
        for field in other.fields {
            if !self.fields.iter().any(|existing| existing.name == field.name) {
                self.fields.push(field);
            }
        }
        self
    }

    /// Selected field names, in selection order
    pub fn names(&self) -> Vec<&'static str> {
        self.fields.iter().map(|field| field.name).collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Start a change filter whose baseline is `current`
    pub fn baseline(&self, current: &S) -> SelectionFilter<S> {
        let last = self.fields.iter().map(|field| (field.extract)(current)).collect();
        SelectionFilter {
            fields: self.fields.clone(),
            last: Mutex::new(last),
        }
    }
}

impl<S: 'static> Default for Selector<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Clone for Selector<S> {
    fn clone(&self) -> Self {
        Self {
            fields: self.fields.clone(),
        }
    }
}

impl<S: 'static> std::ops::Add for Selector<S> {
    type Output = Selector<S>;

    fn add(self, other: Selector<S>) -> Selector<S> {
        self.merge(other)
    }
}

impl<S> std::fmt::Debug for Selector<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.fields.iter().map(|field| field.name).collect();
        f.debug_struct("Selector").field("fields", &names).finish()
    }
}

/// Tracks the last seen values of a [`Selector`]'s fields
pub struct SelectionFilter<S> {
    fields: Vec<Field<S>>,
    last: Mutex<Vec<Erased>>,
}

impl<S> SelectionFilter<S> {
    /// Whether any selected field of `state` differs from the last state
    /// checked (or the baseline)
    ///
    /// The comparison and the baseline update happen under one lock, so
    /// concurrent callers never both report the same change.
    pub fn changed(&self, state: &S) -> bool {
        let mut last = self.last.lock();
        let mut changed = false;

        for (field, previous) in self.fields.iter().zip(last.iter_mut()) {
            let next = (field.extract)(state);
            if !(field.equals)(&**previous, &*next) {
                changed = true;
            }
            *previous = next;
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Profile {
        name: String,
        age: u32,
        visits: u64,
    }

    fn profile(name: &str, age: u32, visits: u64) -> Profile {
        Profile { name: name.into(), age, visits }
    }

    #[test]
    fn test_unselected_changes_are_ignored() {
        let selector = Selector::new().field("name", |p: &Profile| p.name.clone());
        let filter = selector.baseline(&profile("ada", 36, 0));

        assert!(!filter.changed(&profile("ada", 37, 1)));
        assert!(filter.changed(&profile("grace", 37, 1)));
        assert!(!filter.changed(&profile("grace", 38, 2)));
    }

    #[test]
    fn test_baseline_advances() {
        let selector = Selector::new().field("age", |p: &Profile| p.age);
        let filter = selector.baseline(&profile("ada", 1, 0));

        assert!(filter.changed(&profile("ada", 2, 0)));
        assert!(!filter.changed(&profile("ada", 2, 0)));
        assert!(filter.changed(&profile("ada", 1, 0)));
    }

    #[test]
    fn test_merge_is_union_by_name() {
        let first = Selector::new()
            .field("name", |p: &Profile| p.name.clone())
            .field("age", |p: &Profile| p.age);
        let second = Selector::new()
            .field("age", |p: &Profile| p.age)
            .field("visits", |p: &Profile| p.visits);

        let merged = first + second;
        assert_eq!(merged.names(), vec!["name", "age", "visits"]);
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn test_reselecting_a_name_replaces_it() {
        let selector = Selector::new()
            .field("key", |p: &Profile| p.age)
            .field("key", |p: &Profile| p.visits);
        assert_eq!(selector.len(), 1);

        let filter = selector.baseline(&profile("ada", 1, 1));
        assert!(!filter.changed(&profile("ada", 9, 1)));
        assert!(filter.changed(&profile("ada", 9, 2)));
    }

    #[test]
    fn test_empty_selector_never_changes() {
        let selector: Selector<Profile> = Selector::new();
        let filter = selector.baseline(&profile("ada", 1, 1));

        assert!(selector.is_empty());
        assert!(!filter.changed(&profile("grace", 2, 2)));
    }

    #[test]
    fn test_type_mismatch_counts_as_change() {
        let equal = values_equal::<u32>(&1u32, &1u32);
        let mismatched = values_equal::<u32>(&1u32, &1u64);
        assert!(equal);
        assert!(!mismatched);
    }
}

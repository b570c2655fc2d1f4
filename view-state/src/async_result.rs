//! Progress of an asynchronous operation as a plain state value
//!
//! [`Async`] is meant to live inside a view model's state, so every variant
//! is comparable and cloneable. `Loading` and `Fail` may carry the last good
//! value so a view can keep showing it.

/// Result of an asynchronous call, stored in state
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Async<T> {
    #[default]
    Uninitialized,
    Loading(Option<T>),
    Success(T),
    Fail {
        message: String,
        value: Option<T>,
    },
}

impl<T> Async<T> {
    pub fn loading() -> Self {
        Async::Loading(None)
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Async::Fail {
            message: message.into(),
            value: None,
        }
    }

    /// `Success` or `Fail`
    pub fn is_complete(&self) -> bool {
        matches!(self, Async::Success(_) | Async::Fail { .. })
    }

    /// `Uninitialized` or `Fail`: nothing is in flight and no result is held
    pub fn should_load(&self) -> bool {
        matches!(self, Async::Uninitialized | Async::Fail { .. })
    }

    pub fn is_incomplete(&self) -> bool {
        matches!(self, Async::Uninitialized | Async::Loading(_))
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Async::Loading(_))
    }

    /// The carried value, if any
    pub fn value(&self) -> Option<&T> {
        match self {
            Async::Uninitialized => None,
            Async::Loading(value) => value.as_ref(),
            Async::Success(value) => Some(value),
            Async::Fail { value, .. } => value.as_ref(),
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Async::Fail { message, .. } => Some(message),
            _ => None,
        }
    }

    /// Convert the carried value, keeping the variant
    pub fn map<U, F>(self, f: F) -> Async<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            Async::Uninitialized => Async::Uninitialized,
            Async::Loading(value) => Async::Loading(value.map(f)),
            Async::Success(value) => Async::Success(f(value)),
            Async::Fail { message, value } => Async::Fail {
                message,
                value: value.map(f),
            },
        }
    }
}

impl<T: Clone> Async<T> {
    /// `Loading` that keeps showing whatever value this result carries
    pub fn to_loading(&self) -> Self {
        Async::Loading(self.value().cloned())
    }
}

/// Merge a page into a list at `offset`
///
/// Items before `offset` are kept, anything at or past it is replaced by
/// `page`. An offset past the end simply appends.
pub fn append_at<T: Clone>(list: &[T], page: &[T], offset: usize) -> Vec<T> {
    let keep = offset.min(list.len());
    let mut merged = Vec::with_capacity(keep + page.len());
    merged.extend_from_slice(&list[..keep]);
    merged.extend_from_slice(page);
    merged
}

//! Interoperability with other deferred implementations.
//!
//! A [`Thenable`] is anything that can be subscribed to with a success handler
//! and a failure handler. Settling a [`Deferred`] with a thenable does not store
//! the thenable itself; the deferred value adopts the thenable's eventual
//! outcome instead. [`Resolution`] is the typed sum that tells the two cases
//! apart.
//!
//! [`Deferred`]: crate::Deferred
use std::fmt;

/// Handler invoked with a success value.
pub type OnSuccess<T> = Box<dyn FnOnce(T) + Send>;

/// Handler invoked with a failure payload.
pub type OnFailure<E> = Box<dyn FnOnce(E) + Send>;

/// A value exposing continuation registration with a success and a failure handler.
///
/// Implementations must eventually call at most one of the two handlers, once.
/// [`Deferred`] implements this trait, and so can any foreign future-like
/// type that should be adoptable by a `Deferred`.
///
/// [`Deferred`]: crate::Deferred
pub trait Thenable<T, E>: Send {
    /// Registers the pair of handlers, consuming the thenable.
    fn subscribe(self: Box<Self>, on_success: OnSuccess<T>, on_failure: OnFailure<E>);
}

/// What a success settlement hands over: either a final value or a thenable
/// whose outcome is adopted.
pub enum Resolution<T, E> {
    /// A plain value, stored as the result.
    Value(T),
    /// Another deferred computation. The receiver mirrors its outcome.
    Thenable(Box<dyn Thenable<T, E>>),
}

impl<T, E> Resolution<T, E> {
    /// Wraps a plain value.
    pub fn value(value: T) -> Self {
        Self::Value(value)
    }

    /// Wraps a thenable for adoption.
    pub fn adopt(thenable: impl Thenable<T, E> + 'static) -> Self {
        Self::Thenable(Box::new(thenable))
    }

    /// Returns `true` if the resolution still has to be unwrapped.
    #[must_use]
    pub fn is_thenable(&self) -> bool {
        matches!(self, Self::Thenable(_))
    }
}

impl<T: fmt::Debug, E> fmt::Debug for Resolution<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Thenable(_) => f.write_str("Thenable(..)"),
        }
    }
}

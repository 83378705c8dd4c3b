//! Chaining operators that derive a new [`Deferred`] from an existing one.
//!
//! All of them are built on [`Deferred::then_with`]: the receiver gets a
//! continuation pair whose branches settle the derived value. A missing
//! handler passes the outcome through unchanged, which is how a rejection
//! travels down a chain of success-only steps until something catches it.
//!
//! Handlers report failure by returning `Err`, which rejects the derived value.
use tracing::debug;

use crate::{deferred::Deferred, thenable::Resolution};

impl<T, E> Deferred<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Derives a value from both branches of the receiver's outcome.
    ///
    /// The handler for the branch that was taken decides the derived value:
    /// `Ok` resolves it (adopting the outcome of a thenable resolution) and
    /// `Err` rejects it. A failure handler that returns `Ok` recovers from the
    /// rejection.
    ///
    /// # Example
    /// ```
    /// # use deferred::{Deferred, Resolution, TaskQueue};
    /// let queue = TaskQueue::new();
    /// let value = Deferred::<u32, String>::rejected(queue.clone(), "boom".into());
    ///
    /// let recovered = value.then_with(
    ///     |v| Ok(Resolution::Value(v.to_string())),
    ///     |e| Ok(Resolution::Value(format!("recovered from {e}"))),
    /// );
    ///
    /// queue.run_until_idle();
    /// assert_eq!(recovered.peek(), Some(Ok("recovered from boom".to_string())));
    /// ```
    pub fn then_with<U, S, F>(&self, on_success: S, on_failure: F) -> Deferred<U, E>
    where
        U: Clone + Send + 'static,
        S: FnOnce(T) -> Result<Resolution<U, E>, E> + Send + 'static,
        F: FnOnce(E) -> Result<Resolution<U, E>, E> + Send + 'static,
    {
        Deferred::new_in(self.defer(), |resolver, rejecter| {
            self.add_continuation(
                {
                    let resolver = resolver.clone();
                    let rejecter = rejecter.clone();
                    move |value| match on_success(value) {
                        Ok(resolution) => resolver.settle(resolution),
                        Err(error) => rejecter.reject(error),
                    }
                },
                move |error| match on_failure(error) {
                    Ok(resolution) => resolver.settle(resolution),
                    Err(error) => rejecter.reject(error),
                },
            );
            Ok(())
        })
    }

    /// Maps the success value. Rejections pass through untouched.
    ///
    /// Returning `Err` from `on_success` rejects the derived value.
    pub fn then<U, S>(&self, on_success: S) -> Deferred<U, E>
    where
        U: Clone + Send + 'static,
        S: FnOnce(T) -> Result<U, E> + Send + 'static,
    {
        self.then_with(move |value| on_success(value).map(Resolution::value), Err)
    }

    /// Like [`then`](Deferred::then), but the handler may hand back another
    /// deferred computation whose outcome the derived value adopts.
    ///
    /// # Example
    /// ```
    /// # use deferred::{Deferred, Resolution, TaskQueue};
    /// let queue = TaskQueue::new();
    /// let inner_queue = queue.clone();
    ///
    /// let value = Deferred::<u32, ()>::resolved(queue.clone(), 20)
    ///     .then_adopt(move |v| Ok(Deferred::resolved(inner_queue, v * 2).into()));
    ///
    /// queue.run_until_idle();
    /// assert_eq!(value.peek(), Some(Ok(40)));
    /// ```
    pub fn then_adopt<U, S>(&self, on_success: S) -> Deferred<U, E>
    where
        U: Clone + Send + 'static,
        S: FnOnce(T) -> Result<Resolution<U, E>, E> + Send + 'static,
    {
        self.then_with(on_success, Err)
    }

    /// Handles a rejection. Success values pass through untouched.
    ///
    /// Returning `Ok` from `on_failure` resolves the derived value; returning
    /// `Err` rejects it with the new error.
    pub fn catch<F>(&self, on_failure: F) -> Deferred<T, E>
    where
        F: FnOnce(E) -> Result<T, E> + Send + 'static,
    {
        self.then_with(
            |value| Ok(Resolution::value(value)),
            move |error| on_failure(error).map(Resolution::value),
        )
    }

    /// Runs `on_settle` once the receiver settles, then settles the derived
    /// value to the receiver's outcome.
    ///
    /// The callback runs exactly once whichever branch was taken.
    pub fn finally<C>(&self, on_settle: C) -> Deferred<T, E>
    where
        C: FnOnce() + Send + 'static,
    {
        self.try_finally(move || {
            on_settle();
            Ok(())
        })
    }

    /// Like [`finally`](Deferred::finally), with a fallible callback.
    ///
    /// If the callback fails, its error rejects the derived value in place of
    /// the receiver's outcome.
    pub fn try_finally<C>(&self, on_settle: C) -> Deferred<T, E>
    where
        C: FnOnce() -> Result<(), E> + Send + 'static,
    {
        Deferred::new_in(self.defer(), |resolver, rejecter| {
            self.on_settled(move |outcome| {
                if let Err(error) = on_settle() {
                    debug!("settle callback failed, replacing the outcome");
                    rejecter.reject(error);
                    return;
                }
                match outcome {
                    Ok(value) => resolver.resolve(value),
                    Err(error) => rejecter.reject(error),
                }
            });
            Ok(())
        })
    }
}

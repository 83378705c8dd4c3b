//! Awaiting a [`Deferred`] from async code.
//!
//! [`Deferred::wait`] registers an ordinary continuation whose only job is to
//! forward the outcome into a oneshot channel, and returns a future reading
//! from that channel. The future works on any executor.
use std::{
    fmt,
    future::IntoFuture,
    pin::Pin,
    task::{Context, Poll},
};

use futures::channel::oneshot;
use pin_project_lite::pin_project;

use crate::deferred::Deferred;

/// Reasons a [`Wait`] future can resolve without a success value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitError<E> {
    /// The deferred value was rejected with this payload.
    Rejected(E),

    /// The deferred value was dropped while still pending, so it can never settle.
    Abandoned,
}

impl<E> WaitError<E> {
    /// Returns the rejection payload, if there is one.
    pub fn into_rejection(self) -> Option<E> {
        match self {
            WaitError::Rejected(error) => Some(error),
            WaitError::Abandoned => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for WaitError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitError::Rejected(error) => write!(f, "Deferred value was rejected: {error}"),
            WaitError::Abandoned => {
                write!(f, "Deferred value was dropped before it settled")
            }
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for WaitError<E> {}

pin_project! {
    /// Future returned by [`Deferred::wait`], resolving to the outcome of the
    /// deferred value.
    #[must_use = "futures do nothing unless polled or .awaited"]
    pub struct Wait<T, E> {
        #[pin]
        receiver: oneshot::Receiver<Result<T, E>>,
    }
}

impl<T, E> Future for Wait<T, E> {
    type Output = Result<T, WaitError<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project().receiver.poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome.map_err(WaitError::Rejected)),
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(WaitError::Abandoned)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T, E> Deferred<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Returns a future that resolves once this value settles.
    ///
    /// The future only observes the outcome; it does not drive settlement.
    /// Whatever runs the value's [`Defer`](crate::Defer) must keep running for
    /// the future to complete.
    ///
    /// # Example
    /// ```
    /// # use deferred::{Deferred, PoolDefer};
    /// # futures::executor::block_on(async {
    /// let defer = PoolDefer::new()?;
    /// let value = Deferred::<u32, String>::resolved(defer, 41).then(|v| Ok(v + 1));
    ///
    /// assert_eq!(value.wait().await, Ok(42));
    /// # Ok::<(), std::io::Error>(())
    /// # }).unwrap();
    /// ```
    pub fn wait(&self) -> Wait<T, E> {
        let (sender, receiver) = oneshot::channel();
        self.on_settled(move |outcome| {
            // The waiter may have been dropped; nothing to report then.
            let _ = sender.send(outcome);
        });
        Wait { receiver }
    }
}

impl<T, E> IntoFuture for Deferred<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    type Output = Result<T, WaitError<E>>;
    type IntoFuture = Wait<T, E>;

    fn into_future(self) -> Self::IntoFuture {
        self.wait()
    }
}

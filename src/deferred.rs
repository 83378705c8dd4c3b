//! Defines `Deferred`, a value that settles exactly once, and the capabilities
//! used to settle it.
//!
//! A `Deferred` starts out pending. Its producer receives a [`Resolver`] and a
//! [`Rejecter`] and calls one of them, now or later, to move the value to
//! fulfilled or rejected. Settlement never happens inline: each attempt is
//! handed to the value's [`Defer`] and applied on a later turn, where the first
//! attempt that finds the value pending wins and every other attempt is a
//! no-op.
//!
//! Consumers register continuations that run against the outcome. Those
//! registered while pending are queued and dispatched in registration order
//! as soon as the value settles; those registered afterwards are dispatched
//! on a later turn.
use std::{
    fmt, mem,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tracing::{debug, error, trace};

use crate::{
    defer::{Defer, panic_message},
    thenable::{OnFailure, OnSuccess, Resolution, Thenable},
};

/// Settlement state of a [`Deferred`] without its payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    /// Not settled yet.
    Pending,
    /// Settled with a success value.
    Fulfilled,
    /// Settled with a failure payload.
    Rejected,
}

// The result lives inside the settled variants so it can only be written
// together with the transition out of `Pending`.
enum State<T, E> {
    Pending,
    Fulfilled(T),
    Rejected(E),
}

impl<T: Clone, E: Clone> State<T, E> {
    fn status(&self) -> Status {
        match self {
            State::Pending => Status::Pending,
            State::Fulfilled(_) => Status::Fulfilled,
            State::Rejected(_) => Status::Rejected,
        }
    }

    fn outcome(&self) -> Option<Result<T, E>> {
        match self {
            State::Pending => None,
            State::Fulfilled(value) => Some(Ok(value.clone())),
            State::Rejected(error) => Some(Err(error.clone())),
        }
    }
}

type Continuation<T, E> = Box<dyn FnOnce(Result<T, E>) + Send>;

// A settlement attempt waiting for its deferred turn.
enum Attempt<T, E> {
    Fulfill(Resolution<T, E>),
    Reject(E),
}

struct Inner<T, E> {
    state: State<T, E>,
    continuations: Vec<Continuation<T, E>>,
}

struct Shared<T, E> {
    inner: Mutex<Inner<T, E>>,
    defer: Arc<dyn Defer>,
}

impl<T, E> Shared<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn lock(&self) -> MutexGuard<'_, Inner<T, E>> {
        // No user code runs under the lock, so a poisoned state is still consistent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn schedule_settle(self: &Arc<Self>, attempt: Attempt<T, E>) {
        let this = Arc::clone(self);
        self.defer.defer_later(Box::new(move || this.settle(attempt)));
    }

    fn settle(self: &Arc<Self>, attempt: Attempt<T, E>) {
        let mut inner = self.lock();
        if !matches!(inner.state, State::Pending) {
            debug!(status = ?inner.state.status(), "ignoring settlement of a settled value");
            return;
        }

        let settled = match attempt {
            Attempt::Fulfill(Resolution::Value(value)) => State::Fulfilled(value),
            Attempt::Fulfill(Resolution::Thenable(thenable)) => {
                drop(inner);
                debug!("adopting the outcome of a thenable");
                let resolver = Resolver {
                    shared: Arc::clone(self),
                };
                let rejecter = Rejecter {
                    shared: Arc::clone(self),
                };
                thenable.subscribe(
                    Box::new(move |value| resolver.resolve(value)),
                    Box::new(move |error| rejecter.reject(error)),
                );
                return;
            }
            Attempt::Reject(error) => State::Rejected(error),
        };
        inner.state = settled;
        trace!(status = ?inner.state.status(), "settled");
        drop(inner);
        self.drain();
    }

    fn add_continuation(self: &Arc<Self>, continuation: Continuation<T, E>) {
        let mut inner = self.lock();
        inner.continuations.push(continuation);
        if matches!(inner.state, State::Pending) {
            return;
        }
        drop(inner);

        // Late subscribers are dispatched on a later turn, never inline.
        let this = Arc::clone(self);
        self.defer.defer_later(Box::new(move || this.drain()));
    }

    fn drain(&self) {
        let mut inner = self.lock();
        let Some(outcome) = inner.state.outcome() else {
            return;
        };
        let queued = mem::take(&mut inner.continuations);
        drop(inner);

        trace!(continuations = queued.len(), "dispatching");
        for continuation in queued {
            // A panicking handler must not cost the remaining ones their dispatch.
            let dispatched =
                panic::catch_unwind(AssertUnwindSafe(|| continuation(outcome.clone())));
            if let Err(payload) = dispatched {
                error!(panic = panic_message(payload.as_ref()), "continuation panicked");
            }
        }
    }
}

/// Capability that settles its [`Deferred`] successfully.
///
/// Handed to the resolver closure of [`Deferred::new`]. Any number of calls is
/// allowed; only the first settlement attempt applied to a pending value has
/// an effect.
pub struct Resolver<T, E> {
    shared: Arc<Shared<T, E>>,
}

impl<T, E> Resolver<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Fulfills the value with `value` on a later turn.
    pub fn resolve(&self, value: T) {
        self.settle(Resolution::value(value));
    }

    /// Makes the value mirror the eventual outcome of `thenable`.
    pub fn adopt(&self, thenable: impl Thenable<T, E> + 'static) {
        self.settle(Resolution::adopt(thenable));
    }

    /// Settles with a plain value or adopts a thenable, depending on `resolution`.
    pub fn settle(&self, resolution: Resolution<T, E>) {
        self.shared.schedule_settle(Attempt::Fulfill(resolution));
    }
}

impl<T, E> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Capability that settles its [`Deferred`] with a failure.
///
/// Like [`Resolver`], calls after the first applied settlement are ignored.
pub struct Rejecter<T, E> {
    shared: Arc<Shared<T, E>>,
}

impl<T, E> Rejecter<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Rejects the value with `error` on a later turn.
    pub fn reject(&self, error: E) {
        self.shared.schedule_settle(Attempt::Reject(error));
    }
}

impl<T, E> Clone for Rejecter<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// A value that is not available yet and settles exactly once, to either a
/// success value `T` or a failure payload `E`.
///
/// `Deferred` is a cheap, cloneable handle; all clones observe the same
/// settlement. Every value owns a [`Defer`] through which settlement and late
/// dispatch are scheduled, and values derived with [`then`], [`catch`] or
/// [`finally`] inherit it.
///
/// Both `T` and `E` must be `Clone`, since every subscriber receives its own
/// copy of the outcome.
///
/// [`then`]: Deferred::then
/// [`catch`]: Deferred::catch
/// [`finally`]: Deferred::finally
///
/// # Example
/// ```
/// # use deferred::{Deferred, TaskQueue};
/// let queue = TaskQueue::new();
///
/// let value = Deferred::<u32, String>::new(queue.clone(), |resolver, _| {
///     resolver.resolve(1);
///     Ok(())
/// });
/// let chained = value.then(|v| Ok(v + 1)).then(|v| Ok(v + 1));
///
/// queue.run_until_idle();
/// assert_eq!(chained.peek(), Some(Ok(3)));
/// ```
pub struct Deferred<T, E> {
    shared: Arc<Shared<T, E>>,
}

impl<T, E> Deferred<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Creates a pending value and runs `resolver` synchronously with its
    /// settlement capabilities.
    ///
    /// The resolver may settle immediately or keep the capabilities to settle
    /// later. If it returns an error, the value is rejected with that error;
    /// the error is never returned from `new`. A panicking resolver is logged
    /// and contained; whatever it settled before panicking still applies.
    pub fn new<D, R>(defer: D, resolver: R) -> Self
    where
        D: Defer + 'static,
        R: FnOnce(Resolver<T, E>, Rejecter<T, E>) -> Result<(), E>,
    {
        Self::new_in(Arc::new(defer), resolver)
    }

    /// Same as [`new`](Deferred::new), but shares an existing [`Defer`].
    pub fn new_in<R>(defer: Arc<dyn Defer>, resolver: R) -> Self
    where
        R: FnOnce(Resolver<T, E>, Rejecter<T, E>) -> Result<(), E>,
    {
        let (deferred, resolve, reject) = Self::pending_in(defer);
        match panic::catch_unwind(AssertUnwindSafe(|| resolver(resolve, reject.clone()))) {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                debug!("resolver failed, rejecting");
                reject.reject(error);
            }
            Err(payload) => {
                error!(panic = panic_message(payload.as_ref()), "resolver panicked");
            }
        }
        deferred
    }

    /// Creates a pending value and returns it together with its capabilities.
    ///
    /// Useful when the producer settling the value is not known at the
    /// time the value is created.
    pub fn pending<D>(defer: D) -> (Self, Resolver<T, E>, Rejecter<T, E>)
    where
        D: Defer + 'static,
    {
        Self::pending_in(Arc::new(defer))
    }

    fn pending_in(defer: Arc<dyn Defer>) -> (Self, Resolver<T, E>, Rejecter<T, E>) {
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                state: State::Pending,
                continuations: Vec::with_capacity(4),
            }),
            defer,
        });
        let resolver = Resolver {
            shared: Arc::clone(&shared),
        };
        let rejecter = Rejecter {
            shared: Arc::clone(&shared),
        };
        (Self { shared }, resolver, rejecter)
    }

    /// Creates a value that fulfills with `value` on the next turn.
    pub fn resolved<D>(defer: D, value: T) -> Self
    where
        D: Defer + 'static,
    {
        Self::new(defer, |resolver, _| {
            resolver.resolve(value);
            Ok(())
        })
    }

    /// Creates a value that rejects with `error` on the next turn.
    pub fn rejected<D>(defer: D, error: E) -> Self
    where
        D: Defer + 'static,
    {
        Self::new(defer, |_, rejecter| {
            rejecter.reject(error);
            Ok(())
        })
    }

    /// Registers a continuation pair. Exactly one of the handlers is called
    /// with the outcome, once the value has settled.
    ///
    /// Handlers registered while pending run in registration order right
    /// after settlement. Handlers registered after settlement run on a later
    /// turn of the value's [`Defer`]. A handler that panics is logged and the
    /// handlers after it still run.
    pub fn add_continuation<S, F>(&self, on_success: S, on_failure: F)
    where
        S: FnOnce(T) + Send + 'static,
        F: FnOnce(E) + Send + 'static,
    {
        self.on_settled(move |outcome| match outcome {
            Ok(value) => on_success(value),
            Err(error) => on_failure(error),
        });
    }

    // Both branches of a continuation pair folded into one closure.
    pub(crate) fn on_settled(&self, continuation: impl FnOnce(Result<T, E>) + Send + 'static) {
        self.shared.add_continuation(Box::new(continuation));
    }

    pub(crate) fn defer(&self) -> Arc<dyn Defer> {
        Arc::clone(&self.shared.defer)
    }

    /// Current settlement status.
    #[must_use]
    pub fn status(&self) -> Status {
        self.shared.lock().state.status()
    }

    /// Returns `true` while the value has not settled.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status() == Status::Pending
    }

    /// Returns a copy of the outcome if the value has settled.
    #[must_use]
    pub fn peek(&self) -> Option<Result<T, E>> {
        self.shared.lock().state.outcome()
    }
}

impl<T, E> Clone for Deferred<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T, E> Thenable<T, E> for Deferred<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn subscribe(self: Box<Self>, on_success: OnSuccess<T>, on_failure: OnFailure<E>) {
        self.add_continuation(on_success, on_failure);
    }
}

impl<T, E> From<Deferred<T, E>> for Resolution<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn from(deferred: Deferred<T, E>) -> Self {
        Resolution::adopt(deferred)
    }
}

impl<T, E> fmt::Debug for Deferred<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

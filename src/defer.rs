//! The deferred-execution primitive used to run settlement and dispatch work.
//!
//! Every settlement of a [`Deferred`] and every dispatch to a late subscriber
//! goes through a [`Defer`] implementation instead of running inline. The only
//! guarantee required from an implementation is that each job runs exactly
//! once, later, and in FIFO order among jobs submitted during the same
//! synchronous phase.
//!
//! Three implementations are provided:
//! - [`TaskQueue`], an explicit job queue drained by its owner
//! - [`PoolDefer`], a single-worker thread pool
//! - [`FnDefer`], built with [`from_fn`], which hands jobs to any closure
//!
//! [`Deferred`]: crate::Deferred
use std::{
    any::Any,
    collections::VecDeque,
    fmt, io,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex, PoisonError},
};

use futures::executor::{ThreadPool, ThreadPoolBuilder};
use tracing::{error, trace};

/// A unit of deferred work.
pub type Job = Box<dyn FnOnce() + Send>;

/// Extracts the message of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

// Runs a job, containing a panic so the runner keeps serving later jobs.
fn run_job(job: Job) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
        error!(panic = panic_message(payload.as_ref()), "deferred job panicked");
    }
}

/// Schedules work to run later, after the current synchronous phase.
pub trait Defer: Send + Sync {
    /// Runs `job` exactly once, at some later point, preserving FIFO order
    /// relative to other jobs deferred during the same phase.
    fn defer_later(&self, job: Job);
}

/// A FIFO job queue that runs only when its owner drains it.
///
/// `TaskQueue` plays the role of an event loop owned by the caller: jobs pile
/// up until [`run_until_idle`] or [`run_next`] is called. This makes the order
/// of settlements fully deterministic, which is what single-threaded hosts and
/// tests want.
///
/// Cloning a `TaskQueue` returns another handle to the same queue. A job that
/// panics is logged and does not stop the jobs queued after it.
///
/// [`run_until_idle`]: TaskQueue::run_until_idle
/// [`run_next`]: TaskQueue::run_next
///
/// # Example
/// ```
/// # use deferred::{Deferred, TaskQueue};
/// let queue = TaskQueue::new();
/// let value = Deferred::<_, ()>::resolved(queue.clone(), 7);
///
/// assert!(value.is_pending());
/// queue.run_until_idle();
/// assert_eq!(value.peek(), Some(Ok(7)));
/// ```
#[derive(Clone, Default)]
pub struct TaskQueue {
    jobs: Arc<Mutex<VecDeque<Job>>>,
}

impl TaskQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(Mutex::new(VecDeque::with_capacity(16))),
        }
    }

    /// Runs the oldest queued job, if any. Returns `false` when the queue was empty.
    pub fn run_next(&self) -> bool {
        // The lock must be released before the job runs, jobs usually defer more jobs.
        let job = self
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match job {
            Some(job) => {
                run_job(job);
                true
            }
            None => false,
        }
    }

    /// Runs jobs until the queue is empty, including jobs deferred by the jobs
    /// being run. Returns the number of jobs executed.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        trace!(jobs = ran, "task queue idle");
        ran
    }

    /// Number of jobs waiting to run.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if no job is waiting to run.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Defer for TaskQueue {
    fn defer_later(&self, job: Job) {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(job);
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("queued", &self.len())
            .finish()
    }
}

/// Runs deferred jobs on a background thread.
///
/// Backed by a [`ThreadPool`] with exactly one worker, so jobs execute one at a
/// time in the order they were submitted. A panicking job is logged and the
/// worker moves on to the next one. Handlers attached to values settled
/// through a `PoolDefer` run on that worker thread and must not block on other
/// values settled through the same pool.
#[derive(Clone)]
pub struct PoolDefer {
    pool: ThreadPool,
}

impl PoolDefer {
    /// Spawns the worker thread.
    ///
    /// # Errors
    ///
    /// Returns the I/O error reported by the operating system if the worker
    /// thread cannot be spawned.
    pub fn new() -> io::Result<Self> {
        Self::with_name_prefix("deferred-")
    }

    /// Spawns the worker thread, naming it with the given prefix.
    ///
    /// # Errors
    ///
    /// Returns the I/O error reported by the operating system if the worker
    /// thread cannot be spawned.
    pub fn with_name_prefix(prefix: impl Into<String>) -> io::Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .pool_size(1)
            .name_prefix(prefix)
            .create()?;
        Ok(Self { pool })
    }
}

impl Defer for PoolDefer {
    fn defer_later(&self, job: Job) {
        self.pool.spawn_ok(async move { run_job(job) });
    }
}

impl fmt::Debug for PoolDefer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolDefer").finish_non_exhaustive()
    }
}

/// A [`Defer`] that forwards every job to a closure. Created by [`from_fn`].
#[derive(Clone)]
pub struct FnDefer<F> {
    spawn: F,
}

/// Builds a [`Defer`] from a closure that receives each job.
///
/// The closure is responsible for running the job later, never inline, and in
/// submission order.
///
/// # Example
/// ```
/// # use std::sync::{Arc, Mutex};
/// # use deferred::{Deferred, defer};
/// let jobs = Arc::new(Mutex::new(Vec::new()));
/// let sink = Arc::clone(&jobs);
/// let defer = defer::from_fn(move |job| sink.lock().unwrap().push(job));
///
/// let value = Deferred::<u8, ()>::resolved(defer, 1);
/// for job in jobs.lock().unwrap().drain(..) {
///     job();
/// }
/// assert_eq!(value.peek(), Some(Ok(1)));
/// ```
pub fn from_fn<F>(spawn: F) -> FnDefer<F>
where
    F: Fn(Job) + Send + Sync,
{
    FnDefer { spawn }
}

impl<F> Defer for FnDefer<F>
where
    F: Fn(Job) + Send + Sync,
{
    fn defer_later(&self, job: Job) {
        (self.spawn)(job);
    }
}

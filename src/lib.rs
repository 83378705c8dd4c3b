//! Settle-once deferred values with queued continuations.
//!
//! `deferred` provides [`Deferred`], a container for a value that is not
//! available yet. A deferred value moves exactly once from pending to either
//! fulfilled or rejected, and consumers attach continuations that observe the
//! outcome no matter whether they were attached before or after settlement.
//!
//! The crate does not own a runtime. Settlement and late dispatch are handed
//! to an injected [`Defer`] implementation, so the same values work inside a
//! hand-driven [`TaskQueue`], on a background [`PoolDefer`] thread, or on any
//! executor adapted with [`defer::from_fn`].
//!
//! Features include:
//! - Single settlement: the first applied settlement wins, later ones are ignored
//! - Adoption of nested deferred values and foreign [`Thenable`] implementations
//! - Chaining with `then`, `then_adopt`, `then_with`, `catch`, `finally` and `try_finally`
//! - Awaiting any deferred value from async code through [`Wait`]
//!
//! # Example
//! ```
//! use deferred::{Deferred, TaskQueue};
//!
//! let queue = TaskQueue::new();
//! let (value, resolver, _) = Deferred::<String, String>::pending(queue.clone());
//!
//! let shout = value
//!     .then(|v| Ok(v + "!"))
//!     .catch(|e| Ok(format!("failed: {e}")));
//!
//! resolver.resolve("Done".to_string());
//! queue.run_until_idle();
//! assert_eq!(shout.peek(), Some(Ok("Done!".to_string())));
//! ```

mod chain;
pub mod defer;
pub mod deferred;
pub mod thenable;
pub mod wait;

pub use defer::{Defer, PoolDefer, TaskQueue};
pub use deferred::{Deferred, Rejecter, Resolver, Status};
pub use thenable::{Resolution, Thenable};
pub use wait::{Wait, WaitError};

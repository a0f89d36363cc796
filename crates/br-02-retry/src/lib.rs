//! # br-02-retry
//!
//! Generic bounded-retry execution used by the queue transport (re-creating
//! a missing queue) and the dispatcher (backend calls).
//!
//! ## Bounds
//!
//! A retry loop stops at whichever comes first:
//!
//! - `max_attempts` invocations of the action,
//! - a failure the caller's predicate classifies as not retryable,
//! - a wait that would push elapsed time past `total_time_limit`,
//! - cancellation of the scoping [`CancellationToken`](tokio_util::sync::CancellationToken).
//!
//! Cancellation is never treated as a retryable failure.
//!
//! ## Timers
//!
//! ```text
//! Instant                  0, 0, 0, ...
//! Exponential              i, 2i, 4i, ... max
//! RandomizedExponential    U[(1-j)·w, w] where w is the exponential wait
//! ```

pub mod error;
pub mod manager;
pub mod timer;

pub use error::RetryError;
pub use manager::{RetryManager, RetryPolicy};
pub use timer::{BackoffKind, ExponentialTimer, InstantTimer, RandomizedExponentialTimer, RetryTimer};

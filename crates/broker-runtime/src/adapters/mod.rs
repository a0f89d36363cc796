//! # Adapters
//!
//! Runtime implementations of the dispatcher's outbound ports.

pub mod backend;
pub mod observer;

pub use backend::{BackendResolver, ResolveError, LOOPBACK_SCHEME};
pub use observer::{ClientUsage, MetricsObserver};

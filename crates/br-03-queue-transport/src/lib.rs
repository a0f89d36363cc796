//! # br-03-queue-transport
//!
//! Uniform listener/writer pair over a named durable queue.
//!
//! ## Delivery Model
//!
//! The underlying store is at-least-once. A dequeued message is leased, not
//! removed: it is deleted only after its handler returns. A crash or a
//! failing handler lets the lease expire and the message reappears, which is
//! how a restarted process re-derives pending work.
//!
//! ```text
//! QueueWriter ──serialize──→ enqueue ──→ [ queue ] ──dequeue_batch──→ QueueListener
//!      │                                                  │
//!      └── create_if_not_exists + retry                   ├── deserialize (allow-list)
//!                                                         ├── handler, one message at a time
//!                                                         ├── ok → delete
//!                                                         └── too many deliveries → <queue>-poison
//! ```
//!
//! ## Stores
//!
//! | Store | Selected by | Notes |
//! |-------|-------------|-------|
//! | [`InMemoryQueueService`] | `UseInMemoryQueue=true` | Tests and single-process runs |
//! | `RedisQueueStore` | `redis://...` | Feature `redis` |

pub mod adapters;
pub mod error;
pub mod listener;
pub mod ports;
pub mod writer;

pub use adapters::memory::{InMemoryQueueService, InMemoryQueueStore};
#[cfg(feature = "redis")]
pub use adapters::redis::RedisQueueStore;
pub use adapters::{open_store, poison_queue_name, IN_MEMORY_CONNECTION_STRING};
pub use error::{ListenerError, QueueError, QueueResult};
pub use listener::{
    handler_fn, DeserializeFailurePolicy, HandlerFailure, HandlerResult, ListenerConfig,
    ListenerStats, MessageHandler, QueueListener,
};
pub use ports::{DurableQueueStore, QueuedMessage};
pub use writer::QueueWriter;

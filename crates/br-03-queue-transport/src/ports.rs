//! Durable queue store port.

use crate::error::QueueResult;
use async_trait::async_trait;

/// One leased message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    /// Stable id across redeliveries.
    pub id: String,
    pub payload: String,
    /// Number of times this message has been handed out, this one included.
    pub dequeue_count: u32,
    /// Opaque token that proves the current lease. Required to delete.
    pub receipt: String,
}

/// An external at-least-once message store.
///
/// No ordering is guaranteed across producers.
#[async_trait]
pub trait DurableQueueStore: Send + Sync {
    /// Queue name.
    fn name(&self) -> &str;

    /// Create the queue if it is missing. Returns true when it was created.
    async fn create_if_not_exists(&self) -> QueueResult<bool>;

    async fn enqueue(&self, payload: String) -> QueueResult<()>;

    /// Lease up to `max_count` visible messages.
    async fn dequeue_batch(&self, max_count: usize) -> QueueResult<Vec<QueuedMessage>>;

    /// Remove a leased message for good.
    async fn delete(&self, message: &QueuedMessage) -> QueueResult<()>;
}

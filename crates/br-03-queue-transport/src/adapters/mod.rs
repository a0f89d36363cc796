//! Queue store adapters.

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

use crate::error::{QueueError, QueueResult};
use crate::ports::DurableQueueStore;
use std::sync::Arc;

/// Connection string selecting the in-memory store.
pub const IN_MEMORY_CONNECTION_STRING: &str = "UseInMemoryQueue=true";

/// Name of the dead-letter queue paired with `queue`.
pub fn poison_queue_name(queue: &str) -> String {
    format!("{}-poison", queue)
}

/// Open a store for `queue_name` as selected by `connection_string`.
///
/// In-memory queues are created inside `memory`, so every store opened with
/// the same service sees the same queues. Redis stores lease dequeued
/// messages for the same visibility timeout as `memory`.
pub async fn open_store(
    connection_string: &str,
    queue_name: &str,
    memory: &memory::InMemoryQueueService,
) -> QueueResult<Arc<dyn DurableQueueStore>> {
    let connection_string = connection_string.trim();

    if connection_string.eq_ignore_ascii_case(IN_MEMORY_CONNECTION_STRING) {
        return Ok(Arc::new(memory.store(queue_name)));
    }

    if connection_string.starts_with("redis://") || connection_string.starts_with("rediss://") {
        #[cfg(feature = "redis")]
        {
            let store = self::redis::RedisQueueStore::connect(
                connection_string,
                queue_name,
                memory.visibility_timeout(),
            )
            .await?;
            return Ok(Arc::new(store));
        }
        #[cfg(not(feature = "redis"))]
        {
            return Err(QueueError::InvalidConnectionString(
                "redis store requires the `redis` feature".to_string(),
            ));
        }
    }

    Err(QueueError::InvalidConnectionString(
        connection_string.to_string(),
    ))
}

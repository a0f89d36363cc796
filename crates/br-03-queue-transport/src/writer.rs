//! Queue writer.

use crate::error::{QueueError, QueueResult};
use crate::ports::DurableQueueStore;
use br_01_serializer::{Serializer, WireMessage};
use br_02_retry::RetryManager;
use broker_telemetry::{log_event, metrics::QUEUE_MESSAGES};
use std::marker::PhantomData;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Serializes items and enqueues them on one queue.
///
/// Safe to share between producers. Every write ensures the queue exists,
/// and a missing or unreachable queue is retried through the retry manager.
pub struct QueueWriter<T> {
    store: Arc<dyn DurableQueueStore>,
    serializer: Serializer,
    retry: RetryManager,
    cancel: CancellationToken,
    _marker: PhantomData<fn(T)>,
}

impl<T: WireMessage> QueueWriter<T> {
    pub fn new(store: Arc<dyn DurableQueueStore>, serializer: Serializer, retry: RetryManager) -> Self {
        Self {
            store,
            serializer,
            retry,
            cancel: CancellationToken::new(),
            _marker: PhantomData,
        }
    }

    /// Abort in-flight retries when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn queue_name(&self) -> &str {
        self.store.name()
    }

    /// Serialize `item` and enqueue it.
    pub async fn write(&self, item: &T) -> QueueResult<()> {
        let payload = self.serializer.serialize(item)?;
        let store = &self.store;

        self.retry
            .invoke_with_retry(
                |_| {
                    let payload = payload.clone();
                    async move {
                        store.create_if_not_exists().await?;
                        store.enqueue(payload).await
                    }
                },
                QueueError::is_transient,
                &self.cancel,
            )
            .await
            .map_err(|e| {
                log_event!(error, "queue", "Queue write failed", queue = %self.store.name(), error = %e);
                e.into_last_error().unwrap_or(QueueError::Cancelled)
            })?;

        QUEUE_MESSAGES
            .with_label_values(&[self.store.name(), "written"])
            .inc();
        Ok(())
    }
}

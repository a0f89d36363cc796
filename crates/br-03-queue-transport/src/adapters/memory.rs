//! In-memory durable queue.
//!
//! Mirrors cloud-queue semantics closely enough to test against: queues must
//! be created before use, dequeued messages are leased for a visibility
//! timeout, and an expired lease makes the message visible again with a
//! higher dequeue count.

use crate::error::{QueueError, QueueResult};
use crate::ports::{DurableQueueStore, QueuedMessage};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// Default lease length.
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct StoredMessage {
    id: String,
    payload: String,
    dequeue_count: u32,
}

#[derive(Debug, Default)]
struct MemoryQueue {
    visible: VecDeque<StoredMessage>,
    /// receipt -> (message, lease expiry)
    leased: HashMap<String, (StoredMessage, Instant)>,
}

impl MemoryQueue {
    /// Return expired leases to the front of the queue.
    fn release_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .leased
            .iter()
            .filter(|(_, (_, until))| *until <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();
        for receipt in expired {
            if let Some((message, _)) = self.leased.remove(&receipt) {
                self.visible.push_front(message);
            }
        }
    }
}

/// Process-local queue service shared by every store opened from it.
#[derive(Debug, Clone)]
pub struct InMemoryQueueService {
    queues: Arc<Mutex<HashMap<String, MemoryQueue>>>,
    visibility_timeout: Duration,
}

impl Default for InMemoryQueueService {
    fn default() -> Self {
        Self::new(DEFAULT_VISIBILITY_TIMEOUT)
    }
}

impl InMemoryQueueService {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            queues: Arc::new(Mutex::new(HashMap::new())),
            visibility_timeout,
        }
    }

    pub fn visibility_timeout(&self) -> Duration {
        self.visibility_timeout
    }

    /// Handle to the queue named `name`. Does not create it.
    pub fn store(&self, name: &str) -> InMemoryQueueStore {
        InMemoryQueueStore {
            name: name.to_string(),
            service: self.clone(),
        }
    }

    /// Drop a queue and everything in it.
    pub fn delete_queue(&self, name: &str) -> bool {
        self.queues.lock().remove(name).is_some()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.queues.lock().contains_key(name)
    }

    /// Visible plus leased messages.
    pub fn len(&self, name: &str) -> usize {
        self.queues
            .lock()
            .get(name)
            .map(|q| q.visible.len() + q.leased.len())
            .unwrap_or(0)
    }

    /// Payloads currently visible, front first. Leases are not released.
    pub fn peek_visible(&self, name: &str) -> Vec<String> {
        self.queues
            .lock()
            .get(name)
            .map(|q| q.visible.iter().map(|m| m.payload.clone()).collect())
            .unwrap_or_default()
    }
}

/// One named queue of an [`InMemoryQueueService`].
#[derive(Debug, Clone)]
pub struct InMemoryQueueStore {
    name: String,
    service: InMemoryQueueService,
}

impl InMemoryQueueStore {
    fn not_found(&self) -> QueueError {
        QueueError::NotFound {
            queue: self.name.clone(),
        }
    }
}

#[async_trait]
impl DurableQueueStore for InMemoryQueueStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_if_not_exists(&self) -> QueueResult<bool> {
        let mut queues = self.service.queues.lock();
        if queues.contains_key(&self.name) {
            return Ok(false);
        }
        queues.insert(self.name.clone(), MemoryQueue::default());
        debug!(queue = %self.name, "Queue created");
        Ok(true)
    }

    async fn enqueue(&self, payload: String) -> QueueResult<()> {
        let mut queues = self.service.queues.lock();
        let queue = queues.get_mut(&self.name).ok_or_else(|| self.not_found())?;
        queue.visible.push_back(StoredMessage {
            id: Uuid::new_v4().to_string(),
            payload,
            dequeue_count: 0,
        });
        Ok(())
    }

    async fn dequeue_batch(&self, max_count: usize) -> QueueResult<Vec<QueuedMessage>> {
        let now = Instant::now();
        let lease_until = now + self.service.visibility_timeout;
        let mut queues = self.service.queues.lock();
        let queue = queues.get_mut(&self.name).ok_or_else(|| self.not_found())?;
        queue.release_expired(now);

        let mut batch = Vec::new();
        while batch.len() < max_count {
            let Some(mut message) = queue.visible.pop_front() else {
                break;
            };
            message.dequeue_count += 1;
            let receipt = Uuid::new_v4().to_string();
            batch.push(QueuedMessage {
                id: message.id.clone(),
                payload: message.payload.clone(),
                dequeue_count: message.dequeue_count,
                receipt: receipt.clone(),
            });
            queue.leased.insert(receipt, (message, lease_until));
        }
        Ok(batch)
    }

    async fn delete(&self, message: &QueuedMessage) -> QueueResult<()> {
        let mut queues = self.service.queues.lock();
        let queue = queues.get_mut(&self.name).ok_or_else(|| self.not_found())?;
        match queue.leased.remove(&message.receipt) {
            Some(_) => Ok(()),
            None => Err(QueueError::ReceiptNotFound {
                queue: self.name.clone(),
                message_id: message.id.clone(),
            }),
        }
    }
}

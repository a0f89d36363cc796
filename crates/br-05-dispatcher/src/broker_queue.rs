//! In-process queue of accepted requests shared by a session's dispatchers.

use crate::domain::BrokerQueueItem;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct BrokerQueue {
    items: Mutex<VecDeque<Arc<BrokerQueueItem>>>,
    notify: Notify,
    consumers: AtomicUsize,
}

impl BrokerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a newly accepted request.
    pub fn push(&self, item: Arc<BrokerQueueItem>) {
        self.items.lock().push_back(item);
        self.notify.notify_one();
    }

    /// Return a request to the head of the queue.
    pub fn put_back(&self, item: Arc<BrokerQueueItem>) {
        self.items.lock().push_front(item);
        self.notify.notify_one();
    }

    pub fn try_take(&self) -> Option<Arc<BrokerQueueItem>> {
        self.items.lock().pop_front()
    }

    /// Wait for the next request.
    pub async fn take(&self) -> Arc<BrokerQueueItem> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.try_take() {
                return item;
            }
            notified.await;
        }
    }

    /// Remove every waiting request.
    pub fn drain(&self) -> Vec<Arc<BrokerQueueItem>> {
        self.items.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn register_consumer(&self) {
        self.consumers.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns the number of consumers still attached.
    pub fn retire_consumer(&self) -> usize {
        let previous = self
            .consumers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        previous.saturating_sub(1)
    }

    pub fn consumers(&self) -> usize {
        self.consumers.load(Ordering::SeqCst)
    }
}

//! Broker queue item: one accepted client request and its single
//! terminal disposition.

use crate::domain::Message;
use crate::error::{DispatchError, QueueItemError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use uuid::Uuid;

/// Terminal outcome of a queue item. Reply and exception are mutually
/// exclusive by construction.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    Reply(Message),
    Exception(DispatchError),
}

impl Disposition {
    /// Metric label
    pub fn outcome(&self) -> &'static str {
        match self {
            Disposition::Reply(reply) if reply.is_fault => "fault",
            Disposition::Reply(_) => "reply",
            Disposition::Exception(_) => "exception",
        }
    }
}

#[derive(Debug)]
struct ItemState {
    reply_sink: Option<oneshot::Sender<Disposition>>,
    disposition: Option<Disposition>,
}

/// A request accepted by the broker.
#[derive(Debug)]
pub struct BrokerQueueItem {
    id: Uuid,
    client_id: String,
    request: Message,
    persist_id: Option<Uuid>,
    try_count: AtomicU32,
    accepted_at: Instant,
    state: Mutex<ItemState>,
}

/// Receiving side of a queue item's disposition.
#[derive(Debug)]
pub struct ItemCompletion {
    item_id: Uuid,
    receiver: oneshot::Receiver<Disposition>,
}

impl ItemCompletion {
    pub fn item_id(&self) -> Uuid {
        self.item_id
    }

    /// Wait for the disposition. A dropped item resolves as cancelled.
    pub async fn wait(self) -> Disposition {
        self.receiver
            .await
            .unwrap_or(Disposition::Exception(DispatchError::Cancelled))
    }
}

impl BrokerQueueItem {
    pub fn new(
        client_id: impl Into<String>,
        request: Message,
        persist_id: Option<Uuid>,
    ) -> (Arc<Self>, ItemCompletion) {
        let (sender, receiver) = oneshot::channel();
        let id = Uuid::new_v4();
        let item = Arc::new(Self {
            id,
            client_id: client_id.into(),
            request,
            persist_id,
            try_count: AtomicU32::new(0),
            accepted_at: Instant::now(),
            state: Mutex::new(ItemState {
                reply_sink: Some(sender),
                disposition: None,
            }),
        });
        (item, ItemCompletion { item_id: id, receiver })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn request(&self) -> &Message {
        &self.request
    }

    pub fn persist_id(&self) -> Option<Uuid> {
        self.persist_id
    }

    pub fn try_count(&self) -> u32 {
        self.try_count.load(Ordering::SeqCst)
    }

    /// Count one exhausted dispatch cycle; returns the new count.
    pub fn increment_try_count(&self) -> u32 {
        self.try_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn age(&self) -> Duration {
        self.accepted_at.elapsed()
    }

    pub fn is_completed(&self) -> bool {
        self.state.lock().disposition.is_some()
    }

    pub fn disposition(&self) -> Option<Disposition> {
        self.state.lock().disposition.clone()
    }

    /// Record the terminal disposition and wake the waiting client.
    pub fn complete(&self, disposition: Disposition) -> Result<(), QueueItemError> {
        let mut state = self.state.lock();
        if state.disposition.is_some() {
            return Err(QueueItemError::AlreadyCompleted {
                item_id: self.id.to_string(),
            });
        }
        state.disposition = Some(disposition.clone());
        if let Some(sink) = state.reply_sink.take() {
            // Client may have gone away
            let _ = sink.send(disposition);
        }
        Ok(())
    }
}

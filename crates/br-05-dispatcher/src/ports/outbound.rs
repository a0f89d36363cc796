//! Outbound ports: backend transport, completion observer, response journal

use crate::domain::{BrokerQueueItem, Disposition, Message};
use crate::error::{CommunicationError, JournalError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Lifecycle of a backend channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Created,
    Opening,
    Opened,
    Faulted,
    Closed,
}

impl ChannelState {
    /// Channel can still carry calls.
    pub fn is_usable(self) -> bool {
        matches!(self, ChannelState::Created | ChannelState::Opening | ChannelState::Opened)
    }
}

/// Opens channels to one backend endpoint.
#[async_trait]
pub trait BackendTransport: Send + Sync {
    fn endpoint(&self) -> &str;

    async fn connect(&self) -> Result<Arc<dyn BackendChannel>, CommunicationError>;
}

/// Request/reply channel to a backend.
#[async_trait]
pub trait BackendChannel: Send + Sync {
    fn state(&self) -> ChannelState;

    async fn invoke(&self, request: Message) -> Result<Message, CommunicationError>;

    async fn close(&self) -> Result<(), CommunicationError>;
}

/// Notified whenever a queue item leaves a dispatcher, with `None` when the
/// item went back to the queue.
pub trait CompletionObserver: Send + Sync {
    fn on_completed(&self, item: &BrokerQueueItem, disposition: Option<&Disposition>, elapsed: Duration);
}

/// Durable record of dispositions for persisted requests.
#[async_trait]
pub trait ResponseJournal: Send + Sync {
    async fn record(&self, persist_id: Uuid, disposition: &Disposition) -> Result<(), JournalError>;
}

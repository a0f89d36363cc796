//! Per-attempt dispatch record

use crate::domain::{BrokerQueueItem, Message};
use crate::error::{CommunicationError, DispatchError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// One dispatch attempt of a queue item against one backend.
///
/// The completer takes `broker_queue_item`, `reply_message` and `exception`
/// out when it disposes of the attempt, which makes later completions of the
/// same record no-ops.
#[derive(Debug)]
pub struct DispatchData {
    pub client_id: String,
    pub session_id: i32,
    pub message_id: Uuid,
    pub endpoint: String,
    pub attempt: u32,
    pub dispatch_time: DateTime<Utc>,
    pub broker_queue_item: Option<Arc<BrokerQueueItem>>,
    pub reply_message: Option<Message>,
    pub exception: Option<DispatchError>,
    pub service_preempted: bool,
}

impl DispatchData {
    pub fn new(session_id: i32, item: &Arc<BrokerQueueItem>, endpoint: impl Into<String>) -> Self {
        Self {
            client_id: item.client_id().to_string(),
            session_id,
            message_id: item.request().message_id,
            endpoint: endpoint.into(),
            attempt: 0,
            dispatch_time: Utc::now(),
            broker_queue_item: Some(Arc::clone(item)),
            reply_message: None,
            exception: None,
            service_preempted: false,
        }
    }

    /// Store the backend call result.
    pub fn record(&mut self, result: Result<Message, CommunicationError>) {
        match result {
            Ok(reply) => {
                self.reply_message = Some(reply);
                self.exception = None;
            }
            Err(e) => {
                self.reply_message = None;
                self.exception = Some(DispatchError::Communication(e));
            }
        }
    }

    /// True once the completer has disposed of this attempt.
    pub fn is_cleared(&self) -> bool {
        self.broker_queue_item.is_none() && self.reply_message.is_none() && self.exception.is_none()
    }
}

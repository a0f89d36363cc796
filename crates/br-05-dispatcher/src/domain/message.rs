//! Backend request and reply messages

use serde::{Deserialize, Serialize};
use shared_types::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Header a backend sets on a reply when its host is being reclaimed.
pub const PREEMPTION_HEADER: &str = "ServicePreempted";

/// Header a backend sets on a fault when the whole operation should be
/// dispatched again.
pub const RETRY_OPERATION_HEADER: &str = "RetryOperationError";

/// A message exchanged with a backend worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: Uuid,
    pub action: String,
    /// Correlates a reply with its request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relates_to: Option<Uuid>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub body: Value,
    #[serde(default)]
    pub is_fault: bool,
}

impl Message {
    pub fn request(action: impl Into<String>, body: Value) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            action: action.into(),
            relates_to: None,
            headers: BTreeMap::new(),
            body,
            is_fault: false,
        }
    }

    pub fn reply_to(request: &Message, body: Value) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            action: format!("{}Response", request.action),
            relates_to: Some(request.message_id),
            headers: BTreeMap::new(),
            body,
            is_fault: false,
        }
    }

    /// Fault reply; the reason travels as a string body.
    pub fn fault_reply(request: &Message, reason: impl Into<String>) -> Self {
        Self {
            is_fault: true,
            ..Self::reply_to(request, Value::String(reason.into()))
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains_key(name)
    }

    pub fn is_preempted(&self) -> bool {
        self.has_header(PREEMPTION_HEADER)
    }

    pub fn is_retry_requested(&self) -> bool {
        self.is_fault && self.has_header(RETRY_OPERATION_HEADER)
    }

    /// Fault reason, when the body carries one.
    pub fn fault_reason(&self) -> Option<&str> {
        if self.is_fault {
            self.body.as_str()
        } else {
            None
        }
    }
}

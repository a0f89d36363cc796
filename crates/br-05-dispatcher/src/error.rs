//! Error types for the dispatcher

use std::time::Duration;
use thiserror::Error;

/// Communication-layer failures reaching a backend. All are transient.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommunicationError {
    #[error("Endpoint not found: {endpoint}")]
    EndpointNotFound { endpoint: String },

    #[error("Backend call to {endpoint} timed out after {timeout:?}")]
    Timeout { endpoint: String, timeout: Duration },

    #[error("Channel to {endpoint} faulted: {reason}")]
    ChannelFaulted { endpoint: String, reason: String },

    #[error("Channel to {endpoint} could not be created: {reason}")]
    ChannelCreateFailed { endpoint: String, reason: String },
}

/// Per-attempt and terminal dispatch errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Attached to a dispatch attempt for retry evaluation
    #[error("Communication failure: {0}")]
    Communication(#[from] CommunicationError),

    /// Backend returned neither a reply nor an error
    #[error("Backend returned no reply")]
    NoReply,

    /// Retries across dispatchers used up
    #[error("Communication exhausted after {try_count} tries: {last}")]
    CommunicationExhausted { try_count: u32, last: String },

    /// Channel creation keeps failing; the endpoint is retired
    #[error("Backend {endpoint} unavailable after {failures} channel create failures")]
    BackendUnavailable { endpoint: String, failures: u32 },

    /// Every dispatcher of the session has stopped
    #[error("No backend available to serve the request")]
    NoBackendAvailable,

    #[error("Dispatch cancelled")]
    Cancelled,
}

impl DispatchError {
    /// Worth another attempt on the same backend.
    pub fn is_transient(&self) -> bool {
        matches!(self, DispatchError::Communication(_) | DispatchError::NoReply)
    }
}

/// Queue item contract violations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueItemError {
    #[error("Queue item {item_id} already completed")]
    AlreadyCompleted { item_id: String },
}

/// Response journal failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JournalError {
    #[error("Journal write failed: {0}")]
    WriteFailed(String),
}

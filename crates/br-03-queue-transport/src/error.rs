//! Error types for the queue transport

use br_01_serializer::SerializerError;
use thiserror::Error;

/// Queue store and writer errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// Queue does not exist (self-healing: callers re-create and retry)
    #[error("Queue not found: {queue}")]
    NotFound { queue: String },

    /// Lease expired or message already deleted
    #[error("Receipt not found for message {message_id} in {queue}")]
    ReceiptNotFound { queue: String, message_id: String },

    /// Store unreachable
    #[error("Queue connection failed: {0}")]
    Connection(String),

    /// Store rejected the operation
    #[error("Queue store error: {0}")]
    Store(String),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] SerializerError),

    /// Unrecognized connection string
    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),

    #[error("Queue operation cancelled")]
    Cancelled,
}

impl QueueError {
    /// Failures worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, QueueError::NotFound { .. } | QueueError::Connection(_))
    }
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors that end a listening loop
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Undecodable message under the `Halt` policy. The message stays queued.
    #[error("Listener on {queue} halted on message {message_id}: {reason}")]
    Halted {
        queue: String,
        message_id: String,
        reason: SerializerError,
    },

    #[error("Listener task failed: {0}")]
    Join(String),
}

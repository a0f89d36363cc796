//! Error types for request/response correlation

use br_03_queue_transport::QueueError;
use shared_types::{FaultCode, FaultDetail, RequestId, ValueError};
use std::time::Duration;
use thiserror::Error;

/// Correlation errors.
///
/// `UnknownRequestId`, `UnknownCommand`, `CommandMismatch` and
/// `TypeMismatch` are protocol violations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CorrelationError {
    /// Response for an id that is not pending
    #[error("Response for unknown request id {request_id}")]
    UnknownRequestId { request_id: RequestId },

    /// Command name has no registered response type
    #[error("Unknown command: {cmd_name}")]
    UnknownCommand { cmd_name: String },

    /// Response names a different command than its request
    #[error("Response for {request_id} names {actual}, request was {expected}")]
    CommandMismatch {
        request_id: RequestId,
        expected: String,
        actual: String,
    },

    /// Response value has the wrong kind for its command
    #[error("Type mismatch for {cmd_name}: expected {expected}, got {actual}")]
    TypeMismatch {
        cmd_name: String,
        expected: String,
        actual: String,
    },

    /// Request id already pending
    #[error("Duplicate request id {request_id}")]
    DuplicateRequestId { request_id: RequestId },

    /// Server answered with a fault
    #[error("Remote fault: {0}")]
    Fault(FaultDetail),

    #[error("Request {request_id} timed out after {timeout:?}")]
    Timeout {
        request_id: RequestId,
        timeout: Duration,
    },

    /// Pending entry dropped without a response
    #[error("Request {request_id} cancelled")]
    Cancelled { request_id: RequestId },

    /// Command could not be written
    #[error("Send failed: {0}")]
    Send(#[from] QueueError),

    /// Response value did not convert to the requested type
    #[error("Decode failed: {0}")]
    Decode(#[from] ValueError),
}

impl CorrelationError {
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            CorrelationError::UnknownRequestId { .. }
                | CorrelationError::UnknownCommand { .. }
                | CorrelationError::CommandMismatch { .. }
                | CorrelationError::TypeMismatch { .. }
        )
    }

    /// Metric label for protocol violations.
    pub(crate) fn violation_kind(&self) -> &'static str {
        match self {
            CorrelationError::UnknownRequestId { .. } => "unknown_request_id",
            CorrelationError::UnknownCommand { .. } => "unknown_command",
            CorrelationError::CommandMismatch { .. } => "command_mismatch",
            CorrelationError::TypeMismatch { .. } => "type_mismatch",
            _ => "other",
        }
    }
}

/// Result type for correlation operations
pub type CorrelationResult<T> = Result<T, CorrelationError>;

/// Failure raised by a server-side command handler.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HandlerFault {
    /// Parameters did not unpack
    #[error("Bad parameters: {0}")]
    BadParameters(#[from] ValueError),

    /// Business-logic fault
    #[error("{0}")]
    Fault(FaultDetail),
}

impl HandlerFault {
    pub fn new(code: FaultCode, message: impl Into<String>) -> Self {
        HandlerFault::Fault(FaultDetail::new(code, message))
    }

    pub fn into_detail(self) -> FaultDetail {
        match self {
            HandlerFault::BadParameters(e) => {
                FaultDetail::new(FaultCode::ProtocolViolation, e.to_string())
            }
            HandlerFault::Fault(detail) => detail,
        }
    }
}

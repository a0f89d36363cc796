//! # Command and Response Envelopes
//!
//! The two messages that cross a queue in a request/response flow.
//!
//! - **Versioning**: every command carries a `version`, checked by the
//!   serializer before anything else is read.
//! - **Correlation**: a response echoes the `request_id` of its command. A
//!   response for an id that is not pending is a protocol violation.
//! - **Positional parameters**: parameter order is significant and must match
//!   the receiver's unpacking order.

use crate::errors::ValueError;
use crate::value::{Value, WireType};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for one outstanding request.
///
/// Uses UUID v7 so ids are time-ordered in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generate a new request ID (UUID v7)
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parse from string
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RequestId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// A command written to a request queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    /// Protocol version. MUST be checked before processing.
    pub version: u16,
    pub request_id: RequestId,
    pub cmd_name: String,
    /// Positional parameters.
    pub parameters: Vec<Value>,
}

impl CommandEnvelope {
    /// Current protocol version.
    pub const CURRENT_VERSION: u16 = 1;

    /// Create a command with a fresh request id.
    pub fn new(cmd_name: impl Into<String>, parameters: Vec<Value>) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            request_id: RequestId::new(),
            cmd_name: cmd_name.into(),
            parameters,
        }
    }

    /// Borrow the parameter at `index`.
    pub fn param(&self, index: usize) -> Result<&Value, ValueError> {
        self.parameters
            .get(index)
            .ok_or(ValueError::ParameterMissing {
                index,
                count: self.parameters.len(),
            })
    }

    /// Unpack the parameter at `index` as `T`.
    pub fn unpack<T: WireType>(&self, index: usize) -> Result<T, ValueError> {
        T::from_value(self.param(index)?.clone())
    }
}

/// Classified cause of a terminal fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultCode {
    /// Backend communication kept failing until the retry budget ran out.
    CommunicationExhausted,
    /// The backend raised a business-logic fault.
    ApplicationFault,
    /// A correlation or type invariant was broken.
    ProtocolViolation,
    /// The server has no handler for the command.
    UnknownCommand,
    /// A handler failed while processing the command.
    HandlerFailed,
    /// The request was abandoned before completion.
    Cancelled,
}

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FaultCode::CommunicationExhausted => "CommunicationExhausted",
            FaultCode::ApplicationFault => "ApplicationFault",
            FaultCode::ProtocolViolation => "ProtocolViolation",
            FaultCode::UnknownCommand => "UnknownCommand",
            FaultCode::HandlerFailed => "HandlerFailed",
            FaultCode::Cancelled => "Cancelled",
        };
        write!(f, "{}", name)
    }
}

/// A structured fault carried as response data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultDetail {
    pub code: FaultCode,
    pub message: String,
}

impl FaultDetail {
    pub fn new(code: FaultCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for FaultDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Body of a response: a value or a fault, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseBody {
    Value(Value),
    Fault(FaultDetail),
}

/// A response written to a response queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub version: u16,
    /// Echoes the originating command.
    pub request_id: RequestId,
    pub cmd_name: String,
    pub response: ResponseBody,
}

impl ResponseEnvelope {
    /// Successful response to `command`.
    pub fn reply(command: &CommandEnvelope, value: Value) -> Self {
        Self {
            version: CommandEnvelope::CURRENT_VERSION,
            request_id: command.request_id,
            cmd_name: command.cmd_name.clone(),
            response: ResponseBody::Value(value),
        }
    }

    /// Fault response to `command`.
    pub fn fault(command: &CommandEnvelope, fault: FaultDetail) -> Self {
        Self {
            version: CommandEnvelope::CURRENT_VERSION,
            request_id: command.request_id,
            cmd_name: command.cmd_name.clone(),
            response: ResponseBody::Fault(fault),
        }
    }

    pub fn is_fault(&self) -> bool {
        matches!(self.response, ResponseBody::Fault(_))
    }
}

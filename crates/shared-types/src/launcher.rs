//! Payload types of the broker launcher protocol.

use crate::bound_type;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Transport scheme a session asks its broker to expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TransportScheme {
    #[default]
    NetTcp,
    Http,
    Custom,
}

/// Client-supplied description of a session to start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SessionStartInfo {
    /// Name of the service the backends host.
    pub service_name: String,
    pub username: Option<String>,
    pub transport_scheme: TransportScheme,
    /// Whether dispositions are recorded in the response journal.
    pub durable: bool,
    /// Backend call timeout override, milliseconds.
    pub service_operation_timeout_ms: Option<u64>,
    /// Free-form session properties.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

bound_type!(SessionStartInfo, "SessionStartInfo");

/// Result of creating or attaching to a broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BrokerInitializationResult {
    pub broker_unique_id: String,
    /// Endpoints the client should send to.
    pub broker_epr: Vec<String>,
    pub response_epr: Vec<String>,
    pub max_message_size: u64,
    pub service_operation_timeout_ms: u64,
    pub supports_message_details: bool,
}

bound_type!(BrokerInitializationResult, "BrokerInitializationResult");

//! # Shared Types Crate
//!
//! This crate contains the wire value model, the command and response
//! envelopes, and the broker payload types that travel through the queues.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: Everything that crosses a queue is defined here.
//! - **Closed Value Model**: Parameters and responses are [`Value`]s; struct
//!   payloads are carried as [`TypedObject`]s tagged with a registered type name.
//! - **Envelope Correlation**: A [`ResponseEnvelope`] echoes the [`RequestId`]
//!   of the [`CommandEnvelope`] it answers.

pub mod envelope;
pub mod errors;
pub mod launcher;
pub mod value;

pub use envelope::{CommandEnvelope, FaultCode, FaultDetail, RequestId, ResponseBody, ResponseEnvelope};
pub use errors::ValueError;
pub use launcher::{BrokerInitializationResult, SessionStartInfo, TransportScheme};
pub use value::{unpack_int, BoundType, TypedObject, Value, ValueKind, WireType};

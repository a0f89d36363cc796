//! # br-01-serializer
//!
//! Turns command and response envelopes into queue payloads and back.
//!
//! ## Overview
//!
//! - **Type tagging**: every [`Value`](shared_types::Value) carries its own
//!   tag, and structured payloads carry a bound type name, so a receiver can
//!   rebuild a positional parameter array without knowing concrete types.
//! - **Allow-list binding**: a deserialized object is accepted only if its
//!   type name was registered with the [`TypeBinder`]. Unknown names fail
//!   closed with [`SerializerError::TypeNotAllowed`].
//! - **Version gate**: payloads with an unsupported envelope version are
//!   rejected before any value is inspected.
//!
//! Integer narrowing is not the serializer's job. Receivers call
//! [`shared_types::unpack_int`] when a parameter is an `i32`.
//!
//! ```text
//! CommandEnvelope ──serialize──→ String ──queue──→ String ──deserialize──→ CommandEnvelope
//!                                                        │
//!                                                        └── TypeBinder::ensure_allowed(type)
//! ```

pub mod binder;
pub mod error;
pub mod serializer;

pub use binder::TypeBinder;
pub use error::{SerializerError, SerializerResult};
pub use serializer::{Serializer, WireMessage};

//! Envelope serialization.

use crate::binder::TypeBinder;
use crate::error::{SerializerError, SerializerResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared_types::{CommandEnvelope, ResponseBody, ResponseEnvelope, Value};
use std::sync::Arc;
use tracing::warn;

/// A message that can travel through a queue.
pub trait WireMessage: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Envelope protocol version.
    fn version(&self) -> u16;

    /// Visit every top-level value the message carries.
    fn visit_values<'a>(&'a self, visit: &mut dyn FnMut(&'a Value));
}

impl WireMessage for CommandEnvelope {
    fn version(&self) -> u16 {
        self.version
    }

    fn visit_values<'a>(&'a self, visit: &mut dyn FnMut(&'a Value)) {
        for value in &self.parameters {
            visit(value);
        }
    }
}

impl WireMessage for ResponseEnvelope {
    fn version(&self) -> u16 {
        self.version
    }

    fn visit_values<'a>(&'a self, visit: &mut dyn FnMut(&'a Value)) {
        if let ResponseBody::Value(value) = &self.response {
            visit(value);
        }
    }
}

/// JSON serializer gated by a [`TypeBinder`].
///
/// Cheap to clone; clones share the binder.
#[derive(Debug, Clone)]
pub struct Serializer {
    binder: Arc<TypeBinder>,
}

impl Serializer {
    pub fn new(binder: TypeBinder) -> Self {
        Self {
            binder: Arc::new(binder),
        }
    }

    pub fn binder(&self) -> &TypeBinder {
        &self.binder
    }

    /// Encode a message as a queue payload.
    ///
    /// JSON has no NaN or infinity, so a message carrying one is refused
    /// here rather than written in a form the receiver cannot decode.
    pub fn serialize<T: WireMessage>(&self, item: &T) -> SerializerResult<String> {
        let mut non_finite: Option<f64> = None;
        item.visit_values(&mut |top| {
            top.walk(&mut |value| {
                if let Value::Float64(f) = value {
                    if non_finite.is_none() && !f.is_finite() {
                        non_finite = Some(*f);
                    }
                }
            });
        });
        if let Some(f) = non_finite {
            return Err(SerializerError::Encode(format!(
                "Float64 value {f} has no JSON representation"
            )));
        }

        serde_json::to_string(item).map_err(|e| SerializerError::Encode(e.to_string()))
    }

    /// Decode a queue payload.
    ///
    /// Checks, in order: JSON shape, envelope version, and that every nested
    /// object type is on the allow-list.
    pub fn deserialize<T: WireMessage>(&self, payload: &str) -> SerializerResult<T> {
        let item: T =
            serde_json::from_str(payload).map_err(|e| SerializerError::Malformed(e.to_string()))?;

        if item.version() != CommandEnvelope::CURRENT_VERSION {
            return Err(SerializerError::UnsupportedVersion {
                received: item.version(),
                supported: CommandEnvelope::CURRENT_VERSION,
            });
        }

        let mut rejected: Option<String> = None;
        item.visit_values(&mut |top| {
            top.walk(&mut |value| {
                if let Value::Object(obj) = value {
                    if rejected.is_none() && !self.binder.is_allowed(&obj.type_name) {
                        rejected = Some(obj.type_name.clone());
                    }
                }
            });
        });

        if let Some(type_name) = rejected {
            warn!(type_name = %type_name, "Rejected payload carrying unregistered type");
            return Err(SerializerError::TypeNotAllowed { type_name });
        }
        Ok(item)
    }
}

impl Default for Serializer {
    fn default() -> Self {
        Self::new(TypeBinder::with_launcher_types())
    }
}

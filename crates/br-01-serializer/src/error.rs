//! Error types for the serializer

use thiserror::Error;

/// Serializer errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerializerError {
    /// Object type name is not on the allow-list
    #[error("Type not allowed: {type_name}")]
    TypeNotAllowed { type_name: String },

    /// Payload is not a valid envelope
    #[error("Malformed payload: {0}")]
    Malformed(String),

    /// Envelope version not supported
    #[error("Unsupported version: received {received}, supported {supported}")]
    UnsupportedVersion { received: u16, supported: u16 },

    /// Item could not be encoded
    #[error("Encode error: {0}")]
    Encode(String),
}

/// Result type for serializer operations
pub type SerializerResult<T> = Result<T, SerializerError>;

//! # Error Types
//!
//! Errors raised while converting wire values.

use thiserror::Error;

/// Errors converting between [`Value`](crate::Value) and Rust types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    /// The runtime kind differs from the expected kind.
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// A 64-bit integer does not fit the narrower target.
    #[error("Integer overflow: {value} does not fit in i32")]
    IntegerOverflow { value: i64 },

    /// Positional parameter not present.
    #[error("Parameter {index} missing: command carries {count} parameters")]
    ParameterMissing { index: usize, count: usize },

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Decode error: {0}")]
    Decode(String),
}

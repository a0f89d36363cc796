//! Command dispatch registry.

use crate::error::{CorrelationError, CorrelationResult};
use shared_types::{ValueKind, WireType};
use std::collections::HashMap;

/// Maps command names to the kind of value they return.
///
/// Built once at construction; not mutated during steady-state operation.
#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    response_types: HashMap<String, ValueKind>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `cmd_name` with result type `T`.
    pub fn register_response_type<T: WireType>(&mut self, cmd_name: &str) -> &mut Self {
        self.response_types.insert(cmd_name.to_string(), T::kind());
        self
    }

    /// Builder form of [`register_response_type`](Self::register_response_type).
    pub fn with_response_type<T: WireType>(mut self, cmd_name: &str) -> Self {
        self.register_response_type::<T>(cmd_name);
        self
    }

    /// Expected response kind; unknown names are an error.
    pub fn expected_kind(&self, cmd_name: &str) -> CorrelationResult<&ValueKind> {
        self.response_types
            .get(cmd_name)
            .ok_or_else(|| CorrelationError::UnknownCommand {
                cmd_name: cmd_name.to_string(),
            })
    }

    /// Check that `T` is the type registered for `cmd_name`.
    pub fn ensure_response_type<T: WireType>(&self, cmd_name: &str) -> CorrelationResult<()> {
        let expected = self.expected_kind(cmd_name)?;
        let requested = T::kind();
        if *expected == requested || requested == ValueKind::Any {
            Ok(())
        } else {
            Err(CorrelationError::TypeMismatch {
                cmd_name: cmd_name.to_string(),
                expected: expected.to_string(),
                actual: requested.to_string(),
            })
        }
    }

    pub fn contains(&self, cmd_name: &str) -> bool {
        self.response_types.contains_key(cmd_name)
    }

    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.response_types.keys().map(String::as_str)
    }
}

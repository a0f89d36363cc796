//! Allow-list of object type names.

use crate::error::{SerializerError, SerializerResult};
use shared_types::{BoundType, BrokerInitializationResult, SessionStartInfo};
use std::collections::HashSet;

/// Maps bare type names to permitted bound types.
///
/// Built once at startup. There is no fallback for names that were never
/// registered.
#[derive(Debug, Clone, Default)]
pub struct TypeBinder {
    allowed: HashSet<String>,
}

impl TypeBinder {
    /// Empty binder. Only primitive values will deserialize.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binder preloaded with the broker launcher payload types.
    pub fn with_launcher_types() -> Self {
        Self::new()
            .with::<SessionStartInfo>()
            .with::<BrokerInitializationResult>()
    }

    /// Register `T` and return the binder.
    pub fn with<T: BoundType>(mut self) -> Self {
        self.register::<T>();
        self
    }

    /// Register `T` under its wire name.
    pub fn register<T: BoundType>(&mut self) -> &mut Self {
        self.allowed.insert(T::TYPE_NAME.to_string());
        self
    }

    pub fn is_allowed(&self, type_name: &str) -> bool {
        self.allowed.contains(type_name)
    }

    /// Fail closed for names that were never registered.
    pub fn ensure_allowed(&self, type_name: &str) -> SerializerResult<()> {
        if self.is_allowed(type_name) {
            Ok(())
        } else {
            Err(SerializerError::TypeNotAllowed {
                type_name: type_name.to_string(),
            })
        }
    }

    pub fn len(&self) -> usize {
        self.allowed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }
}

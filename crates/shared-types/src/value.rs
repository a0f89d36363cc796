//! # Wire Value Model
//!
//! Every command parameter and every response travels as a [`Value`]. The
//! enum is closed: primitive variants carry their own tag, and structured
//! payloads are carried as a [`TypedObject`] whose `type` field names a
//! registered [`BoundType`]. Receivers never instantiate a type from an
//! arbitrary name; the serializer checks object names against its allow-list.
//!
//! ## JSON Shape
//!
//! ```text
//! {"$type":"Int64","$value":10}
//! {"$type":"Object","$value":{"type":"SessionStartInfo","data":{...}}}
//! ```

use crate::errors::ValueError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};
use std::fmt;

/// A transportable, self-describing value.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "$type", content = "$value")]
pub enum Value {
    Null,
    Bool(bool),
    /// All integers travel as 64-bit; narrow with [`unpack_int`].
    Int64(i64),
    Float64(f64),
    String(String),
    Bytes(#[serde_as(as = "Base64")] Vec<u8>),
    List(Vec<Value>),
    Object(TypedObject),
}

impl Value {
    /// The runtime kind of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int64(_) => ValueKind::Int64,
            Value::Float64(_) => ValueKind::Float64,
            Value::String(_) => ValueKind::String,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::List(_) => ValueKind::List,
            Value::Object(obj) => ValueKind::Object(obj.type_name.clone()),
        }
    }

    /// Visit this value and every value nested inside it, depth first.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Value)) {
        visit(self);
        if let Value::List(items) = self {
            for item in items {
                item.walk(visit);
            }
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

/// A structured payload tagged with its registered type name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedObject {
    /// Registered wire name of the payload type.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Field data of the payload.
    pub data: serde_json::Value,
}

impl TypedObject {
    /// Encode a bound type under its registered name.
    pub fn from_bound<T: BoundType>(item: &T) -> Result<Self, ValueError> {
        let data = serde_json::to_value(item).map_err(|e| ValueError::Encode(e.to_string()))?;
        Ok(Self {
            type_name: T::TYPE_NAME.to_string(),
            data,
        })
    }

    /// Decode into a bound type, rejecting a different type name.
    pub fn into_bound<T: BoundType>(self) -> Result<T, ValueError> {
        if self.type_name != T::TYPE_NAME {
            return Err(ValueError::TypeMismatch {
                expected: T::TYPE_NAME.to_string(),
                actual: self.type_name,
            });
        }
        serde_json::from_value(self.data).map_err(|e| ValueError::Decode(e.to_string()))
    }
}

/// The expected shape of a value, used for response type checks.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Accepts any value.
    Any,
    Null,
    Bool,
    Int64,
    Float64,
    String,
    Bytes,
    List,
    /// An object of the named bound type.
    Object(String),
}

impl ValueKind {
    /// Whether a runtime value satisfies this kind.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (ValueKind::Any, _) => true,
            (ValueKind::Object(expected), Value::Object(obj)) => *expected == obj.type_name,
            (kind, value) => *kind == value.kind(),
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Any => write!(f, "Any"),
            ValueKind::Null => write!(f, "Null"),
            ValueKind::Bool => write!(f, "Bool"),
            ValueKind::Int64 => write!(f, "Int64"),
            ValueKind::Float64 => write!(f, "Float64"),
            ValueKind::String => write!(f, "String"),
            ValueKind::Bytes => write!(f, "Bytes"),
            ValueKind::List => write!(f, "List"),
            ValueKind::Object(name) => write!(f, "Object<{}>", name),
        }
    }
}

/// A struct payload that may travel inside a [`TypedObject`].
///
/// Implement through [`bound_type!`](crate::bound_type) so the wire
/// conversion and the type name stay together.
pub trait BoundType: Serialize + DeserializeOwned {
    /// Stable wire name. Changing it breaks queued messages.
    const TYPE_NAME: &'static str;
}

/// Conversion between a Rust type and its wire [`Value`].
pub trait WireType: Sized {
    /// The kind a value of this type travels as.
    fn kind() -> ValueKind;

    fn into_value(self) -> Result<Value, ValueError>;

    fn from_value(value: Value) -> Result<Self, ValueError>;
}

/// Register a serde struct as a bound wire type.
///
/// ```rust,ignore
/// #[derive(Serialize, Deserialize)]
/// pub struct SessionStartInfo { /* ... */ }
/// shared_types::bound_type!(SessionStartInfo, "SessionStartInfo");
/// ```
#[macro_export]
macro_rules! bound_type {
    ($ty:ty, $name:expr) => {
        impl $crate::value::BoundType for $ty {
            const TYPE_NAME: &'static str = $name;
        }

        impl $crate::value::WireType for $ty {
            fn kind() -> $crate::value::ValueKind {
                $crate::value::ValueKind::Object(
                    <$ty as $crate::value::BoundType>::TYPE_NAME.to_string(),
                )
            }

            fn into_value(self) -> Result<$crate::value::Value, $crate::errors::ValueError> {
                $crate::value::TypedObject::from_bound(&self).map($crate::value::Value::Object)
            }

            fn from_value(
                value: $crate::value::Value,
            ) -> Result<Self, $crate::errors::ValueError> {
                match value {
                    $crate::value::Value::Object(obj) => obj.into_bound::<$ty>(),
                    other => Err($crate::errors::ValueError::TypeMismatch {
                        expected: <$ty as $crate::value::BoundType>::TYPE_NAME.to_string(),
                        actual: other.kind().to_string(),
                    }),
                }
            }
        }
    };
}

/// Narrow a 64-bit wire integer to `i32`.
///
/// The generic encoding widens every integer, so receivers expecting an
/// `int` must narrow explicitly.
pub fn unpack_int(value: &Value) -> Result<i32, ValueError> {
    match value {
        Value::Int64(v) => i32::try_from(*v).map_err(|_| ValueError::IntegerOverflow { value: *v }),
        other => Err(mismatch(ValueKind::Int64, other)),
    }
}

fn mismatch(expected: ValueKind, actual: &Value) -> ValueError {
    ValueError::TypeMismatch {
        expected: expected.to_string(),
        actual: actual.kind().to_string(),
    }
}

impl WireType for Value {
    fn kind() -> ValueKind {
        ValueKind::Any
    }

    fn into_value(self) -> Result<Value, ValueError> {
        Ok(self)
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        Ok(value)
    }
}

impl WireType for () {
    fn kind() -> ValueKind {
        ValueKind::Null
    }

    fn into_value(self) -> Result<Value, ValueError> {
        Ok(Value::Null)
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Null => Ok(()),
            other => Err(mismatch(ValueKind::Null, &other)),
        }
    }
}

impl WireType for bool {
    fn kind() -> ValueKind {
        ValueKind::Bool
    }

    fn into_value(self) -> Result<Value, ValueError> {
        Ok(Value::Bool(self))
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Bool(b) => Ok(b),
            other => Err(mismatch(ValueKind::Bool, &other)),
        }
    }
}

impl WireType for i64 {
    fn kind() -> ValueKind {
        ValueKind::Int64
    }

    fn into_value(self) -> Result<Value, ValueError> {
        Ok(Value::Int64(self))
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Int64(v) => Ok(v),
            other => Err(mismatch(ValueKind::Int64, &other)),
        }
    }
}

impl WireType for i32 {
    fn kind() -> ValueKind {
        ValueKind::Int64
    }

    fn into_value(self) -> Result<Value, ValueError> {
        Ok(Value::Int64(i64::from(self)))
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        unpack_int(&value)
    }
}

impl WireType for f64 {
    fn kind() -> ValueKind {
        ValueKind::Float64
    }

    fn into_value(self) -> Result<Value, ValueError> {
        Ok(Value::Float64(self))
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Float64(v) => Ok(v),
            other => Err(mismatch(ValueKind::Float64, &other)),
        }
    }
}

impl WireType for String {
    fn kind() -> ValueKind {
        ValueKind::String
    }

    fn into_value(self) -> Result<Value, ValueError> {
        Ok(Value::String(self))
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::String(s) => Ok(s),
            other => Err(mismatch(ValueKind::String, &other)),
        }
    }
}

impl<T: WireType> WireType for Vec<T> {
    fn kind() -> ValueKind {
        ValueKind::List
    }

    fn into_value(self) -> Result<Value, ValueError> {
        self.into_iter()
            .map(WireType::into_value)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List)
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::List(items) => items.into_iter().map(T::from_value).collect(),
            other => Err(mismatch(ValueKind::List, &other)),
        }
    }
}

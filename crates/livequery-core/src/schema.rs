//! Parameter validation capability.
//!
//! The engine treats a schema as opaque: parse raw input, return the parsed
//! value or a message. [`Typed`] covers the common case of a serde type.

use std::fmt;
use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Validates and normalizes raw parameters.
pub trait Schema: Send + Sync {
    /// Parse `raw`, returning the normalized parameters or a human-readable error.
    fn safe_parse(&self, raw: &Value) -> Result<Value, String>;
}

/// Accepts any input unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct AnySchema;

impl Schema for AnySchema {
    fn safe_parse(&self, raw: &Value) -> Result<Value, String> {
        Ok(raw.clone())
    }
}

/// Schema backed by a serde type.
///
/// Input is deserialized into `T` and re-serialized, so defaults and renames
/// declared on `T` show up in the parsed parameters. Absent input (`null`) is
/// retried as `{}` so all-optional structs accept a missing body.
pub struct Typed<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> Typed<T> {
    /// Create a schema for `T`.
    pub const fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for Typed<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Typed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Typed")
            .field(&std::any::type_name::<T>())
            .finish()
    }
}

impl<T> Schema for Typed<T>
where
    T: DeserializeOwned + Serialize,
{
    fn safe_parse(&self, raw: &Value) -> Result<Value, String> {
        let parsed = match T::deserialize(raw) {
            Ok(v) => v,
            Err(e) if raw.is_null() => {
                T::deserialize(&Value::Object(serde_json::Map::new())).map_err(|_| e.to_string())?
            }
            Err(e) => return Err(e.to_string()),
        };
        serde_json::to_value(parsed).map_err(|e| e.to_string())
    }
}

/// Schema from a closure.
pub struct FnSchema<F>(pub F);

impl<F> Schema for FnSchema<F>
where
    F: Fn(&Value) -> Result<Value, String> + Send + Sync,
{
    fn safe_parse(&self, raw: &Value) -> Result<Value, String> {
        (self.0)(raw)
    }
}

//! Dynamically typed session values.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};

/// A value stored in a session.
///
/// Sessions map string keys to values of one of these kinds.
/// Arbitrary Rust types can be stored as [`Value::Structured`] once they implement [`SessionType`]
/// and are registered with the codec's [`TypeRegistry`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// A string.
    String(String),
    /// A boolean.
    Bool(bool),
    /// A signed 64 bit integer.
    Int(i64),
    /// A 64 bit float. Only finite floats can be encoded.
    Float(f64),
    /// A byte sequence.
    Bytes(#[serde(with = "base64_bytes")] Vec<u8>),
    /// A point in time.
    Time(DateTime<Utc>),
    /// A value of a registered [`SessionType`].
    Structured(StructuredValue),
}

/// The serialized form of a [`SessionType`], tagged with its [`SessionType::TYPE_TAG`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredValue {
    /// The type tag identifying the Rust type.
    pub tag: String,
    /// The serialized value.
    pub payload: serde_json::Value,
}

impl Value {
    /// The name of the kind of this value, as used in [`Error::TypeMismatch`].
    pub fn kind(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bytes(_) => "bytes",
            Value::Time(_) => "time",
            Value::Structured(_) => "structured",
        }
    }

    /// Wrap a [`SessionType`] into a structured value.
    pub fn structured<T: SessionType>(value: &T) -> Result<Self> {
        let payload = serde_json::to_value(value).map_err(|source| Error::Structured {
            tag: T::TYPE_TAG.to_owned(),
            source,
        })?;
        Ok(Value::Structured(StructuredValue {
            tag: T::TYPE_TAG.to_owned(),
            payload,
        }))
    }
}

impl StructuredValue {
    /// Convert the payload back into its Rust type.
    ///
    /// Returns `None` if this value was created from a different type.
    pub fn to_type<T: SessionType>(&self) -> Option<Result<T>> {
        if self.tag != T::TYPE_TAG {
            return None;
        }

        Some(
            serde_json::from_value(self.payload.clone()).map_err(|source| Error::Structured {
                tag: self.tag.clone(),
                source,
            }),
        )
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Value::Bytes(value.to_vec())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Time(value)
    }
}

/// Typed extraction of a [`Value`], used by the typed session accessors.
///
/// The `Default` value is what the accessors return for a missing key.
pub trait FromValue: Default + Sized {
    /// The kind name reported in [`Error::TypeMismatch`].
    const KIND: &'static str;

    /// Extract `Self` from `value`, or `None` if the value has a different kind.
    fn from_value(value: Value) -> Option<Self>;
}

impl FromValue for String {
    const KIND: &'static str = "string";

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::String(value) => Some(value),
            _ => None,
        }
    }
}

impl FromValue for bool {
    const KIND: &'static str = "bool";

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Bool(value) => Some(value),
            _ => None,
        }
    }
}

impl FromValue for i64 {
    const KIND: &'static str = "int";

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Int(value) => Some(value),
            _ => None,
        }
    }
}

impl FromValue for f64 {
    const KIND: &'static str = "float";

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Float(value) => Some(value),
            _ => None,
        }
    }
}

impl FromValue for Vec<u8> {
    const KIND: &'static str = "bytes";

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Bytes(value) => Some(value),
            _ => None,
        }
    }
}

impl FromValue for DateTime<Utc> {
    const KIND: &'static str = "time";

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Time(value) => Some(value),
            _ => None,
        }
    }
}

/// A Rust type that can be stored in a session as a [`Value::Structured`].
///
/// The `TYPE_TAG` identifies the type in encoded sessions, so it must stay the same
/// across releases and be unique among all registered types.
///
/// # Example
///
/// ```rust
/// use request_session::{SessionType, TypeRegistry};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct User {
///     id: u64,
///     name: String,
/// }
///
/// impl SessionType for User {
///     const TYPE_TAG: &'static str = "app.user";
/// }
///
/// let mut registry = TypeRegistry::new();
/// registry.register::<User>();
/// assert!(registry.contains("app.user"));
/// ```
pub trait SessionType: Serialize + DeserializeOwned {
    /// The stable tag identifying this type.
    const TYPE_TAG: &'static str;
}

type Validator = fn(&serde_json::Value) -> std::result::Result<(), serde_json::Error>;

/// The set of [`SessionType`]s a codec accepts.
///
/// Populate it once at startup, before handing it to the codec.
#[derive(Clone, Default)]
pub struct TypeRegistry {
    validators: HashMap<&'static str, Validator>,
}

fn validate<T: SessionType>(
    payload: &serde_json::Value,
) -> std::result::Result<(), serde_json::Error> {
    T::deserialize(payload).map(|_| ())
}

impl TypeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Default::default()
    }

    /// Register `T` under its [`SessionType::TYPE_TAG`].
    pub fn register<T: SessionType>(&mut self) -> &mut Self {
        self.validators.insert(T::TYPE_TAG, validate::<T>);
        self
    }

    /// Returns true if a type with the given tag is registered.
    pub fn contains(&self, tag: &str) -> bool {
        self.validators.contains_key(tag)
    }

    /// Check that `value` belongs to a registered type and that its payload fits that type.
    pub(crate) fn check(&self, value: &StructuredValue) -> Result {
        let validator = self
            .validators
            .get(value.tag.as_str())
            .ok_or_else(|| Error::UnregisteredType {
                tag: value.tag.clone(),
            })?;
        validator(&value.payload).map_err(|source| Error::Structured {
            tag: value.tag.clone(),
            source,
        })
    }
}

impl Debug for TypeRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut tags: Vec<_> = self.validators.keys().collect();
        tags.sort();
        f.debug_struct("TypeRegistry").field("tags", &tags).finish()
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Cart {
        items: Vec<String>,
    }

    impl SessionType for Cart {
        const TYPE_TAG: &'static str = "test.cart";
    }

    #[test]
    fn structured_value_converts_back() {
        let cart = Cart {
            items: vec!["apple".into()],
        };
        let Value::Structured(value) = Value::structured(&cart).unwrap() else {
            panic!()
        };
        assert_eq!(value.tag, "test.cart");
        assert_eq!(value.to_type::<Cart>().unwrap().unwrap(), cart);
    }

    #[test]
    fn registry_rejects_unknown_tags_and_bad_payloads() {
        let mut registry = TypeRegistry::new();
        let unknown = StructuredValue {
            tag: "test.cart".into(),
            payload: serde_json::json!({"items": []}),
        };
        assert!(matches!(
            registry.check(&unknown),
            Err(Error::UnregisteredType { .. })
        ));

        registry.register::<Cart>();
        assert!(registry.check(&unknown).is_ok());

        let malformed = StructuredValue {
            tag: "test.cart".into(),
            payload: serde_json::json!({"items": 3}),
        };
        assert!(matches!(
            registry.check(&malformed),
            Err(Error::Structured { .. })
        ));
    }

    #[test]
    fn typed_extraction_checks_the_kind() {
        assert_eq!(String::from_value(Value::from("a")), Some("a".to_owned()));
        assert_eq!(i64::from_value(Value::from("a")), None);
        assert_eq!(bool::from_value(Value::Bool(true)), Some(true));
    }
}

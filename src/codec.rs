use crate::value::{TypeRegistry, Value};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;

/// Encodes the state of a session into an opaque blob for the [`Store`](crate::Store), and back.
///
/// Implementations must round-trip every [`Value`] kind losslessly, and must fail
/// with [`Error::Decode`] on malformed input instead of producing an empty session.
pub trait Codec: Debug + Send + Sync {
    /// Encode the deadline and the values of a session.
    fn encode(&self, deadline: DateTime<Utc>, values: &BTreeMap<String, Value>) -> Result<Vec<u8>>;

    /// Decode a blob produced by [`Codec::encode`].
    fn decode(&self, blob: &[u8]) -> Result<(DateTime<Utc>, BTreeMap<String, Value>)>;
}

/// The default codec.
///
/// Sessions are encoded as a JSON envelope with named fields, so fields can be added
/// in later versions without breaking records that are already stored.
/// [`Value::Structured`] values are only accepted if their type is registered in the
/// [`TypeRegistry`] given to [`JsonCodec::with_registry`].
#[derive(Debug, Clone, Default)]
pub struct JsonCodec {
    registry: TypeRegistry,
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    deadline: DateTime<Utc>,
    values: &'a BTreeMap<String, Value>,
}

#[derive(Deserialize)]
struct Envelope {
    deadline: DateTime<Utc>,
    #[serde(default)]
    values: BTreeMap<String, Value>,
}

impl JsonCodec {
    /// Create a codec that accepts no structured types.
    pub fn new() -> Self {
        Default::default()
    }

    /// Create a codec that accepts the structured types in `registry`.
    pub fn with_registry(registry: TypeRegistry) -> Self {
        Self { registry }
    }

    /// The structured types accepted by this codec.
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    fn check_values(&self, values: &BTreeMap<String, Value>) -> Result {
        for (key, value) in values {
            match value {
                Value::Float(float) if !float.is_finite() => {
                    return Err(Error::NonFiniteFloat { key: key.clone() })
                }
                Value::Structured(structured) => self.registry.check(structured)?,
                _ => {}
            }
        }
        Ok(())
    }
}

impl Codec for JsonCodec {
    fn encode(&self, deadline: DateTime<Utc>, values: &BTreeMap<String, Value>) -> Result<Vec<u8>> {
        self.check_values(values)?;
        serde_json::to_vec(&EnvelopeRef { deadline, values }).map_err(Error::Encode)
    }

    fn decode(&self, blob: &[u8]) -> Result<(DateTime<Utc>, BTreeMap<String, Value>)> {
        let Envelope { deadline, values } = serde_json::from_slice(blob).map_err(Error::Decode)?;
        self.check_values(&values)?;
        Ok((deadline, values))
    }
}

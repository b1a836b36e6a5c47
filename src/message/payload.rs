use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::Result;

/// Opaque structured payload of a message.
///
/// Unknown payloads are kept as parsed JSON and pass through a client or
/// broker unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Option<Value>);

impl Payload {
    /// Encodes `value`. A value that serializes to `null` yields an empty
    /// payload, which is omitted on the wire.
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Self::from_value(serde_json::to_value(value)?))
    }

    pub fn from_value(value: Value) -> Self {
        if value.is_null() {
            Self(None)
        } else {
            Self(Some(value))
        }
    }

    /// Decodes into `T`; an empty payload decodes to `T::default()`.
    pub fn decode<T: DeserializeOwned + Default>(&self) -> Result<T> {
        Ok(self.decode_opt()?.unwrap_or_default())
    }

    /// Decodes into `T`, or `None` when there is no payload.
    pub fn decode_opt<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        match &self.0 {
            None | Some(Value::Null) => Ok(None),
            Some(value) => Ok(Some(T::deserialize(value)?)),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.0, None | Some(Value::Null))
    }

    pub fn as_value(&self) -> Option<&Value> {
        self.0.as_ref()
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(value) => write!(f, "{value}"),
            None => Ok(()),
        }
    }
}

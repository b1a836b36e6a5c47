//! The `message` module defines the envelope exchanged over every transport.
//!
//! A `Message` carries a hierarchical `action` (`location/update`), the
//! sending device in `source`, an optional `destination` device (empty means
//! broadcast) and, on replies, the `corr_id` of the message being answered.
//! Structured data rides along in the opaque `payload`; the reserved control
//! actions have typed payloads, see [`Body`].

pub mod body;
pub mod payload;

pub use body::Body;
pub use payload::Payload;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::utils::{Error, Result};

/// Protocol version stamped on every outgoing message.
pub const VERSION: &str = "0.5";

/// A single envelope on the bus.
///
/// The wire names are the short ones (`src`, `dst`, `corr`, `p`); the long
/// names written by older deployments are accepted when decoding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(
        rename = "sarif",
        alias = "stark",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub version: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub action: String,

    #[serde(
        rename = "src",
        alias = "source",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub source: String,

    #[serde(
        rename = "dst",
        alias = "destination",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub destination: String,

    #[serde(
        rename = "p",
        alias = "payload",
        default,
        skip_serializing_if = "Payload::is_empty"
    )]
    pub payload: Payload,

    #[serde(
        rename = "corr",
        alias = "corrId",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub corr_id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
}

/// Generates a new globally unique message id.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

impl Message {
    /// Creates a message for `action` with a fresh id and the current version.
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            version: VERSION.to_string(),
            id: generate_id(),
            action: action.into(),
            ..Self::default()
        }
    }

    /// Creates a message for `action` carrying `payload`.
    pub fn with_payload<T: Serialize + ?Sized>(
        action: impl Into<String>,
        payload: &T,
    ) -> Result<Self> {
        let mut msg = Self::new(action);
        msg.encode_payload(payload)?;
        Ok(msg)
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = destination.into();
        self
    }

    /// Checks the invariants every message must satisfy on the wire.
    pub fn is_valid(&self) -> Result<()> {
        if self.action.is_empty() {
            return Err(Error::InvalidMessage("missing action"));
        }
        if self.id.is_empty() {
            return Err(Error::InvalidMessage("missing id"));
        }
        Ok(())
    }

    /// Turns `reply` into an answer to `self`: it is correlated with this
    /// message and addressed to its source unless it already names a
    /// destination.
    pub fn reply(&self, mut reply: Message) -> Message {
        if reply.corr_id.is_empty() {
            reply.corr_id = if self.corr_id.is_empty() {
                self.id.clone()
            } else {
                self.corr_id.clone()
            };
        }
        if reply.destination.is_empty() {
            reply.destination = self.source.clone();
        }
        reply
    }

    /// Hierarchical action test: `location` matches `location` and
    /// `location/update`, but not `locations`. An empty prefix matches all.
    pub fn is_action(&self, prefix: &str) -> bool {
        prefix.is_empty()
            || self.action == prefix
            || self
                .action
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('/'))
    }

    /// The remainder of the action below `prefix`, or an empty string.
    pub fn action_suffix(&self, prefix: &str) -> &str {
        self.action
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or("")
    }

    /// Whether this message reports an application error (`err`, `err/<kind>`).
    pub fn is_error(&self) -> bool {
        self.is_action("err")
    }

    pub fn encode_payload<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.payload = Payload::encode(value)?;
        Ok(())
    }

    pub fn decode_payload<T: serde::de::DeserializeOwned + Default>(&self) -> Result<T> {
        self.payload.decode()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.action, self.id)?;
        if !self.source.is_empty() {
            write!(f, " from {}", self.source)?;
        }
        if !self.destination.is_empty() {
            write!(f, " to {}", self.destination)?;
        }
        if !self.text.is_empty() {
            write!(f, ": {}", self.text)?;
        }
        Ok(())
    }
}

/// An `err/badrequest` reply body.
pub fn bad_request(reason: impl fmt::Display) -> Message {
    Message {
        action: "err/badrequest".to_string(),
        text: format!("Bad Request - {reason}"),
        ..Message::default()
    }
}

/// An `err/internal` reply body.
pub fn internal_error(reason: impl fmt::Display) -> Message {
    Message {
        action: "err/internal".to_string(),
        text: format!("Internal Error - {reason}"),
        ..Message::default()
    }
}

#[cfg(test)]
mod tests;

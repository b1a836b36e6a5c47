//! Typed payloads of the reserved control actions.
//!
//! [`Body::parse`] looks at a message's action and decodes the payload into
//! the matching variant. Actions this module does not know are returned as
//! [`Body::Unknown`] with the payload untouched, so newer payloads can pass
//! through older peers.

use crate::client::{ClientInfo, Subscription};
use crate::message::{Message, Payload};
use crate::utils::Result;

pub const SUBSCRIBE: &str = "proto/sub";
pub const UNSUBSCRIBE: &str = "proto/unsub";
pub const SUBSCRIPTIONS: &str = "proto/subs";
pub const UNSUBSCRIPTIONS: &str = "proto/unsubs";
pub const HELLO: &str = "proto/hi";
pub const DISCOVER: &str = "proto/discover";
pub const PING: &str = "ping";
pub const ACK: &str = "ack";
pub const ERROR: &str = "err";

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// Announce one subscription to the broker.
    Subscribe(Subscription),
    Unsubscribe(Subscription),
    /// Announce a client's full subscription list, sent on every connect.
    Subscriptions(Vec<Subscription>),
    Unsubscriptions(Vec<Subscription>),
    /// Handshake sent on connect when an auth token is configured.
    Hello(ClientInfo),
    Ping,
    Ack,
    /// Liveness probe for whoever handles the contained action.
    Discover(String),
    /// Application error, `err` or `err/<kind>`.
    Error { kind: String, text: String },
    Unknown { action: String, payload: Payload },
}

impl Body {
    pub fn parse(msg: &Message) -> Result<Body> {
        let body = match msg.action.as_str() {
            SUBSCRIBE => Body::Subscribe(msg.decode_payload()?),
            UNSUBSCRIBE => Body::Unsubscribe(msg.decode_payload()?),
            SUBSCRIPTIONS => Body::Subscriptions(msg.decode_payload()?),
            UNSUBSCRIPTIONS => Body::Unsubscriptions(msg.decode_payload()?),
            HELLO => Body::Hello(msg.decode_payload()?),
            PING => Body::Ping,
            ACK => Body::Ack,
            _ if msg.is_action(DISCOVER) && !msg.action_suffix(DISCOVER).is_empty() => {
                Body::Discover(msg.action_suffix(DISCOVER).to_string())
            }
            _ if msg.is_error() => Body::Error {
                kind: msg.action_suffix(ERROR).to_string(),
                text: msg.text.clone(),
            },
            _ => Body::Unknown {
                action: msg.action.clone(),
                payload: msg.payload.clone(),
            },
        };
        Ok(body)
    }

    /// The action this body is sent under.
    pub fn action(&self) -> String {
        match self {
            Body::Subscribe(_) => SUBSCRIBE.to_string(),
            Body::Unsubscribe(_) => UNSUBSCRIBE.to_string(),
            Body::Subscriptions(_) => SUBSCRIPTIONS.to_string(),
            Body::Unsubscriptions(_) => UNSUBSCRIPTIONS.to_string(),
            Body::Hello(_) => HELLO.to_string(),
            Body::Ping => PING.to_string(),
            Body::Ack => ACK.to_string(),
            Body::Discover(action) => discover_action(action),
            Body::Error { kind, .. } if kind.is_empty() => ERROR.to_string(),
            Body::Error { kind, .. } => format!("{ERROR}/{kind}"),
            Body::Unknown { action, .. } => action.clone(),
        }
    }

    /// Builds a fresh message carrying this body.
    pub fn into_message(self) -> Result<Message> {
        let mut msg = Message::new(self.action());
        match self {
            Body::Subscribe(sub) | Body::Unsubscribe(sub) => msg.encode_payload(&sub)?,
            Body::Subscriptions(subs) | Body::Unsubscriptions(subs) => {
                msg.encode_payload(&subs)?
            }
            Body::Hello(info) => msg.encode_payload(&info)?,
            Body::Error { text, .. } => msg.text = text,
            Body::Unknown { payload, .. } => msg.payload = payload,
            Body::Ping | Body::Ack | Body::Discover(_) => {}
        }
        Ok(msg)
    }
}

/// `proto/discover/<action>`
pub fn discover_action(action: &str) -> String {
    format!("{DISCOVER}/{action}")
}

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::message::Message;

type HandlerFn = dyn Fn(Message) -> BoxFuture<'static, ()> + Send + Sync;

/// Async callback invoked with every message a [`Subscription`] matches.
#[derive(Clone)]
pub struct Handler(Arc<HandlerFn>);

impl Handler {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self(Arc::new(move |msg| Box::pin(f(msg))))
    }

    pub fn call(&self, msg: Message) -> BoxFuture<'static, ()> {
        (self.0)(msg)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Handler")
    }
}

/// Interest in messages addressed to `device` with action `action`.
///
/// An empty `action` matches every action. `device` is compared exactly, so
/// an empty `device` means broadcast messages only. The handler lives on the
/// client and never goes over the wire.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Subscription {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub action: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub device: String,

    #[serde(skip)]
    pub handler: Option<Handler>,
}

impl Subscription {
    pub fn new(action: impl Into<String>, device: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            device: device.into(),
            handler: None,
        }
    }

    pub fn with_handler(mut self, handler: Handler) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn matches(&self, msg: &Message) -> bool {
        msg.destination == self.device && (self.action.is_empty() || msg.action == self.action)
    }
}

impl PartialEq for Subscription {
    fn eq(&self, other: &Self) -> bool {
        self.action == other.action && self.device == other.device
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("action", &self.action)
            .field("device", &self.device)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

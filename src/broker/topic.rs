use std::collections::HashSet;

/// Identifies one connection registered with the broker.
pub type ConnId = u64;

/// A topic filter and the connections that asked for it.
///
/// The name is a `/`-separated topic as built by
/// [`get_topic`](crate::topic::get_topic); the empty name is the root and
/// matches every message.
#[derive(Debug, Default)]
pub struct Topic {
    pub name: String,
    pub subscribers: HashSet<ConnId>,
}

impl Topic {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            subscribers: HashSet::new(),
        }
    }

    /// Adds `id`. Subscribing twice has no effect.
    pub fn subscribe(&mut self, id: ConnId) {
        self.subscribers.insert(id);
    }

    pub fn unsubscribe(&mut self, id: ConnId) {
        self.subscribers.remove(&id);
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

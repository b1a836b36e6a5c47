use std::collections::{HashMap, HashSet, VecDeque};

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::broker::topic::{ConnId, Topic};
use crate::client::ClientInfo;
use crate::message::Message;
use crate::topic::{get_topic, topic_matches};

/// Number of recent message ids remembered to drop duplicates.
pub const DUPLICATE_DEPTH: usize = 1024;

/// Where messages for one connection are queued.
#[derive(Debug)]
pub struct Outbox {
    pub name: String,
    tx: mpsc::UnboundedSender<Message>,
    /// Topics kept across a `proto/subs` replacement.
    pinned: Vec<String>,
}

/// Remembers the last [`DUPLICATE_DEPTH`] message ids.
#[derive(Debug)]
struct SeenIds {
    order: VecDeque<String>,
    ids: HashSet<String>,
    depth: usize,
}

impl SeenIds {
    fn new(depth: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(depth),
            ids: HashSet::with_capacity(depth),
            depth,
        }
    }

    /// Records `id`, returning whether it was already known.
    fn check(&mut self, id: &str) -> bool {
        if id.is_empty() || self.depth == 0 {
            return false;
        }
        if self.ids.contains(id) {
            return true;
        }
        if self.order.len() == self.depth {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.ids.insert(id.to_string());
        false
    }
}

/// The routing table of a broker.
///
/// Maps topic filters to the connections subscribed to them and delivers
/// each message to every connection whose filter is a segment prefix of the
/// message's topic. It does no I/O; connections drain their [`Outbox`] on
/// their own tasks.
#[derive(Debug)]
pub struct Router {
    topics: HashMap<String, Topic>,
    conns: HashMap<ConnId, Outbox>,
    seen: SeenIds,
    clients: HashMap<String, ClientInfo>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self::with_duplicate_depth(DUPLICATE_DEPTH)
    }

    /// A depth of zero disables duplicate detection.
    pub fn with_duplicate_depth(depth: usize) -> Self {
        Self {
            topics: HashMap::new(),
            conns: HashMap::new(),
            seen: SeenIds::new(depth),
            clients: HashMap::new(),
        }
    }

    /// Registers a connection. `pinned` topics are subscribed right away and
    /// survive later replacements.
    pub fn register(
        &mut self,
        id: ConnId,
        name: impl Into<String>,
        tx: mpsc::UnboundedSender<Message>,
        pinned: Vec<String>,
    ) {
        for topic in &pinned {
            self.subscribe(topic, id);
        }
        self.conns.insert(
            id,
            Outbox {
                name: name.into(),
                tx,
                pinned,
            },
        );
    }

    /// Forgets a connection and all of its subscriptions.
    pub fn remove(&mut self, id: ConnId) {
        self.conns.remove(&id);
        self.topics.retain(|_, topic| {
            topic.unsubscribe(id);
            !topic.is_empty()
        });
    }

    pub fn is_registered(&self, id: ConnId) -> bool {
        self.conns.contains_key(&id)
    }

    pub fn name(&self, id: ConnId) -> &str {
        self.conns.get(&id).map_or("", |conn| conn.name.as_str())
    }

    /// Subscribes a connection to a topic. Automatically creates the topic if it doesn't exist.
    pub fn subscribe(&mut self, topic: &str, id: ConnId) {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| Topic::new(topic))
            .subscribe(id);
    }

    pub fn unsubscribe(&mut self, topic: &str, id: ConnId) {
        if let Some(t) = self.topics.get_mut(topic) {
            t.unsubscribe(id);
            if t.is_empty() {
                self.topics.remove(topic);
            }
        }
    }

    /// Replaces everything `id` subscribed to, except its pinned topics,
    /// with `topics`.
    pub fn replace(&mut self, id: ConnId, topics: impl IntoIterator<Item = String>) {
        let pinned = self
            .conns
            .get(&id)
            .map(|conn| conn.pinned.clone())
            .unwrap_or_default();

        self.topics.retain(|name, topic| {
            if !pinned.contains(name) {
                topic.unsubscribe(id);
            }
            !topic.is_empty()
        });
        for topic in topics {
            self.subscribe(&topic, id);
        }
    }

    /// Every topic at least one connection is subscribed to, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.topics.keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Topics `id` is subscribed to, sorted.
    pub fn topics_of(&self, id: ConnId) -> Vec<String> {
        let mut topics: Vec<String> = self
            .topics
            .values()
            .filter(|topic| topic.subscribers.contains(&id))
            .map(|topic| topic.name.clone())
            .collect();
        topics.sort();
        topics
    }

    /// Queues `msg` for every connection subscribed to a prefix of its
    /// topic, each connection at most once. Messages whose id was routed
    /// recently are dropped. Returns the number of connections reached.
    pub fn route(&mut self, msg: &Message) -> usize {
        if self.seen.check(&msg.id) {
            debug!(id = %msg.id, "dropping duplicate {}", msg.action);
            return 0;
        }

        let topic = get_topic(&msg.action, &msg.destination);
        let targets: HashSet<ConnId> = self
            .topics
            .values()
            .filter(|t| topic_matches(&t.name, &topic))
            .flat_map(|t| t.subscribers.iter().copied())
            .collect();

        let mut delivered = 0;
        for id in targets {
            let Some(conn) = self.conns.get(&id) else {
                warn!("no connection registered with id {id}");
                continue;
            };
            if conn.tx.send(msg.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Records a `proto/hi` handshake from `source`.
    pub fn greet(&mut self, source: &str, mut info: ClientInfo) -> ClientInfo {
        if info.name.is_empty() {
            info.name = source.to_string();
        }
        info.last_seen = Some(Utc::now());
        self.clients.insert(source.to_string(), info.clone());
        info
    }

    /// Refreshes the last-seen time of a client that said hello before.
    pub fn touch(&mut self, source: &str) {
        if let Some(info) = self.clients.get_mut(source) {
            info.last_seen = Some(Utc::now());
        }
    }

    pub fn client(&self, source: &str) -> Option<&ClientInfo> {
        self.clients.get(source)
    }
}

//! The `broker` module routes messages between connections.
//!
//! [`Broker`] is what a client-side deployment needs from a broker;
//! [`LocalBroker`] implements it in-process on top of the [`Router`] table.

pub mod engine;
pub mod local;
pub mod topic;

pub use engine::{DUPLICATE_DEPTH, Router};
pub use local::{BROKER_SOURCE, LocalBroker};

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::NetConfig;
use crate::transport::{Conn, Pipe};
use crate::utils::Result;

/// A message router clients connect to.
///
/// A broker delivers every message it reads to each connection whose most
/// recently announced subscriptions match it, including connections reached
/// through bridges and gateways.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Accepts connections on `cfg.address` until the listener fails.
    async fn listen(&self, cfg: &NetConfig) -> Result<()>;

    /// Returns one end of an in-process connection to this broker.
    fn new_local_conn(&self) -> Pipe;

    /// Joins another broker as an equal: every message crosses in both
    /// directions, regardless of subscriptions. Returns when the connection
    /// ends.
    async fn listen_on_bridge(&self, conn: Arc<dyn Conn>) -> Result<()>;

    /// Uses another broker as upstream: every local message is sent up, and
    /// only what local connections subscribed to comes back.
    async fn listen_on_gateway(&self, conn: Arc<dyn Conn>) -> Result<()>;
}

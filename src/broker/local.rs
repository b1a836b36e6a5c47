use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::broker::Broker;
use crate::broker::engine::Router;
use crate::broker::topic::ConnId;
use crate::client::{ClientInfo, Subscription};
use crate::config::{AuthMode, NetConfig};
use crate::message::{Body, Message};
use crate::topic::{from_topic, get_topic};
use crate::transport::{Conn, NetListener, Pipe, WsConn};
use crate::utils::{Error, Result};

/// Source id the broker puts on the control messages it sends itself.
pub const BROKER_SOURCE: &str = "broker";

/// An in-process broker.
///
/// Every connection it serves gets a subscription table filled from the
/// `proto/sub`, `proto/subs` and `proto/unsub(s)` messages the connection
/// sends. Every message read from any connection is routed to each
/// connection subscribed to it, the sender included.
#[derive(Clone, Default)]
pub struct LocalBroker {
    inner: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    router: Mutex<Router>,
    next_id: AtomicU64,
    trace: AtomicBool,
}

impl LocalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Logs every routed message at debug level.
    pub fn trace_messages(&self, enabled: bool) {
        self.inner.trace.store(enabled, Ordering::Relaxed);
    }

    fn router(&self) -> MutexGuard<'_, Router> {
        self.inner
            .router
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Topics any connection is currently subscribed to.
    pub fn topics(&self) -> Vec<String> {
        self.router().topics()
    }

    /// What the client `source` sent in its last handshake.
    pub fn client_info(&self, source: &str) -> Option<ClientInfo> {
        self.router().client(source).cloned()
    }

    /// Serves `conn` until it fails: reads messages and routes them, and
    /// writes to it whatever is routed to it.
    ///
    /// A connection closed by the peer ends with `Ok(())`.
    pub async fn listen_on_conn(&self, conn: Arc<dyn Conn>) -> Result<()> {
        self.serve(conn, "client", Vec::new()).await
    }

    async fn serve(&self, conn: Arc<dyn Conn>, kind: &str, pinned: Vec<String>) -> Result<()> {
        let id: ConnId = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let name = format!("{kind}-{id}");
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        self.router().register(id, name.clone(), tx, pinned);
        info!("{name} connected");

        // forward routed messages to the connection
        let mut writer = tokio::spawn({
            let conn = conn.clone();
            async move {
                while let Some(msg) = rx.recv().await {
                    if let Err(err) = conn.write(msg).await {
                        return err;
                    }
                }
                Error::ClosedConnection
            }
        });

        let reader = async {
            loop {
                match conn.read().await {
                    Ok(msg) => self.dispatch(id, msg),
                    Err(err) => break err,
                }
            }
        };

        let err = tokio::select! {
            err = reader => err,
            joined = &mut writer => joined.unwrap_or(Error::ClosedConnection),
        };

        self.router().remove(id);
        writer.abort();
        let _ = conn.close().await;

        match err {
            Error::ClosedConnection => {
                info!("{name} disconnected");
                Ok(())
            }
            err => {
                warn!("{name} closed: {err}");
                Err(err)
            }
        }
    }

    /// Applies control messages from connection `id`, then routes `msg`.
    fn dispatch(&self, id: ConnId, mut msg: Message) {
        let trace = self.inner.trace.load(Ordering::Relaxed);
        let mut router = self.router();

        match Body::parse(&msg) {
            Ok(Body::Subscribe(sub)) => router.subscribe(&topic_of(&sub), id),
            Ok(Body::Subscriptions(subs)) => router.replace(id, subs.iter().map(topic_of)),
            Ok(Body::Unsubscribe(sub)) => {
                router.unsubscribe(&topic_of(&sub), id);
                return;
            }
            Ok(Body::Unsubscriptions(subs)) => {
                for sub in &subs {
                    router.unsubscribe(&topic_of(sub), id);
                }
                return;
            }
            Ok(Body::Hello(info)) => {
                let info = router.greet(&msg.source, info);
                if let Err(err) = msg.encode_payload(&info) {
                    warn!("could not stamp handshake from {}: {err}", msg.source);
                }
            }
            Ok(_) => {}
            Err(err) => {
                warn!(
                    "malformed {} from {}: {err}",
                    msg.action,
                    router.name(id)
                );
                return;
            }
        }

        if msg.is_action("log/err") {
            error!("[{}] {} - {}", msg.source, msg.text, msg.payload);
        } else if msg.is_action("log") {
            info!("[{}] {} - {}", msg.source, msg.text, msg.payload);
        }

        if trace {
            debug!("publish from {}: {msg}", router.name(id));
        }
        router.route(&msg);
        router.touch(&msg.source);
    }

    /// Accepts connections from `listener` forever, each served on its own
    /// task once it passes `auth`.
    pub async fn serve_listener(&self, listener: NetListener, auth: AuthMode) -> Result<()> {
        loop {
            let conn = match listener.accept().await {
                Ok(conn) => conn,
                Err(err) => {
                    error!("connect accept failed: {err}");
                    continue;
                }
            };
            info!("connection accepted: {conn}");

            let broker = self.clone();
            tokio::spawn(async move {
                if let Err(err) = broker.authenticate_and_listen(auth, Arc::new(conn)).await {
                    warn!("connection closed: {err}");
                }
            });
        }
    }

    async fn authenticate_and_listen(&self, auth: AuthMode, conn: Arc<dyn Conn>) -> Result<()> {
        if auth == AuthMode::Certificate && !conn.is_verified() {
            let _ = conn.close().await;
            return Err(Error::AuthenticationFailed(
                "no verified client certificate".to_string(),
            ));
        }
        self.listen_on_conn(conn).await
    }

    /// Binds `addr` and serves web socket clients, one message per text
    /// frame.
    pub async fn serve_websocket(&self, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!("WebSocket server listening on ws://{addr}");
        self.serve_websocket_on(listener).await
    }

    pub async fn serve_websocket_on(&self, listener: TcpListener) -> Result<()> {
        while let Ok((stream, peer)) = listener.accept().await {
            let broker = self.clone();
            tokio::spawn(async move {
                let conn = match WsConn::accept(stream).await {
                    Ok(conn) => conn,
                    Err(err) => {
                        warn!("WebSocket handshake error from {peer}: {err}");
                        return;
                    }
                };
                if let Err(err) = broker.listen_on_conn(Arc::new(conn)).await {
                    warn!("WebSocket client {peer} closed: {err}");
                }
            });
        }
        Ok(())
    }

    async fn announce(&self, conn: &dyn Conn, body: Body) -> Result<()> {
        let mut msg = body.into_message()?;
        msg.source = BROKER_SOURCE.to_string();
        if let Err(err) = conn.write(msg).await {
            let _ = conn.close().await;
            return Err(err);
        }
        Ok(())
    }
}

fn topic_of(sub: &Subscription) -> String {
    get_topic(&sub.action, &sub.device)
}

#[async_trait]
impl Broker for LocalBroker {
    async fn listen(&self, cfg: &NetConfig) -> Result<()> {
        let listener = NetListener::bind(cfg).await?;
        info!("listening on {}", listener.local_addr()?);
        self.serve_listener(listener, cfg.auth).await
    }

    fn new_local_conn(&self) -> Pipe {
        let (ours, theirs) = Pipe::pair();
        let broker = self.clone();
        tokio::spawn(async move {
            if let Err(err) = broker.listen_on_conn(Arc::new(ours)).await {
                debug!("local connection closed: {err}");
            }
        });
        theirs
    }

    async fn listen_on_bridge(&self, conn: Arc<dyn Conn>) -> Result<()> {
        self.announce(conn.as_ref(), Body::Subscribe(Subscription::new("", "")))
            .await?;
        self.serve(conn, "bridge", vec![String::new()]).await
    }

    async fn listen_on_gateway(&self, conn: Arc<dyn Conn>) -> Result<()> {
        let topics = self.topics();
        if !topics.is_empty() {
            let subs = topics
                .iter()
                .map(|topic| {
                    let (action, device) = from_topic(topic);
                    Subscription::new(action, device)
                })
                .collect();
            self.announce(conn.as_ref(), Body::Subscriptions(subs))
                .await?;
        }
        self.serve(conn, "gateway", vec![String::new()]).await
    }
}

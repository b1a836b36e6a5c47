use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{ClientInfo, Handler, Subscription};
use crate::config::{ClientSettings, NetConfig};
use crate::message::body::{self, Body};
use crate::message::{Message, VERSION, bad_request, generate_id, internal_error};
use crate::transport::{Conn, NetConn};
use crate::utils::{Error, Result};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type ConnectionLost = Arc<dyn Fn(&Error) + Send + Sync>;
type PendingRequests = Mutex<HashMap<String, oneshot::Sender<Message>>>;

/// Per-call settings for [`Client::request_with`].
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Overrides the client's request timeout.
    pub timeout: Option<Duration>,
    /// Resolves the request early with [`Error::Cancelled`].
    pub cancel: Option<CancellationToken>,
}

/// A participant on the bus.
///
/// Cloning is cheap and every clone drives the same state.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

struct Inner {
    device_id: String,
    conn: Mutex<Option<Arc<dyn Conn>>>,
    subs: RwLock<Arc<Vec<Subscription>>>,
    pending: PendingRequests,
    request_timeout: Mutex<Duration>,
    handle_concurrent: AtomicBool,
    info: Mutex<ClientInfo>,
    on_connection_lost: Mutex<Option<ConnectionLost>>,
    ping: Handler,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes a request's reply slot when the request finishes or is dropped.
struct PendingGuard<'a> {
    pending: &'a PendingRequests,
    id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).remove(self.id);
    }
}

impl Client {
    /// Creates a disconnected client for `device_id`.
    ///
    /// Every client subscribes to its own direct mail and answers `ping`
    /// with `ack`.
    pub fn new(device_id: impl Into<String>) -> Self {
        let device_id = device_id.into();
        let inner = Arc::new_cyclic(|weak| Inner {
            device_id,
            conn: Mutex::new(None),
            subs: RwLock::new(Arc::new(Vec::new())),
            pending: Mutex::new(HashMap::new()),
            request_timeout: Mutex::new(DEFAULT_REQUEST_TIMEOUT),
            handle_concurrent: AtomicBool::new(true),
            info: Mutex::new(ClientInfo::default()),
            on_connection_lost: Mutex::new(None),
            ping: ping_responder(weak.clone()),
        });

        let client = Client { inner };
        client.register(Subscription::new("", client.device_id()));
        client.register(Subscription::new(body::PING, "").with_handler(client.inner.ping.clone()));
        client
    }

    /// Creates a client from configuration. An empty name gets a random
    /// device id.
    pub fn from_settings(settings: &ClientSettings) -> Self {
        let device_id = if settings.name.is_empty() {
            generate_id()
        } else {
            settings.name.clone()
        };

        let client = Client::new(device_id);
        client.set_request_timeout(settings.request_timeout());
        client.set_handle_concurrent(settings.handle_concurrent);
        client.set_info(ClientInfo {
            name: settings.name.clone(),
            auth: settings.auth.clone(),
            ..ClientInfo::default()
        });
        client
    }

    pub fn device_id(&self) -> &str {
        &self.inner.device_id
    }

    pub fn request_timeout(&self) -> Duration {
        *lock(&self.inner.request_timeout)
    }

    pub fn set_request_timeout(&self, timeout: Duration) {
        *lock(&self.inner.request_timeout) = timeout;
    }

    /// Whether each incoming message is handled on its own task. When off,
    /// messages are handled one at a time in arrival order.
    pub fn set_handle_concurrent(&self, concurrent: bool) {
        self.inner
            .handle_concurrent
            .store(concurrent, Ordering::Relaxed);
    }

    pub fn info(&self) -> ClientInfo {
        lock(&self.inner.info).clone()
    }

    /// Sets what is sent in the `proto/hi` handshake on the next connect.
    pub fn set_info(&self, info: ClientInfo) {
        *lock(&self.inner.info) = info;
    }

    /// Called with the error that ended the read loop of the bound
    /// connection. Connections closed by `disconnect` or replaced by
    /// `connect` do not count as lost.
    pub fn on_connection_lost<F>(&self, callback: F)
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        *lock(&self.inner.on_connection_lost) = Some(Arc::new(callback));
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.inner.conn).is_some()
    }

    /// Every subscription made so far, built-ins included, in registration
    /// order.
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.snapshot().as_ref().clone()
    }

    fn snapshot(&self) -> Arc<Vec<Subscription>> {
        self.inner
            .subs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Binds the client to `conn`, announces it to the broker and starts
    /// reading. A connection bound before is closed first.
    pub async fn connect<C: Conn + 'static>(&self, conn: C) -> Result<()> {
        let conn: Arc<dyn Conn> = Arc::new(conn);
        let previous = lock(&self.inner.conn).replace(conn.clone());
        if let Some(previous) = previous {
            debug!(device = %self.device_id(), "replacing previous connection");
            let _ = previous.close().await;
        }
        info!(device = %self.device_id(), "connected");

        let info = self.info();
        if !info.auth.is_empty() {
            let hello = Body::Hello(info).into_message()?;
            if let Err(err) = self.publish(hello).await {
                warn!(device = %self.device_id(), "handshake failed: {err}");
            }
        }

        let subs = Body::Subscriptions(self.subscriptions()).into_message()?;
        self.publish(subs).await?;

        tokio::spawn(read_loop(self.clone(), conn));
        Ok(())
    }

    /// Connects to the broker described by `cfg` over TCP or TLS.
    pub async fn dial(&self, cfg: &NetConfig) -> Result<()> {
        let conn = NetConn::dial(cfg).await?;
        self.connect(conn).await
    }

    /// Closes and forgets the current connection, if any.
    pub async fn disconnect(&self) -> Result<()> {
        let conn = lock(&self.inner.conn).take();
        match conn {
            Some(conn) => {
                info!(device = %self.device_id(), "disconnecting");
                conn.close().await
            }
            None => Ok(()),
        }
    }

    fn fill_message(&self, msg: &mut Message) {
        if msg.version.is_empty() {
            msg.version = VERSION.to_string();
        }
        if msg.id.is_empty() {
            msg.id = generate_id();
        }
        if msg.source.is_empty() {
            msg.source = self.inner.device_id.clone();
        }
    }

    /// Sends `msg` through the current connection, filling in version, id
    /// and source when missing.
    pub async fn publish(&self, mut msg: Message) -> Result<()> {
        self.fill_message(&mut msg);
        let conn = lock(&self.inner.conn).clone();
        let Some(conn) = conn else {
            warn!(device = %self.device_id(), action = %msg.action, "publish: not connected");
            return Err(Error::NotConnected);
        };

        debug!(device = %self.device_id(), "publish {msg}");
        conn.write(msg).await.inspect_err(|err| {
            warn!(device = %self.device_id(), "publish error: {err}");
        })
    }

    fn register(&self, sub: Subscription) {
        let mut added = Vec::with_capacity(2);
        if sub.device.is_empty() && !sub.action.is_empty() {
            added.push(Subscription {
                device: self.inner.device_id.clone(),
                ..sub.clone()
            });
        }
        added.push(sub);

        let mut subs = self
            .inner
            .subs
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut next = subs.as_ref().clone();
        next.extend(added);
        *subs = Arc::new(next);
    }

    async fn subscribe_one(&self, action: &str, device: &str, handler: Handler) -> Result<()> {
        self.register(Subscription::new(action, device).with_handler(handler));
        let announce = Body::Subscribe(Subscription::new(action, device)).into_message()?;
        self.publish(announce).await
    }

    /// Calls `handler` for every message matching `action` sent to `device`.
    ///
    /// `device` may be `"self"` for this client's own id. Subscribing also
    /// makes the client answer `proto/discover/<action>` probes.
    ///
    /// Without a connection this fails with [`Error::NotConnected`], but the
    /// subscription stays registered and is announced on the next connect.
    pub async fn subscribe(&self, action: &str, device: &str, handler: Handler) -> Result<()> {
        self.subscribe_with(action, device, Some(handler)).await
    }

    pub async fn subscribe_with(
        &self,
        action: &str,
        device: &str,
        handler: Option<Handler>,
    ) -> Result<()> {
        let handler =
            handler.ok_or_else(|| Error::InvalidArgument("no handler specified".to_string()))?;
        let device = if device == "self" {
            self.device_id()
        } else {
            device
        };

        self.subscribe_one(action, device, handler).await?;
        let discover_prefix = body::discover_action("");
        if !action.is_empty() && !action.starts_with(&discover_prefix) {
            let ping = self.inner.ping.clone();
            self.subscribe_one(&body::discover_action(action), "", ping)
                .await?;
        }
        Ok(())
    }

    /// Publishes `msg` and waits for the message correlated with it.
    pub async fn request(&self, msg: Message) -> Result<Message> {
        self.request_with(msg, RequestOptions::default()).await
    }

    /// Like [`request`](Self::request), with a per-call timeout and an
    /// optional cancellation token.
    ///
    /// Fails with [`Error::Timeout`] or [`Error::Cancelled`] when no reply
    /// arrived in time. A reply arriving afterwards is dispatched to
    /// subscriptions like any other message.
    pub async fn request_with(&self, mut msg: Message, opts: RequestOptions) -> Result<Message> {
        self.fill_message(&mut msg);
        let id = msg.id.clone();

        let (tx, mut rx) = oneshot::channel();
        lock(&self.inner.pending).insert(id.clone(), tx);
        let _slot = PendingGuard {
            pending: &self.inner.pending,
            id: &id,
        };

        self.publish(msg).await?;

        let timeout = opts.timeout.unwrap_or_else(|| self.request_timeout());
        let cancel = opts.cancel.unwrap_or_default();
        let result = tokio::select! {
            reply = &mut rx => reply.map_err(|_| Error::ClosedConnection),
            _ = tokio::time::sleep(timeout) => Err(Error::Timeout),
            _ = cancel.cancelled() => Err(Error::Cancelled),
        };

        let gave_up = matches!(result, Err(Error::Timeout | Error::Cancelled));
        if gave_up && lock(&self.inner.pending).remove(&id).is_none() {
            // a reply claimed the slot just before we gave up
            if let Ok(reply) = rx.await {
                return Ok(reply);
            }
        }
        result
    }

    /// Asks whoever handles `action` to answer, to learn whether anyone is
    /// listening before sending the real request.
    pub async fn discover(&self, action: &str) -> Result<Message> {
        self.request(Body::Discover(action.to_string()).into_message()?)
            .await
    }

    pub async fn reply(&self, orig: &Message, reply: Message) -> Result<()> {
        self.publish(orig.reply(reply)).await
    }

    pub async fn reply_bad_request(&self, orig: &Message, err: impl fmt::Display) -> Result<()> {
        warn!(device = %self.device_id(), "bad request: {orig}: {err}");
        if let Err(err) = self
            .log("err/badrequest", format!("Bad Request: {err}"), orig)
            .await
        {
            debug!("could not log bad request: {err}");
        }
        self.reply(orig, bad_request(err)).await
    }

    pub async fn reply_internal_error(&self, orig: &Message, err: impl fmt::Display) -> Result<()> {
        warn!(device = %self.device_id(), "internal error: {orig}: {err}");
        if let Err(err) = self
            .log("err/internal", format!("Internal Error: {err}"), orig)
            .await
        {
            debug!("could not log internal error: {err}");
        }
        self.reply(orig, internal_error(err)).await
    }

    /// Publishes a `log/<kind>` message. Pass `&()` for no payload.
    pub async fn log<T: Serialize + ?Sized>(
        &self,
        kind: &str,
        text: impl Into<String>,
        payload: &T,
    ) -> Result<()> {
        let msg = Message::with_payload(format!("log/{kind}"), payload)?.with_text(text);
        self.publish(msg).await
    }

    /// Delivers `msg` to the request waiting for it or, failing that, to
    /// every matching subscription in registration order.
    pub(crate) async fn handle(&self, msg: Message) {
        let Some(msg) = self.resolve_request(msg) else {
            return;
        };

        let subs = self.snapshot();
        for sub in subs.iter() {
            let Some(handler) = &sub.handler else {
                continue;
            };
            if sub.matches(&msg) {
                handler.call(msg.clone()).await;
            }
        }
    }

    /// Hands `msg` to the pending request it answers. Returns it back when
    /// nobody is waiting for it.
    fn resolve_request(&self, msg: Message) -> Option<Message> {
        if msg.corr_id.is_empty() {
            return Some(msg);
        }
        let Some(waiter) = lock(&self.inner.pending).remove(&msg.corr_id) else {
            return Some(msg);
        };
        waiter.send(msg).err()
    }

    fn connection_lost(&self, conn: &Arc<dyn Conn>, err: Error) {
        let current = {
            let mut slot = lock(&self.inner.conn);
            let current = slot
                .as_ref()
                .is_some_and(|c| std::ptr::addr_eq(Arc::as_ptr(c), Arc::as_ptr(conn)));
            if current {
                *slot = None;
            }
            current
        };

        if !current {
            debug!(device = %self.device_id(), "read loop stopped: {err}");
            return;
        }
        warn!(device = %self.device_id(), "connection lost: {err}");

        let callback = lock(&self.inner.on_connection_lost).clone();
        if let Some(callback) = callback {
            callback(&err);
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("device_id", &self.inner.device_id)
            .field("connected", &self.is_connected())
            .finish()
    }
}

async fn read_loop(client: Client, conn: Arc<dyn Conn>) {
    loop {
        let msg = match conn.read().await {
            Ok(msg) => msg,
            Err(err) => {
                client.connection_lost(&conn, err);
                return;
            }
        };
        debug!(device = %client.device_id(), "received {msg}");

        if client.inner.handle_concurrent.load(Ordering::Relaxed) {
            let client = client.clone();
            tokio::spawn(async move { client.handle(msg).await });
        } else {
            client.handle(msg).await;
        }
    }
}

fn ping_responder(client: Weak<Inner>) -> Handler {
    Handler::new(move |msg: Message| {
        let client = client.upgrade().map(|inner| Client { inner });
        async move {
            let Some(client) = client else {
                return;
            };
            debug!(device = %client.device_id(), from = %msg.source, "answering {}", msg.action);
            let ack = Message {
                corr_id: msg.id.clone(),
                ..Message::new(body::ACK)
            };
            if let Err(err) = client.reply(&msg, ack).await {
                warn!(device = %client.device_id(), "ack failed: {err}");
            }
        }
    })
}

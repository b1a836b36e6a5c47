//! TCP and TLS connections.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::{debug, info};

use crate::config::NetConfig;
use crate::message::Message;
use crate::transport::{ByteConn, Conn, tls};
use crate::utils::Result;

/// How long a write may stall before the peer is considered gone.
pub const WRITE_DEADLINE: Duration = Duration::from_secs(5 * 60);

/// How long a connection may stay silent before a read gives up.
pub const READ_DEADLINE: Duration = Duration::from_secs(60 * 60);

/// A message connection over a TCP socket, optionally wrapped in TLS.
pub struct NetConn {
    inner: ByteConn,
    verified: bool,
    peer: String,
}

impl NetConn {
    pub fn new<S>(stream: S, verified: bool, peer: impl Into<String>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self {
            inner: ByteConn::new(stream),
            verified,
            peer: peer.into(),
        }
    }

    /// Connects to the broker at `cfg.address` and starts the keepalive loop.
    pub async fn dial(cfg: &NetConfig) -> Result<Arc<NetConn>> {
        let endpoint = cfg.endpoint()?;
        let addr = endpoint.addr();
        let tcp = TcpStream::connect(&addr).await?;

        let conn = if endpoint.tls {
            let connector = TlsConnector::from(Arc::new(tls::client_config(cfg)?));
            let stream = connector
                .connect(tls::server_name(&endpoint.host)?, tcp)
                .await?;
            let verified = stream
                .get_ref()
                .1
                .peer_certificates()
                .is_some_and(|chain| !chain.is_empty());
            NetConn::new(stream, verified, addr)
        } else {
            NetConn::new(tcp, false, addr)
        };
        info!(peer = %conn.peer, tls = endpoint.tls, "connected");

        let conn = Arc::new(conn);
        let interval = cfg.keepalive();
        let keepalive = conn.clone();
        tokio::spawn(async move {
            if let Err(err) = keepalive.keepalive_loop(interval).await {
                debug!(peer = %keepalive.peer, "keepalive stopped: {err}");
            }
        });
        Ok(conn)
    }

    /// Writes a filler byte every `interval`, forever.
    ///
    /// Each write must complete within three intervals, so a dead peer shows
    /// up long before the regular write deadline would notice. Returns the
    /// error that ended the loop.
    pub async fn keepalive_loop(&self, interval: Duration) -> Result<()> {
        loop {
            tokio::time::sleep(interval).await;
            self.inner.write_raw(b" ", Some(interval * 3)).await?;
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }
}

#[async_trait]
impl Conn for NetConn {
    async fn read(&self) -> Result<Message> {
        self.inner.read_within(Some(READ_DEADLINE)).await
    }

    async fn write(&self, msg: Message) -> Result<()> {
        self.inner.write_within(msg, Some(WRITE_DEADLINE)).await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }

    fn is_verified(&self) -> bool {
        self.verified
    }
}

impl fmt::Display for NetConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "net-{}", self.peer)
    }
}

/// Accepts incoming [`NetConn`]s.
pub struct NetListener {
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
}

impl NetListener {
    pub async fn bind(cfg: &NetConfig) -> Result<Self> {
        let endpoint = cfg.endpoint()?;
        let acceptor = if endpoint.tls {
            Some(TlsAcceptor::from(Arc::new(tls::server_config(cfg)?)))
        } else {
            None
        };
        let listener = TcpListener::bind(endpoint.listen_addr()).await?;
        Ok(Self { listener, acceptor })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Waits for the next connection and completes the TLS handshake if the
    /// listener is configured for TLS.
    pub async fn accept(&self) -> Result<NetConn> {
        let (tcp, addr) = self.listener.accept().await?;
        let Some(acceptor) = &self.acceptor else {
            return Ok(NetConn::new(tcp, false, addr.to_string()));
        };

        let stream = acceptor.accept(tcp).await?;
        let verified = stream
            .get_ref()
            .1
            .peer_certificates()
            .is_some_and(|chain| !chain.is_empty());
        Ok(NetConn::new(stream, verified, addr.to_string()))
    }
}

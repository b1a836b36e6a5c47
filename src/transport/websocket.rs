//! Web socket connections, one JSON text frame per message.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, accept_async, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::trace;
use tungstenite::protocol::Message as WsMessage;

use crate::message::Message;
use crate::transport::Conn;
use crate::utils::{Error, Result};

pub struct WsConn<S> {
    sink: Mutex<SplitSink<WebSocketStream<S>, WsMessage>>,
    stream: Mutex<SplitStream<WebSocketStream<S>>>,
    closed: CancellationToken,
}

impl<S> WsConn<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(ws: WebSocketStream<S>) -> Self {
        let (sink, stream) = ws.split();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            closed: CancellationToken::new(),
        }
    }
}

impl WsConn<MaybeTlsStream<TcpStream>> {
    /// Opens a web socket to `url`, e.g. `ws://localhost:23180/`.
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws, _) = connect_async(url).await?;
        Ok(Self::new(ws))
    }
}

impl WsConn<TcpStream> {
    /// Completes the server side of the web socket handshake.
    pub async fn accept(stream: TcpStream) -> Result<Self> {
        let ws = accept_async(stream).await?;
        Ok(Self::new(ws))
    }
}

#[async_trait]
impl<S> Conn for WsConn<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn read(&self) -> Result<Message> {
        let mut stream = self.stream.lock().await;
        loop {
            let frame = tokio::select! {
                biased;
                _ = self.closed.cancelled() => return Err(Error::ClosedConnection),
                frame = stream.next() => frame,
            };
            let msg = match frame {
                None | Some(Ok(WsMessage::Close(_))) => return Err(Error::ClosedConnection),
                Some(Err(err)) => return Err(err.into()),
                Some(Ok(WsMessage::Text(text))) => Message::decode(text.as_str().as_bytes())?,
                Some(Ok(WsMessage::Binary(data))) => Message::decode(&data)?,
                Some(Ok(other)) => {
                    trace!("skipping web socket frame: {other:?}");
                    continue;
                }
            };
            msg.is_valid()?;
            return Ok(msg);
        }
    }

    async fn write(&self, msg: Message) -> Result<()> {
        msg.is_valid()?;
        let text = serde_json::to_string(&msg)?;
        let mut sink = self.sink.lock().await;
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(Error::ClosedConnection),
            sent = sink.send(WsMessage::Text(text.into())) => Ok(sent?),
        }
    }

    async fn close(&self) -> Result<()> {
        if self.closed.is_cancelled() {
            return Ok(());
        }
        self.closed.cancel();
        let mut sink = self.sink.lock().await;
        match sink.close().await {
            Ok(())
            | Err(tungstenite::Error::ConnectionClosed)
            | Err(tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

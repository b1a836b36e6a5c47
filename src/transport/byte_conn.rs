//! Connection over an arbitrary async byte stream.

use std::future::Future;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use crate::message::Message;
use crate::transport::Conn;
use crate::transport::codec::JsonCodec;
use crate::utils::{Error, Result};

type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// Reads and writes JSON-encoded messages on any byte stream.
///
/// There are no deadlines here; whoever owns the stream is responsible for
/// detecting a dead peer.
pub struct ByteConn {
    reader: Mutex<FramedRead<BoxedRead, JsonCodec>>,
    writer: Mutex<FramedWrite<BoxedWrite, JsonCodec>>,
    closed: CancellationToken,
}

impl ByteConn {
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::from_parts(reader, writer)
    }

    /// Builds a connection from separate read and write halves.
    pub fn from_parts<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let reader: BoxedRead = Box::new(reader);
        let writer: BoxedWrite = Box::new(writer);
        Self {
            reader: Mutex::new(FramedRead::new(reader, JsonCodec)),
            writer: Mutex::new(FramedWrite::new(writer, JsonCodec)),
            closed: CancellationToken::new(),
        }
    }

    pub(crate) async fn read_within(&self, limit: Option<Duration>) -> Result<Message> {
        let mut reader = self.reader.lock().await;
        let next = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(Error::ClosedConnection),
            next = within(limit, "read", reader.next()) => next?,
        };
        let msg = next.ok_or(Error::ClosedConnection)??;
        msg.is_valid()?;
        Ok(msg)
    }

    pub(crate) async fn write_within(&self, msg: Message, limit: Option<Duration>) -> Result<()> {
        msg.is_valid()?;
        let mut writer = self.writer.lock().await;
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(Error::ClosedConnection),
            sent = within(limit, "write", writer.send(msg)) => sent?,
        }
    }

    /// Writes raw bytes outside of any message framing.
    pub(crate) async fn write_raw(&self, data: &[u8], limit: Option<Duration>) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let stream = writer.get_mut();
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(Error::ClosedConnection),
            written = within(limit, "write", async {
                stream.write_all(data).await?;
                stream.flush().await
            }) => Ok(written??),
        }
    }
}

#[async_trait]
impl Conn for ByteConn {
    async fn read(&self) -> Result<Message> {
        self.read_within(None).await
    }

    async fn write(&self, msg: Message) -> Result<()> {
        self.write_within(msg, None).await
    }

    async fn close(&self) -> Result<()> {
        if self.closed.is_cancelled() {
            return Ok(());
        }
        self.closed.cancel();
        let mut writer = self.writer.lock().await;
        writer.close().await
    }
}

/// Runs `fut`, failing with a timed-out I/O error once `limit` has passed.
async fn within<F: Future>(limit: Option<Duration>, what: &str, fut: F) -> Result<F::Output> {
    match limit {
        None => Ok(fut.await),
        Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
            Error::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("{what} deadline exceeded"),
            ))
        }),
    }
}

//! The `transport` module carries messages between a client and its peer.
//!
//! Every transport implements [`Conn`]: read one message, write one message,
//! close. Implementations:
//!
//! - [`Pipe`]: an in-memory connected pair, for same-process composition and tests.
//! - [`NetConn`]: a TCP or TLS socket with read/write deadlines and keepalive.
//! - [`ByteConn`]: any async byte stream, with no deadlines of its own.
//! - [`WsConn`]: a web socket, one text frame per message.

pub mod byte_conn;
pub mod codec;
pub mod net;
pub mod pipe;
pub mod tls;
pub mod websocket;

pub use byte_conn::ByteConn;
pub use codec::JsonCodec;
pub use net::{NetConn, NetListener};
pub use pipe::Pipe;
pub use websocket::WsConn;

use std::sync::Arc;

use async_trait::async_trait;

use crate::message::Message;
use crate::utils::{Error, Result};

/// A bidirectional message transport.
///
/// Methods take `&self` so that one read loop and any number of writers can
/// share a connection. After `close`, pending and future reads and writes on
/// both ends fail.
#[async_trait]
pub trait Conn: Send + Sync {
    /// Waits for the next message. Fails on I/O or decode errors and on
    /// messages that are not valid.
    async fn read(&self) -> Result<Message>;

    /// Validates `msg`, then encodes and flushes it.
    async fn write(&self, msg: Message) -> Result<()>;

    async fn close(&self) -> Result<()>;

    /// Whether the peer presented a verified certificate chain.
    fn is_verified(&self) -> bool {
        false
    }
}

#[async_trait]
impl<T: Conn + ?Sized> Conn for Arc<T> {
    async fn read(&self) -> Result<Message> {
        (**self).read().await
    }

    async fn write(&self, msg: Message) -> Result<()> {
        (**self).write(msg).await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }

    fn is_verified(&self) -> bool {
        (**self).is_verified()
    }
}

async fn transmit_to(from: &dyn Conn, to: &dyn Conn) -> Error {
    loop {
        let msg = match from.read().await {
            Ok(msg) => msg,
            Err(err) => return err,
        };
        if let Err(err) = to.write(msg).await {
            return err;
        }
    }
}

/// Pumps messages between `a` and `b` in both directions until either side
/// fails, then closes both and returns the error that stopped it.
pub async fn transmit(a: &dyn Conn, b: &dyn Conn) -> Error {
    let err = tokio::select! {
        err = transmit_to(a, b) => err,
        err = transmit_to(b, a) => err,
    };
    let _ = a.close().await;
    let _ = b.close().await;
    err
}

#[cfg(test)]
mod tests;

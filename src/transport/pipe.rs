//! In-memory connected pair of connections.

use std::fmt;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::message::{Message, generate_id};
use crate::transport::Conn;
use crate::utils::{Error, Result};

/// Messages a pipe end buffers before writers have to wait for the reader.
pub const PIPE_CAPACITY: usize = 10;

/// One end of an in-memory connection.
///
/// Both ends share a close signal: closing either one fails every pending
/// and future read and write on both.
pub struct Pipe {
    name: String,
    tx: mpsc::Sender<Message>,
    rx: Mutex<mpsc::Receiver<Message>>,
    closed: CancellationToken,
}

impl Pipe {
    /// Creates two connected ends. What one end writes, the other reads.
    pub fn pair() -> (Pipe, Pipe) {
        let (a_tx, a_rx) = mpsc::channel(PIPE_CAPACITY);
        let (b_tx, b_rx) = mpsc::channel(PIPE_CAPACITY);
        let closed = CancellationToken::new();
        let id = generate_id();

        let a = Pipe {
            name: format!("pipe-{id}-a"),
            tx: b_tx,
            rx: Mutex::new(a_rx),
            closed: closed.clone(),
        };
        let b = Pipe {
            name: format!("pipe-{id}-b"),
            tx: a_tx,
            rx: Mutex::new(b_rx),
            closed,
        };
        (a, b)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

#[async_trait]
impl Conn for Pipe {
    async fn read(&self) -> Result<Message> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(Error::ClosedConnection),
            msg = rx.recv() => msg.ok_or(Error::ClosedConnection),
        }
    }

    async fn write(&self, msg: Message) -> Result<()> {
        msg.is_valid()?;
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(Error::ClosedConnection),
            sent = self.tx.send(msg) => sent.map_err(|_| Error::ClosedConnection),
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.cancel();
        Ok(())
    }
}

impl fmt::Display for Pipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

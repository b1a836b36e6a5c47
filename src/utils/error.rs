//! The `error` module defines the error type used across `homebus`.
//!
//! Transport failures (`Io`, `Decode`, `WebSocket`, `Tls`, `ClosedConnection`)
//! end a connection's read loop. Protocol misuse (`InvalidMessage`,
//! `NotConnected`, `InvalidArgument`) is reported to the caller. `Timeout` and
//! `Cancelled` resolve a request that never got its reply.
//!
//! Application-level failures are not errors at this layer; they travel as
//! ordinary `err/<kind>` messages.

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("tls error: {0}")]
    Tls(String),

    #[error("connection closed")]
    ClosedConnection,

    #[error("invalid message: {0}")]
    InvalidMessage(&'static str),

    #[error("not connected")]
    NotConnected,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("request timed out")]
    Timeout,

    #[error("request cancelled")]
    Cancelled,

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error(transparent)]
    Config(#[from] config::ConfigError),
}

impl Error {
    /// Whether the error came from the underlying connection rather than
    /// from how the protocol was used.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::Decode(_)
                | Error::WebSocket(_)
                | Error::Tls(_)
                | Error::ClosedConnection
        )
    }
}

impl From<rustls::Error> for Error {
    fn from(err: rustls::Error) -> Self {
        Error::Tls(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

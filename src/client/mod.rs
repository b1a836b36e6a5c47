//! The `client` module is the protocol state machine every bus participant
//! runs.
//!
//! A [`Client`] owns at most one [`Conn`](crate::transport::Conn) at a time,
//! keeps the list of [`Subscription`]s it has made for its whole lifetime and
//! correlates replies with outstanding requests.

pub mod info;
pub mod pubsub_client;
pub mod subscription;

pub use info::ClientInfo;
pub use pubsub_client::{Client, DEFAULT_REQUEST_TIMEOUT, RequestOptions};
pub use subscription::{Handler, Subscription};

//! # homebus
//!
//! `homebus` is the message bus core of a home-automation assistant.
//! Independent modules exchange small JSON envelopes tagged with
//! hierarchical action names (`location/update`, `lights/on`) and, when they
//! talk to one device, its id. A broker fans every message out to whoever
//! subscribed to it.
//!
//! ## Core Modules
//!
//! - `message`: the [`Message`](message::Message) envelope and the typed
//!   payloads of the reserved control actions.
//! - `topic`: encoding of action and device into hierarchical topics.
//! - `transport`: the [`Conn`](transport::Conn) trait and its in-memory, TCP/TLS,
//!   byte stream and web socket implementations.
//! - `client`: the protocol state machine every participant runs.
//! - `broker`: the broker contract and an in-process broker.
//! - `config`: loading settings from files and the environment.
//! - `utils`: the error type and logging setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod message;
pub mod topic;
pub mod transport;
pub mod utils;

//! Transport seam between the connection handle and the network.
//!
//! - `websocket` — [`WebSocketTransport`], the production transport
//!
//! A transport opens a [`Session`] per connection attempt. Inbound
//! invocations are pushed onto an unbounded channel in arrival order; the
//! channel closes when the session ends for any reason.

pub mod websocket;

use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::protocol::Invocation;

pub use websocket::WebSocketTransport;

/// Everything a transport needs for one connection attempt.
#[derive(Clone, Debug)]
pub struct ConnectOptions {
    /// Hub endpoint (`http(s)://` or `ws(s)://`).
    pub url: String,
    /// Bearer token for this attempt, fetched from the token provider.
    pub access_token: Option<String>,
    pub server_timeout: Duration,
    pub keep_alive_interval: Duration,
}

/// A live connection returned by [`Transport::connect`].
pub struct Connected {
    pub session: Box<dyn Session>,
    pub inbound: mpsc::UnboundedReceiver<Invocation>,
}

pub trait Transport: Send + Sync + 'static {
    /// Open a connection and complete the protocol handshake.
    fn connect(&self, options: ConnectOptions) -> BoxFuture<'static, Result<Connected, TransportError>>;
}

pub trait Session: Send + Sync {
    /// Send one invocation. Fails if the session has ended.
    fn send(&self, invocation: Invocation) -> BoxFuture<'_, Result<(), TransportError>>;

    /// Close the connection gracefully.
    fn stop(&self) -> BoxFuture<'_, Result<(), TransportError>>;
}

//! Hub Client - real-time event client for a message hub
//!
//! One WebSocket connection to the hub carries several independent event
//! streams: presence (login/logout), chat messages, notifications and job
//! lifecycle signals. [`HubClient`] routes each inbound channel to a typed
//! listener registry and offers `send` / `notify` for the outbound side.
//!
//! # Example
//!
//! ```no_run
//! use hub_client::{HubClient, channels};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = HubClient::new("https://example.com", "token", channels::DEFAULT_HUB_PATH)
//!         .unwrap();
//!
//!     client.login().add(|user| {
//!         println!("{} connected", user.user_name);
//!         Ok(())
//!     });
//!     client.message_received().add(|msg| {
//!         println!("{}: {}", msg.from, msg.message);
//!         Ok(())
//!     });
//!
//!     client.start(CancellationToken::new()).await.unwrap();
//!     client.send("hello everyone").await.unwrap();
//!     client.dispose().await.unwrap();
//! }
//! ```

pub mod channels;
mod client;
pub mod config;
pub mod connection;
mod error;
pub mod events;
pub mod listeners;
pub mod protocol;
pub mod transport;

pub use client::HubClient;
pub use config::{HubClientConfig, HubFileConfig};
pub use connection::{ConnectionState, HubConnection};
pub use error::{HubError, TransportError};
pub use events::{HubEvent, MessageReceived, UserStateChange};
pub use listeners::{ListenerId, Listeners};
pub use protocol::Invocation;
pub use transport::{ConnectOptions, Connected, Session, Transport, WebSocketTransport};

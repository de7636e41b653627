//! HubClient: one hub connection fanned out into typed listener registries.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::channels;
use crate::config::HubClientConfig;
use crate::connection::{AccessTokenProvider, ConnectionState, HandlerTable, HubConnection};
use crate::error::HubError;
use crate::events::{HubEvent, MessageReceived, UserStateChange};
use crate::listeners::Listeners;
use crate::protocol::Invocation;
use crate::transport::{Transport, WebSocketTransport};

const EVENT_TAP_CAPACITY: usize = 256;

/// Listener registries for every event kind, plus the broadcast tap.
struct HubEvents {
    login: Listeners<UserStateChange>,
    logout: Listeners<UserStateChange>,
    message_received: Listeners<MessageReceived>,
    notification_received: Listeners<String>,
    job_started: Listeners<String>,
    job_completed: Listeners<String>,
    tap: broadcast::Sender<HubEvent>,
}

impl HubEvents {
    fn new() -> Self {
        let (tap, _) = broadcast::channel(EVENT_TAP_CAPACITY);
        Self {
            login: Listeners::new("login"),
            logout: Listeners::new("logout"),
            message_received: Listeners::new("message_received"),
            notification_received: Listeners::new("notification_received"),
            job_started: Listeners::new("job_started"),
            job_completed: Listeners::new("job_completed"),
            tap,
        }
    }

    fn raise<E>(&self, listeners: &Listeners<E>, event: E, wrap: impl FnOnce(E) -> HubEvent) {
        listeners.dispatch(&event);
        // No tap receivers is the normal case.
        let _ = self.tap.send(wrap(event));
    }
}

/// Build the fixed channel table. Called once per client, before the
/// connection exists.
fn channel_table(events: &Arc<HubEvents>) -> HandlerTable {
    let on_connect = events.clone();
    let on_disconnect = events.clone();
    let on_notify = events.clone();
    let on_message = events.clone();
    let on_private = events.clone();
    let on_job_start = events.clone();
    let on_job_completed = events.clone();

    HandlerTable::new()
        .on(
            channels::CONNECT,
            move |(connection_id, user_name): (String, String)| {
                let e = &on_connect;
                e.raise(
                    &e.login,
                    UserStateChange {
                        connection_id,
                        user_name,
                    },
                    HubEvent::Login,
                );
            },
        )
        .on(
            channels::DISCONNECT,
            move |(connection_id, user_name): (String, String)| {
                let e = &on_disconnect;
                e.raise(
                    &e.logout,
                    UserStateChange {
                        connection_id,
                        user_name,
                    },
                    HubEvent::Logout,
                );
            },
        )
        .on(channels::NOTIFY, move |(message,): (String,)| {
            let e = &on_notify;
            e.raise(&e.notification_received, message, |message| {
                HubEvent::NotificationReceived { message }
            });
        })
        .on(
            channels::SEND_MESSAGE,
            move |(from, message): (String, String)| {
                let e = &on_message;
                e.raise(
                    &e.message_received,
                    MessageReceived { from, message },
                    HubEvent::MessageReceived,
                );
            },
        )
        // The recipient is received but not passed on.
        .on(
            channels::SEND_PRIVATE_MESSAGE,
            move |(from, _to, message): (String, String, String)| {
                let e = &on_private;
                e.raise(
                    &e.message_received,
                    MessageReceived { from, message },
                    HubEvent::MessageReceived,
                );
            },
        )
        .on(channels::JOB_START, move |(message,): (String,)| {
            let e = &on_job_start;
            e.raise(&e.job_started, message, |message| HubEvent::JobStarted {
                message,
            });
        })
        .on(channels::JOB_COMPLETED, move |(message,): (String,)| {
            let e = &on_job_completed;
            e.raise(&e.job_completed, message, |message| {
                HubEvent::JobCompleted { message }
            });
        })
}

/// Real-time hub client.
///
/// ```no_run
/// use hub_client::HubClient;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn run() -> Result<(), hub_client::HubError> {
/// let client = HubClient::new("https://example.com", "token", "/signalRHub")?;
/// client.job_completed().add(|message| {
///     println!("job done: {message}");
///     Ok(())
/// });
/// client.start(CancellationToken::new()).await?;
/// client.notify("hello").await?;
/// client.dispose().await?;
/// # Ok(())
/// # }
/// ```
pub struct HubClient {
    connection: HubConnection,
    events: Arc<HubEvents>,
    started: AtomicBool,
}

impl HubClient {
    /// Client over the WebSocket transport.
    pub fn new(base_url: &str, token: impl Into<String>, hub_path: &str) -> Result<Self, HubError> {
        Self::with_transport(base_url, token, hub_path, Arc::new(WebSocketTransport))
    }

    pub fn from_config(config: &HubClientConfig) -> Result<Self, HubError> {
        Self::new(&config.base_url, config.token.clone(), &config.hub_path)
    }

    /// Client over any transport. An empty `token` connects unauthenticated.
    pub fn with_transport(
        base_url: &str,
        token: impl Into<String>,
        hub_path: &str,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, HubError> {
        if base_url.trim().is_empty() {
            return Err(HubError::InvalidEndpoint("base url is empty".to_string()));
        }

        // Captured once; every connection attempt sees the same value.
        let token: String = token.into();
        let token_provider: AccessTokenProvider =
            Arc::new(move || (!token.is_empty()).then(|| token.clone()));

        let events = Arc::new(HubEvents::new());
        let connection = HubConnection::new(
            channels::hub_url(base_url, hub_path),
            token_provider,
            transport,
            channel_table(&events),
        );

        Ok(Self {
            connection,
            events,
            started: AtomicBool::new(false),
        })
    }

    /// Connect to the hub. Only the first call does anything; later calls
    /// return `Ok(())` immediately.
    ///
    /// The client is marked started before the handshake runs and stays
    /// marked if the handshake fails or is cancelled, so a failed start is
    /// not retried by calling `start` again. Build a new client instead.
    pub async fn start(&self, cancel: CancellationToken) -> Result<(), HubError> {
        if self.started.swap(true, Ordering::SeqCst) {
            let state = self.connection.state();
            if !matches!(state, ConnectionState::Starting | ConnectionState::Started) {
                warn!(state = %state, "hub client already marked started; start skipped");
            }
            return Ok(());
        }
        self.connection.start(cancel).await
    }

    /// Send a chat message on the `sendMessage` channel.
    pub async fn send(&self, message: &str) -> Result<(), HubError> {
        self.connection
            .send(Invocation::new(
                channels::SEND_MESSAGE,
                vec![Value::from(message)],
            ))
            .await
    }

    /// Send a notification on the `notify` channel.
    pub async fn notify(&self, message: &str) -> Result<(), HubError> {
        self.connection
            .send(Invocation::new(channels::NOTIFY, vec![Value::from(message)]))
            .await
    }

    /// Stop the connection, then release it. Release happens even if stop
    /// fails; the stop error is returned afterwards.
    pub async fn dispose(&self) -> Result<(), HubError> {
        let stopped = self.connection.stop().await;
        self.connection.release();
        stopped.map_err(HubError::DisposeFailure)
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    pub fn url(&self) -> &str {
        self.connection.url()
    }

    /// Receive every dispatched event as a [`HubEvent`]. Slow receivers lag
    /// instead of slowing dispatch.
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.events.tap.subscribe()
    }

    /// A user connected (`connect` channel).
    pub fn login(&self) -> &Listeners<UserStateChange> {
        &self.events.login
    }

    /// A user disconnected (`disconnect` channel).
    pub fn logout(&self) -> &Listeners<UserStateChange> {
        &self.events.logout
    }

    /// Broadcast and private chat messages.
    pub fn message_received(&self) -> &Listeners<MessageReceived> {
        &self.events.message_received
    }

    pub fn notification_received(&self) -> &Listeners<String> {
        &self.events.notification_received
    }

    pub fn job_started(&self) -> &Listeners<String> {
        &self.events.job_started
    }

    pub fn job_completed(&self) -> &Listeners<String> {
        &self.events.job_completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> HubClient {
        HubClient::new("http://localhost:5000/", "", channels::DEFAULT_HUB_PATH).unwrap()
    }

    #[test]
    fn empty_base_url_is_rejected() {
        assert!(matches!(
            HubClient::new("", "token", "/hub"),
            Err(HubError::InvalidEndpoint(_))
        ));
        assert!(matches!(
            HubClient::new("   ", "token", "/hub"),
            Err(HubError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn url_joins_base_and_path() {
        assert_eq!(client().url(), "http://localhost:5000/signalRHub");
    }

    #[test]
    fn new_client_is_created_and_not_started() {
        let client = client();
        assert_eq!(client.state(), ConnectionState::Created);
        assert!(!client.is_started());
    }

    #[test]
    fn channel_table_covers_every_inbound_channel() {
        let events = Arc::new(HubEvents::new());
        let table = channel_table(&events);
        let mut registered: Vec<&str> = table.channels().collect();
        registered.sort_unstable();
        let mut expected = channels::INBOUND.to_vec();
        expected.sort_unstable();
        assert_eq!(registered, expected);
    }

    #[test]
    fn private_message_drops_recipient() {
        let events = Arc::new(HubEvents::new());
        let table = channel_table(&events);
        let mut tap = events.tap.subscribe();

        assert!(table.route(&Invocation::new(
            channels::SEND_PRIVATE_MESSAGE,
            vec![json!("A"), json!("B"), json!("hi")],
        )));

        let event = tap.try_recv().unwrap();
        assert_eq!(
            event,
            HubEvent::MessageReceived(MessageReceived {
                from: "A".into(),
                message: "hi".into(),
            })
        );
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("to").is_none());
    }
}

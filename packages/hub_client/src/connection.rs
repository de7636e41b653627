//! The single connection handle owned by a [`HubClient`](crate::HubClient).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channels::{KEEP_ALIVE_INTERVAL, SERVER_TIMEOUT};
use crate::error::{HubError, TransportError};
use crate::protocol::Invocation;
use crate::transport::{ConnectOptions, Connected, Session, Transport};

/// Supplies the bearer token for each connection attempt. `None` connects
/// without credentials.
pub type AccessTokenProvider = Arc<dyn Fn() -> Option<String> + Send + Sync>;

type ChannelHandler = Box<dyn Fn(&[Value]) -> Result<(), serde_json::Error> + Send + Sync>;

/// Lifecycle of a [`HubConnection`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Created,
    Starting,
    Started,
    Stopped,
    Disposed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Created => "created",
            ConnectionState::Starting => "starting",
            ConnectionState::Started => "started",
            ConnectionState::Stopped => "stopped",
            ConnectionState::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

/// Fixed map from channel name to decode-and-dispatch handler.
///
/// Built before the connection exists and moved into it; the connection
/// offers no way to add handlers afterwards.
#[derive(Default)]
pub struct HandlerTable {
    handlers: HashMap<&'static str, ChannelHandler>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `channel`. The channel's positional arguments
    /// are decoded into `Args`, usually a tuple such as `(String, String)`.
    pub fn on<Args, F>(mut self, channel: &'static str, handler: F) -> Self
    where
        Args: DeserializeOwned + 'static,
        F: Fn(Args) + Send + Sync + 'static,
    {
        let decode = move |arguments: &[Value]| -> Result<(), serde_json::Error> {
            let args: Args = serde_json::from_value(Value::Array(arguments.to_vec()))?;
            handler(args);
            Ok(())
        };
        let previous = self.handlers.insert(channel, Box::new(decode));
        debug_assert!(previous.is_none(), "channel {channel} registered twice");
        self
    }

    pub fn channels(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.keys().copied()
    }

    /// Dispatch one inbound invocation. Returns false if it was dropped.
    pub fn route(&self, invocation: &Invocation) -> bool {
        let Some(handler) = self.handlers.get(invocation.target.as_str()) else {
            debug!(channel = %invocation.target, "no handler for hub channel");
            return false;
        };
        if let Err(e) = handler(&invocation.arguments) {
            warn!(
                channel = %invocation.target,
                error = %e,
                "dropping hub frame with unexpected arguments"
            );
            return false;
        }
        true
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One network session to the hub plus its lifecycle state.
pub struct HubConnection {
    url: String,
    token_provider: AccessTokenProvider,
    transport: Arc<dyn Transport>,
    handlers: Arc<HandlerTable>,
    state: Arc<watch::Sender<ConnectionState>>,
    session: Mutex<Option<Arc<dyn Session>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl HubConnection {
    pub fn new(
        url: String,
        token_provider: AccessTokenProvider,
        transport: Arc<dyn Transport>,
        handlers: HandlerTable,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Created);
        Self {
            url,
            token_provider,
            transport,
            handlers: Arc::new(handlers),
            state: Arc::new(state),
            session: Mutex::new(None),
            reader: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Observe state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Connect and run the handshake. Only valid from `Created`.
    ///
    /// Cancelling `cancel` during the handshake leaves the connection
    /// `Stopped`.
    pub async fn start(&self, cancel: CancellationToken) -> Result<(), HubError> {
        let claimed = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Created {
                *state = ConnectionState::Starting;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(HubError::InvalidState(self.state()));
        }

        let options = ConnectOptions {
            url: self.url.clone(),
            access_token: (self.token_provider)(),
            server_timeout: SERVER_TIMEOUT,
            keep_alive_interval: KEEP_ALIVE_INTERVAL,
        };
        info!(url = %self.url, "starting hub connection");

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.mark_stopped();
                info!(url = %self.url, "hub connection start cancelled");
                return Err(HubError::Cancelled);
            }
            result = self.transport.connect(options) => result,
        };

        let Connected { session, inbound } = match result {
            Ok(connected) => connected,
            Err(e) => {
                self.mark_stopped();
                warn!(url = %self.url, error = %e, "hub connection failed");
                return Err(HubError::ConnectionFailure(e));
            }
        };
        let session: Arc<dyn Session> = Arc::from(session);
        *lock(&self.session) = Some(session.clone());

        let promoted = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Starting {
                *state = ConnectionState::Started;
                true
            } else {
                false
            }
        });
        if !promoted {
            // Stopped or disposed while the handshake was in flight.
            lock(&self.session).take();
            let _ = session.stop().await;
            return Err(HubError::InvalidState(self.state()));
        }

        let reader = tokio::spawn(route_inbound(
            inbound,
            self.handlers.clone(),
            self.state.clone(),
        ));
        if let Some(previous) = lock(&self.reader).replace(reader) {
            previous.abort();
        }

        info!(url = %self.url, "hub connection started");
        Ok(())
    }

    /// Send one invocation. Fails without touching the network unless the
    /// connection is `Started`.
    pub async fn send(&self, invocation: Invocation) -> Result<(), HubError> {
        if self.state() != ConnectionState::Started {
            return Err(HubError::TransportFailure(TransportError::NotConnected));
        }
        let session = lock(&self.session)
            .clone()
            .ok_or_else(|| HubError::TransportFailure(TransportError::NotConnected))?;

        debug!(channel = %invocation.target, "sending hub invocation");
        session
            .send(invocation)
            .await
            .map_err(HubError::TransportFailure)
    }

    /// Close the session gracefully. A connection that never started has
    /// nothing to close and succeeds.
    ///
    /// Returns once the inbound reader has finished; no listener runs after
    /// this resolves.
    pub async fn stop(&self) -> Result<(), TransportError> {
        let session = lock(&self.session).take();
        self.mark_stopped();
        let result = match session {
            Some(session) => {
                info!(url = %self.url, "stopping hub connection");
                session.stop().await
            }
            None => Ok(()),
        };

        let reader = lock(&self.reader).take();
        if let Some(reader) = reader {
            reader.abort();
            let _ = reader.await;
        }
        result
    }

    /// Drop the session and inbound reader. Always succeeds; the connection
    /// cannot be started again.
    pub fn release(&self) {
        if let Some(reader) = lock(&self.reader).take() {
            reader.abort();
        }
        lock(&self.session).take();
        self.state.send_replace(ConnectionState::Disposed);
        debug!(url = %self.url, "hub connection released");
    }

    fn mark_stopped(&self) {
        self.state.send_if_modified(|state| {
            if matches!(state, ConnectionState::Starting | ConnectionState::Started) {
                *state = ConnectionState::Stopped;
                true
            } else {
                false
            }
        });
    }
}

impl Drop for HubConnection {
    fn drop(&mut self) {
        if let Some(reader) = lock(&self.reader).take() {
            reader.abort();
        }
    }
}

/// Route inbound invocations in arrival order until the session ends.
async fn route_inbound(
    mut inbound: mpsc::UnboundedReceiver<Invocation>,
    handlers: Arc<HandlerTable>,
    state: Arc<watch::Sender<ConnectionState>>,
) {
    while let Some(invocation) = inbound.recv().await {
        if *state.borrow() != ConnectionState::Started {
            break;
        }
        handlers.route(&invocation);
    }

    let dropped = state.send_if_modified(|state| {
        if *state == ConnectionState::Started {
            *state = ConnectionState::Stopped;
            true
        } else {
            false
        }
    });
    if dropped {
        info!("hub connection lost; not reconnecting");
    }
}

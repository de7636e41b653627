//! WebSocket transport over `tokio-tungstenite`.
//!
//! Connects straight to the socket endpoint with no negotiate round trip and
//! no long-polling fallback. One task per session owns the socket: it
//! drains outbound commands, routes inbound frames, pings the server and
//! enforces the server timeout.

use futures::future::BoxFuture;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header::AUTHORIZATION};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use super::{ConnectOptions, Connected, Session, Transport};
use crate::error::TransportError;
use crate::protocol::{self, HubMessage, Invocation};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;

/// Production transport: WebSocket only.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketTransport;

impl Transport for WebSocketTransport {
    fn connect(&self, options: ConnectOptions) -> BoxFuture<'static, Result<Connected, TransportError>> {
        Box::pin(connect(options))
    }
}

/// Map an `http(s)` hub URL onto its `ws(s)` equivalent.
pub fn websocket_url(url: &str) -> Result<String, TransportError> {
    if let Some(rest) = url.strip_prefix("https://") {
        Ok(format!("wss://{rest}"))
    } else if let Some(rest) = url.strip_prefix("http://") {
        Ok(format!("ws://{rest}"))
    } else if url.starts_with("wss://") || url.starts_with("ws://") {
        Ok(url.to_string())
    } else {
        Err(TransportError::InvalidUrl(url.to_string()))
    }
}

async fn connect(options: ConnectOptions) -> Result<Connected, TransportError> {
    let url = websocket_url(&options.url)?;
    let mut request = url.as_str().into_client_request()?;
    if let Some(token) = options.access_token.as_deref() {
        let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
            TransportError::Handshake("access token is not a valid header value".to_string())
        })?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }

    debug!(url = %url, authenticated = options.access_token.is_some(), "opening hub websocket");
    let (mut ws, _) = connect_async(request).await?;

    ws.send(Message::Text(protocol::encode_handshake_request()?.into()))
        .await?;
    let pending = tokio::time::timeout(options.server_timeout, read_handshake(&mut ws))
        .await
        .map_err(|_| TransportError::Handshake("timed out waiting for handshake response".to_string()))??;

    info!(url = %url, "hub handshake complete");

    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (command_tx, command_rx) = mpsc::channel(64);
    let task = tokio::spawn(session_loop(
        ws,
        command_rx,
        inbound_tx,
        options,
        pending,
    ));

    Ok(Connected {
        session: Box::new(WebSocketSession { command_tx, task }),
        inbound: inbound_rx,
    })
}

/// Read until the handshake answer arrives. Frames that shared its text
/// message are returned so the session can route them.
async fn read_handshake(ws: &mut WsStream) -> Result<Vec<String>, TransportError> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                let mut frames = protocol::split_frames(&text);
                let Some(answer) = frames.next() else {
                    continue;
                };
                protocol::parse_handshake_response(answer)?;
                return Ok(frames.map(str::to_string).collect());
            }
            Some(Ok(Message::Binary(_))) => {
                return Err(TransportError::Protocol(
                    "binary frames are not supported by the json protocol".to_string(),
                ));
            }
            Some(Ok(Message::Close(_))) | None => return Err(TransportError::Closed),
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

enum Command {
    Send {
        frame: String,
        respond_to: oneshot::Sender<Result<(), TransportError>>,
    },
    Stop {
        respond_to: oneshot::Sender<Result<(), TransportError>>,
    },
}

struct WebSocketSession {
    command_tx: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

impl Session for WebSocketSession {
    fn send(&self, invocation: Invocation) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            let frame = protocol::encode_invocation(&invocation)?;
            let (tx, rx) = oneshot::channel();
            self.command_tx
                .send(Command::Send {
                    frame,
                    respond_to: tx,
                })
                .await
                .map_err(|_| TransportError::Closed)?;
            rx.await.map_err(|_| TransportError::Closed)?
        })
    }

    fn stop(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            let (tx, rx) = oneshot::channel();
            if self
                .command_tx
                .send(Command::Stop { respond_to: tx })
                .await
                .is_err()
            {
                // Session loop already ended; nothing left to close.
                return Ok(());
            }
            rx.await.unwrap_or(Ok(()))
        })
    }
}

impl Drop for WebSocketSession {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn close(write: &mut WsWrite) -> Result<(), TransportError> {
    match write.send(Message::Close(None)).await {
        Ok(())
        | Err(tungstenite::Error::ConnectionClosed)
        | Err(tungstenite::Error::AlreadyClosed) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Route one text message. Returns false when the server asked to close.
fn route_frames(text: &str, inbound: &mpsc::UnboundedSender<Invocation>) -> bool {
    for frame in protocol::split_frames(text) {
        match protocol::parse_message(frame) {
            Ok(HubMessage::Invocation(invocation)) => {
                // Receiver gone means the handle is being released.
                let _ = inbound.send(invocation);
            }
            Ok(HubMessage::Ping) => {}
            Ok(HubMessage::Close { error }) => {
                info!(error = ?error, "server closed the hub connection");
                return false;
            }
            Ok(HubMessage::Other { message_type }) => {
                debug!(message_type, "ignoring hub message");
            }
            Err(e) => warn!(error = %e, "dropping malformed hub frame"),
        }
    }
    true
}

async fn session_loop(
    ws: WsStream,
    mut commands: mpsc::Receiver<Command>,
    inbound: mpsc::UnboundedSender<Invocation>,
    options: ConnectOptions,
    pending: Vec<String>,
) {
    let (mut write, mut read) = ws.split();

    for frame in &pending {
        if !route_frames(frame, &inbound) {
            let _ = close(&mut write).await;
            return;
        }
    }

    let mut deadline = Instant::now() + options.server_timeout;
    let mut keep_alive = tokio::time::interval_at(
        Instant::now() + options.keep_alive_interval,
        options.keep_alive_interval,
    );

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Send { frame, respond_to }) => {
                    let result = write
                        .send(Message::Text(frame.into()))
                        .await
                        .map_err(TransportError::from);
                    let failed = result.is_err();
                    let _ = respond_to.send(result);
                    if failed {
                        break;
                    }
                }
                Some(Command::Stop { respond_to }) => {
                    let _ = respond_to.send(close(&mut write).await);
                    break;
                }
                None => {
                    let _ = close(&mut write).await;
                    break;
                }
            },

            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    deadline = Instant::now() + options.server_timeout;
                    if !route_frames(&text, &inbound) {
                        let _ = close(&mut write).await;
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!("hub websocket closed by peer");
                    break;
                }
                Some(Ok(_)) => {
                    deadline = Instant::now() + options.server_timeout;
                }
                Some(Err(e)) => {
                    warn!(error = %e, "hub websocket read failed");
                    break;
                }
            },

            _ = keep_alive.tick() => {
                if let Err(e) = write.send(Message::Text(protocol::encode_ping().into())).await {
                    warn!(error = %e, "hub keep-alive ping failed");
                    break;
                }
            }

            () = tokio::time::sleep_until(deadline) => {
                warn!(
                    timeout_secs = options.server_timeout.as_secs(),
                    "no frames from hub within server timeout, closing"
                );
                let _ = close(&mut write).await;
                break;
            }
        }
    }

    debug!("hub session loop ended");
}

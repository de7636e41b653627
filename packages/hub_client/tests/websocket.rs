//! End-to-end tests: HubClient over the real WebSocket transport against a
//! minimal in-process hub speaking the JSON protocol.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::{WebSocketStream, accept_hdr_async};
use tokio_util::sync::CancellationToken;

use hub_client::{
    ConnectOptions, Connected, ConnectionState, HubClient, HubError, Transport, TransportError,
    WebSocketTransport,
};

/// Timeout for each async operation in tests.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);
const RS: char = '\u{1e}';

struct UpgradeInfo {
    path: String,
    authorization: Option<String>,
}

async fn bind() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind test hub");
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Accept one WebSocket upgrade, recording the path and auth header.
async fn accept(listener: &TcpListener) -> (WebSocketStream<TcpStream>, UpgradeInfo) {
    let (stream, _) = listener.accept().await.unwrap();
    let (info_tx, info_rx) = oneshot::channel();
    let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        let authorization = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let _ = info_tx.send(UpgradeInfo {
            path: req.uri().path().to_string(),
            authorization,
        });
        Ok(resp)
    };
    let ws = accept_hdr_async(stream, callback).await.unwrap();
    (ws, info_rx.await.unwrap())
}

/// Read the next non-ping JSON frame sent by the client.
async fn next_frame(ws: &mut WebSocketStream<TcpStream>) -> Option<Value> {
    while let Some(message) = ws.next().await {
        match message {
            Ok(Message::Text(text)) => {
                for frame in text.split(RS).filter(|f| !f.is_empty()) {
                    let value: Value = serde_json::from_str(frame).unwrap();
                    if value.get("type") != Some(&json!(6)) {
                        return Some(value);
                    }
                }
            }
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
    None
}

async fn send_frame(ws: &mut WebSocketStream<TcpStream>, value: Value) {
    ws.send(Message::Text(format!("{value}{RS}").into()))
        .await
        .unwrap();
}

/// Complete the protocol handshake from the server side.
async fn accept_handshake(ws: &mut WebSocketStream<TcpStream>) {
    let request = next_frame(ws).await.expect("no handshake request");
    assert_eq!(request, json!({"protocol": "json", "version": 1}));
    send_frame(ws, json!({})).await;
}

#[tokio::test]
async fn round_trip_over_websocket() {
    let (listener, addr) = bind().await;
    let (sent_tx, sent_rx) = oneshot::channel();

    let server = tokio::spawn(async move {
        let (mut ws, info) = accept(&listener).await;
        accept_handshake(&mut ws).await;
        send_frame(
            &mut ws,
            json!({"type": 1, "target": "jobStart", "arguments": ["job-42"]}),
        )
        .await;

        let outbound = next_frame(&mut ws).await.expect("no outbound invocation");
        let _ = sent_tx.send(outbound);

        // Client closes on dispose.
        let closed = next_frame(&mut ws).await;
        (info, closed)
    });

    let client = HubClient::new(&format!("http://{addr}/"), "secret", "/hub").unwrap();
    let (job_tx, mut job_rx) = mpsc::unbounded_channel();
    client.job_started().add(move |message| {
        job_tx.send(message.clone())?;
        Ok(())
    });

    timeout(TEST_TIMEOUT, client.start(CancellationToken::new()))
        .await
        .expect("start timed out")
        .expect("start failed");
    assert_eq!(client.state(), ConnectionState::Started);

    let job = timeout(TEST_TIMEOUT, job_rx.recv()).await.unwrap().unwrap();
    assert_eq!(job, "job-42");

    client.send("hello").await.unwrap();
    let outbound = timeout(TEST_TIMEOUT, sent_rx).await.unwrap().unwrap();
    assert_eq!(
        outbound,
        json!({"type": 1, "target": "sendMessage", "arguments": ["hello"]})
    );

    client.dispose().await.unwrap();
    let (info, closed) = timeout(TEST_TIMEOUT, server).await.unwrap().unwrap();
    assert_eq!(info.path, "/hub");
    assert_eq!(info.authorization.as_deref(), Some("Bearer secret"));
    assert!(closed.is_none());

    // Exactly one job event was delivered.
    assert!(job_rx.try_recv().is_err());
}

#[tokio::test]
async fn unauthenticated_client_sends_no_authorization_header() {
    let (listener, addr) = bind().await;
    let server = tokio::spawn(async move {
        let (mut ws, info) = accept(&listener).await;
        accept_handshake(&mut ws).await;
        let _ = next_frame(&mut ws).await;
        info
    });

    let client = HubClient::new(&format!("http://{addr}"), "", "/hub").unwrap();
    timeout(TEST_TIMEOUT, client.start(CancellationToken::new()))
        .await
        .unwrap()
        .unwrap();
    client.dispose().await.unwrap();

    let info = timeout(TEST_TIMEOUT, server).await.unwrap().unwrap();
    assert!(info.authorization.is_none());
}

#[tokio::test]
async fn handshake_error_is_connection_failure() {
    let (listener, addr) = bind().await;
    tokio::spawn(async move {
        let (mut ws, _) = accept(&listener).await;
        let _ = next_frame(&mut ws).await;
        send_frame(&mut ws, json!({"error": "protocol not supported"})).await;
        let _ = next_frame(&mut ws).await;
    });

    let client = HubClient::new(&format!("http://{addr}"), "secret", "/hub").unwrap();
    let err = timeout(TEST_TIMEOUT, client.start(CancellationToken::new()))
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(
        err,
        HubError::ConnectionFailure(TransportError::Handshake(ref msg)) if msg == "protocol not supported"
    ));
    assert_eq!(client.state(), ConnectionState::Stopped);
}

#[tokio::test]
async fn server_close_stops_connection_without_reconnect() {
    let (listener, addr) = bind().await;
    let server = tokio::spawn(async move {
        let (mut ws, _) = accept(&listener).await;
        accept_handshake(&mut ws).await;
        send_frame(&mut ws, json!({"type": 7, "error": "shutting down"})).await;
        let _ = next_frame(&mut ws).await;
        // A reconnect attempt would show up as a second connection.
        timeout(Duration::from_millis(300), listener.accept())
            .await
            .is_err()
    });

    let client = HubClient::new(&format!("http://{addr}"), "secret", "/hub").unwrap();
    let mut state = client.watch_state();
    timeout(TEST_TIMEOUT, client.start(CancellationToken::new()))
        .await
        .unwrap()
        .unwrap();

    timeout(TEST_TIMEOUT, state.wait_for(|s| *s == ConnectionState::Stopped))
        .await
        .expect("connection never stopped")
        .unwrap();

    assert!(matches!(
        client.notify("anyone?").await,
        Err(HubError::TransportFailure(TransportError::NotConnected))
    ));
    let no_reconnect = timeout(TEST_TIMEOUT, server).await.unwrap().unwrap();
    assert!(no_reconnect);
    client.dispose().await.unwrap();
}

#[tokio::test]
async fn silent_hub_is_pinged_then_closed_after_server_timeout() {
    let (listener, addr) = bind().await;
    let server = tokio::spawn(async move {
        let (mut ws, _) = accept(&listener).await;
        accept_handshake(&mut ws).await;

        // Never answer; count keep-alive pings until the client gives up.
        let mut pings = 0;
        let mut closed = false;
        while let Some(message) = ws.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    pings += text
                        .split(RS)
                        .filter(|frame| !frame.is_empty())
                        .filter(|frame| {
                            serde_json::from_str::<Value>(frame).unwrap() == json!({"type": 6})
                        })
                        .count();
                }
                Ok(Message::Close(_)) => {
                    closed = true;
                    break;
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
        (pings, closed)
    });

    let options = ConnectOptions {
        url: format!("http://{addr}/hub"),
        access_token: None,
        server_timeout: Duration::from_millis(400),
        keep_alive_interval: Duration::from_millis(100),
    };
    let Connected {
        session,
        mut inbound,
    } = timeout(TEST_TIMEOUT, WebSocketTransport.connect(options))
        .await
        .unwrap()
        .unwrap();

    let next = timeout(TEST_TIMEOUT, inbound.recv())
        .await
        .expect("server timeout never fired");
    assert!(next.is_none());

    let (pings, closed) = timeout(TEST_TIMEOUT, server).await.unwrap().unwrap();
    assert!(pings >= 2, "expected keep-alive pings, saw {pings}");
    assert!(closed);
    drop(session);
}

#[tokio::test]
async fn unreachable_hub_is_unavailable() {
    let (listener, addr) = bind().await;
    drop(listener);

    let client = HubClient::new(&format!("http://{addr}"), "secret", "/hub").unwrap();
    let err = timeout(TEST_TIMEOUT, client.start(CancellationToken::new()))
        .await
        .unwrap()
        .unwrap_err();
    match err {
        HubError::ConnectionFailure(e) => assert!(e.is_unavailable(), "unexpected error: {e}"),
        other => panic!("expected ConnectionFailure, got {other:?}"),
    }
}

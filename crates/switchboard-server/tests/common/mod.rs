//! Shared harness for the end-to-end tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use switchboard_auth::StaticTokenVerifier;
use switchboard_server::{ServerConfig, SwitchboardServer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>;

/// Boot a server on an ephemeral port.
///
/// Tokens: `t1` and `t-daemon` map to `u1`, `t2` maps to `u2`.
pub async fn boot_server(config: ServerConfig) -> (SocketAddr, Arc<SwitchboardServer>) {
    let verifier = StaticTokenVerifier::new([("t1", "u1"), ("t-daemon", "u1"), ("t2", "u2")]);
    let server = Arc::new(SwitchboardServer::new(config, Arc::new(verifier)));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let serving = Arc::clone(&server);
    let _handle = tokio::spawn(async move { serving.serve(listener).await });
    (addr, server)
}

pub async fn connect(addr: SocketAddr) -> WsStream {
    let (ws, _resp) = timeout(TIMEOUT, connect_async(format!("ws://{addr}/v1/updates")))
        .await
        .expect("connect timed out")
        .expect("connect failed");
    ws
}

pub async fn send_json(ws: &mut WsStream, value: Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

/// Next JSON text frame, skipping control frames.
pub async fn recv_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("websocket error");
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected message: {other:?}"),
        }
    }
}

/// Wait until the server closes the socket, returning the close frame.
pub async fn expect_close(ws: &mut WsStream) -> Option<tokio_tungstenite::tungstenite::protocol::CloseFrame> {
    loop {
        match timeout(TIMEOUT, ws.next()).await.expect("timed out waiting for close") {
            Some(Ok(Message::Close(frame))) => return frame,
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            Some(Ok(other)) => panic!("expected close, got {other:?}"),
            Some(Err(_)) | None => return None,
        }
    }
}

/// Connect and authenticate, returning the socket and its `auth-ok`.
pub async fn connect_as(addr: SocketAddr, auth: Value) -> (WsStream, Value) {
    let mut ws = connect(addr).await;
    let mut frame = json!({"type": "auth"});
    if let (Some(obj), Some(extra)) = (frame.as_object_mut(), auth.as_object()) {
        obj.extend(extra.clone());
    }
    send_json(&mut ws, frame).await;
    let ok = recv_json(&mut ws).await;
    assert_eq!(ok["type"], "auth-ok", "handshake failed: {ok}");
    (ws, ok)
}

pub async fn app(addr: SocketAddr, token: &str) -> WsStream {
    connect_as(addr, json!({"token": token})).await.0
}

pub async fn daemon(addr: SocketAddr, machine: &str) -> WsStream {
    connect_as(
        addr,
        json!({"token": "t-daemon", "clientType": "machine-scoped", "machineId": machine}),
    )
    .await
    .0
}

pub async fn agent(addr: SocketAddr, session: &str) -> WsStream {
    connect_as(
        addr,
        json!({"token": "t1", "clientType": "session-scoped", "sessionId": session}),
    )
    .await
    .0
}

/// Send a raw HTTP/1.1 request and read until the server closes.
pub async fn raw_http(addr: SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut out = Vec::new();
    let _ = timeout(TIMEOUT, stream.read_to_end(&mut out))
        .await
        .expect("http response timed out")
        .unwrap();
    String::from_utf8_lossy(&out).into_owned()
}

/// Poll `check` until it holds or the deadline passes.
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

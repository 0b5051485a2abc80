//! WebSocket session lifecycle: one upgraded socket from handshake through
//! release.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use switchboard_core::{ClientFrame, ConnectionId, ServerFrame};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::ClientChannel;
use super::handler::{FrameContext, handle_text};
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use crate::gate::{ConnectionGate, GateError, GateState, Handshake, record_rejection};

/// Per-session timing and sizing.
#[derive(Clone, Copy, Debug)]
pub struct SessionConfig {
    /// Deadline for the `auth` frame.
    pub handshake_timeout: Duration,
    /// Interval between server pings.
    pub heartbeat_interval: Duration,
    /// Silence tolerated before the socket is dropped.
    pub heartbeat_timeout: Duration,
    /// Outbound queue capacity.
    pub send_queue_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
            send_queue_capacity: 1024,
        }
    }
}

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

/// Run a WebSocket session for an upgraded socket.
///
/// 1. Waits for the `auth` frame (bounded by the handshake timeout)
/// 2. Admits the connection through the gate, or sends `error` and closes
/// 3. Drains the outbound queue and pings on an interval
/// 4. Dispatches inbound frames until close, heartbeat timeout or shutdown
/// 5. Releases the connection
#[instrument(skip_all, fields(conn_id = %conn_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    conn_id: ConnectionId,
    gate: Arc<ConnectionGate>,
    ctx: FrameContext,
    config: SessionConfig,
    shutdown: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    debug!(state = %GateState::Handshaking, "socket upgraded");

    let handshake = match read_handshake(&mut ws_rx, config.handshake_timeout).await {
        Ok(handshake) => handshake,
        Err(error) => {
            record_rejection(&error);
            reject(&mut ws_tx, &error).await;
            return;
        }
    };

    let (send_tx, send_rx) = mpsc::channel::<Arc<String>>(config.send_queue_capacity);
    let channel = Arc::new(ClientChannel::with_id(conn_id, send_tx));

    let connection = match gate.admit(handshake, Arc::clone(&channel)).await {
        Ok(connection) => connection,
        Err(error) => {
            reject(&mut ws_tx, &error).await;
            return;
        }
    };

    let cancel = shutdown.child_token();
    let writer = tokio::spawn(write_loop(
        ws_tx,
        send_rx,
        config.heartbeat_interval,
        cancel.clone(),
    ));
    let heartbeat = {
        let channel = Arc::clone(&channel);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let result = run_heartbeat(
                channel,
                config.heartbeat_interval,
                config.heartbeat_timeout,
                cancel.clone(),
            )
            .await;
            if result == HeartbeatResult::TimedOut {
                warn!("client unresponsive, disconnecting");
                cancel.cancel();
            }
        })
    };

    loop {
        let msg = tokio::select! {
            msg = ws_rx.next() => msg,
            () = cancel.cancelled() => break,
        };
        let Some(Ok(msg)) = msg else { break };
        channel.mark_alive();

        match msg {
            Message::Text(text) => handle_text(&ctx, &connection, text.as_str()),
            Message::Binary(data) => {
                if let Ok(text) = std::str::from_utf8(&data) {
                    handle_text(&ctx, &connection, text);
                } else {
                    debug!(len = data.len(), "non-UTF8 binary frame");
                    let _ = channel
                        .send_frame(&ServerFrame::invalid_frame("binary frame is not UTF-8"));
                }
            }
            Message::Close(_) => {
                debug!("client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    let _ = gate.release(&connection);
    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(2), writer).await;
    heartbeat.abort();
    info!(
        user_id = %connection.user_id(),
        dropped = channel.drop_count(),
        age_secs = channel.age().as_secs(),
        "session ended"
    );
}

/// Wait for the first text frame and interpret it as the handshake.
async fn read_handshake(ws_rx: &mut WsStream, timeout: Duration) -> Result<Handshake, GateError> {
    let first = tokio::time::timeout(timeout, next_text(ws_rx))
        .await
        .map_err(|_| GateError::HandshakeTimeout)?;
    let Some(text) = first else {
        return Err(GateError::MissingToken);
    };
    let frame = ClientFrame::parse(&text).map_err(|_| GateError::MissingToken)?;
    Handshake::from_frame(frame)
}

/// Next text (or UTF-8 binary) frame, skipping control frames.
async fn next_text(ws_rx: &mut WsStream) -> Option<String> {
    while let Some(Ok(msg)) = ws_rx.next().await {
        match msg {
            Message::Text(text) => return Some(text.as_str().to_owned()),
            Message::Binary(data) => return String::from_utf8(data.to_vec()).ok(),
            Message::Close(_) => return None,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
    None
}

/// Send the rejection frame followed by a close frame.
async fn reject(ws_tx: &mut WsSink, error: &GateError) {
    info!(code = error.code(), %error, "handshake rejected");
    if let Ok(text) = error.to_frame().to_text() {
        let _ = ws_tx.send(Message::Text(text.into())).await;
    }
    let close = CloseFrame {
        code: close_code::POLICY,
        reason: error.code().into(),
    };
    let _ = ws_tx.send(Message::Close(Some(close))).await;
}

/// Drain the outbound queue into the socket, pinging on `ping_every`.
async fn write_loop(
    mut ws_tx: WsSink,
    mut send_rx: mpsc::Receiver<Arc<String>>,
    ping_every: Duration,
    cancel: CancellationToken,
) {
    let mut ping_interval = tokio::time::interval(ping_every);
    // Skip the immediate first tick
    let _ = ping_interval.tick().await;

    loop {
        tokio::select! {
            msg = send_rx.recv() => {
                let Some(text) = msg else { break };
                if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                    break;
                }
            }
            _ = ping_interval.tick() => {
                if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
            () = cancel.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
        }
    }
    // A dead writer ends the session.
    cancel.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_session_config() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.handshake_timeout, Duration::from_secs(10));
        assert_eq!(cfg.send_queue_capacity, 1024);
        assert!(cfg.heartbeat_timeout > cfg.heartbeat_interval);
    }
}

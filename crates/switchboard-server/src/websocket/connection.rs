//! Outbound handle for one WebSocket client.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use switchboard_core::{ConnectionId, ServerFrame};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

/// Why a frame was not enqueued.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendFailure {
    /// The queue is at capacity; the client is alive but slow.
    Full,
    /// The writer task has gone away.
    Closed,
    /// The frame could not be serialized.
    Serialize,
}

/// The server side of one underlying bidirectional channel.
///
/// Holds the bounded queue feeding the socket's writer task. Identity is
/// [`ClientChannel::id`]; two channels are never equal even if they belong
/// to the same user and scope.
#[derive(Debug)]
pub struct ClientChannel {
    /// Channel identity.
    pub id: ConnectionId,
    /// Send side of the writer task's queue.
    tx: mpsc::Sender<Arc<String>>,
    /// When this channel was established.
    pub connected_at: Instant,
    /// Whether the client has answered since the last heartbeat check.
    is_alive: AtomicBool,
    /// When the last pong (or any inbound frame) was seen.
    last_pong: Mutex<Instant>,
    /// Messages dropped because the queue was full or closed.
    dropped_messages: AtomicU64,
}

impl ClientChannel {
    /// Create a channel with a fresh id.
    pub fn new(tx: mpsc::Sender<Arc<String>>) -> Self {
        Self::with_id(ConnectionId::new(), tx)
    }

    /// Create a channel with a known id.
    pub fn with_id(id: ConnectionId, tx: mpsc::Sender<Arc<String>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Enqueue a text message without waiting.
    ///
    /// Returns `false` if the queue is full or closed, and counts the drop.
    pub fn send(&self, message: Arc<String>) -> bool {
        self.try_send(message).is_ok()
    }

    fn try_send(&self, message: Arc<String>) -> Result<(), SendFailure> {
        self.tx.try_send(message).map_err(|error| {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            match error {
                TrySendError::Full(_) => SendFailure::Full,
                TrySendError::Closed(_) => SendFailure::Closed,
            }
        })
    }

    /// Serialize a frame and enqueue it.
    pub fn send_frame(&self, frame: &ServerFrame) -> bool {
        self.try_send_frame(frame).is_ok()
    }

    /// Serialize a frame and enqueue it, reporting why it was not queued.
    pub fn try_send_frame(&self, frame: &ServerFrame) -> Result<(), SendFailure> {
        match frame.to_text() {
            Ok(text) => self.try_send(Arc::new(text)),
            Err(error) => {
                warn!(conn_id = %self.id, %error, "failed to serialize frame");
                Err(SendFailure::Serialize)
            }
        }
    }

    /// Whether the writer side has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Total messages dropped for this channel.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record client activity (pong or any frame).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Check and reset the alive flag.
    ///
    /// Returns `true` if the client was active since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Duration since the last pong (or establishment).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Channel age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

//! Runtime server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use switchboard_settings::SwitchboardSettings;

use crate::websocket::session::SessionConfig;

/// Configuration for the switchboard server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Reserved path of the WebSocket transport.
    pub ws_path: String,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Heartbeat interval in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Heartbeat timeout in milliseconds.
    pub heartbeat_timeout_ms: u64,
    /// Deadline for the `auth` frame in seconds.
    pub handshake_timeout_secs: u64,
    /// Per-connection outbound queue capacity.
    pub send_queue_capacity: usize,
    /// Largest request head inspected before routing.
    pub max_head_bytes: usize,
    /// Gateway for foreign upgrades. `None` disables the bridge.
    pub gateway_addr: Option<String>,
    /// Gateway connect timeout in milliseconds.
    pub gateway_connect_timeout_ms: u64,
    /// Notify endpoint secret. `None` rejects every notify request.
    pub notify_secret: Option<String>,
    /// Notify target user.
    pub notify_user_id: Option<String>,
    /// Header carrying the notify secret.
    pub notify_header: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            ws_path: "/v1/updates".into(),
            max_message_size: 4 * 1024 * 1024,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
            handshake_timeout_secs: 10,
            send_queue_capacity: 1024,
            max_head_bytes: 16 * 1024,
            gateway_addr: None,
            gateway_connect_timeout_ms: 5_000,
            notify_secret: None,
            notify_user_id: None,
            notify_header: "x-notify-secret".into(),
        }
    }
}

impl ServerConfig {
    /// Derive the runtime configuration from loaded settings.
    pub fn from_settings(settings: &SwitchboardSettings) -> Self {
        let server = &settings.server;
        Self {
            host: server.host.clone(),
            port: server.port,
            ws_path: server.ws_path.clone(),
            max_message_size: server.max_message_size,
            heartbeat_interval_ms: server.heartbeat_interval_ms,
            heartbeat_timeout_ms: server.heartbeat_timeout_ms,
            handshake_timeout_secs: server.handshake_timeout_secs,
            send_queue_capacity: server.send_queue_capacity,
            max_head_bytes: server.max_head_bytes,
            gateway_addr: settings
                .gateway
                .enabled
                .then(|| settings.gateway.addr.clone()),
            gateway_connect_timeout_ms: settings.gateway.connect_timeout_ms,
            notify_secret: settings.notify.secret.clone(),
            notify_user_id: settings.notify.user_id.clone(),
            notify_header: settings.notify.header.clone(),
        }
    }

    /// `host:port` to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Per-session timing.
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms.max(1)),
            heartbeat_timeout: Duration::from_millis(self.heartbeat_timeout_ms),
            send_queue_capacity: self.send_queue_capacity.max(1),
        }
    }

    /// Gateway connect timeout.
    pub fn gateway_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.gateway_connect_timeout_ms)
    }
}

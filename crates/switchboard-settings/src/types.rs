//! Settings types.
//!
//! Every struct uses camelCase keys and `#[serde(default)]`, so a settings
//! file only needs to name the values it changes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SwitchboardSettings {
    /// Listener and WebSocket transport.
    pub server: ServerSettings,
    /// Raw upgrade bridge target.
    pub gateway: GatewaySettings,
    /// Credential verification.
    pub auth: AuthSettings,
    /// Out-of-band notification endpoint.
    pub notify: NotifySettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl SwitchboardSettings {
    /// Reject combinations the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !self.server.ws_path.starts_with('/') {
            return Err(SettingsError::InvalidValue(format!(
                "server.wsPath must start with '/', got {:?}",
                self.server.ws_path
            )));
        }
        if self.server.send_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "server.sendQueueCapacity must be at least 1".into(),
            ));
        }
        if self.server.max_head_bytes < 1024 {
            return Err(SettingsError::InvalidValue(
                "server.maxHeadBytes must be at least 1024".into(),
            ));
        }
        if self.auth.verifier == VerifierKind::Http && self.auth.verify_url.is_none() {
            return Err(SettingsError::InvalidValue(
                "auth.verifyUrl is required when auth.verifier is \"http\"".into(),
            ));
        }
        Ok(())
    }
}

// ── Server ──────────────────────────────────────────────────────────────────

/// Listener and WebSocket transport settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listening port, shared by the WebSocket transport and the bridge.
    pub port: u16,
    /// Reserved path of the primary WebSocket transport.
    pub ws_path: String,
    /// Maximum inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Interval between server pings in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Close the connection after this long without a pong, in milliseconds.
    pub heartbeat_timeout_ms: u64,
    /// Deadline for the `auth` frame after the upgrade, in seconds.
    pub handshake_timeout_secs: u64,
    /// Per-connection outbound queue capacity.
    pub send_queue_capacity: usize,
    /// Largest HTTP request head inspected before routing.
    pub max_head_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8787,
            ws_path: "/v1/updates".to_string(),
            max_message_size: 4 * 1024 * 1024,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
            handshake_timeout_secs: 10,
            send_queue_capacity: 1024,
            max_head_bytes: 16 * 1024,
        }
    }
}

// ── Gateway ─────────────────────────────────────────────────────────────────

/// Where non-reserved upgrade requests are spliced to.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySettings {
    /// Bridge non-reserved upgrades. When off, they reach the HTTP router.
    pub enabled: bool,
    /// Gateway `host:port`.
    pub addr: String,
    /// Gateway connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: "127.0.0.1:18789".to_string(),
            connect_timeout_ms: 5_000,
        }
    }
}

// ── Auth ────────────────────────────────────────────────────────────────────

/// Which credential verifier to run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerifierKind {
    /// Tokens listed in [`AuthSettings::static_tokens`].
    #[default]
    Static,
    /// Remote verification endpoint at [`AuthSettings::verify_url`].
    Http,
}

/// Credential verification settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// Verifier implementation.
    pub verifier: VerifierKind,
    /// Endpoint for the HTTP verifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify_url: Option<String>,
    /// HTTP verifier request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Token to user id table for the static verifier.
    pub static_tokens: BTreeMap<String, String>,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            verifier: VerifierKind::Static,
            verify_url: None,
            timeout_ms: 5_000,
            static_tokens: BTreeMap::new(),
        }
    }
}

// ── Notify ──────────────────────────────────────────────────────────────────

/// Out-of-band notification trigger settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotifySettings {
    /// Shared secret. The endpoint rejects every request while unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    /// User whose apps receive notifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Header carrying the secret.
    pub header: String,
}

impl Default for NotifySettings {
    fn default() -> Self {
        Self {
            secret: None,
            user_id: None,
            header: "x-notify-secret".to_string(),
        }
    }
}

// ── Logging ─────────────────────────────────────────────────────────────────

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level (`RUST_LOG` overrides).
    pub level: String,
    /// Newline-delimited JSON instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

//! Transient event payloads pushed to connected clients.
//!
//! Ephemeral payloads are never persisted. A client that is offline when
//! one is emitted simply never sees it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{MachineId, SessionId};

/// Current wall-clock time as Unix milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Payload of an ephemeral event, tagged by `type` on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum EphemeralPayload {
    /// Out-of-band text notification for end-user apps.
    Notification {
        /// Human-readable message.
        message: String,
        /// Unix milliseconds.
        timestamp: i64,
    },
    /// A machine daemon came online or went offline.
    MachineActivity {
        /// Machine whose daemon changed state.
        machine_id: MachineId,
        /// `true` on connect, `false` on disconnect.
        online: bool,
        /// Unix milliseconds.
        timestamp: i64,
    },
    /// A session agent reported liveness.
    SessionActivity {
        /// Session the agent is bound to.
        session_id: SessionId,
        /// Whether the agent is still attached.
        active: bool,
        /// Whether the agent is currently working on a turn.
        thinking: bool,
        /// Unix milliseconds.
        timestamp: i64,
    },
    /// Client-relayed payload, passed through verbatim.
    #[serde(untagged)]
    Custom(Value),
}

impl EphemeralPayload {
    /// Notification stamped with the current time.
    pub fn notification(message: impl Into<String>) -> Self {
        Self::Notification {
            message: message.into(),
            timestamp: now_ms(),
        }
    }

    /// Machine online/offline event stamped with the current time.
    pub fn machine_activity(machine_id: MachineId, online: bool) -> Self {
        Self::MachineActivity {
            machine_id,
            online,
            timestamp: now_ms(),
        }
    }

    /// Session liveness event stamped with the current time.
    pub fn session_activity(session_id: SessionId, active: bool, thinking: bool) -> Self {
        Self::SessionActivity {
            session_id,
            active,
            thinking,
            timestamp: now_ms(),
        }
    }

    /// Label used in logs and drop metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Notification { .. } => "notification",
            Self::MachineActivity { .. } => "machine-activity",
            Self::SessionActivity { .. } => "session-activity",
            Self::Custom(_) => "custom",
        }
    }
}

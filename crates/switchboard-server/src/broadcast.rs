//! Ephemeral fan-out to a filtered subset of one user's connections.
//!
//! Delivery is best-effort and fire-and-forget: the payload is serialized
//! once, pushed to each recipient's outbound queue with `try_send`, and a
//! failed push is logged and counted but never retried or parked.

use std::sync::Arc;

use metrics::counter;
use switchboard_core::{
    ClientScope, ConnectionId, EphemeralPayload, MachineId, ServerFrame, SessionId, UserId,
};
use tracing::{debug, warn};

use crate::metrics::{EPHEMERAL_EVENTS_TOTAL, WS_BROADCAST_DROPS_TOTAL};
use crate::registry::{ConnectionRegistry, ScopedConnection};

/// Which of a user's connections receive an event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecipientFilter {
    /// Every connection of the user.
    All,
    /// Only end-user application connections.
    UserScopedOnly,
    /// Only session agents bound to this session.
    Session(SessionId),
    /// Only daemons on this machine.
    Machine(MachineId),
    /// Every connection except this one (echo suppression for relays).
    AllExcept(ConnectionId),
}

impl RecipientFilter {
    /// Whether `connection` is selected.
    pub fn matches(&self, connection: &ScopedConnection) -> bool {
        match self {
            Self::All => true,
            Self::UserScopedOnly => connection.scope() == ClientScope::UserScoped,
            Self::Session(wanted) => connection.session_id() == Some(wanted),
            Self::Machine(wanted) => connection.machine_id() == Some(wanted),
            Self::AllExcept(excluded) => connection.connection_id() != excluded,
        }
    }

    /// Label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::UserScopedOnly => "user-scoped-only",
            Self::Session(_) => "session",
            Self::Machine(_) => "machine",
            Self::AllExcept(_) => "all-except",
        }
    }
}

/// One transient event addressed to a user.
#[derive(Clone, Debug)]
pub struct EphemeralEvent {
    /// Owner of the target connections.
    pub user_id: UserId,
    /// What to deliver.
    pub payload: EphemeralPayload,
    /// Which connections receive it.
    pub filter: RecipientFilter,
}

impl EphemeralEvent {
    /// Build an event.
    pub fn new(user_id: UserId, payload: EphemeralPayload, filter: RecipientFilter) -> Self {
        Self {
            user_id,
            payload,
            filter,
        }
    }
}

/// Pushes ephemeral events to registered connections.
#[derive(Debug)]
pub struct EphemeralBroadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl EphemeralBroadcaster {
    /// Create a broadcaster over `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Deliver `event` to every matching connection.
    ///
    /// Returns how many queues accepted the message. A user with no live
    /// connections, or a filter that selects nobody, yields `0`.
    pub fn emit(&self, event: &EphemeralEvent) -> usize {
        let kind = event.payload.kind();
        counter!(EPHEMERAL_EVENTS_TOTAL, "kind" => kind).increment(1);

        let Some(connections) = self.registry.connections(&event.user_id) else {
            debug!(user_id = %event.user_id, kind, "no connections for ephemeral event");
            return 0;
        };

        let frame = ServerFrame::Ephemeral {
            payload: event.payload.clone(),
        };
        let text = match frame.to_text() {
            Ok(text) => Arc::new(text),
            Err(error) => {
                warn!(kind, %error, "failed to serialize ephemeral event");
                return 0;
            }
        };

        let mut delivered = 0;
        let mut recipients = 0;
        for connection in connections.iter().filter(|c| event.filter.matches(c)) {
            recipients += 1;
            if connection.channel().send(Arc::clone(&text)) {
                delivered += 1;
            } else {
                counter!(WS_BROADCAST_DROPS_TOTAL, "kind" => kind).increment(1);
                warn!(
                    conn_id = %connection.connection_id(),
                    user_id = %event.user_id,
                    kind,
                    "failed to deliver ephemeral event (queue full or closed)"
                );
            }
        }

        debug!(
            user_id = %event.user_id,
            kind,
            filter = event.filter.label(),
            recipients,
            delivered,
            "ephemeral event emitted"
        );
        delivered
    }
}

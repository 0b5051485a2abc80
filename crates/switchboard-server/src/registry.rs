//! Connection registry: every live, admitted connection grouped by user.
//!
//! Membership is keyed by channel identity ([`ConnectionId`]), never by
//! scope fields. Two devices of the same user, or two agents attached to the
//! same session, are distinct members. Users with no remaining connections
//! are pruned so lookups can tell "never connected" from "all gone" apart
//! only by the absence of an entry.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use switchboard_core::{ClientScope, ConnectionId, MachineId, SessionId, UserId};

use crate::websocket::connection::ClientChannel;

/// An admitted connection tagged with its client scope.
///
/// The variant is fixed at admission and never changes.
#[derive(Clone, Debug)]
pub enum ScopedConnection {
    /// End-user application instance.
    User {
        /// Outbound handle.
        channel: Arc<ClientChannel>,
        /// Owner.
        user_id: UserId,
    },
    /// Automation agent bound to one chat session.
    Session {
        /// Outbound handle.
        channel: Arc<ClientChannel>,
        /// Owner.
        user_id: UserId,
        /// Bound session.
        session_id: SessionId,
    },
    /// Machine-level daemon.
    Machine {
        /// Outbound handle.
        channel: Arc<ClientChannel>,
        /// Owner.
        user_id: UserId,
        /// Machine the daemon runs on.
        machine_id: MachineId,
    },
}

impl ScopedConnection {
    /// Outbound handle.
    pub fn channel(&self) -> &Arc<ClientChannel> {
        match self {
            Self::User { channel, .. }
            | Self::Session { channel, .. }
            | Self::Machine { channel, .. } => channel,
        }
    }

    /// Owner.
    pub fn user_id(&self) -> &UserId {
        match self {
            Self::User { user_id, .. }
            | Self::Session { user_id, .. }
            | Self::Machine { user_id, .. } => user_id,
        }
    }

    /// Channel identity.
    pub fn connection_id(&self) -> &ConnectionId {
        &self.channel().id
    }

    /// Declared scope.
    pub fn scope(&self) -> ClientScope {
        match self {
            Self::User { .. } => ClientScope::UserScoped,
            Self::Session { .. } => ClientScope::SessionScoped,
            Self::Machine { .. } => ClientScope::MachineScoped,
        }
    }

    /// Bound session, for session-scoped connections.
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Self::Session { session_id, .. } => Some(session_id),
            Self::User { .. } | Self::Machine { .. } => None,
        }
    }

    /// Machine, for machine-scoped connections.
    pub fn machine_id(&self) -> Option<&MachineId> {
        match self {
            Self::Machine { machine_id, .. } => Some(machine_id),
            Self::User { .. } | Self::Session { .. } => None,
        }
    }
}

type UserConnections = HashMap<ConnectionId, ScopedConnection>;

/// In-memory `user → connections` table for the life of the process.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    users: RwLock<HashMap<UserId, UserConnections>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a connection under its owner.
    ///
    /// Returns `false` if the same channel was already present, in which
    /// case nothing changes.
    pub fn add_connection(&self, connection: ScopedConnection) -> bool {
        let mut users = self.users.write();
        let entry = users.entry(connection.user_id().clone()).or_default();
        let id = connection.connection_id().clone();
        if entry.contains_key(&id) {
            return false;
        }
        let _ = entry.insert(id, connection);
        true
    }

    /// Remove the connection with `connection_id` from `user_id`'s set.
    ///
    /// Returns whether anything was removed. Absent users or ids are a no-op.
    pub fn remove_connection(&self, user_id: &UserId, connection_id: &ConnectionId) -> bool {
        let mut users = self.users.write();
        let Some(entry) = users.get_mut(user_id) else {
            return false;
        };
        let removed = entry.remove(connection_id).is_some();
        if entry.is_empty() {
            let _ = users.remove(user_id);
        }
        removed
    }

    /// Snapshot of `user_id`'s live connections, or `None` if there are none.
    pub fn connections(&self, user_id: &UserId) -> Option<Vec<ScopedConnection>> {
        self.users
            .read()
            .get(user_id)
            .filter(|entry| !entry.is_empty())
            .map(|entry| entry.values().cloned().collect())
    }

    /// Whether `connection_id` is currently registered for `user_id`.
    pub fn contains(&self, user_id: &UserId, connection_id: &ConnectionId) -> bool {
        self.users
            .read()
            .get(user_id)
            .is_some_and(|entry| entry.contains_key(connection_id))
    }

    /// Total live connections across all users.
    pub fn connection_count(&self) -> usize {
        self.users.read().values().map(HashMap::len).sum()
    }

    /// Users with at least one live connection.
    pub fn user_count(&self) -> usize {
        self.users.read().len()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::sync::mpsc;

    pub(crate) fn channel() -> (Arc<ClientChannel>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(32);
        (Arc::new(ClientChannel::new(tx)), rx)
    }

    pub(crate) fn user_conn(user: &str) -> (ScopedConnection, mpsc::Receiver<Arc<String>>) {
        let (channel, rx) = channel();
        let conn = ScopedConnection::User {
            channel,
            user_id: UserId::from(user),
        };
        (conn, rx)
    }

    pub(crate) fn session_conn(
        user: &str,
        session: &str,
    ) -> (ScopedConnection, mpsc::Receiver<Arc<String>>) {
        let (channel, rx) = channel();
        let conn = ScopedConnection::Session {
            channel,
            user_id: UserId::from(user),
            session_id: SessionId::from(session),
        };
        (conn, rx)
    }

    pub(crate) fn machine_conn(
        user: &str,
        machine: &str,
    ) -> (ScopedConnection, mpsc::Receiver<Arc<String>>) {
        let (channel, rx) = channel();
        let conn = ScopedConnection::Machine {
            channel,
            user_id: UserId::from(user),
            machine_id: MachineId::from(machine),
        };
        (conn, rx)
    }

    #[test]
    fn add_then_lookup() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = user_conn("u1");
        assert!(registry.add_connection(conn.clone()));
        let conns = registry.connections(&UserId::from("u1")).unwrap();
        assert_eq!(conns.len(), 1);
        assert_eq!(conns[0].connection_id(), conn.connection_id());
    }

    #[test]
    fn readding_same_channel_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = user_conn("u1");
        assert!(registry.add_connection(conn.clone()));
        assert!(!registry.add_connection(conn));
        assert_eq!(registry.connection_count(), 1);
    }

    #[test]
    fn equal_scope_fields_are_distinct_members() {
        let registry = ConnectionRegistry::new();
        let (a, _ra) = session_conn("u1", "s1");
        let (b, _rb) = session_conn("u1", "s1");
        assert!(registry.add_connection(a));
        assert!(registry.add_connection(b));
        assert_eq!(registry.connections(&UserId::from("u1")).unwrap().len(), 2);
    }

    #[test]
    fn remove_matches_channel_identity_only() {
        let registry = ConnectionRegistry::new();
        let (a, _ra) = session_conn("u1", "s1");
        let (b, _rb) = session_conn("u1", "s1");
        let _ = registry.add_connection(a.clone());
        let _ = registry.add_connection(b.clone());

        assert!(registry.remove_connection(&UserId::from("u1"), a.connection_id()));
        let left = registry.connections(&UserId::from("u1")).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].connection_id(), b.connection_id());
    }

    #[test]
    fn remove_absent_is_noop() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.remove_connection(&UserId::from("ghost"), &ConnectionId::new()));

        let (conn, _rx) = user_conn("u1");
        let _ = registry.add_connection(conn);
        assert!(!registry.remove_connection(&UserId::from("u1"), &ConnectionId::new()));
        assert_eq!(registry.connection_count(), 1);
    }

    #[test]
    fn remove_from_wrong_user_is_noop() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = user_conn("u1");
        let _ = registry.add_connection(conn.clone());
        assert!(!registry.remove_connection(&UserId::from("u2"), conn.connection_id()));
        assert!(registry.contains(&UserId::from("u1"), conn.connection_id()));
    }

    #[test]
    fn last_removal_prunes_user() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = machine_conn("u1", "m1");
        let _ = registry.add_connection(conn.clone());
        assert_eq!(registry.user_count(), 1);

        assert!(registry.remove_connection(&UserId::from("u1"), conn.connection_id()));
        assert!(registry.connections(&UserId::from("u1")).is_none());
        assert_eq!(registry.user_count(), 0);
    }

    #[test]
    fn counts_span_users() {
        let registry = ConnectionRegistry::new();
        let (a, _ra) = user_conn("u1");
        let (b, _rb) = user_conn("u2");
        let (c, _rc) = machine_conn("u2", "m1");
        let _ = registry.add_connection(a);
        let _ = registry.add_connection(b);
        let _ = registry.add_connection(c);
        assert_eq!(registry.connection_count(), 3);
        assert_eq!(registry.user_count(), 2);
    }

    #[test]
    fn scope_accessors() {
        let (s, _rs) = session_conn("u1", "s1");
        assert_eq!(s.scope(), ClientScope::SessionScoped);
        assert_eq!(s.session_id().unwrap().as_str(), "s1");
        assert!(s.machine_id().is_none());

        let (m, _rm) = machine_conn("u1", "m1");
        assert_eq!(m.scope(), ClientScope::MachineScoped);
        assert_eq!(m.machine_id().unwrap().as_str(), "m1");
        assert_eq!(m.user_id().as_str(), "u1");
    }
}

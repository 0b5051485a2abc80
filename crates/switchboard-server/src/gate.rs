//! Connection lifecycle gate: admission and release.
//!
//! A socket moves `handshaking → authenticating → active → closed`.
//! Validation and authentication never touch shared state; only a fully
//! admitted connection is registered, and release undoes admission exactly
//! once no matter how many times it is invoked.

use std::fmt;
use std::sync::Arc;

use metrics::{counter, gauge, histogram};
use switchboard_auth::{AuthError, TokenVerifier};
use switchboard_core::{
    ClientFrame, ClientScope, EphemeralPayload, MachineId, ServerFrame, SessionId, codes,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::broadcast::{EphemeralBroadcaster, EphemeralEvent, RecipientFilter};
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL, WS_HANDSHAKE_REJECTIONS_TOTAL,
};
use crate::registry::{ConnectionRegistry, ScopedConnection};
use crate::rpc::RpcRouter;
use crate::websocket::connection::ClientChannel;

/// Where a socket is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateState {
    /// Waiting for the `auth` frame.
    Handshaking,
    /// Token handed to the verifier.
    Authenticating,
    /// Registered and routable.
    Active,
    /// Released.
    Closed,
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Handshaking => "handshaking",
            Self::Authenticating => "authenticating",
            Self::Active => "active",
            Self::Closed => "closed",
        })
    }
}

/// Why admission was refused. Always fatal to the attempt.
#[derive(Debug, Error)]
pub enum GateError {
    /// No credential token, or no `auth` frame at all.
    #[error("authentication token is required")]
    MissingToken,
    /// The first frame was something other than `auth`.
    #[error("expected an auth frame, got '{0}'")]
    UnexpectedFrame(String),
    /// No `auth` frame arrived before the deadline.
    #[error("handshake timed out")]
    HandshakeTimeout,
    /// A session-scoped client did not name its session.
    #[error("session-scoped clients must provide a session id")]
    MissingSessionId,
    /// A machine-scoped client did not name its machine.
    #[error("machine-scoped clients must provide a machine id")]
    MissingMachineId,
    /// The verifier refused the token or could not be reached.
    #[error("invalid authentication token")]
    InvalidToken(#[source] AuthError),
}

impl GateError {
    /// Wire error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingToken | Self::UnexpectedFrame(_) | Self::HandshakeTimeout => {
                codes::MISSING_TOKEN
            }
            Self::MissingSessionId => codes::MISSING_SESSION_ID,
            Self::MissingMachineId => codes::MISSING_MACHINE_ID,
            Self::InvalidToken(_) => codes::INVALID_TOKEN,
        }
    }

    /// The `error` frame sent before closing.
    pub fn to_frame(&self) -> ServerFrame {
        ServerFrame::error(self.code(), self.to_string())
    }
}

/// Handshake parameters as sent by the client.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Handshake {
    /// Credential token.
    pub token: Option<String>,
    /// Declared scope.
    pub client_type: ClientScope,
    /// Session for session-scoped clients.
    pub session_id: Option<SessionId>,
    /// Machine for machine-scoped clients.
    pub machine_id: Option<MachineId>,
}

impl Handshake {
    /// Extract handshake parameters from the first frame.
    pub fn from_frame(frame: ClientFrame) -> Result<Self, GateError> {
        match frame {
            ClientFrame::Auth {
                token,
                client_type,
                session_id,
                machine_id,
            } => Ok(Self {
                token,
                client_type: client_type.unwrap_or_default(),
                session_id,
                machine_id,
            }),
            other => Err(GateError::UnexpectedFrame(other.kind().to_owned())),
        }
    }

    /// Check required fields for the declared scope.
    pub fn validate(self) -> Result<ValidatedHandshake, GateError> {
        let token = self
            .token
            .filter(|t| !t.is_empty())
            .ok_or(GateError::MissingToken)?;
        let binding = match self.client_type {
            ClientScope::UserScoped => ScopeBinding::User,
            ClientScope::SessionScoped => ScopeBinding::Session(
                self.session_id
                    .filter(|s| !s.is_empty())
                    .ok_or(GateError::MissingSessionId)?,
            ),
            ClientScope::MachineScoped => ScopeBinding::Machine(
                self.machine_id
                    .filter(|m| !m.is_empty())
                    .ok_or(GateError::MissingMachineId)?,
            ),
        };
        Ok(ValidatedHandshake { token, binding })
    }
}

/// Scope identifiers required by the declared scope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScopeBinding {
    /// No extra identifier.
    User,
    /// Bound session.
    Session(SessionId),
    /// Daemon's machine.
    Machine(MachineId),
}

/// A handshake whose fields are present and consistent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedHandshake {
    /// Non-empty credential token.
    pub token: String,
    /// Scope and its identifier.
    pub binding: ScopeBinding,
}

/// Admits and releases connections.
pub struct ConnectionGate {
    registry: Arc<ConnectionRegistry>,
    router: Arc<RpcRouter>,
    broadcaster: Arc<EphemeralBroadcaster>,
    verifier: Arc<dyn TokenVerifier>,
}

impl ConnectionGate {
    /// Create a gate over the shared routing structures.
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        router: Arc<RpcRouter>,
        broadcaster: Arc<EphemeralBroadcaster>,
        verifier: Arc<dyn TokenVerifier>,
    ) -> Self {
        Self {
            registry,
            router,
            broadcaster,
            verifier,
        }
    }

    /// Validate, authenticate and register a connection.
    ///
    /// On success `auth-ok` is the first frame queued on `channel`, and a
    /// machine-scoped connection announces itself to the user's apps. On
    /// failure nothing shared has changed; the caller sends
    /// [`GateError::to_frame`] and closes.
    pub async fn admit(
        &self,
        handshake: Handshake,
        channel: Arc<ClientChannel>,
    ) -> Result<ScopedConnection, GateError> {
        let validated = handshake.validate().inspect_err(record_rejection)?;

        debug!(conn_id = %channel.id, state = %GateState::Authenticating, "verifying token");
        let identity = self
            .verifier
            .verify(&validated.token)
            .await
            .map_err(|error| {
                if error.is_transport() {
                    warn!(conn_id = %channel.id, %error, "token verifier unavailable");
                } else {
                    debug!(conn_id = %channel.id, %error, "token rejected");
                }
                GateError::InvalidToken(error)
            })
            .inspect_err(record_rejection)?;

        let user_id = identity.user_id;
        let connection = match validated.binding {
            ScopeBinding::User => ScopedConnection::User { channel, user_id },
            ScopeBinding::Session(session_id) => ScopedConnection::Session {
                channel,
                user_id,
                session_id,
            },
            ScopeBinding::Machine(machine_id) => ScopedConnection::Machine {
                channel,
                user_id,
                machine_id,
            },
        };

        let scope = connection.scope();
        let _ = connection.channel().send_frame(&ServerFrame::AuthOk {
            connection_id: connection.connection_id().clone(),
            user_id: connection.user_id().clone(),
            client_type: scope,
        });
        if !self.registry.add_connection(connection.clone()) {
            debug!(conn_id = %connection.connection_id(), "connection already registered");
            return Ok(connection);
        }

        counter!(WS_CONNECTIONS_TOTAL, "scope" => scope.as_str()).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE, "scope" => scope.as_str()).increment(1.0);
        info!(
            conn_id = %connection.connection_id(),
            user_id = %connection.user_id(),
            %scope,
            state = %GateState::Active,
            "connection admitted"
        );

        if let ScopedConnection::Machine { user_id, machine_id, .. } = &connection {
            let _ = self.broadcaster.emit(&EphemeralEvent::new(
                user_id.clone(),
                EphemeralPayload::machine_activity(machine_id.clone(), true),
                RecipientFilter::UserScopedOnly,
            ));
        }
        Ok(connection)
    }

    /// Undo admission.
    ///
    /// Only the first call for a connection has any effect; later calls
    /// return `false` without emitting anything.
    pub fn release(&self, connection: &ScopedConnection) -> bool {
        let user_id = connection.user_id();
        let conn_id = connection.connection_id();
        if !self.registry.remove_connection(user_id, conn_id) {
            return false;
        }
        let _ = self.router.release(user_id, conn_id);

        let scope = connection.scope();
        counter!(WS_DISCONNECTIONS_TOTAL, "scope" => scope.as_str()).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE, "scope" => scope.as_str()).decrement(1.0);
        histogram!(WS_CONNECTION_DURATION_SECONDS, "scope" => scope.as_str())
            .record(connection.channel().age().as_secs_f64());

        if let ScopedConnection::Machine { machine_id, .. } = connection {
            let _ = self.broadcaster.emit(&EphemeralEvent::new(
                user_id.clone(),
                EphemeralPayload::machine_activity(machine_id.clone(), false),
                RecipientFilter::UserScopedOnly,
            ));
        }
        info!(%conn_id, %user_id, %scope, state = %GateState::Closed, "connection released");
        true
    }
}

/// Count a refused handshake.
pub(crate) fn record_rejection(error: &GateError) {
    counter!(WS_HANDSHAKE_REJECTIONS_TOTAL, "code" => error.code()).increment(1);
}

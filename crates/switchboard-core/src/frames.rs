//! JSON frames exchanged over the primary WebSocket transport.
//!
//! Every frame is an object tagged by `type` with camelCase fields.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codes;
use crate::ephemeral::EphemeralPayload;
use crate::ids::{ConnectionId, MachineId, RequestId, SessionId, UserId};
use crate::scope::ClientScope;

/// Error body carried in `error` and `rpc-result` frames.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable code (see [`crate::codes`]).
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl ErrorBody {
    /// Build an error body.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Frames sent by a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientFrame {
    /// Handshake, required as the first frame on a new connection.
    Auth {
        /// Opaque credential token.
        #[serde(default)]
        token: Option<String>,
        /// Declared scope; absent means user-scoped.
        #[serde(default)]
        client_type: Option<ClientScope>,
        /// Required for session-scoped clients.
        #[serde(default)]
        session_id: Option<SessionId>,
        /// Required for machine-scoped clients.
        #[serde(default)]
        machine_id: Option<MachineId>,
    },
    /// Start serving `method` for this user.
    RpcRegister {
        /// Method name.
        method: String,
    },
    /// Stop serving `method`.
    RpcUnregister {
        /// Method name.
        method: String,
    },
    /// Invoke a method served by another connection of this user.
    RpcCall {
        /// Caller-chosen correlation id, echoed in the result.
        request_id: RequestId,
        /// Method name.
        method: String,
        /// Opaque parameters.
        #[serde(default)]
        params: Value,
    },
    /// Answer to a previously forwarded `rpc-request`.
    RpcResponse {
        /// Correlation id from the `rpc-request`.
        request_id: RequestId,
        /// Success value.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        /// Failure value.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorBody>,
    },
    /// Relay a transient payload to the user's other connections.
    Ephemeral {
        /// Payload, relayed verbatim.
        payload: Value,
    },
    /// Liveness report from a session agent.
    SessionAlive {
        /// Must match the connection's session when present.
        #[serde(default)]
        session_id: Option<SessionId>,
        /// Whether the agent is mid-turn.
        #[serde(default)]
        thinking: bool,
    },
    /// Application-level ping.
    Ping,
}

impl ClientFrame {
    /// Parse a text frame.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Frame type label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::RpcRegister { .. } => "rpc-register",
            Self::RpcUnregister { .. } => "rpc-unregister",
            Self::RpcCall { .. } => "rpc-call",
            Self::RpcResponse { .. } => "rpc-response",
            Self::Ephemeral { .. } => "ephemeral",
            Self::SessionAlive { .. } => "session-alive",
            Self::Ping => "ping",
        }
    }
}

/// Frames sent by the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerFrame {
    /// Handshake accepted.
    AuthOk {
        /// Identity minted for this channel.
        connection_id: ConnectionId,
        /// Authenticated principal.
        user_id: UserId,
        /// Recorded scope.
        client_type: ClientScope,
    },
    /// Fatal or per-frame error.
    Error {
        /// Machine-readable code.
        code: String,
        /// Human-readable message.
        message: String,
    },
    /// Registration acknowledged.
    RpcRegistered {
        /// Method name.
        method: String,
    },
    /// Unregistration acknowledged.
    RpcUnregistered {
        /// Method name.
        method: String,
    },
    /// A call forwarded to the serving connection.
    RpcRequest {
        /// Correlation id to echo in `rpc-response`.
        request_id: RequestId,
        /// Method name.
        method: String,
        /// Opaque parameters.
        params: Value,
    },
    /// Outcome of a call, delivered to the caller.
    RpcResult {
        /// The caller's own correlation id.
        request_id: RequestId,
        /// Success value.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        /// Failure value.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorBody>,
    },
    /// Transient event.
    Ephemeral {
        /// Event payload.
        payload: EphemeralPayload,
    },
    /// Reply to `ping`.
    Pong,
}

impl ServerFrame {
    /// `error` frame from a code and message.
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    /// `error` frame for an unparseable client frame.
    pub fn invalid_frame(detail: impl std::fmt::Display) -> Self {
        Self::error(codes::INVALID_FRAME, format!("invalid frame: {detail}"))
    }

    /// Failed `rpc-result` for the caller's request.
    pub fn rpc_failure(request_id: RequestId, error: ErrorBody) -> Self {
        Self::RpcResult {
            request_id,
            result: None,
            error: Some(error),
        }
    }

    /// Serialize to a JSON text frame.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_auth_full() {
        let frame = ClientFrame::parse(
            r#"{"type":"auth","token":"t","clientType":"session-scoped","sessionId":"s1"}"#,
        )
        .unwrap();
        let ClientFrame::Auth {
            token,
            client_type,
            session_id,
            machine_id,
        } = frame
        else {
            panic!("expected auth");
        };
        assert_eq!(token.as_deref(), Some("t"));
        assert_eq!(client_type, Some(ClientScope::SessionScoped));
        assert_eq!(session_id.unwrap().as_str(), "s1");
        assert!(machine_id.is_none());
    }

    #[test]
    fn parse_auth_minimal() {
        let frame = ClientFrame::parse(r#"{"type":"auth"}"#).unwrap();
        assert!(matches!(
            frame,
            ClientFrame::Auth {
                token: None,
                client_type: None,
                ..
            }
        ));
    }

    #[test]
    fn parse_rpc_call_defaults_params() {
        let frame = ClientFrame::parse(r#"{"type":"rpc-call","requestId":"r1","method":"m"}"#)
            .unwrap();
        let ClientFrame::RpcCall { params, .. } = frame else {
            panic!("expected rpc-call");
        };
        assert_eq!(params, Value::Null);
    }

    #[test]
    fn parse_rpc_response_with_error() {
        let frame = ClientFrame::parse(
            r#"{"type":"rpc-response","requestId":"r1","error":{"code":"boom","message":"bad"}}"#,
        )
        .unwrap();
        let ClientFrame::RpcResponse { result, error, .. } = frame else {
            panic!("expected rpc-response");
        };
        assert!(result.is_none());
        assert_eq!(error.unwrap().code, "boom");
    }

    #[test]
    fn parse_ping_and_session_alive() {
        assert_eq!(ClientFrame::parse(r#"{"type":"ping"}"#).unwrap(), ClientFrame::Ping);
        let frame = ClientFrame::parse(r#"{"type":"session-alive","thinking":true}"#).unwrap();
        assert!(matches!(
            frame,
            ClientFrame::SessionAlive {
                session_id: None,
                thinking: true
            }
        ));
    }

    #[test]
    fn unknown_type_rejected() {
        assert!(ClientFrame::parse(r#"{"type":"teleport"}"#).is_err());
        assert!(ClientFrame::parse("not json").is_err());
    }

    #[test]
    fn auth_ok_wire_shape() {
        let frame = ServerFrame::AuthOk {
            connection_id: ConnectionId::from("c1"),
            user_id: UserId::from("u1"),
            client_type: ClientScope::MachineScoped,
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            value,
            json!({"type": "auth-ok", "connectionId": "c1", "userId": "u1", "clientType": "machine-scoped"})
        );
    }

    #[test]
    fn rpc_result_omits_absent_fields() {
        let frame = ServerFrame::RpcResult {
            request_id: RequestId::from("r1"),
            result: Some(json!({"ok": 1})),
            error: None,
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["requestId"], "r1");
        assert_eq!(value["result"]["ok"], 1);
        assert!(value.get("error").is_none());
    }

    #[test]
    fn rpc_failure_carries_code() {
        let frame = ServerFrame::rpc_failure(
            RequestId::from("r9"),
            ErrorBody::new(codes::NO_LISTENER, "nobody serves m"),
        );
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "rpc-result");
        assert_eq!(value["error"]["code"], "no-listener");
        assert!(value.get("result").is_none());
    }

    #[test]
    fn invalid_frame_error() {
        let ServerFrame::Error { code, message } = ServerFrame::invalid_frame("eof") else {
            panic!("expected error");
        };
        assert_eq!(code, codes::INVALID_FRAME);
        assert!(message.contains("eof"));
    }

    #[test]
    fn pong_serializes_tag_only() {
        assert_eq!(ServerFrame::Pong.to_text().unwrap(), r#"{"type":"pong"}"#);
    }

    #[test]
    fn kind_labels() {
        assert_eq!(ClientFrame::Ping.kind(), "ping");
        assert_eq!(
            ClientFrame::RpcRegister { method: "m".into() }.kind(),
            "rpc-register"
        );
    }
}

//! Dispatch of frames received on an admitted connection.

use std::sync::Arc;

use switchboard_core::{ClientFrame, EphemeralPayload, ServerFrame, codes};
use tracing::{debug, warn};

use crate::broadcast::{EphemeralBroadcaster, EphemeralEvent, RecipientFilter};
use crate::registry::ScopedConnection;
use crate::rpc::{RpcOutcome, RpcRouter};

/// Shared routing structures a session dispatches into.
#[derive(Clone)]
pub struct FrameContext {
    /// Remote-call routing.
    pub router: Arc<RpcRouter>,
    /// Ephemeral fan-out.
    pub broadcaster: Arc<EphemeralBroadcaster>,
}

/// Handle one raw text frame from `connection`.
///
/// Replies (acknowledgements, pongs, per-frame errors) are queued on the
/// connection's own channel. Nothing here closes the connection.
pub fn handle_text(ctx: &FrameContext, connection: &ScopedConnection, text: &str) {
    match ClientFrame::parse(text) {
        Ok(frame) => handle_frame(ctx, connection, frame),
        Err(error) => {
            debug!(conn_id = %connection.connection_id(), %error, "unparseable frame");
            let _ = connection
                .channel()
                .send_frame(&ServerFrame::invalid_frame(error));
        }
    }
}

/// Handle one parsed frame from `connection`.
pub fn handle_frame(ctx: &FrameContext, connection: &ScopedConnection, frame: ClientFrame) {
    let channel = connection.channel();
    let user_id = connection.user_id();
    let kind = frame.kind();

    match frame {
        ClientFrame::Auth { .. } => {
            let _ = channel.send_frame(&ServerFrame::error(
                codes::INVALID_FRAME,
                "connection is already authenticated",
            ));
        }
        ClientFrame::RpcRegister { method } => {
            let _ = ctx.router.register_method(user_id, &method, Arc::clone(channel));
            let _ = channel.send_frame(&ServerFrame::RpcRegistered { method });
        }
        ClientFrame::RpcUnregister { method } => {
            let _ = ctx.router.unregister_method(user_id, &method, &channel.id);
            let _ = channel.send_frame(&ServerFrame::RpcUnregistered { method });
        }
        ClientFrame::RpcCall {
            request_id,
            method,
            params,
        } => {
            let _ = ctx
                .router
                .route_request(user_id, &method, request_id, params, channel);
        }
        ClientFrame::RpcResponse {
            request_id,
            result,
            error,
        } => {
            let _ = ctx.router.route_response(
                user_id,
                &request_id,
                RpcOutcome { result, error },
                &channel.id,
            );
        }
        ClientFrame::Ephemeral { payload } => {
            if !payload.is_object() {
                let _ = channel.send_frame(&ServerFrame::invalid_frame(
                    "ephemeral payload must be an object",
                ));
                return;
            }
            let _ = ctx.broadcaster.emit(&EphemeralEvent::new(
                user_id.clone(),
                EphemeralPayload::Custom(payload),
                RecipientFilter::AllExcept(channel.id.clone()),
            ));
        }
        ClientFrame::SessionAlive {
            session_id,
            thinking,
        } => {
            let Some(bound) = connection.session_id() else {
                warn!(conn_id = %channel.id, scope = %connection.scope(), "session-alive from non-session client");
                let _ = channel.send_frame(&ServerFrame::error(
                    codes::FORBIDDEN_SCOPE,
                    "session-alive is only accepted from session-scoped clients",
                ));
                return;
            };
            if session_id.as_ref().is_some_and(|s| s != bound) {
                let _ = channel.send_frame(&ServerFrame::error(
                    codes::FORBIDDEN_SCOPE,
                    "session-alive names a session this connection is not bound to",
                ));
                return;
            }
            let _ = ctx.broadcaster.emit(&EphemeralEvent::new(
                user_id.clone(),
                EphemeralPayload::session_activity(bound.clone(), true, thinking),
                RecipientFilter::UserScopedOnly,
            ));
        }
        ClientFrame::Ping => {
            let _ = channel.send_frame(&ServerFrame::Pong);
        }
    }
    debug!(conn_id = %channel.id, frame = kind, "frame handled");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ConnectionRegistry;
    use crate::registry::tests::{machine_conn, session_conn, user_conn};
    use serde_json::Value;
    use tokio::sync::mpsc;

    fn setup() -> (Arc<ConnectionRegistry>, FrameContext) {
        let registry = Arc::new(ConnectionRegistry::new());
        let ctx = FrameContext {
            router: Arc::new(RpcRouter::new()),
            broadcaster: Arc::new(EphemeralBroadcaster::new(Arc::clone(&registry))),
        };
        (registry, ctx)
    }

    fn frames(rx: &mut mpsc::Receiver<Arc<String>>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(serde_json::from_str(&msg).unwrap());
        }
        out
    }

    #[test]
    fn ping_gets_pong() {
        let (_registry, ctx) = setup();
        let (conn, mut rx) = user_conn("u1");
        handle_text(&ctx, &conn, r#"{"type":"ping"}"#);
        assert_eq!(frames(&mut rx)[0]["type"], "pong");
    }

    #[test]
    fn garbage_gets_invalid_frame() {
        let (_registry, ctx) = setup();
        let (conn, mut rx) = user_conn("u1");
        handle_text(&ctx, &conn, "{{{");
        let got = frames(&mut rx);
        assert_eq!(got[0]["type"], "error");
        assert_eq!(got[0]["code"], "invalid-frame");
    }

    #[test]
    fn second_auth_is_invalid() {
        let (_registry, ctx) = setup();
        let (conn, mut rx) = user_conn("u1");
        handle_text(&ctx, &conn, r#"{"type":"auth","token":"t"}"#);
        assert_eq!(frames(&mut rx)[0]["code"], "invalid-frame");
    }

    #[test]
    fn register_call_respond_through_frames() {
        let (_registry, ctx) = setup();
        let (server, mut server_rx) = machine_conn("u1", "m1");
        let (caller, mut caller_rx) = user_conn("u1");

        handle_text(&ctx, &server, r#"{"type":"rpc-register","method":"spawn"}"#);
        assert_eq!(frames(&mut server_rx)[0]["type"], "rpc-registered");

        handle_text(
            &ctx,
            &caller,
            r#"{"type":"rpc-call","requestId":"c-1","method":"spawn","params":{"dir":"/tmp"}}"#,
        );
        let request = frames(&mut server_rx).remove(0);
        assert_eq!(request["type"], "rpc-request");
        assert_eq!(request["params"]["dir"], "/tmp");

        let response = serde_json::json!({
            "type": "rpc-response",
            "requestId": request["requestId"],
            "result": {"pid": 42}
        });
        handle_text(&ctx, &server, &response.to_string());
        let result = frames(&mut caller_rx).remove(0);
        assert_eq!(result["requestId"], "c-1");
        assert_eq!(result["result"]["pid"], 42);
    }

    #[test]
    fn unregister_acknowledged() {
        let (_registry, ctx) = setup();
        let (server, mut rx) = user_conn("u1");
        handle_text(&ctx, &server, r#"{"type":"rpc-register","method":"m"}"#);
        handle_text(&ctx, &server, r#"{"type":"rpc-unregister","method":"m"}"#);
        let got = frames(&mut rx);
        assert_eq!(got[1]["type"], "rpc-unregistered");
        assert!(ctx.router.listener(server.user_id(), "m").is_none());
    }

    #[test]
    fn ephemeral_relay_skips_sender() {
        let (registry, ctx) = setup();
        let (sender, mut sender_rx) = user_conn("u1");
        let (peer, mut peer_rx) = user_conn("u1");
        let _ = registry.add_connection(sender.clone());
        let _ = registry.add_connection(peer);

        handle_text(
            &ctx,
            &sender,
            r#"{"type":"ephemeral","payload":{"type":"typing","on":true}}"#,
        );
        assert!(frames(&mut sender_rx).is_empty());
        let got = frames(&mut peer_rx);
        assert_eq!(got[0]["payload"], serde_json::json!({"type": "typing", "on": true}));
    }

    #[test]
    fn ephemeral_non_object_rejected() {
        let (_registry, ctx) = setup();
        let (sender, mut rx) = user_conn("u1");
        handle_text(&ctx, &sender, r#"{"type":"ephemeral","payload":5}"#);
        assert_eq!(frames(&mut rx)[0]["code"], "invalid-frame");
    }

    #[test]
    fn session_alive_reaches_apps() {
        let (registry, ctx) = setup();
        let (agent, _agent_rx) = session_conn("u1", "s1");
        let (app, mut app_rx) = user_conn("u1");
        let _ = registry.add_connection(agent.clone());
        let _ = registry.add_connection(app);

        handle_text(&ctx, &agent, r#"{"type":"session-alive","thinking":true}"#);
        let got = frames(&mut app_rx);
        assert_eq!(got[0]["payload"]["type"], "session-activity");
        assert_eq!(got[0]["payload"]["sessionId"], "s1");
        assert_eq!(got[0]["payload"]["thinking"], true);
    }

    #[test]
    fn session_alive_from_app_is_forbidden() {
        let (_registry, ctx) = setup();
        let (app, mut rx) = user_conn("u1");
        handle_text(&ctx, &app, r#"{"type":"session-alive"}"#);
        assert_eq!(frames(&mut rx)[0]["code"], "forbidden-scope");
    }

    #[test]
    fn session_alive_for_other_session_is_forbidden() {
        let (_registry, ctx) = setup();
        let (agent, mut rx) = session_conn("u1", "s1");
        handle_text(&ctx, &agent, r#"{"type":"session-alive","sessionId":"s2"}"#);
        assert_eq!(frames(&mut rx)[0]["code"], "forbidden-scope");
    }
}

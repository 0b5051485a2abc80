//! Request/response routing between connections of the same user.
//!
//! Each user has a table of `method → serving channel`; the most recent
//! registration wins. A call is forwarded under a server-minted forward id
//! so callers that happen to reuse a request id never collide; the caller
//! always sees its own id on the result. There are no timeouts here: a call
//! stays pending until answered or until either end disconnects.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::{counter, gauge};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use switchboard_core::{ConnectionId, ErrorBody, RequestId, ServerFrame, UserId, codes};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::metrics::{RPC_CALLS_TOTAL, RPC_ERRORS_TOTAL, RPC_PENDING};
use crate::websocket::connection::{ClientChannel, SendFailure};

/// Why a call could not be dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    /// Nobody serves the method for this user.
    #[error("no listener registered for method '{method}'")]
    NoListener {
        /// Requested method.
        method: String,
    },
    /// The serving channel is gone or not accepting requests.
    #[error("listener for method '{method}' disconnected")]
    ListenerDisconnected {
        /// Requested method.
        method: String,
    },
    /// The serving channel is connected but cannot take more frames.
    #[error("listener for method '{method}' is not keeping up")]
    ListenerBusy {
        /// Requested method.
        method: String,
    },
}

impl RouteError {
    /// Wire error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoListener { .. } => codes::NO_LISTENER,
            Self::ListenerDisconnected { .. } => codes::LISTENER_DISCONNECTED,
            Self::ListenerBusy { .. } => codes::LISTENER_BUSY,
        }
    }

    /// Error body for the caller's `rpc-result`.
    pub fn to_error_body(&self) -> ErrorBody {
        ErrorBody::new(self.code(), self.to_string())
    }
}

/// What a serving connection answered.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RpcOutcome {
    /// Success value.
    pub result: Option<Value>,
    /// Failure value.
    pub error: Option<ErrorBody>,
}

/// Counts of what [`RpcRouter::release`] cleaned up.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReleaseSummary {
    /// Methods the channel was still serving.
    pub methods_removed: usize,
    /// Calls the channel was serving, now failed back to their callers.
    pub calls_failed: usize,
    /// Calls the channel had made, now discarded.
    pub calls_dropped: usize,
}

#[derive(Debug)]
struct PendingCall {
    user_id: UserId,
    caller: Arc<ClientChannel>,
    caller_request_id: RequestId,
    listener: ConnectionId,
    method: String,
}

impl PendingCall {
    fn fail(self, error: &RouteError) {
        let frame = ServerFrame::rpc_failure(self.caller_request_id, error.to_error_body());
        if !self.caller.send_frame(&frame) {
            debug!(conn_id = %self.caller.id, "caller gone before failure delivery");
        }
    }
}

type MethodTable = HashMap<String, Arc<ClientChannel>>;

/// Per-user method table plus the pending-call correlation table.
#[derive(Debug, Default)]
pub struct RpcRouter {
    listeners: RwLock<HashMap<UserId, MethodTable>>,
    pending: Mutex<HashMap<RequestId, PendingCall>>,
}

impl RpcRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `channel` the server of `method` for `user_id`.
    ///
    /// Overwrites any previous registration. Returns the displaced channel's
    /// id when a different channel was serving the method.
    pub fn register_method(
        &self,
        user_id: &UserId,
        method: &str,
        channel: Arc<ClientChannel>,
    ) -> Option<ConnectionId> {
        let new_id = channel.id.clone();
        let previous = self
            .listeners
            .write()
            .entry(user_id.clone())
            .or_default()
            .insert(method.to_owned(), channel);

        let displaced = previous.map(|p| p.id.clone()).filter(|id| *id != new_id);
        match &displaced {
            Some(old) => info!(%user_id, method, conn_id = %new_id, displaced = %old, "rpc method re-registered"),
            None => debug!(%user_id, method, conn_id = %new_id, "rpc method registered"),
        }
        displaced
    }

    /// Stop `connection_id` serving `method`.
    ///
    /// A no-op returning `false` if another channel has since taken over.
    pub fn unregister_method(
        &self,
        user_id: &UserId,
        method: &str,
        connection_id: &ConnectionId,
    ) -> bool {
        let mut listeners = self.listeners.write();
        let Some(table) = listeners.get_mut(user_id) else {
            return false;
        };
        let occupant = table.get(method).is_some_and(|c| c.id == *connection_id);
        if occupant {
            let _ = table.remove(method);
            if table.is_empty() {
                let _ = listeners.remove(user_id);
            }
            debug!(%user_id, method, conn_id = %connection_id, "rpc method unregistered");
        }
        occupant
    }

    /// Current server of `method` for `user_id`.
    pub fn listener(&self, user_id: &UserId, method: &str) -> Option<ConnectionId> {
        self.listeners
            .read()
            .get(user_id)
            .and_then(|table| table.get(method))
            .map(|c| c.id.clone())
    }

    /// Forward a call from `caller` to the current server of `method`.
    ///
    /// On success the listener receives `rpc-request` under a fresh forward
    /// id, which is returned. On failure the caller immediately receives a
    /// failed `rpc-result` carrying its own `request_id`, and nothing is
    /// forwarded.
    pub fn route_request(
        &self,
        user_id: &UserId,
        method: &str,
        request_id: RequestId,
        params: Value,
        caller: &Arc<ClientChannel>,
    ) -> Result<RequestId, RouteError> {
        counter!(RPC_CALLS_TOTAL).increment(1);

        let forward_id = RequestId::new();
        // The listeners guard is held until the call is recorded, so a
        // concurrent release of the listener either runs first (no listener)
        // or finds this call in `pending` and fails it.
        let listener = {
            let listeners = self.listeners.read();
            let Some(listener) = listeners
                .get(user_id)
                .and_then(|table| table.get(method))
                .cloned()
            else {
                drop(listeners);
                return Err(Self::reject(caller, request_id, RouteError::NoListener {
                    method: method.to_owned(),
                }));
            };
            if listener.is_closed() {
                drop(listeners);
                return Err(Self::reject(caller, request_id, RouteError::ListenerDisconnected {
                    method: method.to_owned(),
                }));
            }
            let _ = self.pending.lock().insert(
                forward_id.clone(),
                PendingCall {
                    user_id: user_id.clone(),
                    caller: Arc::clone(caller),
                    caller_request_id: request_id.clone(),
                    listener: listener.id.clone(),
                    method: method.to_owned(),
                },
            );
            listener
        };

        let frame = ServerFrame::RpcRequest {
            request_id: forward_id.clone(),
            method: method.to_owned(),
            params,
        };
        if let Err(failure) = listener.try_send_frame(&frame) {
            let error = match failure {
                SendFailure::Full => {
                    warn!(%user_id, method, listener = %listener.id, "listener queue full");
                    RouteError::ListenerBusy {
                        method: method.to_owned(),
                    }
                }
                SendFailure::Closed | SendFailure::Serialize => RouteError::ListenerDisconnected {
                    method: method.to_owned(),
                },
            };
            // A release racing this send may already have failed the call.
            let removed = self.pending.lock().remove(&forward_id).is_some();
            self.update_pending_gauge();
            if removed {
                return Err(Self::reject(caller, request_id, error));
            }
            return Err(error);
        }

        self.update_pending_gauge();
        debug!(
            %user_id,
            method,
            caller = %caller.id,
            listener = %listener.id,
            %request_id,
            %forward_id,
            "rpc call forwarded"
        );
        Ok(forward_id)
    }

    fn reject(
        caller: &ClientChannel,
        request_id: RequestId,
        error: RouteError,
    ) -> RouteError {
        counter!(RPC_ERRORS_TOTAL, "code" => error.code()).increment(1);
        warn!(conn_id = %caller.id, %request_id, code = error.code(), "rpc call not dispatched: {error}");
        let frame = ServerFrame::rpc_failure(request_id, error.to_error_body());
        let _ = caller.send_frame(&frame);
        error
    }

    /// Deliver a listener's answer back to the original caller.
    ///
    /// Only the recorded listener, acting as the same user, can resolve a
    /// call. Anything else (unknown or already-resolved ids, a different
    /// responder, a different user) is dropped and the call stays as it was.
    /// Returns whether the answer was accepted.
    pub fn route_response(
        &self,
        user_id: &UserId,
        forward_id: &RequestId,
        outcome: RpcOutcome,
        responder: &ConnectionId,
    ) -> bool {
        let call = {
            let mut pending = self.pending.lock();
            match pending.get(forward_id) {
                Some(call) if call.user_id == *user_id && call.listener == *responder => {
                    pending.remove(forward_id)
                }
                Some(_) => {
                    warn!(%user_id, %forward_id, %responder, "rpc response from a connection that does not own the call, dropped");
                    return false;
                }
                None => {
                    debug!(%user_id, %forward_id, "rpc response for unknown or resolved call, dropped");
                    return false;
                }
            }
        };
        let Some(call) = call else {
            return false;
        };
        self.update_pending_gauge();

        let result = match (&outcome.result, &outcome.error) {
            (None, None) => Some(Value::Null),
            _ => outcome.result,
        };
        let frame = ServerFrame::RpcResult {
            request_id: call.caller_request_id,
            result,
            error: outcome.error,
        };
        if !call.caller.send_frame(&frame) {
            debug!(conn_id = %call.caller.id, method = call.method, "caller gone before result delivery");
        }
        true
    }

    /// Forget everything tied to a departing channel.
    ///
    /// - method registrations still pointing at it are removed
    /// - calls it was serving fail back to their callers with
    ///   `listener-disconnected`, once each
    /// - calls it had made are discarded
    pub fn release(&self, user_id: &UserId, connection_id: &ConnectionId) -> ReleaseSummary {
        let mut summary = ReleaseSummary::default();

        {
            let mut listeners = self.listeners.write();
            if let Some(table) = listeners.get_mut(user_id) {
                let before = table.len();
                table.retain(|_, channel| channel.id != *connection_id);
                summary.methods_removed = before - table.len();
                if table.is_empty() {
                    let _ = listeners.remove(user_id);
                }
            }
        }

        let mut orphaned = Vec::new();
        {
            let mut pending = self.pending.lock();
            let ids: Vec<RequestId> = pending
                .iter()
                .filter(|(_, call)| {
                    call.user_id == *user_id
                        && (call.listener == *connection_id || call.caller.id == *connection_id)
                })
                .map(|(id, _)| id.clone())
                .collect();
            for id in ids {
                if let Some(call) = pending.remove(&id) {
                    if call.listener == *connection_id && call.caller.id != *connection_id {
                        orphaned.push(call);
                    } else {
                        summary.calls_dropped += 1;
                    }
                }
            }
        }

        summary.calls_failed = orphaned.len();
        for call in orphaned {
            let error = RouteError::ListenerDisconnected {
                method: call.method.clone(),
            };
            counter!(RPC_ERRORS_TOTAL, "code" => error.code()).increment(1);
            call.fail(&error);
        }

        self.update_pending_gauge();
        if summary != ReleaseSummary::default() {
            info!(
                %user_id,
                conn_id = %connection_id,
                methods_removed = summary.methods_removed,
                calls_failed = summary.calls_failed,
                calls_dropped = summary.calls_dropped,
                "rpc state released"
            );
        }
        summary
    }

    /// Calls awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    #[allow(clippy::cast_precision_loss)]
    fn update_pending_gauge(&self) {
        gauge!(RPC_PENDING).set(self.pending_count() as f64);
    }
}

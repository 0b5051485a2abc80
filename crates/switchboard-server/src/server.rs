//! `SwitchboardServer`: axum routes plus the sniffing accept loop.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use switchboard_auth::TokenVerifier;
use switchboard_core::ConnectionId;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::bridge::UpgradeBridge;
use crate::broadcast::EphemeralBroadcaster;
use crate::config::ServerConfig;
use crate::gate::ConnectionGate;
use crate::health::{self, HealthResponse};
use crate::listener::{Dispatcher, accept_loop};
use crate::notify::notify_handler;
use crate::registry::ConnectionRegistry;
use crate::rpc::RpcRouter;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::handler::FrameContext;
use crate::websocket::session::run_ws_session;

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live connections per user.
    pub registry: Arc<ConnectionRegistry>,
    /// Remote-call routing.
    pub rpc: Arc<RpcRouter>,
    /// Ephemeral fan-out.
    pub broadcaster: Arc<EphemeralBroadcaster>,
    /// Admission and release.
    pub gate: Arc<ConnectionGate>,
    /// Runtime configuration.
    pub config: Arc<ServerConfig>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    fn frame_context(&self) -> FrameContext {
        FrameContext {
            router: Arc::clone(&self.rpc),
            broadcaster: Arc::clone(&self.broadcaster),
        }
    }
}

/// The switchboard server.
pub struct SwitchboardServer {
    state: AppState,
}

impl SwitchboardServer {
    /// Create a server that authenticates with `verifier`.
    pub fn new(config: ServerConfig, verifier: Arc<dyn TokenVerifier>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let rpc = Arc::new(RpcRouter::new());
        let broadcaster = Arc::new(EphemeralBroadcaster::new(Arc::clone(&registry)));
        let gate = Arc::new(ConnectionGate::new(
            Arc::clone(&registry),
            Arc::clone(&rpc),
            Arc::clone(&broadcaster),
            verifier,
        ));
        Self {
            state: AppState {
                registry,
                rpc,
                broadcaster,
                gate,
                config: Arc::new(config),
                shutdown: Arc::new(ShutdownCoordinator::new()),
                start_time: Instant::now(),
                metrics: None,
            },
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.state.metrics = Some(handle);
        self
    }

    /// Build the axum router.
    pub fn router(&self) -> Router {
        Router::new()
            .route(&self.state.config.ws_path, get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/v1/notify", post(notify_handler))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
    }

    /// Build the per-connection dispatcher, with the bridge when a gateway
    /// is configured.
    pub fn dispatcher(&self) -> Dispatcher {
        let config = &self.state.config;
        let bridge = config
            .gateway_addr
            .as_ref()
            .map(|addr| Arc::new(UpgradeBridge::new(addr.clone(), config.gateway_connect_timeout())));
        Dispatcher::new(self.router(), bridge, &config.ws_path, config.max_head_bytes)
    }

    /// Accept connections on `listener` until shutdown.
    pub async fn serve(&self, listener: TcpListener) {
        accept_loop(
            listener,
            self.dispatcher(),
            self.state.shutdown.token(),
            self.state.shutdown.tracker(),
        )
        .await;
    }

    /// Shared state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Live connections per user.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.state.registry
    }

    /// Remote-call routing.
    pub fn rpc(&self) -> &Arc<RpcRouter> {
        &self.state.rpc
    }

    /// Ephemeral fan-out.
    pub fn broadcaster(&self) -> &Arc<EphemeralBroadcaster> {
        &self.state.broadcaster
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Runtime configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }
}

/// GET {ws_path}: upgrade and run a session.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let conn_id = ConnectionId::new();
    let gate = Arc::clone(&state.gate);
    let ctx = state.frame_context();
    let session = state.config.session();
    let shutdown = state.shutdown.token();
    let tracker = state.shutdown.tracker();
    ws.max_message_size(state.config.max_message_size)
        .on_failed_upgrade(|error| warn!(%error, "websocket upgrade failed"))
        .on_upgrade(move |socket| {
            tracker.track_future(run_ws_session(socket, conn_id, gate, ctx, session, shutdown))
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.registry.connection_count(),
        state.registry.user_count(),
        state.config.gateway_addr.is_some(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            crate::metrics::render(handle),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

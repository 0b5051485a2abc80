//! Prometheus metrics recorder and `/metrics` rendering.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Call once at startup,
/// before any metric is recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections admitted total (counter, labels: scope).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter, labels: scope).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active admitted WebSocket connections (gauge, labels: scope).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Admitted connection lifetime in seconds (histogram, labels: scope).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Rejected handshakes total (counter, labels: code).
pub const WS_HANDSHAKE_REJECTIONS_TOTAL: &str = "ws_handshake_rejections_total";
/// Ephemeral events emitted total (counter, labels: kind).
pub const EPHEMERAL_EVENTS_TOTAL: &str = "ephemeral_events_total";
/// Ephemeral deliveries dropped on a full or closed queue (counter, labels: kind).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// Remote calls routed total (counter).
pub const RPC_CALLS_TOTAL: &str = "rpc_calls_total";
/// Remote calls failed at dispatch (counter, labels: code).
pub const RPC_ERRORS_TOTAL: &str = "rpc_errors_total";
/// Calls awaiting a response (gauge).
pub const RPC_PENDING: &str = "rpc_pending";
/// Bridged upgrade connections total (counter).
pub const BRIDGE_CONNECTIONS_TOTAL: &str = "bridge_connections_total";
/// Bridged connections currently spliced (gauge).
pub const BRIDGE_CONNECTIONS_ACTIVE: &str = "bridge_connections_active";
/// Bridge failures (counter, labels: stage).
pub const BRIDGE_ERRORS_TOTAL: &str = "bridge_errors_total";
/// Notifications accepted by the out-of-band endpoint (counter).
pub const NOTIFY_REQUESTS_TOTAL: &str = "notify_requests_total";

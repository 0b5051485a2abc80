//! `POST /v1/notify`: out-of-band notification trigger.
//!
//! A trusted local process (a CLI hook, a cron job) posts a message with a
//! shared secret. The message is delivered as a `notification` ephemeral to
//! the configured user's app connections.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use metrics::counter;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use switchboard_core::{EphemeralPayload, UserId};
use tracing::{debug, info};

use crate::broadcast::{EphemeralEvent, RecipientFilter};
use crate::metrics::NOTIFY_REQUESTS_TOTAL;
use crate::server::AppState;

/// Request body.
#[derive(Debug, Deserialize)]
pub struct NotifyRequest {
    /// Text shown to the user.
    #[serde(default)]
    pub message: String,
}

/// Successful response body.
#[derive(Debug, Serialize)]
pub struct NotifyResponse {
    /// Always `true`.
    pub success: bool,
    /// App connections the notification was queued on.
    pub delivered: usize,
}

#[derive(Debug, Serialize)]
struct NotifyFailure {
    success: bool,
    error: &'static str,
}

fn failure(status: StatusCode, error: &'static str) -> Response {
    counter!(NOTIFY_REQUESTS_TOTAL, "status" => status.as_str().to_owned()).increment(1);
    (
        status,
        Json(NotifyFailure {
            success: false,
            error,
        }),
    )
        .into_response()
}

/// Constant-time comparison of the presented secret.
fn secret_matches(given: &str, expected: &str) -> bool {
    given.len() == expected.len() && bool::from(given.as_bytes().ct_eq(expected.as_bytes()))
}

/// POST /v1/notify
pub async fn notify_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let config = &state.config;
    let Some(expected) = config.notify_secret.as_deref() else {
        debug!("notify rejected: no secret configured");
        return failure(StatusCode::UNAUTHORIZED, "unauthorized");
    };
    let given = headers
        .get(config.notify_header.as_str())
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !secret_matches(given, expected) {
        debug!("notify rejected: bad secret");
        return failure(StatusCode::UNAUTHORIZED, "unauthorized");
    }

    let message = match serde_json::from_slice::<NotifyRequest>(&body) {
        Ok(req) if !req.message.trim().is_empty() => req.message,
        _ => return failure(StatusCode::BAD_REQUEST, "message is required"),
    };

    let Some(user_id) = config.notify_user_id.as_deref().map(UserId::from) else {
        return failure(StatusCode::SERVICE_UNAVAILABLE, "no notify user configured");
    };
    if state.registry.connections(&user_id).is_none() {
        return failure(StatusCode::SERVICE_UNAVAILABLE, "no active connections");
    }

    let delivered = state.broadcaster.emit(&EphemeralEvent::new(
        user_id.clone(),
        EphemeralPayload::notification(message),
        RecipientFilter::UserScopedOnly,
    ));
    counter!(NOTIFY_REQUESTS_TOTAL, "status" => "200").increment(1);
    info!(%user_id, delivered, "notification delivered");
    (
        StatusCode::OK,
        Json(NotifyResponse {
            success: true,
            delivered,
        }),
    )
        .into_response()
}

//! Structured logging setup with `tracing`.
//!
//! Log context (connection id, user id, scope) is carried on spans opened by
//! the WebSocket session rather than threaded through function arguments.

use tracing_subscriber::EnvFilter;

/// Build the filter for `level`, letting `RUST_LOG` override it.
fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Initialize the global tracing subscriber with stderr output.
///
/// Call once at application startup. Subsequent calls are no-ops.
///
/// # Arguments
///
/// * `level` - Minimum log level to display, e.g. `"info"`.
/// * `json` - Emit newline-delimited JSON instead of compact text.
pub fn init_subscriber(level: &str, json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_target(true)
        .with_writer(std::io::stderr);

    // try_init is a no-op if a global subscriber is already set
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
}

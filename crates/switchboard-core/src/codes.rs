//! Machine-readable error codes carried in `error` and `rpc-result` frames.

// ── Handshake ───────────────────────────────────────────────────────

/// The handshake carried no credential token.
pub const MISSING_TOKEN: &str = "missing-token";
/// A session-scoped handshake carried no session id.
pub const MISSING_SESSION_ID: &str = "missing-session-id";
/// A machine-scoped handshake carried no machine id.
pub const MISSING_MACHINE_ID: &str = "missing-machine-id";
/// The credential verifier rejected the token or failed.
pub const INVALID_TOKEN: &str = "invalid-token";

// ── RPC dispatch ────────────────────────────────────────────────────

/// No connection of the user currently serves the requested method.
pub const NO_LISTENER: &str = "no-listener";
/// The serving connection went away before answering.
pub const LISTENER_DISCONNECTED: &str = "listener-disconnected";
/// The serving connection is alive but its outbound queue is full.
pub const LISTENER_BUSY: &str = "listener-busy";

// ── Frames ──────────────────────────────────────────────────────────

/// A frame could not be parsed.
pub const INVALID_FRAME: &str = "invalid-frame";
/// The frame is not allowed for this connection's scope.
pub const FORBIDDEN_SCOPE: &str = "forbidden-scope";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_kebab_case() {
        let codes = [
            MISSING_TOKEN,
            MISSING_SESSION_ID,
            MISSING_MACHINE_ID,
            INVALID_TOKEN,
            NO_LISTENER,
            LISTENER_DISCONNECTED,
            LISTENER_BUSY,
            INVALID_FRAME,
            FORBIDDEN_SCOPE,
        ];
        for code in codes {
            assert!(
                code.chars().all(|c| c.is_ascii_lowercase() || c == '-'),
                "error code '{code}' must be kebab-case"
            );
        }
    }
}

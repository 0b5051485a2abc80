//! Auth error types.

/// Errors that can occur while verifying a credential token.
///
/// Every variant maps to the same `invalid-token` wire code; the variants
/// only differ in what gets logged.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The verifier does not recognise the token.
    #[error("token rejected")]
    Rejected,

    /// HTTP request to the verification endpoint failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The verification endpoint answered with a non-success status.
    #[error("verifier returned status {0}")]
    Status(u16),

    /// The verification endpoint answered with an unusable body.
    #[error("malformed verifier response: {0}")]
    Malformed(String),
}

impl AuthError {
    /// Whether the failure came from the verifier's transport rather than
    /// from the token itself.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Malformed(_))
            || matches!(self, Self::Status(s) if *s >= 500)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_display() {
        assert_eq!(AuthError::Rejected.to_string(), "token rejected");
    }

    #[test]
    fn status_display() {
        assert_eq!(
            AuthError::Status(403).to_string(),
            "verifier returned status 403"
        );
    }

    #[test]
    fn malformed_display() {
        let err = AuthError::Malformed("missing userId".to_string());
        assert_eq!(err.to_string(), "malformed verifier response: missing userId");
    }

    #[test]
    fn transport_classification() {
        assert!(!AuthError::Rejected.is_transport());
        assert!(!AuthError::Status(401).is_transport());
        assert!(AuthError::Status(502).is_transport());
        assert!(AuthError::Malformed(String::new()).is_transport());
    }
}

//! Verifier backed by a fixed token table from settings.

use async_trait::async_trait;
use subtle::ConstantTimeEq;
use switchboard_core::UserId;

use crate::errors::AuthError;
use crate::verifier::{TokenVerifier, VerifiedIdentity};

/// Looks tokens up in a static table, comparing in constant time.
#[derive(Clone, Debug, Default)]
pub struct StaticTokenVerifier {
    entries: Vec<(String, UserId)>,
}

impl StaticTokenVerifier {
    /// Build from `(token, user id)` pairs. Empty tokens are skipped.
    pub fn new<I, T, U>(entries: I) -> Self
    where
        I: IntoIterator<Item = (T, U)>,
        T: Into<String>,
        U: Into<UserId>,
    {
        let entries = entries
            .into_iter()
            .map(|(token, user)| (token.into(), user.into()))
            .filter(|(token, _)| !token.is_empty())
            .collect();
        Self { entries }
    }

    /// Number of configured tokens.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no tokens are configured.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthError> {
        // Full scan, no early exit.
        let mut found: Option<&UserId> = None;
        for (candidate, user) in &self.entries {
            if bool::from(candidate.as_bytes().ct_eq(token.as_bytes())) {
                found = Some(user);
            }
        }
        found
            .map(|user_id| VerifiedIdentity {
                user_id: user_id.clone(),
            })
            .ok_or(AuthError::Rejected)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier() -> StaticTokenVerifier {
        StaticTokenVerifier::new([("tok-a", "user-a"), ("tok-b", "user-b")])
    }

    #[tokio::test]
    async fn known_token_resolves_user() {
        let identity = verifier().verify("tok-b").await.unwrap();
        assert_eq!(identity.user_id.as_str(), "user-b");
    }

    #[tokio::test]
    async fn unknown_token_rejected() {
        let err = verifier().verify("tok-c").await.unwrap_err();
        assert!(matches!(err, AuthError::Rejected));
    }

    #[tokio::test]
    async fn prefix_is_not_a_match() {
        assert!(verifier().verify("tok").await.is_err());
        assert!(verifier().verify("tok-aa").await.is_err());
    }

    #[tokio::test]
    async fn empty_tokens_never_configured() {
        let v = StaticTokenVerifier::new([("", "user-x")]);
        assert!(v.is_empty());
        assert!(v.verify("").await.is_err());
    }

    #[test]
    fn len_counts_entries() {
        assert_eq!(verifier().len(), 2);
    }
}

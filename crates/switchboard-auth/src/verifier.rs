//! The credential verifier seam.

use async_trait::async_trait;
use switchboard_core::UserId;

use crate::errors::AuthError;

/// Identity resolved from a valid token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedIdentity {
    /// Principal the token belongs to.
    pub user_id: UserId,
}

/// Resolves an opaque credential token to a user.
///
/// Called once per connection during admission. Implementations must be
/// safe to call concurrently from many connection tasks.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Verify `token`. Any error denies admission.
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthError>;
}

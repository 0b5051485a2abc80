//! Verifier that delegates to a remote HTTP endpoint.
//!
//! Wire contract: `POST {url}` with `{"token": "..."}`; a `200` answer with
//! `{"userId": "..."}` accepts, `401`/`403` rejects, anything else is a
//! transport failure. All outcomes other than acceptance deny admission.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use switchboard_core::UserId;
use tracing::debug;

use crate::errors::AuthError;
use crate::verifier::{TokenVerifier, VerifiedIdentity};

#[derive(Serialize)]
struct VerifyRequest<'a> {
    token: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyResponse {
    user_id: Option<String>,
}

/// Posts tokens to a verification endpoint.
#[derive(Clone, Debug)]
pub struct HttpTokenVerifier {
    client: reqwest::Client,
    url: String,
}

impl HttpTokenVerifier {
    /// Build a verifier for `url` with a per-request `timeout`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// The endpoint this verifier posts to.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TokenVerifier for HttpTokenVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthError> {
        let response = self
            .client
            .post(&self.url)
            .json(&VerifyRequest { token })
            .send()
            .await?;

        let status = response.status();
        debug!(status = status.as_u16(), "verifier responded");
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(AuthError::Rejected);
        }
        if !status.is_success() {
            return Err(AuthError::Status(status.as_u16()));
        }

        let body: VerifyResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Malformed(e.to_string()))?;
        match body.user_id {
            Some(id) if !id.is_empty() => Ok(VerifiedIdentity {
                user_id: UserId::from(id),
            }),
            _ => Err(AuthError::Malformed("missing userId".into())),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn verifier_for(server: &MockServer) -> HttpTokenVerifier {
        HttpTokenVerifier::new(format!("{}/verify", server.uri()), Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn accepts_valid_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .and(body_json(serde_json::json!({"token": "good"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"userId": "user-1"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let identity = verifier_for(&server).await.verify("good").await.unwrap();
        assert_eq!(identity.user_id.as_str(), "user-1");
    }

    #[tokio::test]
    async fn unauthorized_is_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = verifier_for(&server).await.verify("bad").await.unwrap_err();
        assert!(matches!(err, AuthError::Rejected));
    }

    #[tokio::test]
    async fn server_error_is_transport_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = verifier_for(&server).await.verify("any").await.unwrap_err();
        assert!(matches!(err, AuthError::Status(503)));
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn missing_user_id_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let err = verifier_for(&server).await.verify("any").await.unwrap_err();
        assert!(matches!(err, AuthError::Malformed(_)));
    }

    #[tokio::test]
    async fn slow_verifier_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"userId": "late"}))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let verifier =
            HttpTokenVerifier::new(format!("{}/verify", server.uri()), Duration::from_millis(100))
                .unwrap();
        let err = verifier.verify("any").await.unwrap_err();
        assert!(matches!(err, AuthError::Http(_)));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_http_error() {
        let verifier =
            HttpTokenVerifier::new("http://127.0.0.1:1/verify", Duration::from_millis(500))
                .unwrap();
        let err = verifier.verify("any").await.unwrap_err();
        assert!(matches!(err, AuthError::Http(_)));
    }
}

//! jwt-bearer token exchange
//!
//! Exchanges a client assertion and a user assertion for an access token at the identity
//! provider's token endpoint (RFC 7523 with client assertion authentication). No retry is
//! performed here; callers decide based on [`AuthError::is_retryable`].

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use url::Url;

use super::http_client::IdpHttpClient;
use crate::error::{AuthError, AuthResult};
use crate::jwt::SignedAssertion;

/// `grant_type` of the jwt-bearer extension grant
pub const JWT_BEARER_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// `client_assertion_type` for JWT client authentication
pub const JWT_BEARER_CLIENT_ASSERTION_TYPE: &str =
    "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Header naming the identity domain the user belongs to
pub const IDENTITY_DOMAIN_HEADER: &str = "X-USER-IDENTITY-DOMAIN-NAME";

/// Access token returned by the token endpoint
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    /// The access token value
    pub access_token: String,
    /// Token type, usually `Bearer`
    pub token_type: Option<String>,
    /// Lifetime in seconds
    pub expires_in: Option<u64>,
    /// Granted scopes
    pub scope: Option<String>,
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish()
    }
}

impl AccessToken {
    /// Interpret a token endpoint response body
    ///
    /// The `access_token` field decides success regardless of HTTP status; other fields are
    /// optional and read leniently.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::TokenEndpointFailure`] carrying `status` and the body verbatim when
    /// the body is not JSON or has no string `access_token`.
    pub fn from_response_body(status: u16, body: String) -> AuthResult<Self> {
        let parsed = serde_json::from_str::<serde_json::Value>(&body).ok();
        let field = |name: &str| parsed.as_ref().and_then(|value| value.get(name));

        match field("access_token").and_then(serde_json::Value::as_str) {
            Some(token) if !token.is_empty() => Ok(Self {
                access_token: token.to_string(),
                token_type: field("token_type")
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_string),
                expires_in: field("expires_in").and_then(serde_json::Value::as_u64),
                scope: field("scope")
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_string),
            }),
            _ => Err(AuthError::TokenEndpointFailure { status, body }),
        }
    }

    /// Read and interpret a token endpoint response
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Transport`] if the body cannot be read, otherwise as
    /// [`AccessToken::from_response_body`].
    pub(crate) async fn from_response(response: reqwest::Response) -> AuthResult<Self> {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::Transport(format!("cannot read token response: {e}")))?;
        Self::from_response_body(status, body)
    }
}

/// Client for the jwt-bearer grant
#[derive(Debug, Clone)]
pub struct TokenExchangeClient {
    http: IdpHttpClient,
}

impl TokenExchangeClient {
    pub fn new(http: IdpHttpClient) -> Self {
        Self { http }
    }

    /// Exchange two signed assertions for an access token
    ///
    /// Sends one POST with `grant_type`, `assertion` (user), `client_assertion_type`,
    /// `client_assertion` (client), `client_id` and `scope`, plus the identity-domain header.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Transport`] on network failure or timeout, and
    /// [`AuthError::TokenEndpointFailure`] when the response has no `access_token`.
    pub async fn exchange(
        &self,
        token_endpoint: &Url,
        client_assertion: &SignedAssertion,
        user_assertion: &SignedAssertion,
        client_id: &str,
        scope: &str,
        identity_domain: &str,
    ) -> AuthResult<AccessToken> {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-user-identity-domain-name"),
            HeaderValue::from_str(identity_domain).map_err(|e| {
                AuthError::InvalidConfiguration(format!("identity domain is not a valid header value: {e}"))
            })?,
        );

        let params = [
            ("grant_type", JWT_BEARER_GRANT_TYPE),
            ("assertion", user_assertion.as_str()),
            ("client_assertion_type", JWT_BEARER_CLIENT_ASSERTION_TYPE),
            ("client_assertion", client_assertion.as_str()),
            ("client_id", client_id),
            ("scope", scope),
        ];

        let response = self.http.post_form(token_endpoint, headers, &params).await?;
        match AccessToken::from_response(response).await {
            Ok(token) => {
                info!(
                    endpoint = %token_endpoint,
                    subject = %user_assertion.claims().sub,
                    "Exchanged assertions for access token"
                );
                Ok(token)
            }
            Err(e) => {
                error!(
                    endpoint = %token_endpoint,
                    subject = %user_assertion.claims().sub,
                    category = e.category(),
                    "Token exchange failed"
                );
                Err(e)
            }
        }
    }
}

//! JWKS (JSON Web Key Set) retrieval
//!
//! The identity provider publishes its signing keys behind an authenticated endpoint, so
//! fetching the key set is a two-step flow:
//!
//! 1. POST a client-credentials grant to the token endpoint, authenticated with HTTP Basic
//!    (`client_id:client_secret`) and scope `urn:opc:idm:__myscopes__`
//! 2. GET the JWKS endpoint with the resulting access token as a bearer credential
//!
//! [`KeySetSource`] is the seam the validator initializes from; [`ConfiguredKeySource`]
//! resolves endpoints and the client secret from configuration on first use.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use jsonwebtoken::jwk::JwkSet;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use tracing::{error, info};
use url::Url;

use crate::config::SecurityConfig;
use crate::error::{AuthError, AuthResult};
use crate::oauth2::exchange::AccessToken;
use crate::oauth2::http_client::{IdentityProviderEndpoints, IdpHttpClient};
use crate::secrets::SecretProvider;

/// Scope granting access to the caller's own administrative resources
pub const MY_SCOPES: &str = "urn:opc:idm:__myscopes__";

/// Source of the key set a validator is built from
#[async_trait]
pub trait KeySetSource: Send + Sync {
    /// Fetch the current key set
    ///
    /// # Errors
    ///
    /// Returns an error if the key set cannot be obtained; the validator records it as its
    /// not-ready cause.
    async fn fetch_key_set(&self) -> AuthResult<JwkSet>;
}

/// Client for the identity provider's authenticated JWKS endpoint
///
/// # Example
///
/// ```rust,no_run
/// # use jwtgate_auth::{IdentityProviderEndpoints, IdpHttpClient, JwksClient};
/// # use secrecy::SecretString;
/// # use std::time::Duration;
/// # tokio_test::block_on(async {
/// let endpoints = IdentityProviderEndpoints::from_base_url("https://idcs.example.com")?;
/// let client = JwksClient::new(
///     IdpHttpClient::new(Duration::from_secs(30))?,
///     endpoints,
///     "client-id",
///     SecretString::new("client-secret".to_string()),
/// );
///
/// let jwks = client.fetch().await?;
/// println!("{} signing keys", jwks.keys.len());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// # });
/// ```
pub struct JwksClient {
    http: IdpHttpClient,
    token_endpoint: Url,
    jwks_endpoint: Url,
    client_id: String,
    client_secret: SecretString,
}

// Manual Debug impl to keep the client secret out of logs
impl std::fmt::Debug for JwksClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwksClient")
            .field("token_endpoint", &self.token_endpoint.as_str())
            .field("jwks_endpoint", &self.jwks_endpoint.as_str())
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

impl JwksClient {
    pub fn new(
        http: IdpHttpClient,
        endpoints: IdentityProviderEndpoints,
        client_id: impl Into<String>,
        client_secret: SecretString,
    ) -> Self {
        Self {
            http,
            token_endpoint: endpoints.token,
            jwks_endpoint: endpoints.jwks,
            client_id: client_id.into(),
            client_secret,
        }
    }

    /// Obtain an access token for the JWKS endpoint via client credentials
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Transport`] on network failure and
    /// [`AuthError::TokenEndpointFailure`] when no access token is returned.
    pub async fn client_credentials_token(&self) -> AuthResult<AccessToken> {
        let credentials = STANDARD.encode(format!(
            "{}:{}",
            self.client_id,
            self.client_secret.expose_secret()
        ));
        let mut authorization = HeaderValue::from_str(&format!("Basic {credentials}"))
            .map_err(|e| AuthError::InvalidConfiguration(format!("unusable client credentials: {e}")))?;
        authorization.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, authorization);

        let response = self
            .http
            .post_form(
                &self.token_endpoint,
                headers,
                &[("grant_type", "client_credentials"), ("scope", MY_SCOPES)],
            )
            .await?;

        AccessToken::from_response(response).await.inspect_err(|e| {
            error!(
                endpoint = %self.token_endpoint,
                category = e.category(),
                "Client credentials grant failed"
            );
        })
    }

    /// Fetch the key set
    ///
    /// # Errors
    ///
    /// Returns the client-credentials error, [`AuthError::Transport`] if the JWKS request
    /// fails or its body is not a JWK set, or [`AuthError::TokenEndpointFailure`] for a
    /// non-success status.
    pub async fn fetch(&self) -> AuthResult<JwkSet> {
        let token = self.client_credentials_token().await?;

        info!(jwks_uri = %self.jwks_endpoint, "Fetching JWKS from endpoint");
        let response = self
            .http
            .get_with_bearer(&self.jwks_endpoint, &token.access_token)
            .await?;

        let status = response.status();
        if !status.is_success() {
            error!(
                jwks_uri = %self.jwks_endpoint,
                status = %status,
                "JWKS endpoint returned error status"
            );
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::TokenEndpointFailure {
                status: status.as_u16(),
                body,
            });
        }

        let jwks: JwkSet = response.json().await.map_err(|e| {
            error!(jwks_uri = %self.jwks_endpoint, error = %e, "Failed to parse JWKS JSON");
            AuthError::Transport(format!("invalid JWKS format: {e}"))
        })?;

        info!(
            jwks_uri = %self.jwks_endpoint,
            key_count = jwks.keys.len(),
            "Successfully fetched JWKS"
        );
        Ok(jwks)
    }
}

#[async_trait]
impl KeySetSource for JwksClient {
    async fn fetch_key_set(&self) -> AuthResult<JwkSet> {
        self.fetch().await
    }
}

/// Key set source resolved from [`SecurityConfig`] and a [`SecretProvider`]
///
/// Configuration is checked and the client secret fetched only when the key set is first
/// needed, so a misconfigured resource-server path surfaces as a not-ready validator rather
/// than a startup failure.
pub struct ConfiguredKeySource {
    config: SecurityConfig,
    secrets: Arc<dyn SecretProvider>,
    http: IdpHttpClient,
}

impl ConfiguredKeySource {
    pub fn new(config: SecurityConfig, secrets: Arc<dyn SecretProvider>, http: IdpHttpClient) -> Self {
        Self {
            config,
            secrets,
            http,
        }
    }
}

impl std::fmt::Debug for ConfiguredKeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfiguredKeySource")
            .field("idcs_url", &self.config.idcs_url)
            .field("client_id", &self.config.client_id)
            .finish()
    }
}

#[async_trait]
impl KeySetSource for ConfiguredKeySource {
    async fn fetch_key_set(&self) -> AuthResult<JwkSet> {
        let settings = self.config.validation_settings()?;

        let secret = self.secrets.get_secret(&settings.client_secret_id).await?;
        let secret = String::from_utf8(secret.expose_secret().clone()).map_err(|_| {
            AuthError::SecretRetrievalFailure {
                id: settings.client_secret_id.clone(),
                reason: "client secret is not valid UTF-8".to_string(),
            }
        })?;

        JwksClient::new(
            self.http.clone(),
            settings.endpoints,
            settings.client_id,
            SecretString::new(secret.trim().to_string()),
        )
        .fetch()
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::StaticSecretProvider;
    use std::time::Duration;

    #[tokio::test]
    async fn test_configured_source_requires_validation_keys() {
        let source = ConfiguredKeySource::new(
            SecurityConfig::default().with_idcs_url("https://idcs.example.com"),
            Arc::new(StaticSecretProvider::new()),
            IdpHttpClient::new(Duration::from_secs(1)).unwrap(),
        );

        let err = source.fetch_key_set().await.unwrap_err();
        assert_eq!(
            err,
            AuthError::ConfigurationIncomplete {
                missing_keys: vec![
                    "CLIENT_ID".into(),
                    "V_CLIENT_SECRET".into(),
                    "EXPECTED_AUDIENCE".into()
                ]
            }
        );
    }

    #[tokio::test]
    async fn test_configured_source_missing_secret() {
        let config = SecurityConfig::default()
            .with_idcs_url("https://idcs.example.com")
            .with_client_id("client-123")
            .with_client_secret_id("client-secret")
            .with_expected_audience("urn:opc:resource:myapp");
        let source = ConfiguredKeySource::new(
            config,
            Arc::new(StaticSecretProvider::new()),
            IdpHttpClient::new(Duration::from_secs(1)).unwrap(),
        );

        let err = source.fetch_key_set().await.unwrap_err();
        assert_eq!(err.category(), "secret_retrieval_failure");
    }

    #[test]
    fn test_debug_redacts_secret() {
        let client = JwksClient::new(
            IdpHttpClient::new(Duration::from_secs(1)).unwrap(),
            IdentityProviderEndpoints::from_base_url("https://idcs.example.com").unwrap(),
            "client-123",
            SecretString::new("hunter2".to_string()),
        );
        let debug = format!("{client:?}");
        assert!(debug.contains("client-123"));
        assert!(!debug.contains("hunter2"));
    }
}

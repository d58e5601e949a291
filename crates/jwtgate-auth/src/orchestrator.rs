//! Security orchestrator
//!
//! The one service object request handlers hold. It owns the key material store, the token
//! cache, the exchange client and the JWKS validator, and exposes the two flows:
//!
//! - **Resource server**: [`SecurityOrchestrator::authorize_incoming`] turns a raw
//!   `Authorization` header into an [`AuthorizationDecision`]; it never returns an error
//! - **Client**: [`SecurityOrchestrator::get_asserted_access_token`] obtains an access token
//!   on behalf of a subject via the jwt-bearer grant, reusing cached tokens when allowed
//!
//! Construct one instance at startup and share it (for example behind an `Arc`).

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat};
use secrecy::{ExposeSecret, SecretVec};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::{CacheLookup, SubjectTokenCache};
use crate::config::{AssertionSettings, SecurityConfig};
use crate::error::{AuthError, AuthResult};
use crate::init::InitStatus;
use crate::jwt::{
    AccessTokenClaims, AssertionSigner, CompactToken, ConfiguredKeySource, JwksValidator,
};
use crate::keystore::{KeyMaterial, KeyMaterialStore};
use crate::oauth2::{IdpHttpClient, TokenExchangeClient};
use crate::secrets::SecretProvider;

/// Prefix an `Authorization` header value must start with
pub const BEARER_PREFIX: &str = "Bearer ";

/// Outcome of authorizing an inbound request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationDecision {
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,
    #[serde(default)]
    pub scope: Vec<String>,
    /// ISO-8601 UTC expiry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub context: serde_json::Map<String, serde_json::Value>,
    /// Reason code when `active` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub www_authenticate: Option<String>,
}

impl AuthorizationDecision {
    /// Active decision for verified claims
    pub fn granted(claims: &AccessTokenClaims) -> Self {
        let mut context = serde_json::Map::new();
        if let Some(tenant) = &claims.tenant {
            context.insert("tenant".to_string(), serde_json::Value::String(tenant.clone()));
        }

        Self {
            active: true,
            principal: Some(claims.sub.clone()),
            scope: claims.scopes(),
            expires_at: format_expiry(claims.exp),
            client_id: claims.client_id.clone(),
            context,
            error: None,
            www_authenticate: None,
        }
    }

    /// Inactive decision carrying the reason code and a challenge for `error`
    pub fn denied(error: &AuthError) -> Self {
        Self {
            active: false,
            principal: None,
            scope: Vec::new(),
            expires_at: None,
            client_id: None,
            context: serde_json::Map::new(),
            error: Some(error.category().to_string()),
            www_authenticate: Some(www_authenticate(error)),
        }
    }
}

fn format_expiry(exp: i64) -> Option<String> {
    DateTime::from_timestamp(exp, 0).map(|at| at.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// `WWW-Authenticate` challenge for a rejected bearer token
pub fn www_authenticate(error: &AuthError) -> String {
    let description = error.to_string().replace('\\', "\\\\").replace('"', "\\\"");
    match error {
        AuthError::MissingToken => r#"Bearer error="missing_token""#.to_string(),
        e if e.is_claim_error() => format!(
            r#"Bearer error="invalid_token_claim", error_description="{description}""#
        ),
        _ => format!(r#"Bearer error="invalid_token", error_description="{description}""#),
    }
}

/// Token from an `Authorization` header value
///
/// # Errors
///
/// Returns [`AuthError::MissingToken`] if the value does not start with exactly `Bearer `
/// or nothing follows the prefix.
pub fn strip_bearer(raw: &str) -> AuthResult<&str> {
    match raw.strip_prefix(BEARER_PREFIX).map(str::trim) {
        Some(token) if !token.is_empty() => Ok(token),
        _ => Err(AuthError::MissingToken),
    }
}

/// Service object combining token acquisition and bearer validation
///
/// # Example
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use jwtgate_auth::{FileSecretProvider, SecurityConfig, SecurityOrchestrator};
/// # tokio_test::block_on(async {
/// let config = SecurityConfig::from_env()?;
/// let orchestrator =
///     SecurityOrchestrator::new(config, Arc::new(FileSecretProvider::new("/run/secrets")))?;
///
/// let decision = orchestrator.authorize_incoming("Bearer eyJhbGciOi...").await;
/// if decision.active {
///     let token = orchestrator
///         .get_asserted_access_token(decision.principal.as_deref().unwrap_or_default())
///         .await?;
///     println!("downstream token: {token}");
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// # });
/// ```
pub struct SecurityOrchestrator {
    config: SecurityConfig,
    secrets: Arc<dyn SecretProvider>,
    key_store: KeyMaterialStore,
    cache: Option<SubjectTokenCache>,
    exchange: TokenExchangeClient,
    validator: JwksValidator,
}

impl std::fmt::Debug for SecurityOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityOrchestrator")
            .field("config", &self.config)
            .field("key_store", &self.key_store)
            .field("cache", &self.cache)
            .field("validator", &self.validator)
            .finish()
    }
}

impl SecurityOrchestrator {
    /// Build the orchestrator; nothing is loaded or fetched until first use
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Transport`] if the HTTP client cannot be built.
    pub fn new(config: SecurityConfig, secrets: Arc<dyn SecretProvider>) -> AuthResult<Self> {
        let http = IdpHttpClient::new(config.http_timeout())?;
        Ok(Self::with_http_client(config, secrets, http))
    }

    /// Build the orchestrator around an existing HTTP client
    pub fn with_http_client(
        config: SecurityConfig,
        secrets: Arc<dyn SecretProvider>,
        http: IdpHttpClient,
    ) -> Self {
        let cache = config.use_cache_token.then(|| {
            SubjectTokenCache::new(config.identity_domain.clone().unwrap_or_default())
        });
        let source = ConfiguredKeySource::new(config.clone(), Arc::clone(&secrets), http.clone());
        let validator = JwksValidator::new(
            Arc::new(source),
            config.expected_audience.clone().unwrap_or_default(),
        )
        .with_retry_after(config.jwks_retry_after());

        Self {
            config,
            secrets,
            key_store: KeyMaterialStore::new(),
            cache,
            exchange: TokenExchangeClient::new(http),
            validator,
        }
    }

    /// Replace the validator, e.g. with one built from a known key set
    pub fn with_validator(mut self, validator: JwksValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    pub fn key_store(&self) -> &KeyMaterialStore {
        &self.key_store
    }

    /// The token cache, `None` when `USE_CACHE_TOKEN` is off
    pub fn cache(&self) -> Option<&SubjectTokenCache> {
        self.cache.as_ref()
    }

    pub fn validator(&self) -> &JwksValidator {
        &self.validator
    }

    /// Authorize a request from its raw `Authorization` header value
    ///
    /// Every failure becomes an inactive decision with a reason code.
    pub async fn authorize_incoming(&self, raw_header: &str) -> AuthorizationDecision {
        let result = match strip_bearer(raw_header) {
            Ok(token) => self.validator.validate(token).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(claims) => {
                debug!(
                    principal = %claims.sub,
                    client_id = ?claims.client_id,
                    "Authorized request"
                );
                AuthorizationDecision::granted(&claims)
            }
            Err(e) => {
                warn!(category = e.category(), error = %e, "Rejected request");
                AuthorizationDecision::denied(&e)
            }
        }
    }

    /// Unverified `sub` of the token in an `Authorization` header value
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MissingToken`] without a bearer token,
    /// [`AuthError::MalformedToken`] if the token cannot be parsed, and
    /// [`AuthError::InvalidClaims`] if it has no string `sub`.
    pub fn subject_from_bearer(raw_header: &str) -> AuthResult<String> {
        let token = CompactToken::parse(strip_bearer(raw_header)?)?;
        token
            .subject()
            .map(str::to_string)
            .ok_or_else(|| AuthError::InvalidClaims("token has no 'sub' claim".to_string()))
    }

    /// Access token on behalf of the subject of an inbound bearer token
    ///
    /// # Errors
    ///
    /// See [`SecurityOrchestrator::subject_from_bearer`] and
    /// [`SecurityOrchestrator::get_asserted_access_token`].
    pub async fn access_token_for_bearer(&self, raw_header: &str) -> AuthResult<String> {
        let subject = Self::subject_from_bearer(raw_header)?;
        self.get_asserted_access_token(&subject).await
    }

    /// Access token for `subject` via the jwt-bearer grant
    ///
    /// Configuration is checked before anything else. A valid cached token for the subject
    /// is returned without network access; otherwise key material is loaded if needed, a
    /// client and a user assertion are signed and exchanged, and the result is cached.
    ///
    /// # Errors
    ///
    /// - [`AuthError::ConfigurationIncomplete`] listing every missing key
    /// - [`AuthError::SecretRetrievalFailure`] if a passphrase or the container is unavailable
    /// - [`AuthError::KeyMaterialLoadFailure`] / [`AuthError::KeyMaterialMissing`]
    /// - [`AuthError::SigningFailure`]
    /// - [`AuthError::Transport`] / [`AuthError::TokenEndpointFailure`] from the exchange
    pub async fn get_asserted_access_token(&self, subject: &str) -> AuthResult<String> {
        let settings = self.config.assertion_settings()?;
        if subject.trim().is_empty() {
            return Err(AuthError::InvalidClaims("subject must not be empty".to_string()));
        }

        if let Some(cache) = &self.cache
            && let CacheLookup::Found(token) = cache.get(subject)
        {
            return Ok(token);
        }

        let material = self.ensure_key_material(&settings).await?;
        let client_assertion = AssertionSigner::build_assertion(
            &material,
            &settings.client_id,
            &settings.client_id,
            &settings.audience,
        )?;
        let user_assertion = AssertionSigner::build_assertion(
            &material,
            &settings.client_id,
            subject,
            &settings.audience,
        )?;

        let token = self
            .exchange
            .exchange(
                &settings.endpoints.token,
                &client_assertion,
                &user_assertion,
                &settings.client_id,
                &settings.scope,
                &settings.identity_domain,
            )
            .await?;

        if let Some(cache) = &self.cache {
            cache.put(subject, token.access_token.clone());
        }
        Ok(token.access_token)
    }

    async fn ensure_key_material(&self, settings: &AssertionSettings) -> AuthResult<Arc<KeyMaterial>> {
        match self.key_store.status().await {
            InitStatus::Ready => {}
            InitStatus::Failed { error } => return Err(error),
            InitStatus::Uninitialized => {
                let container_passphrase = self.passphrase(&settings.container_passphrase_id).await?;
                let key_passphrase = self.passphrase(&settings.key_passphrase_id).await?;

                match &settings.keystore_secret_id {
                    Some(id) => {
                        debug!(secret_id = %id, "Loading key container from secret provider");
                        let container = self.secrets.get_secret(id).await?;
                        self.key_store
                            .load_from_bytes(
                                container.expose_secret(),
                                container_passphrase.expose_secret(),
                                key_passphrase.expose_secret(),
                            )
                            .await?;
                    }
                    None => {
                        self.key_store
                            .load(
                                &settings.keystore_path,
                                container_passphrase.expose_secret(),
                                key_passphrase.expose_secret(),
                            )
                            .await?;
                    }
                }
            }
        }
        self.key_store.key_material(&settings.key_id).await
    }

    // Secret files usually end with a newline that is not part of the passphrase.
    async fn passphrase(&self, id: &str) -> AuthResult<SecretVec<u8>> {
        let secret = self.secrets.get_secret(id).await?;
        let bytes = secret.expose_secret();
        let end = bytes
            .iter()
            .rposition(|b| !matches!(b, b'\n' | b'\r'))
            .map_or(0, |i| i + 1);
        Ok(SecretVec::new(bytes[..end].to_vec()))
    }

    /// Discard the validator state and fetch the key set again
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::ValidatorNotReady`] if the new fetch fails.
    pub async fn reinitialize_validator(&self) -> AuthResult<()> {
        self.validator.reset().await;
        self.validator.initialize().await
    }

    /// Discard loaded or failed key material so the next exchange loads it again
    pub async fn reset_key_material(&self) {
        self.key_store.reset().await;
    }
}

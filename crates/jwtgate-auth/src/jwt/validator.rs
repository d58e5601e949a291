//! Bearer token validation against a fetched key set
//!
//! The validator fetches its key set once, lazily, and builds an RS256 key selector from
//! it. It is then either ready or failed:
//!
//! - **Ready**: tokens are verified (RS256 signature, `exp`/`nbf` with 60 seconds of clock
//!   skew) and must list the expected audience anywhere in `aud`
//! - **Failed**: every call fails fast with [`AuthError::ValidatorNotReady`] carrying the
//!   original cause; no fetch is re-attempted unless a retry interval was configured or
//!   [`JwksValidator::reset`] is called
//!
//! Structurally broken tokens are rejected before the key set is consulted, so they never
//! trigger a fetch.

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::jwk::{AlgorithmParameters, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use tracing::debug;

use super::jwks::KeySetSource;
use super::{AccessTokenClaims, CompactToken};
use crate::error::{AuthError, AuthResult};
use crate::init::{InitCell, InitStatus};

/// Clock skew tolerated on `exp` and `nbf`
pub const DEFAULT_LEEWAY_SECS: u64 = 60;

struct SelectorKey {
    kid: Option<String>,
    key: DecodingKey,
}

/// Verification keys built from a key set
struct ValidationContext {
    keys: Vec<SelectorKey>,
}

impl ValidationContext {
    fn from_key_set(jwks: &JwkSet) -> AuthResult<Self> {
        let mut keys = Vec::new();
        for jwk in &jwks.keys {
            if !matches!(jwk.algorithm, AlgorithmParameters::RSA(_)) {
                debug!(kid = ?jwk.common.key_id, "Skipping non-RSA key");
                continue;
            }
            let key = DecodingKey::from_jwk(jwk).map_err(|e| {
                AuthError::ValidatorNotReady(format!("unusable key in key set: {e}"))
            })?;
            keys.push(SelectorKey {
                kid: jwk.common.key_id.clone(),
                key,
            });
        }

        if keys.is_empty() {
            return Err(AuthError::ValidatorNotReady(
                "key set contains no RSA keys".to_string(),
            ));
        }
        Ok(Self { keys })
    }

    fn candidates<'a>(&'a self, kid: Option<&'a str>) -> AuthResult<Vec<&'a DecodingKey>> {
        let keys: Vec<&DecodingKey> = match kid {
            Some(kid) => self
                .keys
                .iter()
                .filter(|k| k.kid.as_deref() == Some(kid))
                .map(|k| &k.key)
                .collect(),
            None => self.keys.iter().map(|k| &k.key).collect(),
        };

        if keys.is_empty() {
            return Err(AuthError::SignatureInvalid(format!(
                "no key with kid '{}' in key set",
                kid.unwrap_or_default()
            )));
        }
        Ok(keys)
    }
}

/// JWKS-backed validator for inbound bearer tokens
///
/// # Example
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use jwtgate_auth::{JwksValidator, KeySetSource};
/// # async fn demo(source: Arc<dyn KeySetSource>) -> Result<(), jwtgate_auth::AuthError> {
/// let validator = JwksValidator::new(source, "urn:opc:resource:myapp");
///
/// let claims = validator.validate("eyJhbGciOiJSUzI1NiJ9...").await?;
/// println!("principal {} scopes {:?}", claims.sub, claims.scopes());
/// # Ok(())
/// # }
/// ```
pub struct JwksValidator {
    source: Option<Arc<dyn KeySetSource>>,
    context: InitCell<ValidationContext>,
    expected_audience: String,
    leeway: Duration,
}

// Manual Debug impl; key material and the source are not printable
impl std::fmt::Debug for JwksValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwksValidator")
            .field("expected_audience", &self.expected_audience)
            .field("leeway", &self.leeway)
            .field("context", &self.context)
            .finish()
    }
}

impl JwksValidator {
    /// Validator that fetches its key set from `source` on first use
    pub fn new(source: Arc<dyn KeySetSource>, expected_audience: impl Into<String>) -> Self {
        Self {
            source: Some(source),
            context: InitCell::new("jwks_validator"),
            expected_audience: expected_audience.into(),
            leeway: Duration::from_secs(DEFAULT_LEEWAY_SECS),
        }
    }

    /// Validator that is ready immediately with a known key set
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::ValidatorNotReady`] if the set holds no usable RSA key.
    pub fn from_key_set(jwks: &JwkSet, expected_audience: impl Into<String>) -> AuthResult<Self> {
        Ok(Self {
            source: None,
            context: InitCell::ready("jwks_validator", ValidationContext::from_key_set(jwks)?),
            expected_audience: expected_audience.into(),
            leeway: Duration::from_secs(DEFAULT_LEEWAY_SECS),
        })
    }

    /// Allow a failed validator to fetch again once `retry_after` has elapsed
    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.context = self.context.with_retry_after(retry_after);
        self
    }

    /// Override the clock skew tolerance (default 60 seconds)
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    pub fn expected_audience(&self) -> &str {
        &self.expected_audience
    }

    /// Current readiness
    pub async fn status(&self) -> InitStatus {
        self.context.status().await
    }

    /// Fetch the key set now if it has not been fetched
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::ValidatorNotReady`] if the fetch fails or failed earlier.
    pub async fn initialize(&self) -> AuthResult<()> {
        self.context().await.map(|_| ())
    }

    /// Discard the current state so the next call fetches the key set again
    pub async fn reset(&self) {
        self.context.reset().await;
    }

    async fn context(&self) -> AuthResult<Arc<ValidationContext>> {
        let result = self
            .context
            .get_or_try_init(|| async {
                let source = self.source.as_ref().ok_or_else(|| {
                    AuthError::ValidatorNotReady("no key set source configured".to_string())
                })?;
                let jwks = source.fetch_key_set().await?;
                ValidationContext::from_key_set(&jwks)
            })
            .await;

        result.map_err(|e| match e {
            AuthError::ValidatorNotReady(_) => e,
            other => AuthError::ValidatorNotReady(other.to_string()),
        })
    }

    /// Validate against the configured expected audience
    ///
    /// # Errors
    ///
    /// See [`JwksValidator::validate_for`].
    pub async fn validate(&self, token: &str) -> AuthResult<AccessTokenClaims> {
        self.validate_for(token, &self.expected_audience).await
    }

    /// Validate a compact token and require `expected_audience` in its `aud` claim
    ///
    /// # Errors
    ///
    /// - [`AuthError::MalformedToken`] for structurally invalid input (checked first)
    /// - [`AuthError::ValidatorNotReady`] if the key set is unavailable
    /// - [`AuthError::SignatureInvalid`] for a non-RS256 header or a signature that no key in
    ///   the set verifies
    /// - [`AuthError::TokenExpired`] past `exp` plus leeway
    /// - [`AuthError::InvalidClaims`] for missing or mistyped required claims, or `nbf` in the
    ///   future
    /// - [`AuthError::AudienceMismatch`] if `expected_audience` is not listed in `aud`
    pub async fn validate_for(
        &self,
        token: &str,
        expected_audience: &str,
    ) -> AuthResult<AccessTokenClaims> {
        let parsed = CompactToken::parse(token)?;
        let context = self.context().await?;

        if parsed.algorithm() != "RS256" {
            return Err(AuthError::SignatureInvalid(format!(
                "unsupported algorithm {}, expected RS256",
                parsed.algorithm()
            )));
        }

        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = self.leeway.as_secs();
        validation.validate_aud = false;
        validation.validate_nbf = true;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let mut last_error = None;
        let mut verified = None;
        for key in context.candidates(parsed.key_id())? {
            match decode::<serde_json::Value>(token, key, &validation) {
                Ok(data) => {
                    verified = Some(data.claims);
                    break;
                }
                Err(e) if matches!(e.kind(), ErrorKind::InvalidSignature) => last_error = Some(e),
                Err(e) => return Err(map_decode_error(&e)),
            }
        }

        let Some(payload) = verified else {
            let cause = last_error.map_or_else(
                || "signature does not match any key".to_string(),
                |e| e.to_string(),
            );
            return Err(AuthError::SignatureInvalid(cause));
        };

        let claims = AccessTokenClaims::from_value(payload)?;
        if !claims.aud.iter().any(|aud| aud == expected_audience) {
            return Err(AuthError::AudienceMismatch {
                got: claims.aud,
                expected: expected_audience.to_string(),
            });
        }

        debug!(subject = %claims.sub, "Validated bearer token");
        Ok(claims)
    }
}

fn map_decode_error(err: &jsonwebtoken::errors::Error) -> AuthError {
    let mapped = match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::TokenExpired(err.to_string()),
        ErrorKind::ImmatureSignature => {
            AuthError::InvalidClaims(format!("token is not valid yet: {err}"))
        }
        ErrorKind::MissingRequiredClaim(claim) => {
            AuthError::InvalidClaims(format!("missing required claim '{claim}'"))
        }
        ErrorKind::InvalidToken
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_) => AuthError::MalformedToken(err.to_string()),
        _ => AuthError::SignatureInvalid(err.to_string()),
    };
    debug!(category = mapped.category(), error = %err, "Token failed verification");
    mapped
}

//! Security configuration
//!
//! A flat structure whose field names match the deployment's environment keys
//! (`IDCS_URL`, `CLIENT_ID`, `KEY_ID`, ...). It is loaded through the `config` crate so that
//! a file, the process environment, or both can supply values. Mandatory fields are kept
//! optional here and checked per path, so a missing key surfaces as one aggregated
//! [`AuthError::ConfigurationIncomplete`] instead of a deserialization failure.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AuthError, AuthResult};
use crate::oauth2::http_client::IdentityProviderEndpoints;

/// Default location of the keystore on local disk, used when `V_KEYSTORE` is not set
pub const DEFAULT_KEYSTORE_PATH: &str = "/tmp/keystore/secret-keystore.p12";

/// Default transport timeout for identity-provider calls
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Configuration consumed by the assertion and validation paths
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Identity provider base URL (`IDCS_URL`)
    #[serde(default)]
    pub idcs_url: Option<String>,
    /// OAuth client identifier, also the assertion issuer (`CLIENT_ID`)
    #[serde(default)]
    pub client_id: Option<String>,
    /// Signing key alias inside the key container (`KEY_ID`)
    #[serde(default)]
    pub key_id: Option<String>,
    /// Scope requested during the jwt-bearer exchange (`SCOPE`)
    #[serde(default)]
    pub scope: Option<String>,
    /// Comma-separated assertion audience list (`AUDIENCE`)
    #[serde(default)]
    pub audience: Option<String>,
    /// Identity domain sent in `X-USER-IDENTITY-DOMAIN-NAME` (`IDDOMAIN`)
    #[serde(default, rename = "iddomain")]
    pub identity_domain: Option<String>,
    /// PKCS#12 keystore or key container path on local disk (`KEYSTORE_PATH`)
    #[serde(default = "default_keystore_path")]
    pub keystore_path: PathBuf,
    /// Secret identifier of the keystore bytes (`V_KEYSTORE`); `keystore_path` is read when unset
    #[serde(default, rename = "v_keystore")]
    pub keystore_secret_id: Option<String>,
    /// Secret identifier of the container passphrase (`V_KS_PASS`)
    #[serde(default, rename = "v_ks_pass")]
    pub container_passphrase_id: Option<String>,
    /// Secret identifier of the private key passphrase (`V_PK_PASS`)
    #[serde(default, rename = "v_pk_pass")]
    pub key_passphrase_id: Option<String>,
    /// Reuse previously exchanged tokens per subject (`USE_CACHE_TOKEN`)
    #[serde(default = "default_use_cache_token")]
    pub use_cache_token: bool,
    /// Audience inbound tokens must carry (`EXPECTED_AUDIENCE`)
    #[serde(default)]
    pub expected_audience: Option<String>,
    /// Secret identifier of the client secret used to fetch the JWKS (`V_CLIENT_SECRET`)
    #[serde(default, rename = "v_client_secret")]
    pub client_secret_id: Option<String>,
    /// Transport timeout in seconds (`HTTP_TIMEOUT_SECS`)
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    /// Seconds after which a failed validator may initialize again (`JWKS_RETRY_SECS`)
    #[serde(default)]
    pub jwks_retry_secs: Option<u64>,
}

fn default_keystore_path() -> PathBuf {
    PathBuf::from(DEFAULT_KEYSTORE_PATH)
}

fn default_use_cache_token() -> bool {
    true
}

fn default_http_timeout_secs() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            idcs_url: None,
            client_id: None,
            key_id: None,
            scope: None,
            audience: None,
            identity_domain: None,
            keystore_path: default_keystore_path(),
            keystore_secret_id: None,
            container_passphrase_id: None,
            key_passphrase_id: None,
            use_cache_token: default_use_cache_token(),
            expected_audience: None,
            client_secret_id: None,
            http_timeout_secs: default_http_timeout_secs(),
            jwks_retry_secs: None,
        }
    }
}

/// Resolved, non-optional settings for the token-acquisition path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionSettings {
    pub endpoints: IdentityProviderEndpoints,
    pub client_id: String,
    pub key_id: String,
    pub scope: String,
    pub audience: Vec<String>,
    pub identity_domain: String,
    pub keystore_path: PathBuf,
    pub keystore_secret_id: Option<String>,
    pub container_passphrase_id: String,
    pub key_passphrase_id: String,
}

/// Resolved, non-optional settings for the resource-server path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationSettings {
    pub endpoints: IdentityProviderEndpoints,
    pub client_id: String,
    pub client_secret_id: String,
    pub expected_audience: String,
}

impl SecurityConfig {
    /// Load configuration from the process environment
    ///
    /// Keys are matched case-insensitively, so `IDCS_URL` populates `idcs_url`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfiguration`] if a present value has the wrong type
    /// (for example a non-boolean `USE_CACHE_TOKEN`).
    pub fn from_env() -> AuthResult<Self> {
        Self::load(config::Config::builder().add_source(Self::environment()))
    }

    /// Load configuration from a file, with environment variables overriding file values
    ///
    /// The format is detected from the extension (`.toml`, `.yaml`/`.yml`, `.json`).
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfiguration`] if the file is missing, has an unsupported
    /// extension, or contains values of the wrong type.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> AuthResult<Self> {
        use config::{File, FileFormat};

        let path = path.as_ref();
        let format = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => FileFormat::Toml,
            Some("yaml") | Some("yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            _ => {
                return Err(AuthError::InvalidConfiguration(format!(
                    "unsupported configuration file format: {}",
                    path.display()
                )));
            }
        };

        Self::load(
            config::Config::builder()
                .add_source(File::from(path).format(format))
                .add_source(Self::environment()),
        )
    }

    fn environment() -> config::Environment {
        config::Environment::default().try_parsing(true)
    }

    fn load(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> AuthResult<Self> {
        builder
            .build()
            .and_then(config::Config::try_deserialize)
            .map_err(|e| AuthError::InvalidConfiguration(e.to_string()))
    }

    pub fn with_idcs_url(mut self, url: impl Into<String>) -> Self {
        self.idcs_url = Some(url.into());
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = Some(key_id.into());
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    pub fn with_identity_domain(mut self, domain: impl Into<String>) -> Self {
        self.identity_domain = Some(domain.into());
        self
    }

    pub fn with_keystore_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.keystore_path = path.into();
        self
    }

    pub fn with_keystore_secret_id(mut self, id: impl Into<String>) -> Self {
        self.keystore_secret_id = Some(id.into());
        self
    }

    pub fn with_passphrase_ids(
        mut self,
        container_passphrase_id: impl Into<String>,
        key_passphrase_id: impl Into<String>,
    ) -> Self {
        self.container_passphrase_id = Some(container_passphrase_id.into());
        self.key_passphrase_id = Some(key_passphrase_id.into());
        self
    }

    pub fn with_token_cache(mut self, enabled: bool) -> Self {
        self.use_cache_token = enabled;
        self
    }

    pub fn with_expected_audience(mut self, audience: impl Into<String>) -> Self {
        self.expected_audience = Some(audience.into());
        self
    }

    pub fn with_client_secret_id(mut self, id: impl Into<String>) -> Self {
        self.client_secret_id = Some(id.into());
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_jwks_retry(mut self, retry_after: Option<Duration>) -> Self {
        self.jwks_retry_secs = retry_after.map(|d| d.as_secs());
        self
    }

    /// Transport timeout applied to every identity-provider request
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Interval after which a failed validator may re-attempt initialization
    pub fn jwks_retry_after(&self) -> Option<Duration> {
        self.jwks_retry_secs.map(Duration::from_secs)
    }

    /// Assertion audience list: `AUDIENCE` split on commas, trimmed, empties dropped
    pub fn audience_list(&self) -> Vec<String> {
        self.audience
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Every mandatory key of the token-acquisition path that is absent or blank
    pub fn missing_assertion_keys(&self) -> Vec<String> {
        let mut missing = Self::missing(&[
            ("IDCS_URL", &self.idcs_url),
            ("CLIENT_ID", &self.client_id),
            ("KEY_ID", &self.key_id),
            ("SCOPE", &self.scope),
        ]);
        if self.audience_list().is_empty() {
            missing.push("AUDIENCE".to_string());
        }
        missing.extend(Self::missing(&[
            ("IDDOMAIN", &self.identity_domain),
            ("V_KS_PASS", &self.container_passphrase_id),
            ("V_PK_PASS", &self.key_passphrase_id),
        ]));
        missing
    }

    /// Every mandatory key of the resource-server path that is absent or blank
    pub fn missing_validation_keys(&self) -> Vec<String> {
        Self::missing(&[
            ("IDCS_URL", &self.idcs_url),
            ("CLIENT_ID", &self.client_id),
            ("V_CLIENT_SECRET", &self.client_secret_id),
            ("EXPECTED_AUDIENCE", &self.expected_audience),
        ])
    }

    fn missing(fields: &[(&str, &Option<String>)]) -> Vec<String> {
        fields
            .iter()
            .filter(|(_, value)| value.as_deref().is_none_or(|v| v.trim().is_empty()))
            .map(|(key, _)| (*key).to_string())
            .collect()
    }

    /// Resolve the token-acquisition settings
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::ConfigurationIncomplete`] listing every missing key, or
    /// [`AuthError::InvalidConfiguration`] if the identity provider URL is unusable.
    pub fn assertion_settings(&self) -> AuthResult<AssertionSettings> {
        let missing_keys = self.missing_assertion_keys();
        if !missing_keys.is_empty() {
            return Err(AuthError::ConfigurationIncomplete { missing_keys });
        }

        Ok(AssertionSettings {
            endpoints: IdentityProviderEndpoints::from_base_url(&required(&self.idcs_url))?,
            client_id: required(&self.client_id),
            key_id: required(&self.key_id),
            scope: required(&self.scope),
            audience: self.audience_list(),
            identity_domain: required(&self.identity_domain),
            keystore_path: self.keystore_path.clone(),
            keystore_secret_id: self
                .keystore_secret_id
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            container_passphrase_id: required(&self.container_passphrase_id),
            key_passphrase_id: required(&self.key_passphrase_id),
        })
    }

    /// Resolve the resource-server settings
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::ConfigurationIncomplete`] listing every missing key, or
    /// [`AuthError::InvalidConfiguration`] if the identity provider URL is unusable.
    pub fn validation_settings(&self) -> AuthResult<ValidationSettings> {
        let missing_keys = self.missing_validation_keys();
        if !missing_keys.is_empty() {
            return Err(AuthError::ConfigurationIncomplete { missing_keys });
        }

        Ok(ValidationSettings {
            endpoints: IdentityProviderEndpoints::from_base_url(&required(&self.idcs_url))?,
            client_id: required(&self.client_id),
            client_secret_id: required(&self.client_secret_id),
            expected_audience: required(&self.expected_audience),
        })
    }

    /// Token endpoint derived from `IDCS_URL`, if configured
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::ConfigurationIncomplete`] if `IDCS_URL` is missing.
    pub fn token_endpoint(&self) -> AuthResult<Url> {
        match self.idcs_url.as_deref().map(str::trim) {
            Some(base) if !base.is_empty() => {
                Ok(IdentityProviderEndpoints::from_base_url(base)?.token)
            }
            _ => Err(AuthError::ConfigurationIncomplete {
                missing_keys: vec!["IDCS_URL".to_string()],
            }),
        }
    }
}

// Only called after the missing-key check has passed.
fn required(value: &Option<String>) -> String {
    value.as_deref().map(str::trim).unwrap_or_default().to_string()
}

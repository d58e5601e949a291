//! HTTP client for identity-provider calls
//!
//! One shared `reqwest` client is used for the token endpoint and the JWKS endpoint.
//! It is configured to:
//! - NOT follow redirects (SSRF protection per OAuth2 security guidance)
//! - Use rustls for TLS (no OpenSSL dependency)
//! - Apply an explicit request timeout

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use url::Url;

use crate::error::{AuthError, AuthResult};

/// Content type the identity provider expects for token requests
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";

const TOKEN_PATH: &str = "/oauth2/v1/token";
const JWKS_PATH: &str = "/admin/v1/SigningCert/jwk";

/// Endpoints derived from the identity provider base URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityProviderEndpoints {
    /// `{base}/oauth2/v1/token`
    pub token: Url,
    /// `{base}/admin/v1/SigningCert/jwk`
    pub jwks: Url,
}

impl IdentityProviderEndpoints {
    /// Derive endpoints from a base URL such as `https://idcs-xxxx.identity.oraclecloud.com`
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfiguration`] if the URL does not parse or does not use
    /// HTTPS (plain HTTP is only allowed for `localhost` and `127.0.0.1`).
    pub fn from_base_url(base: &str) -> AuthResult<Self> {
        let base = base.trim().trim_end_matches('/');
        Ok(Self {
            token: secure_endpoint(&format!("{base}{TOKEN_PATH}"))?,
            jwks: secure_endpoint(&format!("{base}{JWKS_PATH}"))?,
        })
    }
}

/// Parse an endpoint URL and require HTTPS outside local development
///
/// # Errors
///
/// Returns [`AuthError::InvalidConfiguration`] for unparseable or insecure URLs.
pub fn secure_endpoint(raw: &str) -> AuthResult<Url> {
    let url = Url::parse(raw).map_err(|e| {
        AuthError::InvalidConfiguration(format!("invalid identity provider URL '{raw}': {e}"))
    })?;

    match (url.scheme(), url.host_str()) {
        ("https", Some(_)) => Ok(url),
        ("http", Some("localhost" | "127.0.0.1")) => Ok(url),
        _ => Err(AuthError::InvalidConfiguration(format!(
            "identity provider URL must use HTTPS (HTTP only allowed for localhost): {raw}"
        ))),
    }
}

/// Encode form parameters as `application/x-www-form-urlencoded`
pub fn encode_form(params: &[(&str, &str)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params)
        .finish()
}

/// HTTP client used for all identity-provider traffic
#[derive(Clone)]
pub struct IdpHttpClient {
    inner: reqwest::Client,
}

impl IdpHttpClient {
    /// Create a client with redirects disabled and the given request timeout
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Transport`] if the TLS backend cannot be initialized.
    pub fn new(timeout: Duration) -> AuthResult<Self> {
        let inner = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .build()?;

        Ok(Self { inner })
    }

    /// Wrap an existing reqwest client
    ///
    /// # Warning
    /// Ensure the client is configured with `redirect::Policy::none()`.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { inner: client }
    }

    /// POST a form body with the identity provider's form content type
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Transport`] if the request cannot be sent.
    pub async fn post_form(
        &self,
        url: &Url,
        headers: HeaderMap,
        params: &[(&str, &str)],
    ) -> AuthResult<reqwest::Response> {
        self.inner
            .post(url.clone())
            .headers(headers)
            .header(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE))
            .body(encode_form(params))
            .send()
            .await
            .map_err(|e| AuthError::Transport(format!("POST {url} failed: {e}")))
    }

    /// GET a resource with a bearer credential
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Transport`] if the request cannot be sent.
    pub async fn get_with_bearer(&self, url: &Url, bearer: &str) -> AuthResult<reqwest::Response> {
        let mut authorization = HeaderValue::from_str(&format!("Bearer {bearer}"))
            .map_err(|e| AuthError::Transport(format!("unusable bearer credential: {e}")))?;
        authorization.set_sensitive(true);

        self.inner
            .get(url.clone())
            .header(AUTHORIZATION, authorization)
            .send()
            .await
            .map_err(|e| AuthError::Transport(format!("GET {url} failed: {e}")))
    }
}

impl std::fmt::Debug for IdpHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdpHttpClient")
            .field("inner", &"<reqwest::Client>")
            .finish()
    }
}

//! Common test utilities for integration tests
//!
//! A wiremock-backed identity provider exposing the token endpoint and the JWKS endpoint,
//! fixture loaders, a test access-token signer and configuration helpers.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use jwtgate_auth::{KeyContainerBuilder, SecurityConfig};
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const CLIENT_ID: &str = "client-123";
pub const CLIENT_SECRET: &str = "client-secret-value";
pub const KEY_ALIAS: &str = "test-signing-key";
pub const IDENTITY_DOMAIN: &str = "Default";
pub const SCOPE: &str = "urn:opc:resource:consumer::all";
pub const ASSERTION_AUDIENCE: &str = "https://identity.oraclecloud.com/";
pub const EXPECTED_AUDIENCE: &str = "urn:opc:resource:myapp";
pub const CONTAINER_PASSPHRASE: &str = "container-passphrase";
pub const KEY_PASSPHRASE: &str = "key-passphrase";
/// Store and key passphrase of `secret-keystore.p12`
pub const PKCS12_PASSPHRASE: &str = "keystore-passphrase";
pub const CLIENT_CREDENTIALS_TOKEN: &str = "client-credentials-token";

pub const TOKEN_PATH: &str = "/oauth2/v1/token";
pub const JWKS_PATH: &str = "/admin/v1/SigningCert/jwk";

/// Form-encoded `grant_type` of the jwt-bearer exchange
pub const JWT_BEARER_GRANT_FORM: &str =
    "grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer";

/// Identity provider mock
pub struct MockIdentityProvider {
    pub server: MockServer,
}

impl MockIdentityProvider {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn base_url(&self) -> String {
        self.server.uri()
    }

    pub fn token_endpoint(&self) -> String {
        format!("{}{TOKEN_PATH}", self.server.uri())
    }

    /// jwt-bearer exchange returning `access_token`, expected `times` times
    pub async fn mock_exchange(&self, access_token: &str, times: u64) {
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains(JWT_BEARER_GRANT_FORM))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": access_token,
                "token_type": "Bearer",
                "expires_in": 3600,
            })))
            .expect(times)
            .mount(&self.server)
            .await;
    }

    /// jwt-bearer exchange answering with `status` and a raw body
    pub async fn mock_exchange_response(&self, status: u16, body: &str) {
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains(JWT_BEARER_GRANT_FORM))
            .respond_with(
                ResponseTemplate::new(status).set_body_raw(body.as_bytes().to_vec(), "application/json"),
            )
            .mount(&self.server)
            .await;
    }

    /// Fail the test if the token endpoint is called at all
    pub async fn expect_no_token_calls(&self) {
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&self.server)
            .await;
    }

    /// Client-credentials grant authenticated with HTTP Basic
    pub async fn mock_client_credentials(&self, times: u64) {
        let basic = STANDARD.encode(format!("{CLIENT_ID}:{CLIENT_SECRET}"));
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(header("authorization", format!("Basic {basic}").as_str()))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("scope=urn%3Aopc%3Aidm%3A__myscopes__"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": CLIENT_CREDENTIALS_TOKEN,
                "token_type": "Bearer",
                "expires_in": 3600,
            })))
            .expect(times)
            .mount(&self.server)
            .await;
    }

    /// JWKS endpoint serving `jwks` to the client-credentials bearer
    pub async fn mock_jwks(&self, jwks: serde_json::Value, times: u64) {
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .and(header(
                "authorization",
                format!("Bearer {CLIENT_CREDENTIALS_TOKEN}").as_str(),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks))
            .expect(times)
            .mount(&self.server)
            .await;
    }

    /// JWKS endpoint failing with `status`
    pub async fn mock_jwks_failure(&self, status: u16, times: u64) {
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(status).set_body_string("unavailable"))
            .expect(times)
            .mount(&self.server)
            .await;
    }
}

pub fn fixture_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn fixture(name: &str) -> String {
    std::fs::read_to_string(fixture_path(name)).expect("fixture missing")
}

pub fn signing_jwks() -> serde_json::Value {
    serde_json::from_str(&fixture("signing-jwks.json")).expect("invalid JWKS fixture")
}

pub fn other_jwks() -> serde_json::Value {
    serde_json::from_str(&fixture("other-jwks.json")).expect("invalid JWKS fixture")
}

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Sign an access token with the fixture key matching `signing-jwks.json`
pub fn sign_access_token(claims: &serde_json::Value, kid: Option<&str>) -> String {
    sign_with(claims, kid, &fixture("signing-key.pkcs1.pem"))
}

/// Sign an access token with an RSA key absent from `signing-jwks.json`
pub fn sign_with_other_key(claims: &serde_json::Value, kid: Option<&str>) -> String {
    sign_with(claims, kid, &fixture("other-key.pkcs1.pem"))
}

fn sign_with(claims: &serde_json::Value, kid: Option<&str>, key_pem: &str) -> String {
    use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};

    let mut header = Header::new(Algorithm::RS256);
    header.kid = kid.map(str::to_string);
    let key = EncodingKey::from_rsa_pem(key_pem.as_bytes()).expect("Invalid RSA key");
    encode(&header, claims, &key).expect("Failed to encode test JWT")
}

/// Access-token claims for `sub` expiring `exp_offset_secs` from now
pub fn access_claims(sub: &str, aud: serde_json::Value, exp_offset_secs: i64) -> serde_json::Value {
    let now = now();
    json!({
        "sub": sub,
        "aud": aud,
        "exp": now + exp_offset_secs,
        "iat": now,
        "scope": "urn:opc:resource:consumer::all openid",
        "client_id": CLIENT_ID,
        "tenant": "tenant-1",
    })
}

/// Write a sealed key container holding the fixture signing key under `KEY_ALIAS`
pub fn write_container(dir: &Path, key_fixture: &str) -> PathBuf {
    let container = KeyContainerBuilder::new()
        .with_iterations(1_000)
        .add_entry(KEY_ALIAS, &fixture(key_fixture), &fixture("signing-cert.pem"))
        .expect("container entry")
        .seal(CONTAINER_PASSPHRASE.as_bytes())
        .expect("container seal");
    let path = dir.join("key-container.json");
    std::fs::write(&path, container).expect("write container");
    path
}

/// Configuration for both flows against `base_url`
pub fn full_config(base_url: &str, keystore_path: &Path) -> SecurityConfig {
    SecurityConfig::default()
        .with_idcs_url(base_url)
        .with_client_id(CLIENT_ID)
        .with_key_id(KEY_ALIAS)
        .with_scope(SCOPE)
        .with_audience(format!("{ASSERTION_AUDIENCE}, {base_url}"))
        .with_identity_domain(IDENTITY_DOMAIN)
        .with_keystore_path(keystore_path)
        .with_passphrase_ids("ks-pass", "pk-pass")
        .with_client_secret_id("client-secret")
        .with_expected_audience(EXPECTED_AUDIENCE)
}

/// Secret provider whose values can be replaced while an orchestrator holds it
#[derive(Default)]
pub struct RotatingSecrets {
    values: std::sync::RwLock<std::collections::HashMap<String, Vec<u8>>>,
}

impl RotatingSecrets {
    pub fn new(values: &[(&str, &str)]) -> Self {
        let secrets = Self::default();
        for (id, value) in values {
            secrets.rotate(id, value);
        }
        secrets
    }

    pub fn rotate(&self, id: &str, value: &str) {
        self.values
            .write()
            .expect("secrets lock")
            .insert(id.to_string(), value.as_bytes().to_vec());
    }
}

#[async_trait::async_trait]
impl jwtgate_auth::SecretProvider for RotatingSecrets {
    async fn get_secret(&self, id: &str) -> jwtgate_auth::AuthResult<secrecy::SecretVec<u8>> {
        let value = self.values.read().expect("secrets lock").get(id).cloned();
        value
            .map(secrecy::Secret::new)
            .ok_or_else(|| jwtgate_auth::AuthError::SecretRetrievalFailure {
                id: id.to_string(),
                reason: "no such secret".to_string(),
            })
    }
}

/// Secrets matching `full_config`
pub fn secrets() -> jwtgate_auth::StaticSecretProvider {
    jwtgate_auth::StaticSecretProvider::new()
        .with_secret("ks-pass", CONTAINER_PASSPHRASE)
        .with_secret("pk-pass", KEY_PASSPHRASE)
        .with_secret("client-secret", CLIENT_SECRET)
}

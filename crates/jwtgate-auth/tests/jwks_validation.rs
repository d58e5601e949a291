//! Bearer validation against the identity provider's JWKS
//!
//! Tests cover:
//! - Client-credentials authentication of the JWKS fetch
//! - Any-of audience semantics
//! - Single fetch across many validations
//! - Sticky failure, explicit reset and time-boxed retry
//! - Malformed tokens rejected before any network call

mod common;

use common::{
    CLIENT_ID, CLIENT_SECRET, EXPECTED_AUDIENCE, JWKS_PATH, MockIdentityProvider, TOKEN_PATH,
    access_claims, secrets, sign_access_token, sign_with_other_key,
};
use jwtgate_auth::{
    AuthError, ConfiguredKeySource, IdentityProviderEndpoints, IdpHttpClient, InitStatus,
    JwksClient, JwksValidator, SecurityConfig,
};
use secrecy::SecretString;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

fn http() -> IdpHttpClient {
    IdpHttpClient::new(Duration::from_secs(5)).expect("http client")
}

fn validation_config(base_url: &str) -> SecurityConfig {
    SecurityConfig::default()
        .with_idcs_url(base_url)
        .with_client_id(CLIENT_ID)
        .with_client_secret_id("client-secret")
        .with_expected_audience(EXPECTED_AUDIENCE)
}

fn validator(idp: &MockIdentityProvider) -> JwksValidator {
    let source = ConfiguredKeySource::new(
        validation_config(&idp.base_url()),
        Arc::new(secrets()),
        http(),
    );
    JwksValidator::new(Arc::new(source), EXPECTED_AUDIENCE)
}

#[tokio::test]
async fn test_jwks_client_authenticates_with_client_credentials() {
    let idp = MockIdentityProvider::start().await;
    idp.mock_client_credentials(1).await;
    idp.mock_jwks(common::signing_jwks(), 1).await;

    let client = JwksClient::new(
        http(),
        IdentityProviderEndpoints::from_base_url(&idp.base_url()).unwrap(),
        CLIENT_ID,
        SecretString::new(CLIENT_SECRET.to_string()),
    );
    let jwks = client.fetch().await.expect("JWKS fetch");

    assert_eq!(jwks.keys.len(), 1);
    assert_eq!(jwks.keys[0].common.key_id.as_deref(), Some("test-signing-key"));
}

#[tokio::test]
async fn test_audience_any_of_semantics() {
    // GIVEN: a validator expecting urn:opc:resource:myapp
    let idp = MockIdentityProvider::start().await;
    idp.mock_client_credentials(1).await;
    idp.mock_jwks(common::signing_jwks(), 1).await;
    let validator = validator(&idp);

    // WHEN/THEN: the audience anywhere in the list is accepted
    let accepted = sign_access_token(
        &access_claims(
            "alice",
            json!(["urn:opc:resource:other", EXPECTED_AUDIENCE]),
            600,
        ),
        Some("test-signing-key"),
    );
    let claims = validator.validate(&accepted).await.expect("token accepted");
    assert_eq!(claims.sub, "alice");

    // AND: a list without it is rejected
    let rejected = sign_access_token(
        &access_claims("alice", json!(["urn:opc:resource:other"]), 600),
        Some("test-signing-key"),
    );
    let err = validator.validate(&rejected).await.unwrap_err();
    assert_eq!(
        err,
        AuthError::AudienceMismatch {
            got: vec!["urn:opc:resource:other".to_string()],
            expected: EXPECTED_AUDIENCE.to_string()
        }
    );
    assert_eq!(
        err.to_string(),
        "Incorrect audience, got [\"urn:opc:resource:other\"] instead of expected urn:opc:resource:myapp"
    );
}

#[tokio::test]
async fn test_explicit_expected_audience_per_call() {
    let idp = MockIdentityProvider::start().await;
    idp.mock_client_credentials(1).await;
    idp.mock_jwks(common::signing_jwks(), 1).await;
    let validator = validator(&idp);

    let token = sign_access_token(&access_claims("alice", json!("urn:opc:resource:billing"), 600), None);
    assert!(validator.validate(&token).await.is_err());
    assert!(
        validator
            .validate_for(&token, "urn:opc:resource:billing")
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn test_key_set_is_fetched_once() {
    let idp = MockIdentityProvider::start().await;
    idp.mock_client_credentials(1).await;
    idp.mock_jwks(common::signing_jwks(), 1).await;
    let validator = Arc::new(validator(&idp));

    let token = sign_access_token(&access_claims("alice", json!([EXPECTED_AUDIENCE]), 600), None);
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let validator = Arc::clone(&validator);
            let token = token.clone();
            tokio::spawn(async move { validator.validate(&token).await })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }
    assert_eq!(validator.status().await, InitStatus::Ready);
}

#[tokio::test]
async fn test_token_signed_by_unknown_key_is_rejected() {
    let idp = MockIdentityProvider::start().await;
    idp.mock_client_credentials(1).await;
    idp.mock_jwks(common::signing_jwks(), 1).await;
    let validator = validator(&idp);

    let token = sign_with_other_key(&access_claims("alice", json!([EXPECTED_AUDIENCE]), 600), None);
    let err = validator.validate(&token).await.unwrap_err();
    assert_eq!(err.category(), "invalid_signature");

    // A kid the set does not know is rejected without trying other keys.
    let token = sign_with_other_key(
        &access_claims("alice", json!([EXPECTED_AUDIENCE]), 600),
        Some("other-key"),
    );
    let err = validator.validate(&token).await.unwrap_err();
    assert!(matches!(err, AuthError::SignatureInvalid(ref m) if m.contains("other-key")));
}

#[tokio::test]
async fn test_fetch_failure_is_sticky() {
    // GIVEN: a JWKS endpoint that is down
    let idp = MockIdentityProvider::start().await;
    idp.mock_client_credentials(1).await;
    idp.mock_jwks_failure(503, 1).await;
    let validator = validator(&idp);
    let token = sign_access_token(&access_claims("alice", json!([EXPECTED_AUDIENCE]), 600), None);

    // WHEN: validating repeatedly
    for _ in 0..3 {
        let err = validator.validate(&token).await.unwrap_err();
        // THEN: every call fails fast with the original cause and no new fetch happens
        assert!(
            matches!(err, AuthError::ValidatorNotReady(ref m) if m.contains("503")),
            "{err}"
        );
        assert!(
            err.to_string()
                .starts_with("Resource server is not able to validate tokens")
        );
    }
    assert!(matches!(validator.status().await, InitStatus::Failed { .. }));
}

#[tokio::test]
async fn test_reset_allows_recovery() {
    let idp = MockIdentityProvider::start().await;
    idp.mock_client_credentials(2).await;
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&idp.server)
        .await;
    idp.mock_jwks(common::signing_jwks(), 1).await;

    let validator = validator(&idp);
    let token = sign_access_token(&access_claims("alice", json!([EXPECTED_AUDIENCE]), 600), None);

    assert_eq!(
        validator.validate(&token).await.unwrap_err().category(),
        "validator_not_ready"
    );

    validator.reset().await;
    assert_eq!(validator.status().await, InitStatus::Uninitialized);
    assert!(validator.validate(&token).await.is_ok());
}

#[tokio::test]
async fn test_retry_interval_allows_new_fetch() {
    let idp = MockIdentityProvider::start().await;
    idp.mock_client_credentials(2).await;
    idp.mock_jwks_failure(500, 2).await;

    let validator = validator(&idp).with_retry_after(Some(Duration::from_millis(50)));
    let token = sign_access_token(&access_claims("alice", json!([EXPECTED_AUDIENCE]), 600), None);

    assert!(validator.validate(&token).await.is_err());
    assert!(validator.validate(&token).await.is_err());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(validator.validate(&token).await.is_err());
}

#[tokio::test]
async fn test_malformed_tokens_never_reach_the_network() {
    let idp = MockIdentityProvider::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&idp.server)
        .await;
    idp.mock_jwks_failure(500, 0).await;
    let validator = validator(&idp);

    for token in ["not.a.jwt.extra", "onlyonepart"] {
        let err = validator.validate(token).await.unwrap_err();
        assert_eq!(err.category(), "malformed_token", "{token}");
    }
    assert_eq!(validator.status().await, InitStatus::Uninitialized);
}

#[tokio::test]
async fn test_rejected_client_credentials_fail_initialization() {
    let idp = MockIdentityProvider::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_string(r#"{"error":"invalid_client"}"#))
        .expect(1)
        .mount(&idp.server)
        .await;
    idp.mock_jwks_failure(500, 0).await;

    let validator = validator(&idp);
    let err = validator.initialize().await.unwrap_err();
    assert!(
        matches!(err, AuthError::ValidatorNotReady(ref m) if m.contains("invalid_client")),
        "{err}"
    );
}

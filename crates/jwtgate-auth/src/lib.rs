//! # jwtgate-auth - OAuth2 Assertion and Bearer Validation Engine
//!
//! Two flows for services sitting behind an OAuth2 identity provider:
//!
//! - **Client**: obtain an access token on behalf of an end user by signing a client assertion
//!   and a user assertion with a locally held RSA key and exchanging them at the token
//!   endpoint (jwt-bearer grant, RFC 7523)
//! - **Resource server**: validate inbound bearer tokens against the provider's JWKS and turn
//!   the result into an authorization decision
//!
//! ## Architecture
//!
//! - [`config`] - flat configuration loaded from the environment or a file
//! - [`secrets`] - [`SecretProvider`] seam for passphrases and the client secret
//! - [`keystore`] - PKCS#12 keystores, passphrase-protected key containers and [`KeyMaterialStore`]
//! - [`jwt`] - claim sets, RS256 assertion signing, JWKS retrieval and validation
//! - [`oauth2`] - identity-provider HTTP client and the token exchange
//! - [`cache`] - per-subject access token cache
//! - [`orchestrator`] - [`SecurityOrchestrator`], the service object handlers hold
//! - [`init`] - once-initialized state with sticky, observable failure
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use jwtgate_auth::{SecurityConfig, SecurityOrchestrator, StaticSecretProvider};
//!
//! # tokio_test::block_on(async {
//! let config = SecurityConfig::default()
//!     .with_idcs_url("https://idcs.example.com")
//!     .with_client_id("client-123")
//!     .with_client_secret_id("client-secret")
//!     .with_expected_audience("urn:opc:resource:myapp");
//! let secrets = StaticSecretProvider::new().with_secret("client-secret", "s3cret");
//!
//! let orchestrator = SecurityOrchestrator::new(config, Arc::new(secrets))?;
//! let decision = orchestrator.authorize_incoming("Bearer eyJhbGciOi...").await;
//! println!("{}", serde_json::to_string_pretty(&decision)?);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod init;
pub mod jwt;
pub mod keystore;
pub mod oauth2;
pub mod orchestrator;
pub mod secrets;

#[doc(inline)]
pub use config::SecurityConfig;

#[doc(inline)]
pub use error::{AuthError, AuthResult};

pub use cache::{CacheLookup, CachedToken, SubjectTokenCache};
pub use init::InitStatus;
pub use jwt::{
    AccessTokenClaims, AssertionSigner, ClaimSet, CompactToken, ConfiguredKeySource,
    JwksClient, JwksValidator, KeySetSource, SignedAssertion,
};
pub use keystore::{KeyContainerBuilder, KeyMaterial, KeyMaterialStore};
pub use oauth2::{AccessToken, IdentityProviderEndpoints, IdpHttpClient, TokenExchangeClient};
pub use orchestrator::{AuthorizationDecision, SecurityOrchestrator};
pub use secrets::{FileSecretProvider, SecretProvider, StaticSecretProvider};

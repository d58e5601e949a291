//! OAuth2 plumbing for the identity provider
//!
//! - `http_client` - endpoint derivation, HTTPS enforcement and the form/bearer HTTP calls
//! - `exchange` - the jwt-bearer grant that turns two signed assertions into an access token

pub mod exchange;
pub mod http_client;

// Re-export exchange types
pub use exchange::{
    AccessToken, IDENTITY_DOMAIN_HEADER, JWT_BEARER_CLIENT_ASSERTION_TYPE, JWT_BEARER_GRANT_TYPE,
    TokenExchangeClient,
};

// Re-export HTTP client adapter
pub use http_client::{IdentityProviderEndpoints, IdpHttpClient, secure_endpoint};

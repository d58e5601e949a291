//! Error types for assertion signing, token exchange and bearer validation

use thiserror::Error;

/// Result type for jwtgate operations
pub type AuthResult<T> = Result<T, AuthError>;

/// Error taxonomy shared by the token-acquisition and resource-server paths
///
/// Every variant maps to a stable reason code via [`AuthError::category`], which is what
/// authorization decisions expose to callers and what logs record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingToken,

    #[error("Malformed token: {0}")]
    MalformedToken(String),

    #[error("Invalid token signature: {0}")]
    SignatureInvalid(String),

    #[error("Incorrect audience, got {got:?} instead of expected {expected}")]
    AudienceMismatch { got: Vec<String>, expected: String },

    #[error("Token expired: {0}")]
    TokenExpired(String),

    #[error("Invalid token claims: {0}")]
    InvalidClaims(String),

    #[error("Resource server is not able to validate tokens: {0}")]
    ValidatorNotReady(String),

    #[error("Key material missing for alias '{alias}'")]
    KeyMaterialMissing { alias: String },

    #[error("Failed to load key material: {0}")]
    KeyMaterialLoadFailure(String),

    #[error("Failed to sign assertion: {0}")]
    SigningFailure(String),

    #[error("Failed to retrieve secret '{id}': {reason}")]
    SecretRetrievalFailure { id: String, reason: String },

    #[error("Token endpoint returned status {status}: {body}")]
    TokenEndpointFailure { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration incomplete, missing: {}", .missing_keys.join(", "))]
    ConfigurationIncomplete { missing_keys: Vec<String> },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl AuthError {
    /// Machine-readable reason code for decisions, metrics and logging
    pub fn category(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "missing_token",
            AuthError::MalformedToken(_) => "malformed_token",
            AuthError::SignatureInvalid(_) => "invalid_signature",
            AuthError::AudienceMismatch { .. } => "audience_mismatch",
            AuthError::TokenExpired(_) => "token_expired",
            AuthError::InvalidClaims(_) => "invalid_claims",
            AuthError::ValidatorNotReady(_) => "validator_not_ready",
            AuthError::KeyMaterialMissing { .. } => "key_material_missing",
            AuthError::KeyMaterialLoadFailure(_) => "key_material_load_failure",
            AuthError::SigningFailure(_) => "signing_failure",
            AuthError::SecretRetrievalFailure { .. } => "secret_retrieval_failure",
            AuthError::TokenEndpointFailure { .. } => "token_endpoint_failure",
            AuthError::Transport(_) => "transport_failure",
            AuthError::ConfigurationIncomplete { .. } => "configuration_incomplete",
            AuthError::InvalidConfiguration(_) => "invalid_configuration",
        }
    }

    /// Whether a caller may reasonably retry the operation that produced this error
    ///
    /// Network failures, identity-provider 5xx responses and a not-ready validator are
    /// transient. Bad signatures, bad configuration and bad key material are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            AuthError::Transport(_) | AuthError::ValidatorNotReady(_) => true,
            AuthError::TokenEndpointFailure { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// True for errors raised while inspecting an inbound token's structure or claims
    pub fn is_claim_error(&self) -> bool {
        matches!(
            self,
            AuthError::MalformedToken(_) | AuthError::InvalidClaims(_)
        )
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        AuthError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories_are_stable() {
        assert_eq!(AuthError::MissingToken.category(), "missing_token");
        assert_eq!(
            AuthError::SignatureInvalid("bad".into()).category(),
            "invalid_signature"
        );
        assert_eq!(
            AuthError::ConfigurationIncomplete {
                missing_keys: vec!["SCOPE".into()]
            }
            .category(),
            "configuration_incomplete"
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(AuthError::Transport("connection reset".into()).is_retryable());
        assert!(
            AuthError::TokenEndpointFailure {
                status: 503,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(
            !AuthError::TokenEndpointFailure {
                status: 400,
                body: "{}".into()
            }
            .is_retryable()
        );
        assert!(!AuthError::SignatureInvalid("bad".into()).is_retryable());
        assert!(
            !AuthError::ConfigurationIncomplete {
                missing_keys: vec![]
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_messages() {
        let err = AuthError::AudienceMismatch {
            got: vec!["urn:opc:resource:other".into()],
            expected: "urn:opc:resource:myapp".into(),
        };
        assert_eq!(
            err.to_string(),
            r#"Incorrect audience, got ["urn:opc:resource:other"] instead of expected urn:opc:resource:myapp"#
        );

        let err = AuthError::ConfigurationIncomplete {
            missing_keys: vec!["CLIENT_ID".into(), "SCOPE".into()],
        };
        assert_eq!(
            err.to_string(),
            "Configuration incomplete, missing: CLIENT_ID, SCOPE"
        );
    }
}

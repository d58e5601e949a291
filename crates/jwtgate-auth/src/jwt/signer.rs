//! RS256 assertion signing
//!
//! Assertions carry `kid` plus both certificate thumbprints (`x5t`, `x5t#S256`) in the
//! header so the identity provider can locate the client's registered certificate.

use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use rsa::RsaPrivateKey;
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use secrecy::ExposeSecret;
use tracing::debug;

use super::ClaimSet;
use crate::error::{AuthError, AuthResult};
use crate::keystore::KeyMaterial;

/// A compact, signed assertion and the claims it carries
#[derive(Clone)]
pub struct SignedAssertion {
    token: String,
    claims: ClaimSet,
}

impl SignedAssertion {
    /// Compact serialization `header.payload.signature`
    pub fn as_str(&self) -> &str {
        &self.token
    }

    pub fn claims(&self) -> &ClaimSet {
        &self.claims
    }

    pub fn into_string(self) -> String {
        self.token
    }
}

impl std::fmt::Debug for SignedAssertion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedAssertion")
            .field("token", &"<redacted>")
            .field("claims", &self.claims)
            .finish()
    }
}

/// Builds and signs jwt-bearer assertions
///
/// # Example
///
/// ```rust,no_run
/// # use jwtgate_auth::{AssertionSigner, KeyMaterial};
/// # fn demo(material: &KeyMaterial) -> Result<(), jwtgate_auth::AuthError> {
/// let audience = vec!["https://identity.oraclecloud.com/".to_string()];
///
/// let client = AssertionSigner::build_assertion(material, "client-id", "client-id", &audience)?;
/// let user = AssertionSigner::build_assertion(material, "client-id", "alice", &audience)?;
/// assert_ne!(client.claims().jti, user.claims().jti);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct AssertionSigner;

impl AssertionSigner {
    /// Build claims issued now and sign them
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::SigningFailure`] if the private key is not RSA or signing fails.
    pub fn build_assertion(
        key_material: &KeyMaterial,
        issuer: &str,
        subject: &str,
        audience: &[String],
    ) -> AuthResult<SignedAssertion> {
        Self::sign(key_material, ClaimSet::new(issuer, subject, audience.to_vec()))
    }

    /// Sign an explicit claim set
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::SigningFailure`] if the private key is not RSA or signing fails.
    pub fn sign(key_material: &KeyMaterial, claims: ClaimSet) -> AuthResult<SignedAssertion> {
        let key = encoding_key(key_material)?;

        let mut header = Header::new(Algorithm::RS256);
        header.typ = None;
        header.kid = Some(key_material.key_id().to_string());
        header.x5t = Some(key_material.thumbprint_sha1());
        header.x5t_s256 = Some(key_material.thumbprint_sha256());

        let token = encode(&header, &claims, &key)
            .map_err(|e| AuthError::SigningFailure(format!("RS256 signing failed: {e}")))?;

        debug!(
            kid = key_material.key_id(),
            subject = %claims.sub,
            jti = %claims.jti,
            "Signed assertion"
        );
        Ok(SignedAssertion { token, claims })
    }
}

fn encoding_key(key_material: &KeyMaterial) -> AuthResult<EncodingKey> {
    let rsa_key = RsaPrivateKey::from_pkcs8_der(key_material.private_key().expose_secret())
        .map_err(|e| {
            AuthError::SigningFailure(format!(
                "private key '{}' is not an RSA key: {e}",
                key_material.key_id()
            ))
        })?;
    let pkcs1 = rsa_key
        .to_pkcs1_der()
        .map_err(|e| AuthError::SigningFailure(format!("cannot encode RSA key: {e}")))?;
    Ok(EncodingKey::from_rsa_der(pkcs1.as_bytes()))
}

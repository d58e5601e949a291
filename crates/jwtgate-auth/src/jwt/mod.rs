//! JWT types, assertion signing and JWKS validation
//!
//! - [`ClaimSet`] - the seven claims every outbound assertion carries
//! - [`AccessTokenClaims`] - typed view of an inbound access token
//! - [`CompactToken`] - structural parse of `header.payload.signature` without verification
//! - [`signer`] - RS256 assertion signing with certificate thumbprints
//! - [`jwks`] - key set retrieval from the identity provider
//! - [`validator`] - signature and audience validation against a fetched key set

pub mod jwks;
pub mod signer;
pub mod validator;

pub use jwks::{ConfiguredKeySource, JwksClient, KeySetSource};
pub use signer::{AssertionSigner, SignedAssertion};
pub use validator::JwksValidator;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::{AuthError, AuthResult};

/// Assertion lifetime: `exp = iat + 3600`
pub const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Claims of an outbound assertion, serialized in declaration order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimSet {
    /// Issuer - the client identifier
    pub iss: String,
    /// Subject - the client identifier or the end-user identifier
    pub sub: String,
    /// Audience list
    pub aud: Vec<String>,
    /// Expiration (epoch seconds)
    pub exp: i64,
    /// Not before (epoch seconds)
    pub nbf: i64,
    /// Issued at (epoch seconds)
    pub iat: i64,
    /// Unique assertion identifier
    pub jti: String,
}

impl ClaimSet {
    /// Claims issued now with a fresh `jti`
    pub fn new(issuer: impl Into<String>, subject: impl Into<String>, audience: Vec<String>) -> Self {
        Self::issued_at(issuer, subject, audience, chrono::Utc::now().timestamp())
    }

    /// Claims issued at `iat` with a fresh `jti`
    pub fn issued_at(
        issuer: impl Into<String>,
        subject: impl Into<String>,
        audience: Vec<String>,
        iat: i64,
    ) -> Self {
        Self {
            iss: issuer.into(),
            sub: subject.into(),
            aud: audience,
            exp: iat + ASSERTION_LIFETIME_SECS,
            nbf: iat,
            iat,
            jti: Uuid::new_v4().to_string(),
        }
    }
}

/// `aud` may be a single string or a list
pub(crate) fn deserialize_audience<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(aud) => vec![aud],
        OneOrMany::Many(aud) => aud,
    })
}

/// Typed claims of an inbound access token
///
/// `sub`, `aud`, `exp` and `scope` are required; decoding fails with a field-level
/// [`AuthError::InvalidClaims`] when one is missing or mistyped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject (principal)
    pub sub: String,
    /// Audience list (a single-string `aud` is accepted)
    #[serde(deserialize_with = "deserialize_audience")]
    pub aud: Vec<String>,
    /// Expiration (epoch seconds)
    pub exp: i64,
    /// Space-separated scopes
    pub scope: String,
    /// Issuer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// OAuth client the token was issued to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Tenant the subject belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
}

impl AccessTokenClaims {
    /// Decode typed claims from a verified JSON payload
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidClaims`] naming the offending field.
    pub fn from_value(value: serde_json::Value) -> AuthResult<Self> {
        serde_json::from_value(value).map_err(|e| AuthError::InvalidClaims(e.to_string()))
    }

    /// `scope` split on whitespace
    pub fn scopes(&self) -> Vec<String> {
        self.scope.split_whitespace().map(str::to_string).collect()
    }
}

/// A compact JWT split and decoded, but not verified
///
/// Parsing never touches the network, so structurally broken input is rejected before
/// any key set is consulted.
#[derive(Debug, Clone)]
pub struct CompactToken {
    header: serde_json::Map<String, serde_json::Value>,
    algorithm: String,
    claims: serde_json::Map<String, serde_json::Value>,
}

impl CompactToken {
    /// Split and decode `header.payload.signature`
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MalformedToken`] if the token does not have exactly three
    /// segments, a segment is not base64url, the header is not a JSON object with a string
    /// `alg`, or the payload is not a JSON object. The algorithm itself is not checked here.
    pub fn parse(token: &str) -> AuthResult<Self> {
        let segments: Vec<&str> = token.split('.').collect();
        let [header, payload, signature] = *segments.as_slice() else {
            return Err(AuthError::MalformedToken(format!(
                "expected 3 segments, found {}",
                segments.len()
            )));
        };

        let decode = |segment: &str, name: &str| {
            URL_SAFE_NO_PAD
                .decode(segment)
                .map_err(|e| AuthError::MalformedToken(format!("{name} is not base64url: {e}")))
        };

        let header = json_object(&decode(header, "header")?, "header")?;
        let algorithm = header
            .get("alg")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| AuthError::MalformedToken("header has no 'alg'".to_string()))?
            .to_string();
        let claims = json_object(&decode(payload, "payload")?, "payload")?;
        // An empty signature is well-formed; it simply fails verification.
        decode(signature, "signature")?;

        Ok(Self {
            header,
            algorithm,
            claims,
        })
    }

    pub fn header(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.header
    }

    /// Declared `alg`, exactly as written in the header
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// Declared `kid`, if any
    pub fn key_id(&self) -> Option<&str> {
        self.header.get("kid").and_then(serde_json::Value::as_str)
    }

    pub fn claims(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.claims
    }

    /// Unverified `sub` claim
    pub fn subject(&self) -> Option<&str> {
        self.claims.get("sub").and_then(serde_json::Value::as_str)
    }

    /// Unverified `exp` claim in epoch seconds
    pub fn expires_at(&self) -> Option<i64> {
        self.claims.get("exp").and_then(serde_json::Value::as_i64)
    }
}

fn json_object(bytes: &[u8], name: &str) -> AuthResult<serde_json::Map<String, serde_json::Value>> {
    match serde_json::from_slice(bytes) {
        Ok(serde_json::Value::Object(object)) => Ok(object),
        Ok(_) => Err(AuthError::MalformedToken(format!("{name} is not a JSON object"))),
        Err(e) => Err(AuthError::MalformedToken(format!("invalid {name}: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn segment(value: &serde_json::Value) -> String {
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(value).unwrap())
    }

    fn token(payload: &serde_json::Value) -> String {
        format!(
            "{}.{}.{}",
            segment(&json!({"alg": "RS256", "kid": "k1"})),
            segment(payload),
            URL_SAFE_NO_PAD.encode(b"sig")
        )
    }

    #[test]
    fn test_claim_set_expiry_derivation() {
        for iat in [0, 1_700_000_000, 4_102_444_800] {
            let claims = ClaimSet::issued_at("client", "alice", vec!["aud".into()], iat);
            assert_eq!(claims.exp, iat + 3600);
            assert_eq!(claims.nbf, iat);
            assert_eq!(claims.iat, iat);
        }
    }

    #[test]
    fn test_claim_set_fresh_jti() {
        let a = ClaimSet::new("client", "alice", vec![]);
        let b = ClaimSet::new("client", "alice", vec![]);
        assert_ne!(a.jti, b.jti);
        assert!(Uuid::parse_str(&a.jti).is_ok());
    }

    #[test]
    fn test_claim_set_serialization_order() {
        let claims = ClaimSet {
            iss: "c".into(),
            sub: "s".into(),
            aud: vec!["a".into()],
            exp: 3601,
            nbf: 1,
            iat: 1,
            jti: "j".into(),
        };
        assert_eq!(
            serde_json::to_string(&claims).unwrap(),
            r#"{"iss":"c","sub":"s","aud":["a"],"exp":3601,"nbf":1,"iat":1,"jti":"j"}"#
        );
    }

    #[test]
    fn test_access_token_claims_audience_forms() {
        let single = AccessTokenClaims::from_value(json!({
            "sub": "alice", "aud": "urn:opc:resource:myapp", "exp": 1, "scope": "read write"
        }))
        .unwrap();
        assert_eq!(single.aud, vec!["urn:opc:resource:myapp"]);
        assert_eq!(single.scopes(), vec!["read", "write"]);

        let many = AccessTokenClaims::from_value(json!({
            "sub": "alice", "aud": ["a", "b"], "exp": 1, "scope": "", "tenant": "t1"
        }))
        .unwrap();
        assert_eq!(many.aud, vec!["a", "b"]);
        assert!(many.scopes().is_empty());
        assert_eq!(many.tenant.as_deref(), Some("t1"));
    }

    #[test]
    fn test_access_token_claims_missing_field() {
        let err = AccessTokenClaims::from_value(json!({
            "sub": "alice", "aud": "a", "exp": 1
        }))
        .unwrap_err();
        assert!(
            matches!(err, AuthError::InvalidClaims(ref m) if m.contains("scope")),
            "{err}"
        );
    }

    #[test]
    fn test_compact_token_parse() {
        let parsed = CompactToken::parse(&token(&json!({"sub": "alice", "exp": 42}))).unwrap();
        assert_eq!(parsed.key_id(), Some("k1"));
        assert_eq!(parsed.algorithm(), "RS256");
        assert_eq!(parsed.subject(), Some("alice"));
        assert_eq!(parsed.expires_at(), Some(42));
    }

    #[test]
    fn test_compact_token_keeps_unsupported_algorithms() {
        for alg in ["none", "ES512", "HS256", "XYZ"] {
            let input = format!(
                "{}.{}.{}",
                segment(&json!({"alg": alg, "typ": "JWT"})),
                segment(&json!({"sub": "alice"})),
                URL_SAFE_NO_PAD.encode(b"sig")
            );
            let parsed = CompactToken::parse(&input).unwrap();
            assert_eq!(parsed.algorithm(), alg);
            assert_eq!(parsed.key_id(), None);
        }
    }

    #[test]
    fn test_compact_token_segment_count() {
        for input in ["not.a.jwt.extra", "onlyonepart", "two.parts", ""] {
            let err = CompactToken::parse(input).unwrap_err();
            assert!(
                matches!(err, AuthError::MalformedToken(ref m) if m.contains("segments")),
                "{input}: {err}"
            );
        }
    }

    #[test]
    fn test_compact_token_bad_segments() {
        let header = segment(&json!({"alg": "RS256"}));
        let sig = URL_SAFE_NO_PAD.encode(b"sig");

        let not_base64 = format!("{header}.@@@.{sig}");
        let not_object = format!("{header}.{}.{sig}", segment(&json!([1, 2])));
        let not_json = format!("{header}.{}.{sig}", URL_SAFE_NO_PAD.encode(b"{nope"));
        let bad_header = format!("{}.{}.{sig}", segment(&json!({"typ": "JWT"})), segment(&json!({})));
        let numeric_alg = format!("{}.{}.{sig}", segment(&json!({"alg": 256})), segment(&json!({})));

        for input in [not_base64, not_object, not_json, bad_header, numeric_alg] {
            assert_eq!(
                CompactToken::parse(&input).unwrap_err().category(),
                "malformed_token",
                "{input}"
            );
        }
    }
}

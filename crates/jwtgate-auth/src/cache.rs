//! Per-subject access token cache
//!
//! Entries are keyed by identity domain and lower-cased subject. Validity is never tracked
//! separately: each lookup re-reads the `sub` and `exp` captured from the token itself when
//! it was stored, so an expired or mismatched entry is simply a miss.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::jwt::CompactToken;

/// A stored access token and the unverified claims it was stored with
#[derive(Clone, PartialEq, Eq)]
pub struct CachedToken {
    /// `sub` claim of the token, if readable
    pub subject: Option<String>,
    /// The access token
    pub token: String,
    /// `exp` claim of the token in epoch seconds, if readable
    pub expires_at: Option<i64>,
}

impl std::fmt::Debug for CachedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedToken")
            .field("subject", &self.subject)
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl CachedToken {
    /// Capture `sub` and `exp` from the token's payload without verifying it
    pub fn from_token(token: impl Into<String>) -> Self {
        let token = token.into();
        let (subject, expires_at) = match CompactToken::parse(&token) {
            Ok(parsed) => (parsed.subject().map(str::to_string), parsed.expires_at()),
            Err(_) => (None, None),
        };
        Self {
            subject,
            token,
            expires_at,
        }
    }

    /// Whether this entry may be served for `subject` at `now_ms` (epoch milliseconds)
    pub fn is_valid_for(&self, subject: &str, now_ms: i64) -> bool {
        let subject_matches = self
            .subject
            .as_deref()
            .is_some_and(|cached| cached.to_lowercase() == subject.to_lowercase());
        let unexpired = self
            .expires_at
            .is_some_and(|exp| now_ms < exp.saturating_mul(1000));
        subject_matches && unexpired
    }
}

/// Outcome of a cache lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    Found(String),
    Miss,
}

impl CacheLookup {
    pub fn into_option(self) -> Option<String> {
        match self {
            CacheLookup::Found(token) => Some(token),
            CacheLookup::Miss => None,
        }
    }
}

/// Shared map of subject to most recently exchanged access token
///
/// Cloning yields another handle to the same map. Writes for one subject are atomic with
/// respect to reads of that subject; the last write wins.
#[derive(Clone)]
pub struct SubjectTokenCache {
    identity_domain: String,
    entries: Arc<DashMap<String, CachedToken>>,
}

impl std::fmt::Debug for SubjectTokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubjectTokenCache")
            .field("identity_domain", &self.identity_domain)
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl SubjectTokenCache {
    /// Cache bound to one identity domain
    pub fn new(identity_domain: impl Into<String>) -> Self {
        Self {
            identity_domain: identity_domain.into(),
            entries: Arc::new(DashMap::new()),
        }
    }

    pub fn identity_domain(&self) -> &str {
        &self.identity_domain
    }

    fn key(&self, subject: &str) -> String {
        format!(
            "{}/{}",
            self.identity_domain.to_lowercase(),
            subject.to_lowercase()
        )
    }

    /// Look up a token for `subject` at the current wall-clock time
    pub fn get(&self, subject: &str) -> CacheLookup {
        self.get_at(subject, chrono::Utc::now().timestamp_millis())
    }

    /// Look up a token for `subject` as of `now_ms` (epoch milliseconds)
    pub fn get_at(&self, subject: &str, now_ms: i64) -> CacheLookup {
        match self.entries.get(&self.key(subject)) {
            Some(entry) if entry.is_valid_for(subject, now_ms) => {
                debug!(subject, "Token cache hit");
                CacheLookup::Found(entry.token.clone())
            }
            Some(entry) => {
                debug!(subject, expires_at = ?entry.expires_at, "Cached token is stale");
                CacheLookup::Miss
            }
            None => CacheLookup::Miss,
        }
    }

    /// Store `token` for `subject`, replacing any previous entry
    pub fn put(&self, subject: &str, token: impl Into<String>) -> CachedToken {
        let cached = CachedToken::from_token(token);
        if cached.subject.is_none() || cached.expires_at.is_none() {
            debug!(subject, "Cached token has no readable sub/exp and will not be served");
        }
        self.entries.insert(self.key(subject), cached.clone());
        cached
    }

    /// Drop the entry for `subject`
    pub fn invalidate(&self, subject: &str) -> Option<CachedToken> {
        self.entries.remove(&self.key(subject)).map(|(_, cached)| cached)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

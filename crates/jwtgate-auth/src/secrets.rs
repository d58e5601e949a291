//! Secret retrieval
//!
//! Passphrases, the client secret and optionally the key container itself are addressed by
//! opaque identifiers and fetched through a [`SecretProvider`]. Values are returned as
//! [`SecretVec`] so they are zeroized on drop and never printed by `Debug`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use secrecy::{ExposeSecret, Secret, SecretVec};
use tracing::debug;

use crate::error::{AuthError, AuthResult};

/// Source of secret bytes addressed by identifier
#[async_trait]
pub trait SecretProvider: Send + Sync {
    /// Fetch the secret stored under `id`
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::SecretRetrievalFailure`] if the secret does not exist or cannot
    /// be read.
    async fn get_secret(&self, id: &str) -> AuthResult<SecretVec<u8>>;
}

/// In-memory secrets, for tests and local tooling
#[derive(Default)]
pub struct StaticSecretProvider {
    secrets: HashMap<String, SecretVec<u8>>,
}

impl StaticSecretProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a secret, replacing any previous value for `id`
    pub fn with_secret(mut self, id: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.secrets.insert(id.into(), Secret::new(value.into()));
        self
    }
}

impl std::fmt::Debug for StaticSecretProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&String> = self.secrets.keys().collect();
        ids.sort();
        f.debug_struct("StaticSecretProvider")
            .field("ids", &ids)
            .finish()
    }
}

#[async_trait]
impl SecretProvider for StaticSecretProvider {
    async fn get_secret(&self, id: &str) -> AuthResult<SecretVec<u8>> {
        self.secrets
            .get(id)
            .map(|value| Secret::new(value.expose_secret().clone()))
            .ok_or_else(|| AuthError::SecretRetrievalFailure {
                id: id.to_string(),
                reason: "no such secret".to_string(),
            })
    }
}

/// Secrets stored one per file under a directory, named by identifier
///
/// Vaults commonly hand out secret bundles base64-encoded; [`FileSecretProvider::base64`]
/// decodes file contents before returning them. Raw mode returns bytes verbatim.
#[derive(Debug, Clone)]
pub struct FileSecretProvider {
    dir: PathBuf,
    base64_encoded: bool,
}

impl FileSecretProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            base64_encoded: false,
        }
    }

    pub fn base64(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            base64_encoded: true,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> AuthResult<PathBuf> {
        let usable = !id.is_empty()
            && id != "."
            && id != ".."
            && !id.contains(['/', '\\'])
            && !id.contains('\0');
        if !usable {
            return Err(AuthError::SecretRetrievalFailure {
                id: id.to_string(),
                reason: "identifier is not a plain file name".to_string(),
            });
        }
        Ok(self.dir.join(id))
    }
}

#[async_trait]
impl SecretProvider for FileSecretProvider {
    async fn get_secret(&self, id: &str) -> AuthResult<SecretVec<u8>> {
        let path = self.path_for(id)?;
        let failure = |reason: String| AuthError::SecretRetrievalFailure {
            id: id.to_string(),
            reason,
        };

        let raw = tokio::fs::read(&path).await.map_err(|e| failure(e.to_string()))?;
        debug!(secret_id = id, path = %path.display(), "Read secret from file");

        if !self.base64_encoded {
            return Ok(Secret::new(raw));
        }

        let raw = Secret::new(raw);
        let text = std::str::from_utf8(raw.expose_secret())
            .map_err(|_| failure("base64 secret is not valid UTF-8".to_string()))?;
        STANDARD
            .decode(text.trim())
            .map(Secret::new)
            .map_err(|e| failure(format!("invalid base64: {e}")))
    }
}

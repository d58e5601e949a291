//! Signing key material
//!
//! [`KeyMaterialStore`] loads the private key and certificate chain for each alias from a
//! PKCS#12 keystore or a JSON key container (see [`container`]) exactly once per store.
//! The format is detected from the content. The first successful load
//! wins for the lifetime of the store; a failed load is recorded and reported to later
//! callers instead of being retried, until [`KeyMaterialStore::reset`] is called.

pub mod container;
mod pkcs12;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use pkcs8::{EncryptedPrivateKeyInfo, PrivateKeyInfo};
use ring::digest;
use secrecy::{ExposeSecret, Secret, SecretVec};
use tracing::{error, info};

use crate::error::{AuthError, AuthResult};
use crate::init::{InitCell, InitStatus};

pub use container::KeyContainerBuilder;

/// Private key and certificate chain for one alias
///
/// The private key is held as PKCS#8 DER inside a [`SecretVec`]; it is never exposed
/// through `Debug`.
pub struct KeyMaterial {
    key_id: String,
    certificate_chain: Vec<Vec<u8>>,
    private_key: SecretVec<u8>,
}

impl KeyMaterial {
    /// Build key material from an unencrypted PKCS#8 DER key and a DER certificate
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyMaterialLoadFailure`] if the key is not valid PKCS#8.
    pub fn from_pkcs8_der(
        key_id: impl Into<String>,
        pkcs8_der: Vec<u8>,
        certificate_der: Vec<u8>,
    ) -> AuthResult<Self> {
        let key_id = key_id.into();
        PrivateKeyInfo::try_from(pkcs8_der.as_slice()).map_err(|e| {
            AuthError::KeyMaterialLoadFailure(format!("key '{key_id}' is not PKCS#8: {e}"))
        })?;
        Ok(Self {
            key_id,
            certificate_chain: vec![certificate_der],
            private_key: Secret::new(pkcs8_der),
        })
    }

    /// Build key material from PEM text (`PRIVATE KEY` and `CERTIFICATE` blocks)
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyMaterialLoadFailure`] if either PEM block is missing or invalid.
    pub fn from_pem(
        key_id: impl Into<String>,
        pkcs8_pem: &str,
        certificate_pem: &str,
    ) -> AuthResult<Self> {
        let parse = |text: &str, tag: &str| {
            pem::parse(text)
                .ok()
                .filter(|block| block.tag() == tag)
                .map(pem::Pem::into_contents)
                .ok_or_else(|| AuthError::KeyMaterialLoadFailure(format!("expected a {tag} PEM block")))
        };
        Self::from_pkcs8_der(
            key_id,
            parse(pkcs8_pem, "PRIVATE KEY")?,
            parse(certificate_pem, "CERTIFICATE")?,
        )
    }

    /// Alias the material was loaded under; used as the JWT `kid`
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// DER-encoded leaf certificate
    pub fn certificate(&self) -> &[u8] {
        self.certificate_chain
            .first()
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// DER-encoded certificate chain, leaf first
    pub fn certificate_chain(&self) -> &[Vec<u8>] {
        &self.certificate_chain
    }

    /// PKCS#8 DER private key
    pub fn private_key(&self) -> &SecretVec<u8> {
        &self.private_key
    }

    /// SHA-1 thumbprint of the leaf certificate (`x5t`), base64url without padding
    pub fn thumbprint_sha1(&self) -> String {
        thumbprint(&digest::SHA1_FOR_LEGACY_USE_ONLY, self.certificate())
    }

    /// SHA-256 thumbprint of the leaf certificate (`x5t#S256`), base64url without padding
    pub fn thumbprint_sha256(&self) -> String {
        thumbprint(&digest::SHA256, self.certificate())
    }
}

fn thumbprint(algorithm: &'static digest::Algorithm, der: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(digest::digest(algorithm, der))
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("key_id", &self.key_id)
            .field("certificates", &self.certificate_chain.len())
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Loaded aliases, keyed case-insensitively
struct LoadedKeys {
    by_alias: HashMap<String, Arc<KeyMaterial>>,
}

/// Process-wide store of signing key material
///
/// # Example
///
/// ```rust,no_run
/// # use jwtgate_auth::KeyMaterialStore;
/// # tokio_test::block_on(async {
/// let store = KeyMaterialStore::new();
/// store
///     .load("/tmp/keystore/secret-keystore.p12", b"keystore-pass", b"keystore-pass")
///     .await?;
///
/// let material = store.key_material("signing").await?;
/// println!("x5t = {}", material.thumbprint_sha1());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// # });
/// ```
#[derive(Debug)]
pub struct KeyMaterialStore {
    cell: InitCell<LoadedKeys>,
}

impl Default for KeyMaterialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyMaterialStore {
    pub fn new() -> Self {
        Self {
            cell: InitCell::new("key_material"),
        }
    }

    /// Load the PKCS#12 keystore or key container at `path`; a no-op if the store is
    /// already loaded
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyMaterialLoadFailure`] if the file cannot be read, fails its
    /// integrity check, or a key cannot be decrypted. The failure is recorded and returned
    /// by later calls until [`KeyMaterialStore::reset`].
    pub async fn load(
        &self,
        path: impl AsRef<Path>,
        container_passphrase: &[u8],
        key_passphrase: &[u8],
    ) -> AuthResult<()> {
        let path = path.as_ref();
        self.cell
            .get_or_try_init(|| async {
                let bytes = tokio::fs::read(path).await.map_err(|e| {
                    error!(path = %path.display(), error = %e, "Failed to read key container");
                    AuthError::KeyMaterialLoadFailure(format!(
                        "cannot read key container {}: {e}",
                        path.display()
                    ))
                })?;
                let loaded = decode(&bytes, container_passphrase, key_passphrase)?;
                info!(
                    path = %path.display(),
                    aliases = loaded.by_alias.len(),
                    "Loaded key material"
                );
                Ok(loaded)
            })
            .await
            .map(|_| ())
    }

    /// Load a keystore or key container supplied as bytes (e.g. from a secret provider)
    ///
    /// # Errors
    ///
    /// Same as [`KeyMaterialStore::load`], minus file access.
    pub async fn load_from_bytes(
        &self,
        bytes: &[u8],
        container_passphrase: &[u8],
        key_passphrase: &[u8],
    ) -> AuthResult<()> {
        self.cell
            .get_or_try_init(|| async {
                let loaded = decode(bytes, container_passphrase, key_passphrase)?;
                info!(aliases = loaded.by_alias.len(), "Loaded key material from secret");
                Ok(loaded)
            })
            .await
            .map(|_| ())
    }

    /// Current load state
    pub async fn status(&self) -> InitStatus {
        self.cell.status().await
    }

    /// Forget loaded or failed state so the next `load` reads the container again
    pub async fn reset(&self) {
        self.cell.reset().await;
    }

    /// Key material for `alias`
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyMaterialMissing`] if the alias is absent or the store is not
    /// loaded.
    pub async fn key_material(&self, alias: &str) -> AuthResult<Arc<KeyMaterial>> {
        self.cell
            .get()
            .await
            .and_then(|loaded| loaded.by_alias.get(&alias.to_lowercase()).cloned())
            .ok_or_else(|| AuthError::KeyMaterialMissing {
                alias: alias.to_string(),
            })
    }

    /// DER-encoded leaf certificate for `alias`
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyMaterialMissing`] if the alias is absent or the store is not
    /// loaded.
    pub async fn certificate(&self, alias: &str) -> AuthResult<Vec<u8>> {
        Ok(self.key_material(alias).await?.certificate().to_vec())
    }

    /// PKCS#8 DER private key for `alias`
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyMaterialMissing`] if the alias is absent or the store is not
    /// loaded.
    pub async fn private_key(&self, alias: &str) -> AuthResult<SecretVec<u8>> {
        let material = self.key_material(alias).await?;
        Ok(Secret::new(material.private_key().expose_secret().clone()))
    }
}

fn decode(bytes: &[u8], container_passphrase: &[u8], key_passphrase: &[u8]) -> AuthResult<LoadedKeys> {
    if pkcs12::is_pkcs12(bytes) {
        return decode_pkcs12(bytes, container_passphrase, key_passphrase);
    }

    let entries = container::open(bytes, container_passphrase)?;

    let mut by_alias = HashMap::with_capacity(entries.len());
    for entry in entries {
        let encrypted = EncryptedPrivateKeyInfo::try_from(entry.encrypted_key_der.as_slice())
            .map_err(|e| {
                AuthError::KeyMaterialLoadFailure(format!(
                    "entry '{}': invalid encrypted key: {e}",
                    entry.alias
                ))
            })?;
        let decrypted = encrypted.decrypt(key_passphrase).map_err(|e| {
            AuthError::KeyMaterialLoadFailure(format!(
                "entry '{}': cannot decrypt private key (wrong key passphrase?): {e}",
                entry.alias
            ))
        })?;

        let mut material =
            KeyMaterial::from_pkcs8_der(entry.alias.clone(), decrypted.as_bytes().to_vec(), Vec::new())?;
        material.certificate_chain = entry.certificate_chain;
        by_alias.insert(entry.alias.to_lowercase(), Arc::new(material));
    }

    Ok(LoadedKeys { by_alias })
}

fn decode_pkcs12(
    bytes: &[u8],
    keystore_passphrase: &[u8],
    key_passphrase: &[u8],
) -> AuthResult<LoadedKeys> {
    let entries = pkcs12::open(bytes, keystore_passphrase, key_passphrase)?;

    let mut by_alias = HashMap::with_capacity(entries.len());
    for entry in entries {
        let mut material =
            KeyMaterial::from_pkcs8_der(entry.alias.clone(), entry.pkcs8_der, Vec::new())?;
        material.certificate_chain = entry.certificate_chain;
        by_alias.insert(entry.alias.to_lowercase(), Arc::new(material));
    }

    Ok(LoadedKeys { by_alias })
}

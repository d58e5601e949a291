//! PKCS#12 keystores
//!
//! `.p12` files written by `keytool` or `openssl pkcs12 -export` protect the MAC, the
//! certificate bags and the shrouded key bags with a single password. The keystore
//! passphrase opens the file, and the key passphrase must recover the private key, so
//! for these files both secrets carry the same value.

use p12_keystore::{KeyStore, KeyStoreEntry};

use crate::error::{AuthError, AuthResult};

/// DER `SEQUENCE` tag that every PFX document starts with
const DER_SEQUENCE: u8 = 0x30;

/// One private key entry of a keystore, already decrypted
pub(crate) struct Pkcs12Entry {
    pub(crate) alias: String,
    pub(crate) pkcs8_der: Vec<u8>,
    pub(crate) certificate_chain: Vec<Vec<u8>>,
}

impl std::fmt::Debug for Pkcs12Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pkcs12Entry")
            .field("alias", &self.alias)
            .field("pkcs8_der", &"<redacted>")
            .field("certificates", &self.certificate_chain.len())
            .finish()
    }
}

fn load_failure(message: impl Into<String>) -> AuthError {
    AuthError::KeyMaterialLoadFailure(message.into())
}

/// Whether `bytes` look like a DER-encoded PFX rather than a JSON key container
pub(crate) fn is_pkcs12(bytes: &[u8]) -> bool {
    bytes.first() == Some(&DER_SEQUENCE)
}

/// Open a keystore and return every private key entry with its certificate chain
pub(crate) fn open(
    bytes: &[u8],
    keystore_passphrase: &[u8],
    key_passphrase: &[u8],
) -> AuthResult<Vec<Pkcs12Entry>> {
    let password = std::str::from_utf8(keystore_passphrase)
        .map_err(|_| load_failure("keystore passphrase is not valid UTF-8"))?;
    let keystore = KeyStore::from_pkcs12(bytes, password).map_err(|e| {
        load_failure(format!(
            "cannot open PKCS#12 keystore (wrong keystore passphrase?): {e}"
        ))
    })?;

    let mut entries = Vec::new();
    for (alias, entry) in keystore.entries() {
        let KeyStoreEntry::PrivateKeyChain(chain) = entry else {
            continue;
        };
        if key_passphrase != keystore_passphrase {
            return Err(load_failure(format!(
                "entry '{alias}': cannot recover private key (wrong key passphrase?)"
            )));
        }

        let certificate_chain: Vec<Vec<u8>> = chain
            .chain()
            .iter()
            .map(|cert| cert.as_der().to_vec())
            .collect();
        if certificate_chain.is_empty() {
            return Err(load_failure(format!("entry '{alias}' has no certificate")));
        }

        entries.push(Pkcs12Entry {
            alias: alias.clone(),
            pkcs8_der: chain.key().to_vec(),
            certificate_chain,
        });
    }

    if entries.is_empty() {
        return Err(load_failure("PKCS#12 keystore holds no private key"));
    }
    Ok(entries)
}

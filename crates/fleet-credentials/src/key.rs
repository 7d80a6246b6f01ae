//! CA key encoding
//!
//! Keys are PKCS#8 PEM: `PRIVATE KEY` in clear, or `ENCRYPTED PRIVATE KEY`
//! (PBES2) when a password is configured.

use crate::error::CredentialError;
use pkcs8::{EncryptedPrivateKeyInfo, PrivateKeyInfo};
use rcgen::KeyPair;

const PRIVATE_KEY_TAG: &str = "PRIVATE KEY";
const ENCRYPTED_PRIVATE_KEY_TAG: &str = "ENCRYPTED PRIVATE KEY";

fn usable(password: Option<&[u8]>) -> Option<&[u8]> {
    password.filter(|p| !p.is_empty())
}

/// Decodes a PEM private key, decrypting it with `password` when encrypted.
pub fn decode_private_key(key_pem: &str, password: Option<&[u8]>) -> Result<KeyPair, CredentialError> {
    let block = ::pem::parse(key_pem.as_bytes())
        .map_err(|e| CredentialError::Key(format!("failed to parse PEM: {}", e)))?;

    let der = match block.tag() {
        PRIVATE_KEY_TAG => block.contents().to_vec(),
        ENCRYPTED_PRIVATE_KEY_TAG => {
            let password = usable(password).ok_or_else(|| {
                CredentialError::Key("key is encrypted but no password is configured".to_string())
            })?;
            let info = EncryptedPrivateKeyInfo::try_from(block.contents())
                .map_err(|e| CredentialError::Key(format!("failed to parse encrypted key: {}", e)))?;
            let document = info
                .decrypt(password)
                .map_err(|e| CredentialError::Key(format!("failed to decrypt key: {}", e)))?;
            document.as_bytes().to_vec()
        }
        other => {
            return Err(CredentialError::Key(format!("unsupported key PEM type {}", other)));
        }
    };

    KeyPair::try_from(der.as_slice())
        .map_err(|e| CredentialError::Key(format!("failed to load key: {}", e)))
}

/// Encodes `key` as PEM, encrypted when `password` is non-empty.
pub fn encode_private_key(key: &KeyPair, password: Option<&[u8]>) -> Result<String, CredentialError> {
    let Some(password) = usable(password) else {
        return Ok(key.serialize_pem());
    };
    let der = key.serialize_der();
    let info = PrivateKeyInfo::try_from(der.as_slice())
        .map_err(|e| CredentialError::Key(format!("failed to parse key: {}", e)))?;
    let encrypted = info
        .encrypt(rand::rngs::OsRng, password)
        .map_err(|e| CredentialError::Key(format!("failed to encrypt key: {}", e)))?;
    Ok(::pem::encode(&::pem::Pem::new(
        ENCRYPTED_PRIVATE_KEY_TAG,
        encrypted.as_bytes().to_vec(),
    )))
}

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose, Engine as _};
use rand::RngCore;
use std::path::Path;
use tracing::{info, warn};

use crate::error::StorageError;

pub const ENCRYPTION_KEY_ENV: &str = "BIZDESK_ENCRYPTION_KEY";
const KEY_FILE_NAME: &str = "storage.key";
const NONCE_LEN: usize = 12;

/// Encrypts every blob before it reaches durable storage (token, offline queue).
/// AES-256-GCM, stored as base64(nonce || ciphertext).
pub struct PayloadEncryption {
    cipher: Aes256Gcm,
}

impl PayloadEncryption {
    pub fn from_key(key: [u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(&key.into()),
        }
    }

    /// Key from BIZDESK_ENCRYPTION_KEY (hex) if set, otherwise from a key file in `data_dir`,
    /// generated on first use.
    pub fn from_env_or_file(data_dir: &Path) -> Result<Self, StorageError> {
        if let Ok(hex_key) = std::env::var(ENCRYPTION_KEY_ENV) {
            let key = decode_key(hex_key.trim())?;
            return Ok(Self::from_key(key));
        }

        let key_path = data_dir.join(KEY_FILE_NAME);
        if key_path.exists() {
            let contents = std::fs::read_to_string(&key_path)?;
            let key = decode_key(contents.trim())?;
            return Ok(Self::from_key(key));
        }

        let mut key = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut key);
        std::fs::write(&key_path, hex::encode(key))?;
        restrict_permissions(&key_path);
        info!("[CRYPTO] Generated new storage key at {}", key_path.display());
        Ok(Self::from_key(key))
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, StorageError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| StorageError::Encryption(format!("Encryption failed: {}", e)))?;

        let mut result = nonce.to_vec();
        result.extend_from_slice(&ciphertext);
        Ok(general_purpose::STANDARD.encode(&result))
    }

    pub fn decrypt(&self, encrypted: &str) -> Result<String, StorageError> {
        let data = general_purpose::STANDARD
            .decode(encrypted)
            .map_err(|e| StorageError::Encryption(format!("Base64 decode failed: {}", e)))?;

        if data.len() < NONCE_LEN {
            return Err(StorageError::Encryption(
                "Invalid encrypted data length".to_string(),
            ));
        }

        let nonce = Nonce::from_slice(&data[..NONCE_LEN]);
        let plaintext = self
            .cipher
            .decrypt(nonce, &data[NONCE_LEN..])
            .map_err(|e| StorageError::Encryption(format!("Decryption failed: {}", e)))?;

        String::from_utf8(plaintext)
            .map_err(|e| StorageError::Encryption(format!("UTF-8 decode failed: {}", e)))
    }
}

fn decode_key(hex_key: &str) -> Result<[u8; 32], StorageError> {
    let bytes = hex::decode(hex_key)
        .map_err(|e| StorageError::Encryption(format!("Encryption key is not hex: {}", e)))?;
    bytes
        .try_into()
        .map_err(|_| StorageError::Encryption("Encryption key must be 32 bytes".to_string()))
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
        warn!("[CRYPTO] Failed to restrict key file permissions: {}", e);
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_encryption() -> PayloadEncryption {
        PayloadEncryption::from_key(*b"test-encryption-key-32-bytes!!!!")
    }

    #[test]
    fn test_encrypt_decrypt() {
        let encryption = test_encryption();
        let original = r#"[{"url":"/orders","method":"POST"}]"#;

        let encrypted = encryption.encrypt(original).unwrap();
        assert_ne!(encrypted, original);
        assert_eq!(encryption.decrypt(&encrypted).unwrap(), original);
    }

    #[test]
    fn test_same_plaintext_different_ciphertext() {
        let encryption = test_encryption();
        let a = encryption.encrypt("token").unwrap();
        let b = encryption.encrypt("token").unwrap();
        // fresh nonce per call
        assert_ne!(a, b);
    }

    #[test]
    fn test_decrypt_invalid_data() {
        let encryption = test_encryption();
        assert!(encryption.decrypt("invalid_encrypted_data").is_err());
        assert!(encryption.decrypt("c2hvcnQ=").is_err());
    }

    #[test]
    fn test_decrypt_with_wrong_key() {
        let encrypted = test_encryption().encrypt("secret").unwrap();
        let other = PayloadEncryption::from_key([7u8; 32]);
        assert!(other.decrypt(&encrypted).is_err());
    }

    #[test]
    fn test_key_file_is_reused() {
        let temp_dir = TempDir::new().unwrap();
        // the env override would bypass the key file
        if std::env::var(ENCRYPTION_KEY_ENV).is_ok() {
            return;
        }
        let first = PayloadEncryption::from_env_or_file(temp_dir.path()).unwrap();
        let encrypted = first.encrypt("persisted").unwrap();

        let second = PayloadEncryption::from_env_or_file(temp_dir.path()).unwrap();
        assert_eq!(second.decrypt(&encrypted).unwrap(), "persisted");
        assert!(temp_dir.path().join(KEY_FILE_NAME).exists());
    }

    #[test]
    fn test_decode_key_rejects_short_key() {
        assert!(decode_key("abcd").is_err());
        assert!(decode_key("zz").is_err());
    }
}

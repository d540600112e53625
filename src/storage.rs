use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::crypto::PayloadEncryption;
use crate::error::StorageError;

/// Durable key-value primitive. Only single-key atomicity is assumed.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// In-memory adapter for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, StorageError> {
        self.values
            .lock()
            .map_err(|e| StorageError::Poisoned(e.to_string()))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.lock()?.remove(key);
        Ok(())
    }
}

/// Encrypting view over a `KeyValueStore`. Values are plaintext to callers and
/// ciphertext at rest.
#[derive(Clone)]
pub struct SecureStore {
    inner: Arc<dyn KeyValueStore>,
    encryption: Arc<PayloadEncryption>,
}

impl SecureStore {
    pub fn new(inner: Arc<dyn KeyValueStore>, encryption: Arc<PayloadEncryption>) -> Self {
        Self { inner, encryption }
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match self.inner.get(key)? {
            Some(encrypted) => self.encryption.decrypt(&encrypted).map(Some),
            None => Ok(None),
        }
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let encrypted = self.encryption.encrypt(value)?;
        self.inner.set(key, &encrypted)
    }

    pub fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.inner.remove(key)
    }

    /// Raw (still encrypted) value, for moving unreadable blobs aside.
    pub(crate) fn get_raw(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.inner.get(key)
    }

    pub(crate) fn set_raw(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.inner.set(key, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secure(inner: Arc<MemoryStore>) -> SecureStore {
        SecureStore::new(inner, Arc::new(PayloadEncryption::from_key([3u8; 32])))
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert_eq!(store.get("token").unwrap(), None);
        store.set("token", "T1").unwrap();
        assert_eq!(store.get("token").unwrap().as_deref(), Some("T1"));
        store.remove("token").unwrap();
        assert_eq!(store.get("token").unwrap(), None);
    }

    #[test]
    fn test_secure_store_encrypts_at_rest() {
        let inner = MemoryStore::new();
        let store = secure(inner.clone());

        store.set("token", "T1").unwrap();
        let at_rest = inner.get("token").unwrap().unwrap();
        assert_ne!(at_rest, "T1");
        assert_eq!(store.get("token").unwrap().as_deref(), Some("T1"));
    }

    #[test]
    fn test_secure_store_rejects_plaintext_at_rest() {
        let inner = MemoryStore::new();
        inner.set("token", "not-encrypted").unwrap();
        let store = secure(inner);
        assert!(matches!(
            store.get("token"),
            Err(StorageError::Encryption(_))
        ));
    }
}

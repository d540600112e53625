use std::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::StorageError;
use crate::models::PendingRequest;
use crate::storage::SecureStore;

/// Durable FIFO of mutations waiting for delivery.
///
/// The full list is stored as one encrypted JSON blob under `key` and rewritten
/// on every mutation. No copy is cached in memory: each operation re-reads the
/// persisted list while holding `write_lock`, so a read-modify-write is never
/// interleaved with another one.
pub struct MutationQueue {
    store: SecureStore,
    key: String,
    write_lock: Mutex<()>,
}

impl MutationQueue {
    pub fn new(store: SecureStore, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ()>, StorageError> {
        self.write_lock
            .lock()
            .map_err(|e| StorageError::Poisoned(format!("queue lock: {}", e)))
    }

    /// Unreadable blobs are moved aside to `<key>.corrupted.<ts>` and the queue restarts empty.
    fn load(&self) -> Result<Vec<PendingRequest>, StorageError> {
        let decoded = match self.store.get(&self.key) {
            Ok(None) => return Ok(Vec::new()),
            Ok(Some(json)) => serde_json::from_str::<Vec<PendingRequest>>(&json)
                .map_err(StorageError::Serialization),
            Err(e @ StorageError::Encryption(_)) => Err(e),
            Err(e) => return Err(e),
        };

        match decoded {
            Ok(items) => Ok(items),
            Err(e) => {
                error!("[QUEUE] Stored queue is unreadable ({}), moving it aside", e);
                if let Some(raw) = self.store.get_raw(&self.key)? {
                    let backup_key =
                        format!("{}.corrupted.{}", self.key, chrono::Utc::now().timestamp());
                    self.store.set_raw(&backup_key, &raw)?;
                }
                self.store.remove(&self.key)?;
                Ok(Vec::new())
            }
        }
    }

    fn save(&self, items: &[PendingRequest]) -> Result<(), StorageError> {
        if items.is_empty() {
            return self.store.remove(&self.key);
        }
        let json = serde_json::to_string(items)?;
        self.store.set(&self.key, &json)
    }

    /// Append to the tail. Returns the new queue length.
    pub fn enqueue(&self, request: PendingRequest) -> Result<usize, StorageError> {
        let _guard = self.lock()?;
        let mut items = self.load()?;
        info!(
            "[QUEUE] Enqueue {} {} (position {})",
            request.method,
            request.url,
            items.len() + 1
        );
        items.push(request);
        self.save(&items).map_err(|e| {
            error!("[QUEUE] Failed to persist queue after enqueue: {}", e);
            e
        })?;
        Ok(items.len())
    }

    /// Head of the queue without removing it.
    pub fn front(&self) -> Result<Option<PendingRequest>, StorageError> {
        let _guard = self.lock()?;
        Ok(self.load()?.into_iter().next())
    }

    /// Remove the head once it has been delivered. `delivered` must still be the
    /// head; if the queue was cleared or changed meanwhile nothing is removed.
    pub fn remove_front(&self, delivered: &PendingRequest) -> Result<bool, StorageError> {
        let _guard = self.lock()?;
        let mut items = self.load()?;
        match items.first() {
            Some(head) if head == delivered => {
                items.remove(0);
                self.save(&items)?;
                debug!("[QUEUE] Removed delivered head, {} left", items.len());
                Ok(true)
            }
            _ => {
                warn!(
                    "[QUEUE] Delivered request {} {} is no longer at the head, leaving queue untouched",
                    delivered.method, delivered.url
                );
                Ok(false)
            }
        }
    }

    pub fn snapshot(&self) -> Result<Vec<PendingRequest>, StorageError> {
        let _guard = self.lock()?;
        self.load()
    }

    pub fn len(&self) -> Result<usize, StorageError> {
        Ok(self.snapshot()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }

    /// Drop everything (user switch, manual reset).
    pub fn clear(&self) -> Result<usize, StorageError> {
        let _guard = self.lock()?;
        let dropped = self.load()?.len();
        self.store.remove(&self.key)?;
        if dropped > 0 {
            warn!("[QUEUE] Cleared {} pending requests", dropped);
        }
        Ok(dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::PayloadEncryption;
    use crate::storage::{KeyValueStore, MemoryStore};
    use std::sync::Arc;

    fn pending(url: &str) -> PendingRequest {
        PendingRequest {
            url: url.to_string(),
            method: "POST".to_string(),
            body: Some(serde_json::json!({ "ref": url })),
            headers: Default::default(),
            enqueued_at: 0,
        }
    }

    fn create_queue() -> (MutationQueue, Arc<MemoryStore>, SecureStore) {
        let inner = MemoryStore::new();
        let store = SecureStore::new(
            inner.clone(),
            Arc::new(PayloadEncryption::from_key([9u8; 32])),
        );
        (
            MutationQueue::new(store.clone(), "offline_queue"),
            inner,
            store,
        )
    }

    #[test]
    fn test_enqueue_preserves_order() {
        let (queue, _, _) = create_queue();
        assert_eq!(queue.enqueue(pending("/a")).unwrap(), 1);
        assert_eq!(queue.enqueue(pending("/b")).unwrap(), 2);
        assert_eq!(queue.enqueue(pending("/c")).unwrap(), 3);

        let urls: Vec<String> = queue.snapshot().unwrap().into_iter().map(|p| p.url).collect();
        assert_eq!(urls, vec!["/a", "/b", "/c"]);
        assert_eq!(queue.front().unwrap().unwrap().url, "/a");
    }

    #[test]
    fn test_remove_front_only_removes_matching_head() {
        let (queue, _, _) = create_queue();
        queue.enqueue(pending("/a")).unwrap();
        queue.enqueue(pending("/b")).unwrap();

        assert!(!queue.remove_front(&pending("/b")).unwrap());
        assert_eq!(queue.len().unwrap(), 2);

        assert!(queue.remove_front(&pending("/a")).unwrap());
        assert_eq!(queue.front().unwrap().unwrap().url, "/b");
    }

    #[test]
    fn test_every_mutation_is_persisted() {
        let (queue, _, store) = create_queue();
        queue.enqueue(pending("/a")).unwrap();

        // a second handle over the same storage sees the same list
        let reopened = MutationQueue::new(store, "offline_queue");
        assert_eq!(reopened.len().unwrap(), 1);

        reopened.remove_front(&pending("/a")).unwrap();
        assert!(queue.is_empty().unwrap());
    }

    #[test]
    fn test_queue_is_encrypted_at_rest() {
        let (queue, inner, _) = create_queue();
        queue.enqueue(pending("/customers")).unwrap();
        let raw = inner.get("offline_queue").unwrap().unwrap();
        assert!(!raw.contains("/customers"));
    }

    #[test]
    fn test_corrupted_blob_is_moved_aside() {
        let (queue, inner, store) = create_queue();
        store.set("offline_queue", "{not json").unwrap();

        assert!(queue.is_empty().unwrap());
        assert_eq!(inner.get("offline_queue").unwrap(), None);

        // queue keeps working afterwards
        queue.enqueue(pending("/a")).unwrap();
        assert_eq!(queue.len().unwrap(), 1);
    }

    #[test]
    fn test_clear() {
        let (queue, _, _) = create_queue();
        queue.enqueue(pending("/a")).unwrap();
        queue.enqueue(pending("/b")).unwrap();
        assert_eq!(queue.clear().unwrap(), 2);
        assert!(queue.is_empty().unwrap());
        assert_eq!(queue.clear().unwrap(), 0);
    }
}

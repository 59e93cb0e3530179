use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;

use crate::{error::StoreError, store::CoordinationStore};

/// A process-local [`CoordinationStore`].
///
/// Clones share the same map. Useful for tests and for running a single
/// instance without an external store, in which case the watermark does not
/// survive a restart.
///
/// ```
/// use flakeguard::MemoryStore;
///
/// let store = MemoryStore::new();
/// store.insert("machine_1/ts", b"1700000000".to_vec());
/// assert_eq!(store.value("machine_1/ts").as_deref(), Some(&b"1700000000"[..]));
/// ```
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>, value: Vec<u8>) {
        self.entries.lock().insert(key.into(), value);
    }

    pub fn value(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl CoordinationStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.value(key))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.insert(key, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_missing_is_none() {
        let store = MemoryStore::new();
        assert_eq!(store.get("machine_0/ts").await, Ok(None));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn put_then_get() {
        let store = MemoryStore::new();
        store.put("machine_0/ts", b"12".to_vec()).await.unwrap();
        store.put("machine_0/ts", b"13".to_vec()).await.unwrap();
        assert_eq!(store.get("machine_0/ts").await, Ok(Some(b"13".to_vec())));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn clones_share_entries() {
        let store = MemoryStore::new();
        let other = store.clone();
        other.put("k", b"v".to_vec()).await.unwrap();
        assert_eq!(store.value("k"), Some(b"v".to_vec()));
    }
}

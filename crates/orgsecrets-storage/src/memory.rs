//! In-memory value store.
//!
//! Payloads live in a `BTreeMap` behind a `RwLock`. Nothing is persisted.
//! Used by unit and integration tests, and by the server when
//! `ORGSECRETS_VALUE_STORE=memory`.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::{SecretFields, StorageError, ValueStore, folder_prefix, immediate_children};

/// An in-memory value store backed by a `BTreeMap`.
///
/// Cloning shares the underlying map.
///
/// # Examples
///
/// ```
/// # use orgsecrets_storage::{MemoryStore, SecretFields, ValueStore};
/// # #[tokio::main]
/// # async fn main() {
/// let store = MemoryStore::new();
/// let fields = SecretFields {
///     value: "s3cr3t".to_owned(),
///     created_at: 0,
///     created_by: "user".to_owned(),
///     description: String::new(),
/// };
/// store.put("org/proj/dev/API_KEY", &fields).await.unwrap();
/// assert_eq!(store.list_keys("org/proj/dev").await.unwrap(), vec!["API_KEY"]);
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Arc<RwLock<BTreeMap<String, SecretFields>>>,
}

impl MemoryStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored payloads.
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    /// Whether the store holds no payloads.
    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl ValueStore for MemoryStore {
    async fn put(&self, path: &str, fields: &SecretFields) -> Result<(), StorageError> {
        let mut data = self.data.write().await;
        data.insert(path.to_owned(), fields.clone());
        Ok(())
    }

    async fn put_if_absent(&self, path: &str, fields: &SecretFields) -> Result<bool, StorageError> {
        let mut data = self.data.write().await;
        if data.contains_key(path) {
            return Ok(false);
        }
        data.insert(path.to_owned(), fields.clone());
        Ok(true)
    }

    async fn get(&self, path: &str) -> Result<Option<SecretFields>, StorageError> {
        let data = self.data.read().await;
        Ok(data.get(path).cloned())
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let mut data = self.data.write().await;
        data.remove(path);
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let folder = folder_prefix(prefix);
        let data = self.data.read().await;
        let keys = data
            .range(folder.clone()..)
            .take_while(|(k, _)| k.starts_with(&folder))
            .map(|(k, _)| k.as_str());
        Ok(immediate_children(&folder, keys))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn fields(value: &str) -> SecretFields {
        SecretFields {
            value: value.to_owned(),
            created_at: 1_700_000_000,
            created_by: "user-1".to_owned(),
            description: "test".to_owned(),
        }
    }

    #[tokio::test]
    async fn get_nonexistent_returns_none() {
        let store = MemoryStore::new();
        assert_eq!(store.get("o/p/dev/missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn put_overwrites_existing() {
        let store = MemoryStore::new();
        store.put("o/p/dev/KEY", &fields("v1")).await.unwrap();
        store.put("o/p/dev/KEY", &fields("v2")).await.unwrap();
        let got = store.get("o/p/dev/KEY").await.unwrap().unwrap();
        assert_eq!(got.value, "v2");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn put_if_absent_keeps_existing_value() {
        let store = MemoryStore::new();
        assert!(store.put_if_absent("o/p/dev/KEY", &fields("first")).await.unwrap());
        assert!(!store.put_if_absent("o/p/dev/KEY", &fields("second")).await.unwrap());
        assert_eq!(store.get("o/p/dev/KEY").await.unwrap().unwrap().value, "first");

        store.delete("o/p/dev/KEY").await.unwrap();
        assert!(store.put_if_absent("o/p/dev/KEY", &fields("third")).await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_put_if_absent_admits_one_writer() {
        let store = MemoryStore::new();
        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.put_if_absent("o/p/dev/K", &fields(&i.to_string())).await.unwrap()
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn delete_nonexistent_is_noop() {
        let store = MemoryStore::new();
        store.delete("o/p/dev/nope").await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn list_returns_only_scope_children() {
        let store = MemoryStore::new();
        store.put("o/p/dev/A", &fields("1")).await.unwrap();
        store.put("o/p/dev/B", &fields("2")).await.unwrap();
        store.put("o/p/prod/A", &fields("3")).await.unwrap();
        store.put("o/p/devx/C", &fields("4")).await.unwrap();

        assert_eq!(store.list_keys("o/p/dev").await.unwrap(), vec!["A", "B"]);
        assert_eq!(
            store.list_keys("o/p").await.unwrap(),
            vec!["dev/", "devx/", "prod/"]
        );
        assert!(store.list_keys("o/q").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clone_shares_state() {
        let store = MemoryStore::new();
        let clone = store.clone();
        store.put("o/p/dev/K", &fields("v")).await.unwrap();
        assert!(clone.get("o/p/dev/K").await.unwrap().is_some());
    }
}

//! Value store abstraction for `orgsecrets`.
//!
//! This crate defines the [`ValueStore`] trait, a small capability contract
//! (`put`/`put_if_absent`/`get`/`delete`/`list_keys`) over an opaque,
//! path-addressed secret payload store. It knows nothing about organizations, quotas, or
//! metadata. The lifecycle coordinator in `orgsecrets-core` owns consistency
//! between this store and the relational registry.
//!
//! Three implementations are provided:
//!
//! - [`MemoryStore`]: in-memory, for testing and local development
//! - [`RocksDbStore`]: embedded persistent store (feature `rocksdb-backend`)
//! - [`VaultKvStore`]: HashiCorp Vault KV v2 over HTTP (feature `vault-backend`)

mod error;
mod memory;
#[cfg(feature = "rocksdb-backend")]
mod rocksdb_backend;
#[cfg(feature = "vault-backend")]
mod vault_backend;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

pub use error::StorageError;
pub use memory::MemoryStore;
#[cfg(feature = "rocksdb-backend")]
pub use rocksdb_backend::RocksDbStore;
#[cfg(feature = "vault-backend")]
pub use vault_backend::{VaultKvConfig, VaultKvStore};

/// The payload written at a secret path.
///
/// `created_at` is Unix seconds. `created_by` is the creator's user ID in
/// string form, since the store is opaque to the registry's types.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretFields {
    pub value: String,
    pub created_at: i64,
    pub created_by: String,
    #[serde(default)]
    pub description: String,
}

impl std::fmt::Debug for SecretFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretFields")
            .field("value", &"[redacted]")
            .field("created_at", &self.created_at)
            .field("created_by", &self.created_by)
            .field("description", &self.description)
            .finish()
    }
}

/// A path-addressed secret payload store.
///
/// Paths are UTF-8 strings using `/` as a separator
/// (`{org}/{project}/{environment}/{name}`). The store is treated as an
/// external collaborator: it may fail independently of the metadata registry,
/// and callers must not assume any transaction spans both.
///
/// Implementations must be safe to share across async tasks (`Send + Sync`).
#[async_trait::async_trait]
pub trait ValueStore: Send + Sync + 'static {
    /// Write the payload at `path`, overwriting any existing value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if the backend fails.
    async fn put(&self, path: &str, fields: &SecretFields) -> Result<(), StorageError>;

    /// Write the payload at `path` only if nothing is stored there.
    ///
    /// Returns `Ok(false)` without writing when the path is occupied. The
    /// check and the write are atomic with respect to every other write to
    /// the same store.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if the backend fails.
    async fn put_if_absent(&self, path: &str, fields: &SecretFields) -> Result<bool, StorageError>;

    /// Read the payload at `path`.
    ///
    /// Returns `Ok(None)` if nothing is stored there.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the backend fails.
    async fn get(&self, path: &str) -> Result<Option<SecretFields>, StorageError>;

    /// Delete the payload at `path`. Deleting a missing path is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Delete`] if the backend fails.
    async fn delete(&self, path: &str) -> Result<(), StorageError>;

    /// List the immediate children of `prefix`.
    ///
    /// Leaf entries are returned as bare names; intermediate folders are
    /// returned with a trailing `/`, matching Vault's `LIST` semantics. A
    /// prefix with no children yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::List`] if the backend fails.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// Normalize a listing prefix so it always ends in `/` (unless empty).
pub(crate) fn folder_prefix(prefix: &str) -> String {
    if prefix.is_empty() || prefix.ends_with('/') {
        prefix.to_owned()
    } else {
        format!("{prefix}/")
    }
}

/// Collapse full keys under `folder` into their immediate child names.
///
/// `folder` must already be normalized by [`folder_prefix`]. Keys not under
/// `folder` are ignored.
pub(crate) fn immediate_children<'a>(
    folder: &str,
    keys: impl IntoIterator<Item = &'a str>,
) -> Vec<String> {
    let mut children = BTreeSet::new();
    for key in keys {
        let Some(rest) = key.strip_prefix(folder) else {
            continue;
        };
        if rest.is_empty() {
            continue;
        }
        match rest.split_once('/') {
            Some((dir, _)) => children.insert(format!("{dir}/")),
            None => children.insert(rest.to_owned()),
        };
    }
    children.into_iter().collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn folder_prefix_appends_separator() {
        assert_eq!(folder_prefix("a/b"), "a/b/");
        assert_eq!(folder_prefix("a/b/"), "a/b/");
        assert_eq!(folder_prefix(""), "");
    }

    #[test]
    fn immediate_children_collapses_folders() {
        let keys = ["o/p/dev/a", "o/p/dev/b", "o/p/prod/a", "o/q/dev/x", "other/z"];
        let children = immediate_children("o/", keys);
        assert_eq!(children, vec!["p/", "q/"]);

        let leaves = immediate_children("o/p/dev/", keys);
        assert_eq!(leaves, vec!["a", "b"]);
    }

    #[test]
    fn debug_redacts_value() {
        let fields = SecretFields {
            value: "hunter2".to_owned(),
            created_at: 0,
            created_by: "u".to_owned(),
            description: String::new(),
        };
        let rendered = format!("{fields:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("[redacted]"));
    }
}

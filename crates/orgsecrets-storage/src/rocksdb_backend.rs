//! `RocksDB` value store, the embedded persistent backend.
//!
//! Payloads are stored as JSON under their secret path. All `RocksDB` calls
//! run on the blocking pool via [`tokio::task::spawn_blocking`] since the
//! library is synchronous. Writes are serialized by an async mutex so
//! [`ValueStore::put_if_absent`] can check and write without a transaction
//! database.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rocksdb::{DBWithThreadMode, MultiThreaded, Options};
use tokio::sync::Mutex;

use crate::{SecretFields, StorageError, ValueStore, folder_prefix, immediate_children};

type Db = DBWithThreadMode<MultiThreaded>;

/// A value store backed by `RocksDB`.
///
/// # Examples
///
/// ```no_run
/// # use orgsecrets_storage::RocksDbStore;
/// let store = RocksDbStore::open("/var/lib/orgsecrets/values").unwrap();
/// ```
#[derive(Clone)]
pub struct RocksDbStore {
    db: Arc<Db>,
    writes: Arc<Mutex<()>>,
    path: PathBuf,
}

impl std::fmt::Debug for RocksDbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksDbStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl RocksDbStore {
    /// Open (or create) a database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if `RocksDB` cannot open the directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let mut opts = Options::default();
        opts.create_if_missing(true);

        let db = Db::open(&opts, path).map_err(|e| StorageError::Open {
            location: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            db: Arc::new(db),
            writes: Arc::new(Mutex::new(())),
            path: path.to_path_buf(),
        })
    }

    /// Filesystem location of the database.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn panicked(err: &tokio::task::JoinError) -> String {
    format!("blocking task panicked: {err}")
}

fn encode(path: &str, fields: &SecretFields) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec(fields).map_err(|e| StorageError::Encoding {
        path: path.to_owned(),
        reason: e.to_string(),
    })
}

#[async_trait::async_trait]
impl ValueStore for RocksDbStore {
    async fn put(&self, path: &str, fields: &SecretFields) -> Result<(), StorageError> {
        let encoded = encode(path, fields)?;
        let db = Arc::clone(&self.db);
        let key = path.to_owned();
        let _guard = self.writes.lock().await;
        tokio::task::spawn_blocking(move || {
            db.put(key.as_bytes(), &encoded)
                .map_err(|e| StorageError::Write {
                    path: key,
                    reason: e.to_string(),
                })
        })
        .await
        .map_err(|e| StorageError::Write {
            path: path.to_owned(),
            reason: panicked(&e),
        })?
    }

    async fn put_if_absent(&self, path: &str, fields: &SecretFields) -> Result<bool, StorageError> {
        let encoded = encode(path, fields)?;
        let db = Arc::clone(&self.db);
        let key = path.to_owned();
        let _guard = self.writes.lock().await;
        tokio::task::spawn_blocking(move || {
            let write_err = |reason: String| StorageError::Write {
                path: key.clone(),
                reason,
            };
            let occupied = db
                .get_pinned(key.as_bytes())
                .map_err(|e| write_err(e.to_string()))?
                .is_some();
            if occupied {
                return Ok(false);
            }
            db.put(key.as_bytes(), &encoded)
                .map_err(|e| write_err(e.to_string()))?;
            Ok(true)
        })
        .await
        .map_err(|e| StorageError::Write {
            path: path.to_owned(),
            reason: panicked(&e),
        })?
    }

    async fn get(&self, path: &str) -> Result<Option<SecretFields>, StorageError> {
        let db = Arc::clone(&self.db);
        let key = path.to_owned();
        let raw = tokio::task::spawn_blocking(move || {
            db.get(key.as_bytes()).map_err(|e| StorageError::Read {
                path: key,
                reason: e.to_string(),
            })
        })
        .await
        .map_err(|e| StorageError::Read {
            path: path.to_owned(),
            reason: panicked(&e),
        })??;

        raw.map(|bytes| {
            serde_json::from_slice(&bytes).map_err(|e| StorageError::Encoding {
                path: path.to_owned(),
                reason: e.to_string(),
            })
        })
        .transpose()
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let db = Arc::clone(&self.db);
        let key = path.to_owned();
        let _guard = self.writes.lock().await;
        tokio::task::spawn_blocking(move || {
            db.delete(key.as_bytes()).map_err(|e| StorageError::Delete {
                path: key,
                reason: e.to_string(),
            })
        })
        .await
        .map_err(|e| StorageError::Delete {
            path: path.to_owned(),
            reason: panicked(&e),
        })?
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let db = Arc::clone(&self.db);
        let folder = folder_prefix(prefix);
        tokio::task::spawn_blocking(move || {
            let iter = db.iterator(rocksdb::IteratorMode::From(
                folder.as_bytes(),
                rocksdb::Direction::Forward,
            ));

            let mut keys = Vec::new();
            for item in iter {
                let (k, _) = item.map_err(|e| StorageError::List {
                    prefix: folder.clone(),
                    reason: e.to_string(),
                })?;
                let key = String::from_utf8(k.to_vec()).map_err(|e| StorageError::Encoding {
                    path: folder.clone(),
                    reason: e.to_string(),
                })?;
                if !key.starts_with(&folder) {
                    break;
                }
                keys.push(key);
            }
            Ok(immediate_children(&folder, keys.iter().map(String::as_str)))
        })
        .await
        .map_err(|e| StorageError::List {
            prefix: prefix.to_owned(),
            reason: panicked(&e),
        })?
    }
}

//! Pluggable storage backends
//!
//! [`StorageAdapter`] is the seam between the value store / trie engine and
//! whatever durable medium a deployment chooses. `batch_put` and `force_put`
//! carry default implementations in terms of `put` so a minimal adapter only
//! has to implement `get`/`put`/`close`.

use crate::error::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;

/// A byte-oriented key/value backend.
///
/// Keys are opaque ASCII strings (digests, ref-keys, or storage paths).
/// Implementations must be safe to share across threads via `&self`.
pub trait StorageAdapter: Send + Sync {
    /// Fetch the raw bytes stored under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key`, overwriting any existing entry.
    fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Store multiple entries. Adapters with a native batch/transaction
    /// primitive should override this; the default just loops.
    fn batch_put(&self, entries: &[(String, Vec<u8>)]) -> Result<()> {
        for (key, value) in entries {
            self.put(key, value)?;
        }
        Ok(())
    }

    /// Store `value` under `key` even over an existing entry that a space's
    /// normal admission rule would otherwise protect (e.g. restoring from a
    /// known-good snapshot). Default: same as `put`, since a plain key/value
    /// backend has no admission rule of its own to bypass.
    fn force_put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.put(key, value)
    }

    /// Flush and release any resources. Subsequent calls to `get`/`put`
    /// on a closed adapter return [`crate::error::Error::Closed`].
    fn close(&self) -> Result<()>;
}

/// In-memory adapter, for tests and ephemeral nodes.
pub struct MemoryAdapter {
    data: Mutex<Option<HashMap<String, Vec<u8>>>>,
}

impl MemoryAdapter {
    /// Create an empty in-memory adapter
    pub fn new() -> Self {
        Self {
            data: Mutex::new(Some(HashMap::new())),
        }
    }
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageAdapter for MemoryAdapter {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let guard = self.data.lock();
        let map = guard.as_ref().ok_or(crate::error::Error::Closed)?;
        Ok(map.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut guard = self.data.lock();
        let map = guard.as_mut().ok_or(crate::error::Error::Closed)?;
        map.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn close(&self) -> Result<()> {
        *self.data.lock() = None;
        Ok(())
    }
}

/// Sled-backed adapter for durable single-node storage.
pub struct SledAdapter {
    db: sled::Db,
    tree: sled::Tree,
}

impl SledAdapter {
    /// Open (or create) a sled database at `path`, using the tree named
    /// `namespace` within it. Separate namespaces (e.g. "values", "trie",
    /// "envelopes") share one on-disk database but keep independent
    /// keyspaces.
    pub fn open(path: impl AsRef<Path>, namespace: &str) -> Result<Self> {
        let db = sled::open(path)?;
        let tree = db.open_tree(namespace)?;
        Ok(Self { db, tree })
    }
}

impl StorageAdapter for SledAdapter {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.tree.get(key)?.map(|v| v.to_vec()))
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.tree.insert(key, value)?;
        Ok(())
    }

    fn batch_put(&self, entries: &[(String, Vec<u8>)]) -> Result<()> {
        let mut batch = sled::Batch::default();
        for (key, value) in entries {
            batch.insert(key.as_bytes(), value.as_slice());
        }
        self.tree.apply_batch(batch)?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.tree.flush()?;
        self.db.flush()?;
        Ok(())
    }
}

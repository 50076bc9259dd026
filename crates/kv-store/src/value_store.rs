//! Content-addressed value store
//!
//! Values are encoded with [`kv_core::codec`], hashed, and kept under
//! `"v:" + digest` so identical values written from anywhere in the trie
//! collapse to one stored blob. A decoded-value LRU cache (default 500
//! entries) avoids re-running the codec on hot reads.

use crate::adapter::StorageAdapter;
use crate::error::Result;
use kv_core::codec::{self, Value};
use kv_core::Digest;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

const DEFAULT_CACHE_SIZE: usize = 500;

fn ref_key(digest: Digest) -> String {
    format!("v:{}", digest.to_b64())
}

/// Deduplicated value store backed by a [`StorageAdapter`].
pub struct ValueStore {
    adapter: Arc<dyn StorageAdapter>,
    cache: Mutex<LruCache<String, Value>>,
}

impl ValueStore {
    /// Build a value store over `adapter` with the default decode cache size.
    pub fn new(adapter: Arc<dyn StorageAdapter>) -> Self {
        Self::with_cache_size(adapter, DEFAULT_CACHE_SIZE)
    }

    /// Build a value store with a custom decode cache size.
    pub fn with_cache_size(adapter: Arc<dyn StorageAdapter>, cache_size: usize) -> Self {
        let cap = NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            adapter,
            cache: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Store `value`, returning its content-addressed ref-key
    /// (`"v:" + base64(sha256(encoded))`). Writing the same value twice is a
    /// no-op on the second write beyond an adapter `put` of identical bytes.
    pub fn put(&self, value: &Value) -> Result<String> {
        let encoded = codec::encode(value);
        let digest = Digest::of(&encoded);
        let key = ref_key(digest);
        self.adapter.put(&key, &encoded)?;
        self.cache.lock().put(key.clone(), value.clone());
        Ok(key)
    }

    /// Fetch the value stored under `ref_key`, or `None` if absent.
    pub fn get(&self, ref_key: &str) -> Result<Option<Value>> {
        if let Some(cached) = self.cache.lock().get(ref_key) {
            return Ok(Some(cached.clone()));
        }
        let Some(bytes) = self.adapter.get(ref_key)? else {
            return Ok(None);
        };
        let value = codec::decode(&bytes)?;
        self.cache.lock().put(ref_key.to_string(), value.clone());
        Ok(Some(value))
    }

    /// True if `ref_key` is already stored locally, so a sync pull can skip
    /// fetching it from the remote peer.
    pub fn has_value(&self, ref_key: &str) -> Result<bool> {
        if self.cache.lock().contains(ref_key) {
            return Ok(true);
        }
        Ok(self.adapter.get(ref_key)?.is_some())
    }

    /// Read back a value's own raw encoding, e.g. to answer a peer's
    /// `RequestValue`.
    pub fn value_bytes(&self, ref_key: &str) -> Result<Option<Vec<u8>>> {
        self.adapter.get(ref_key)
    }

    /// Import a value fetched from a remote peer. Its ref-key is derived
    /// from the bytes themselves, so a peer can't smuggle a value in under
    /// the wrong key.
    pub fn import_value(&self, bytes: &[u8]) -> Result<String> {
        let value = codec::decode(bytes)?;
        let key = ref_key(Digest::of(bytes));
        self.adapter.put(&key, bytes)?;
        self.cache.lock().put(key.clone(), value);
        Ok(key)
    }

    /// Release the underlying adapter's resources.
    pub fn close(&self) -> Result<()> {
        self.adapter.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MemoryAdapter;

    fn store() -> ValueStore {
        ValueStore::new(Arc::new(MemoryAdapter::new()))
    }

    #[test]
    fn put_get_roundtrip() {
        let s = store();
        let key = s.put(&Value::Str("hello".into())).unwrap();
        assert!(key.starts_with("v:"));
        assert_eq!(s.get(&key).unwrap(), Some(Value::Str("hello".into())));
    }

    #[test]
    fn identical_values_share_a_key() {
        let s = store();
        let k1 = s.put(&Value::Int(42)).unwrap();
        let k2 = s.put(&Value::Int(42)).unwrap();
        assert_eq!(k1, k2);
    }

    #[test]
    fn distinct_values_get_distinct_keys() {
        let s = store();
        let k1 = s.put(&Value::Int(1)).unwrap();
        let k2 = s.put(&Value::Int(2)).unwrap();
        assert_ne!(k1, k2);
    }

    #[test]
    fn missing_key_is_none() {
        let s = store();
        assert_eq!(s.get("v:does-not-exist").unwrap(), None);
    }

    #[test]
    fn cache_miss_falls_back_to_adapter() {
        let adapter = Arc::new(MemoryAdapter::new());
        let s1 = ValueStore::new(adapter.clone());
        let key = s1.put(&Value::Bool(true)).unwrap();
        // A fresh store over the same adapter has a cold cache.
        let s2 = ValueStore::new(adapter);
        assert_eq!(s2.get(&key).unwrap(), Some(Value::Bool(true)));
    }
}

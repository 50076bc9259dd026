//! Trie engine: content-addressed `get`/`put`/`diff`
//!
//! Every node is stored under `"n:" + digest` in the backing
//! [`kv_store::StorageAdapter`], so structurally identical subtrees —
//! which, being content-addressed, always share a digest — are written
//! once and cost nothing to compare: `diff` and `put` both short-circuit
//! the moment two digests match. A decoded-node LRU (default 1000) keeps
//! the nodes on the path from the root, which is walked on every
//! operation, resident without re-running the node codec.

use crate::error::{Error, Result};
use crate::node::TrieNode;
use kv_store::StorageAdapter;
use kv_core::Digest;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

const DEFAULT_NODE_CACHE_SIZE: usize = 1000;

fn node_key(digest: Digest) -> String {
    format!("n:{}", digest.to_b64())
}

/// A single structural change discovered by [`TrieEngine::diff`]: the path
/// at which a value appeared, changed, or disappeared.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiffEntry {
    /// The full key path at which the value differs
    pub key: String,
    /// The value ref under the old root, if any
    pub old_value_ref: Option<String>,
    /// The value ref under the new root, if any
    pub new_value_ref: Option<String>,
}

/// Content-addressed character trie over a [`StorageAdapter`].
///
/// The engine is stateless with respect to "current root" — callers (the
/// coordinator) hold the root digest for each data space and pass it into
/// every call. This keeps the engine safe to share across spaces and makes
/// copy-on-write explicit: `put` never mutates a node in place, it returns
/// the digest of a new root.
pub struct TrieEngine {
    adapter: Arc<dyn StorageAdapter>,
    node_cache: Mutex<LruCache<Digest, TrieNode>>,
}

impl TrieEngine {
    /// Build an engine over `adapter` with the default node cache size.
    pub fn new(adapter: Arc<dyn StorageAdapter>) -> Self {
        Self::with_cache_size(adapter, DEFAULT_NODE_CACHE_SIZE)
    }

    /// Build an engine with a custom node cache size.
    pub fn with_cache_size(adapter: Arc<dyn StorageAdapter>, cache_size: usize) -> Self {
        let cap = NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            adapter,
            node_cache: Mutex::new(LruCache::new(cap)),
        }
    }

    fn load_node(&self, digest: Digest) -> Result<TrieNode> {
        if let Some(node) = self.node_cache.lock().get(&digest) {
            return Ok(node.clone());
        }
        let bytes = self
            .adapter
            .get(&node_key(digest))?
            .ok_or_else(|| Error::DanglingReference(digest.to_b64()))?;
        let node = TrieNode::decode(&bytes)?;
        self.node_cache.lock().put(digest, node.clone());
        Ok(node)
    }

    fn store_node(&self, node: &TrieNode) -> Result<Digest> {
        let digest = node.digest();
        self.adapter.put(&node_key(digest), &node.encode())?;
        self.node_cache.lock().put(digest, node.clone());
        Ok(digest)
    }

    /// True if a node with `digest` is already present locally, so a sync
    /// pull can skip fetching it from the remote peer.
    pub fn has_node(&self, digest: Digest) -> Result<bool> {
        if self.node_cache.lock().contains(&digest) {
            return Ok(true);
        }
        Ok(self.adapter.get(&node_key(digest))?.is_some())
    }

    /// Read back a node's own raw encoding, e.g. to answer a peer's
    /// `RequestNode`.
    pub fn node_bytes(&self, digest: Digest) -> Result<Option<Vec<u8>>> {
        Ok(self.adapter.get(&node_key(digest))?)
    }

    /// Import a node fetched from a remote peer. `bytes` must decode as a
    /// well-formed [`TrieNode`]; its digest is derived from the bytes
    /// themselves, so a peer can't smuggle a node in under the wrong
    /// address.
    pub fn import_node(&self, bytes: &[u8]) -> Result<Digest> {
        let node = TrieNode::decode(bytes)?;
        let digest = Digest::of(bytes);
        self.adapter.put(&node_key(digest), bytes)?;
        self.node_cache.lock().put(digest, node);
        Ok(digest)
    }

    /// Look up `key` under `root`. `None` root is an empty trie.
    pub fn get(&self, root: Option<Digest>, key: &str) -> Result<Option<String>> {
        let Some(mut digest) = root else {
            return Ok(None);
        };
        let bytes = key.as_bytes();
        let mut node = self.load_node(digest)?;
        for &ch in bytes {
            match node.child(ch) {
                Some(child) => {
                    digest = child;
                    node = self.load_node(digest)?;
                }
                None => return Ok(None),
            }
        }
        Ok(node.value_ref.clone())
    }

    /// Insert, replace, or (with `value_ref: None`) delete the value at
    /// `key`, returning the new root. Returns `None` if the trie becomes
    /// empty as a result (e.g. deleting the last entry).
    pub fn put(
        &self,
        root: Option<Digest>,
        key: &str,
        value_ref: Option<String>,
    ) -> Result<Option<Digest>> {
        self.put_rec(root, key.as_bytes(), value_ref)
    }

    fn put_rec(
        &self,
        node_digest: Option<Digest>,
        path: &[u8],
        value_ref: Option<String>,
    ) -> Result<Option<Digest>> {
        let mut node = match node_digest {
            Some(d) => self.load_node(d)?,
            None => TrieNode::empty(),
        };

        match path.split_first() {
            None => {
                node.value_ref = value_ref;
            }
            Some((&ch, rest)) => {
                let child_digest = node.child(ch);
                let new_child = self.put_rec(child_digest, rest, value_ref)?;
                match new_child {
                    Some(d) => node.set_child(ch, d),
                    None => node.remove_child(ch),
                }
            }
        }

        if node.is_empty() {
            Ok(None)
        } else {
            Ok(Some(self.store_node(&node)?))
        }
    }

    /// List every value-bearing path under `prefix` (including `prefix`
    /// itself, if it carries a value). Used to scan a known key family —
    /// e.g. every signer's claim filed under one username — where the
    /// caller doesn't know the individual suffixes in advance.
    pub fn list_prefix(&self, root: Option<Digest>, prefix: &str) -> Result<Vec<(String, String)>> {
        let Some(root_digest) = root else {
            return Ok(Vec::new());
        };
        let mut digest = root_digest;
        let mut node = self.load_node(digest)?;
        for &ch in prefix.as_bytes() {
            match node.child(ch) {
                Some(child) => {
                    digest = child;
                    node = self.load_node(digest)?;
                }
                None => return Ok(Vec::new()),
            }
        }
        let mut out = Vec::new();
        let mut path = prefix.as_bytes().to_vec();
        self.list_rec(&node, &mut path, &mut out)?;
        Ok(out)
    }

    fn list_rec(&self, node: &TrieNode, path: &mut Vec<u8>, out: &mut Vec<(String, String)>) -> Result<()> {
        if let Some(value_ref) = &node.value_ref {
            out.push((String::from_utf8_lossy(path).into_owned(), value_ref.clone()));
        }
        for &(ch, child_digest) in &node.children {
            path.push(ch);
            let child = self.load_node(child_digest)?;
            self.list_rec(&child, path, out)?;
            path.pop();
        }
        Ok(())
    }

    /// Compute every path whose value ref differs between `old_root` and
    /// `new_root`. Subtrees with equal digests are skipped without being
    /// loaded, so diffing two close trees costs close to nothing.
    pub fn diff(
        &self,
        old_root: Option<Digest>,
        new_root: Option<Digest>,
    ) -> Result<Vec<DiffEntry>> {
        let mut out = Vec::new();
        let mut path = Vec::new();
        self.diff_rec(old_root, new_root, &mut path, &mut out)?;
        Ok(out)
    }

    fn diff_rec(
        &self,
        old: Option<Digest>,
        new: Option<Digest>,
        path: &mut Vec<u8>,
        out: &mut Vec<DiffEntry>,
    ) -> Result<()> {
        if old == new {
            return Ok(());
        }

        let old_node = old.map(|d| self.load_node(d)).transpose()?;
        let new_node = new.map(|d| self.load_node(d)).transpose()?;

        let old_val = old_node.as_ref().and_then(|n| n.value_ref.clone());
        let new_val = new_node.as_ref().and_then(|n| n.value_ref.clone());
        if old_val != new_val {
            out.push(DiffEntry {
                key: String::from_utf8_lossy(path).into_owned(),
                old_value_ref: old_val,
                new_value_ref: new_val,
            });
        }

        let mut chars: Vec<u8> = Vec::new();
        if let Some(n) = &old_node {
            chars.extend(n.children.iter().map(|(c, _)| *c));
        }
        if let Some(n) = &new_node {
            chars.extend(n.children.iter().map(|(c, _)| *c));
        }
        chars.sort_unstable();
        chars.dedup();

        for ch in chars {
            let old_child = old_node.as_ref().and_then(|n| n.child(ch));
            let new_child = new_node.as_ref().and_then(|n| n.child(ch));
            if old_child == new_child {
                continue;
            }
            path.push(ch);
            self.diff_rec(old_child, new_child, path, out)?;
            path.pop();
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kv_store::MemoryAdapter;

    fn engine() -> TrieEngine {
        TrieEngine::new(Arc::new(MemoryAdapter::new()))
    }

    #[test]
    fn get_on_empty_trie_is_none() {
        let e = engine();
        assert_eq!(e.get(None, "a").unwrap(), None);
    }

    #[test]
    fn put_then_get_roundtrips() {
        let e = engine();
        let root = e.put(None, "hello", Some("v:1".into())).unwrap();
        assert_eq!(e.get(root, "hello").unwrap(), Some("v:1".into()));
        assert_eq!(e.get(root, "goodbye").unwrap(), None);
    }

    #[test]
    fn put_is_copy_on_write() {
        let e = engine();
        let root1 = e.put(None, "k", Some("v:1".into())).unwrap();
        let root2 = e.put(root1, "k", Some("v:2".into())).unwrap();
        assert_ne!(root1, root2);
        assert_eq!(e.get(root1, "k").unwrap(), Some("v:1".into()));
        assert_eq!(e.get(root2, "k").unwrap(), Some("v:2".into()));
    }

    #[test]
    fn overlapping_prefixes_coexist() {
        let e = engine();
        let root = e.put(None, "car", Some("v:car".into())).unwrap();
        let root = e.put(root, "cart", Some("v:cart".into())).unwrap();
        let root = e.put(root, "carton", Some("v:carton".into())).unwrap();
        assert_eq!(e.get(root, "car").unwrap(), Some("v:car".into()));
        assert_eq!(e.get(root, "cart").unwrap(), Some("v:cart".into()));
        assert_eq!(e.get(root, "carton").unwrap(), Some("v:carton".into()));
        assert_eq!(e.get(root, "ca").unwrap(), None);
    }

    #[test]
    fn delete_prunes_empty_nodes() {
        let e = engine();
        let root = e.put(None, "a", Some("v:1".into())).unwrap();
        let root = e.put(root, "a", None).unwrap();
        assert_eq!(root, None);
    }

    #[test]
    fn delete_keeps_sibling_paths() {
        let e = engine();
        let root = e.put(None, "ab", Some("v:1".into())).unwrap();
        let root = e.put(root, "ac", Some("v:2".into())).unwrap();
        let root = e.put(root, "ab", None).unwrap();
        assert_eq!(e.get(root, "ab").unwrap(), None);
        assert_eq!(e.get(root, "ac").unwrap(), Some("v:2".into()));
    }

    #[test]
    fn diff_reports_added_changed_removed() {
        let e = engine();
        let root1 = e.put(None, "a", Some("v:1".into())).unwrap();
        let root1 = e.put(root1, "b", Some("v:2".into())).unwrap();

        let root2 = e.put(root1, "a", Some("v:1-new".into())).unwrap();
        let root2 = e.put(root2, "b", None).unwrap();
        let root2 = e.put(root2, "c", Some("v:3".into())).unwrap();

        let mut entries = e.diff(root1, root2).unwrap();
        entries.sort_by(|a, b| a.key.cmp(&b.key));

        assert_eq!(
            entries,
            vec![
                DiffEntry {
                    key: "a".into(),
                    old_value_ref: Some("v:1".into()),
                    new_value_ref: Some("v:1-new".into()),
                },
                DiffEntry {
                    key: "b".into(),
                    old_value_ref: Some("v:2".into()),
                    new_value_ref: None,
                },
                DiffEntry {
                    key: "c".into(),
                    old_value_ref: None,
                    new_value_ref: Some("v:3".into()),
                },
            ]
        );
    }

    #[test]
    fn diff_of_identical_roots_is_empty() {
        let e = engine();
        let root = e.put(None, "x", Some("v:1".into())).unwrap();
        assert_eq!(e.diff(root, root).unwrap(), Vec::new());
    }

    #[test]
    fn diff_from_empty_root_reports_every_key() {
        let e = engine();
        let root = e.put(None, "a", Some("v:1".into())).unwrap();
        let root = e.put(root, "b", Some("v:2".into())).unwrap();
        let mut entries = e.diff(None, root).unwrap();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key, "a");
        assert_eq!(entries[1].key, "b");
    }

    #[test]
    fn list_prefix_collects_every_descendant() {
        let e = engine();
        let root = e.put(None, "claims/username/bob/aaa", Some("v:1".into())).unwrap();
        let root = e.put(root, "claims/username/bob/zzz", Some("v:2".into())).unwrap();
        let root = e.put(root, "claims/username/alice/aaa", Some("v:3".into())).unwrap();
        let mut entries = e.list_prefix(root, "claims/username/bob/").unwrap();
        entries.sort();
        assert_eq!(
            entries,
            vec![
                ("claims/username/bob/aaa".to_string(), "v:1".to_string()),
                ("claims/username/bob/zzz".to_string(), "v:2".to_string()),
            ]
        );
    }

    #[test]
    fn list_prefix_includes_a_value_at_the_prefix_itself() {
        let e = engine();
        let root = e.put(None, "p", Some("v:exact".into())).unwrap();
        let root = e.put(root, "px", Some("v:child".into())).unwrap();
        let mut entries = e.list_prefix(root, "p").unwrap();
        entries.sort();
        assert_eq!(
            entries,
            vec![
                ("p".to_string(), "v:exact".to_string()),
                ("px".to_string(), "v:child".to_string()),
            ]
        );
    }

    #[test]
    fn list_prefix_of_unknown_prefix_is_empty() {
        let e = engine();
        let root = e.put(None, "a", Some("v:1".into())).unwrap();
        assert_eq!(e.list_prefix(root, "z").unwrap(), Vec::new());
    }

    #[test]
    fn list_prefix_on_empty_trie_is_empty() {
        let e = engine();
        assert_eq!(e.list_prefix(None, "anything").unwrap(), Vec::new());
    }
}

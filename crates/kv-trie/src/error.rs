//! Error types for trie node (de)serialization and traversal

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Trie-specific error types
#[derive(Debug, Error)]
pub enum Error {
    /// A node blob failed to parse as a [`crate::node::TrieNode`]
    #[error("malformed trie node: {0}")]
    MalformedNode(String),

    /// A digest referenced by a node was not found in storage
    #[error("dangling node reference: {0}")]
    DanglingReference(String),

    /// The underlying value/node store failed
    #[error("store error: {0}")]
    Store(#[from] kv_store::Error),
}

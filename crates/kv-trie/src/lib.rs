//! Content-addressed character trie
//!
//! - [`node`]: the binary-packed [`node::TrieNode`] format
//! - [`engine`]: copy-on-write `get`/`put` and structural `diff` over a
//!   [`kv_store::StorageAdapter`]

pub mod engine;
pub mod error;
pub mod node;

pub use engine::{DiffEntry, TrieEngine};
pub use error::{Error, Result};
pub use node::TrieNode;

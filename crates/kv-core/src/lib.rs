//! Core byte-level primitives for the replicated key-value store
//!
//! - [`codec`]: self-describing binary encoding for stored values
//! - [`canonical`]: deterministic JSON-like form used for signing
//! - [`digest`]: 32-byte SHA-256 digest, the reference type for the trie
//!   and value store
//! - [`error`]: shared error type

pub mod canonical;
pub mod codec;
pub mod digest;
pub mod error;

pub use digest::Digest;
pub use error::{Error, Result};

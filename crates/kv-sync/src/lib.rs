//! Peer sync protocol
//!
//! [`message`] defines the wire messages; [`engine::SyncSession`] drives an
//! exchange of them over a [`kv_net::Transport`] — handshake, recursive
//! pull of missing trie nodes and value blobs, and envelope admission
//! through [`kv_envelope::merge`].

mod engine;
mod error;
mod message;

pub use engine::SyncSession;
pub use error::{Error, Result};
pub use message::{Message, SyncSpace};

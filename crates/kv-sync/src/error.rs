//! Error types for the sync engine

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Sync protocol error types
#[derive(Debug, Error)]
pub enum Error {
    /// A wire message failed to decode
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// The underlying byte codec rejected a message
    #[error("codec error: {0}")]
    Codec(#[from] kv_core::Error),

    /// The transport returned an I/O error
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The peer closed the connection
    #[error("peer disconnected")]
    Disconnected,

    /// A request to the peer did not get a response within the timeout.
    /// Non-fatal: callers of `sync_from` treat this as "try again later",
    /// never as a reason to tear down an otherwise-healthy connection.
    #[error("peer unavailable: request timed out")]
    Unavailable,

    /// An envelope admission rule rejected a pushed or pulled write
    #[error("envelope rejected: {0}")]
    Envelope(#[from] kv_envelope::Error),

    /// The trie engine failed to read or write a node
    #[error("trie error: {0}")]
    Trie(#[from] kv_trie::Error),

    /// The value store failed to read or write a blob
    #[error("store error: {0}")]
    Store(#[from] kv_store::Error),
}

//! Error types for the value store and its storage adapters

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Value store and adapter error types
#[derive(Debug, Error)]
pub enum Error {
    /// The underlying adapter failed
    #[error("storage adapter error: {0}")]
    Adapter(String),

    /// A stored blob failed to decode with the byte codec
    #[error("codec error: {0}")]
    Codec(#[from] kv_core::Error),

    /// The adapter was closed and can no longer be used
    #[error("storage adapter is closed")]
    Closed,
}

impl From<sled::Error> for Error {
    fn from(e: sled::Error) -> Self {
        Error::Adapter(e.to_string())
    }
}

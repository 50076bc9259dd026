//! Error types for the byte codec and canonical serializer

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Codec and canonicalization error types
#[derive(Debug, Error)]
pub enum Error {
    /// Decoder saw a tag byte it doesn't recognize
    #[error("invalid encoding: unknown tag byte {0:#04x}")]
    InvalidEncoding(u8),

    /// Decoder ran out of bytes mid-value
    #[error("invalid encoding: truncated input")]
    Truncated,

    /// Decoder has leftover bytes after a complete value
    #[error("invalid encoding: {0} trailing byte(s)")]
    TrailingBytes(usize),

    /// A float value could not be canonicalized (NaN or infinite)
    #[error("float normalization error: {0}")]
    FloatNormalization(String),

    /// A map key was not valid UTF-8
    #[error("invalid encoding: non-utf8 map key")]
    InvalidMapKey,
}

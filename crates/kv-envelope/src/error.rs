//! Error types for envelopes and space admission

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Envelope verification and admission error types
#[derive(Debug, Error)]
pub enum Error {
    /// The envelope's signature does not match its signer and contents
    #[error("signature invalid")]
    SignatureInvalid,

    /// A write targeted a `frozen` path that already has a value
    #[error("frozen path already written: {0}")]
    Immutable(String),

    /// A `frozen` write arrived older than the replay barrier allows
    #[error("envelope too old to admit: age exceeds replay barrier")]
    Replay,

    /// A `user`-space write's path does not belong to its signer
    #[error("signer is not authorized to write this path")]
    Forged,

    /// A stored or wire-delivered envelope value had an unexpected shape
    #[error("malformed envelope: {0}")]
    Malformed(String),
}

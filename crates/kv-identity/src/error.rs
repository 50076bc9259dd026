//! Error types for identity, handles, and password wrapping

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Identity subsystem error types
#[derive(Debug, Error)]
pub enum Error {
    /// A public or private key was the wrong length or otherwise malformed
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    /// Password did not unwrap the identity blob (wrong password or
    /// corrupted blob)
    #[error("wrong password")]
    WrongPassword,

    /// A wrapped-identity blob was truncated or had an unrecognized layout
    #[error("malformed identity blob: {0}")]
    MalformedBlob(String),

    /// No keypair produced the requested custom suffix within the attempt
    /// budget
    #[error("no keypair found matching suffix within {0} attempts")]
    SuffixNotFound(usize),

    /// A sealed `user`-space value failed to decrypt under the given data
    /// key (wrong identity, or corrupted ciphertext)
    #[error("decryption failed")]
    DecryptionFailed,
}

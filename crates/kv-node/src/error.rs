//! Coordinator error taxonomy
//!
//! Each crate below the coordinator owns its own narrow `thiserror` enum;
//! this one is where they all land, translated into the vocabulary the
//! public API promises its callers. `kv-node`'s CLI boundary is the only
//! place this gets collapsed further, into `anyhow::Error`.

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Coordinator error types
#[derive(Debug, Error)]
pub enum Error {
    /// A caller-supplied argument was malformed or out of range
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An operation that requires a logged-in identity was called without one
    #[error("not authenticated")]
    NotAuthenticated,

    /// A password did not unwrap the stored identity blob
    #[error("wrong password")]
    WrongPassword,

    /// The persisted identity record was corrupted or internally inconsistent
    #[error("identity integrity error: {0}")]
    IdentityIntegrity(String),

    /// A write targeted a `frozen` path that already has a value
    #[error("path is immutable: {0}")]
    Immutable(String),

    /// A `claim_username` call lost to an earlier, still-valid claim
    #[error("username already taken: {0}")]
    HandleTaken(String),

    /// An envelope's signature did not match its signer and contents
    #[error("signature invalid")]
    SignatureInvalid,

    /// A `user`-space write's path does not belong to its signer
    #[error("signer is not authorized to write this path")]
    Forged,

    /// A `frozen` write arrived older than the replay barrier allows
    #[error("envelope too old to admit")]
    Replay,

    /// A stored or wire-delivered value had an unexpected shape
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    /// A peer request did not complete within its timeout
    #[error("peer unavailable")]
    Unavailable,

    /// The coordinator has been closed and can no longer be used
    #[error("coordinator is closed")]
    Closed,

    /// The underlying byte store failed
    #[error("storage error: {0}")]
    Store(#[from] kv_store::Error),

    /// The trie engine failed to read or write a node
    #[error("trie error: {0}")]
    Trie(#[from] kv_trie::Error),

    /// The byte codec rejected a stored value
    #[error("codec error: {0}")]
    Codec(#[from] kv_core::Error),

    /// The sync protocol failed outside the timeout/admission cases above
    #[error("sync error: {0}")]
    Sync(#[from] kv_sync::Error),

    /// A subscription pattern failed to compile
    #[error("event pattern error: {0}")]
    Pattern(#[from] kv_events::Error),

    /// A transport-level I/O error
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// An exported/imported identity backup was malformed
    #[error("malformed identity backup: {0}")]
    MalformedBackup(String),

    /// The persisted identity record failed to serialize or deserialize
    #[error("identity record error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<kv_envelope::Error> for Error {
    fn from(e: kv_envelope::Error) -> Self {
        match e {
            kv_envelope::Error::SignatureInvalid => Error::SignatureInvalid,
            kv_envelope::Error::Immutable(path) => Error::Immutable(path),
            kv_envelope::Error::Replay => Error::Replay,
            kv_envelope::Error::Forged => Error::Forged,
            kv_envelope::Error::Malformed(m) => Error::InvalidEncoding(m),
        }
    }
}

impl From<kv_identity::Error> for Error {
    fn from(e: kv_identity::Error) -> Self {
        match e {
            kv_identity::Error::WrongPassword => Error::WrongPassword,
            kv_identity::Error::InvalidKey(m) => Error::IdentityIntegrity(m),
            kv_identity::Error::MalformedBlob(m) => Error::IdentityIntegrity(m),
            kv_identity::Error::SuffixNotFound(n) => {
                Error::InvalidArgument(format!("no keypair found matching suffix within {n} attempts"))
            }
            kv_identity::Error::DecryptionFailed => {
                Error::IdentityIntegrity("user-space value failed to decrypt".into())
            }
        }
    }
}

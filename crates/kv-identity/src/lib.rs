//! Account identity: Ed25519 keypairs, deterministic handle suffixes, and
//! password-wrapped export

pub mod crypto;
pub mod error;
pub mod handle;
pub mod keypair;
pub mod password;

pub use error::{Error, Result};
pub use handle::{deterministic_suffix, parse_handle, verify_handle};
pub use keypair::Identity;
pub use password::UnwrappedSecrets;

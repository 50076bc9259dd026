//! kv-node - coordinator daemon for the replicated key-value store
//!
//! This crate provides:
//! - Identity lifecycle: signup, login, password-wrapped export/import
//! - Reads and writes across the `all`/`frozen`/`user` data spaces
//! - Username claim filing and resolution
//! - Peer sync and push-on-write broadcast
//! - A TCP accept loop serving inbound sync connections

pub mod config;
pub mod coordinator;
pub mod error;
pub mod head_writer;

pub use config::Config;
pub use coordinator::{Coordinator, CoordinatorStats, GetOptions, PutOptions, SignupResult, SignupWithSuffixResult};
pub use error::{Error, Result};

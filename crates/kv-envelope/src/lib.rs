//! Signed envelopes, space admission, and the claim resolver

pub mod claims;
pub mod envelope;
pub mod error;

pub use claims::{resolve_winner, validate_handle_claim, UsernameClaim};
pub use envelope::{merge, user_space_path, Envelope, Space, MAX_CLAIM_AGE_MS};
pub use error::{Error, Result};

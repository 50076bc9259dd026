//! Error types for pattern subscriptions

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Event dispatcher error types
#[derive(Debug, Error)]
pub enum Error {
    /// A regex subscription pattern failed to compile
    #[error("invalid regex pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

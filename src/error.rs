//! Error types for the Floodgate library.

use thiserror::Error;

/// Main error type for Floodgate operations.
///
/// An over-limit outcome is *not* an error: it is a first-class
/// [`Decision`](crate::limiter::Decision) value returned to the caller.
#[derive(Error, Debug)]
pub enum FloodgateError {
    /// Configuration-related errors (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A category was requested that no rule covers
    #[error("Unknown rate limit category: {0}")]
    UnknownCategory(String),

    /// Counter store errors
    #[error("Counter store error: {0}")]
    Store(String),

    /// Redis backend errors
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Floodgate operations.
pub type Result<T> = std::result::Result<T, FloodgateError>;

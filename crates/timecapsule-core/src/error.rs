//! Error types for the core library.

use thiserror::Error;

use crate::crypto::CryptoError;
use crate::message::ValidationError;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error (missing or malformed key material, bad settings).
    ///
    /// Fatal at startup: the service must not run without valid keys.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller-supplied data violates a contract.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Sender has reached the daily creation ceiling.
    #[error("Rate limit exceeded: at most {limit} messages per sender per day")]
    RateLimited {
        /// The configured daily ceiling.
        limit: u32,
    },

    /// Encryption or decryption failed.
    ///
    /// On stored ciphertext this indicates data corruption or a key rotation
    /// mismatch and is logged at error level by callers.
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Generated handle collided with an existing row.
    ///
    /// Recoverable: the caller regenerates and retries once.
    #[error("Duplicate handle: {0}")]
    DuplicateHandle(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

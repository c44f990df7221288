//! Server error types.

use thiserror::Error;

/// Daemon-level errors.
///
/// Wire-level decode failures never appear here: they are converted to
/// NACK responses inside the dispatch pipeline and go no further.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Socket I/O failure
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be read or parsed
    #[error("config error: {0}")]
    Config(String),

    /// Master key material was rejected
    #[error("key error: {0}")]
    Key(#[from] waymark_crypto::CryptoError),
}

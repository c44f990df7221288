//! Cryptographic error types.

use thiserror::Error;

/// Cryptographic errors
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    /// Tag verification failed during authenticated decryption
    #[error("report verification failed")]
    VerificationFailed,

    /// AEAD encryption failed
    #[error("encryption failed")]
    EncryptionFailed,

    /// Key material has the wrong length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Decrypted reading has the wrong length
    #[error("invalid reading length: expected {expected}, got {actual}")]
    InvalidReadingLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },
}

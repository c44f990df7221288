//! Storage error types.

use thiserror::Error;

/// Durable-storage failures.
///
/// These never propagate into the packet-processing path; the persister
/// logs them and retries the affected rows on the next cycle.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Backend rejected or failed the operation
    #[error("storage backend: {0}")]
    Backend(String),

    /// Backend is not reachable
    #[error("storage unavailable")]
    Unavailable,

    /// Insert required a column the snapshot did not carry
    #[error("missing mandatory column: {0}")]
    MissingColumn(&'static str),
}

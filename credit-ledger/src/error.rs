//! Error types for the credit ledger

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
///
/// Duplicate idempotency refs are deliberately absent: replays are absorbed
/// and reported as success-with-zero-effect via `Applied::newly_applied`.
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Invalid input, never retried
    #[error("Validation error: {0}")]
    Validation(String),

    /// Balance cannot cover the requested debit or reservation
    #[error("Insufficient balance")]
    InsufficientBalance,

    /// Call not found
    #[error("Call not found: {0}")]
    CallNotFound(String),

    /// Call is not in ACTIVE status
    #[error("Call is not active: {0}")]
    CallNotActive(String),

    /// Payout request not found
    #[error("Payout request not found: {0}")]
    PayoutNotFound(String),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}

//! Error types for payout accounting

use thiserror::Error;

/// Result type for payout operations
pub type Result<T> = std::result::Result<T, Error>;

/// Payout errors
#[derive(Error, Debug)]
pub enum Error {
    /// Ledger error
    #[error("Ledger error: {0}")]
    Ledger(#[from] credit_ledger::Error),

    /// Invalid input, never retried
    #[error("Validation error: {0}")]
    Validation(String),
}

//! Error types for payment ingestion
//!
//! External verification failures are split into transient (retry later) and
//! permanent (never retried); `is_retryable` is the single place callers
//! consult. Timeouts and transport failures fail closed: no credit is
//! granted, and the caller may retry.

use thiserror::Error;

/// Result type for ingestion operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ingestion errors
#[derive(Error, Debug)]
pub enum Error {
    /// Ledger error
    #[error("Ledger error: {0}")]
    Ledger(#[from] credit_ledger::Error),

    /// Invalid input, never retried
    #[error("Validation error: {0}")]
    Validation(String),

    /// Webhook signature rejected
    #[error("Signature error: {0}")]
    Signature(String),

    /// Verification not possible yet (retry later)
    #[error("Verification pending: {0}")]
    VerificationPending(String),

    /// Verification failed permanently (never retried)
    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    /// Chain RPC transport failure (retryable)
    #[error("RPC error: {0}")]
    Rpc(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the caller should retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::VerificationPending(_) | Error::Rpc(_))
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_split() {
        assert!(Error::VerificationPending("2 of 5 confirmations".into()).is_retryable());
        assert!(Error::Rpc("timeout".into()).is_retryable());
        assert!(!Error::VerificationFailed("tx reverted".into()).is_retryable());
        assert!(!Error::Validation("bad amount".into()).is_retryable());
    }
}

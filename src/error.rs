//! Error taxonomy for payment orchestration.
//!
//! Every failure surfaced by this crate is classified into one of the [`PaymentErrorKind`]
//! buckets. The classification drives two behaviors:
//!
//! - the retry executor ([`crate::retry::with_retry`]) retries only `Network` and `Timeout`
//!   failures and rethrows everything else on first occurrence,
//! - chain adapters fold the underlying chain-library error into a human-readable message
//!   that is stored on the session record before the error is returned to the caller.

use serde::{Deserialize, Serialize};

/// Stable classification of a [`PaymentError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentErrorKind {
    /// Bad amount, address, or token. Never retried.
    ValidationError,
    /// Transport-level RPC failure. Retryable.
    NetworkError,
    /// A network call exceeded its deadline. Retryable.
    TimeoutError,
    /// Payer balance does not cover the amount.
    InsufficientFunds,
    /// The transaction was submitted but reverted or failed on-chain.
    TransactionFailed,
    /// Unknown or expired session id. A programmer error, thrown synchronously.
    SessionError,
    /// Signing or wallet connection failure.
    WalletError,
}

/// Errors produced by session management, validation, and the chain adapters.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PaymentError {
    #[error("{0}")]
    Validation(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Timeout: {0}")]
    Timeout(String),
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),
    #[error("{0}")]
    Session(String),
    #[error("Wallet error: {0}")]
    Wallet(String),
}

impl PaymentError {
    pub fn kind(&self) -> PaymentErrorKind {
        match self {
            PaymentError::Validation(_) => PaymentErrorKind::ValidationError,
            PaymentError::Network(_) => PaymentErrorKind::NetworkError,
            PaymentError::Timeout(_) => PaymentErrorKind::TimeoutError,
            PaymentError::InsufficientFunds(_) => PaymentErrorKind::InsufficientFunds,
            PaymentError::TransactionFailed(_) => PaymentErrorKind::TransactionFailed,
            PaymentError::Session(_) => PaymentErrorKind::SessionError,
            PaymentError::Wallet(_) => PaymentErrorKind::WalletError,
        }
    }

    /// Only transient transport failures are worth retrying. Validation problems,
    /// on-chain reverts, and wallet failures reproduce deterministically.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            PaymentErrorKind::NetworkError | PaymentErrorKind::TimeoutError
        )
    }

    pub fn session_not_found(id: impl std::fmt::Display) -> Self {
        PaymentError::Session(format!("Session {id} not found"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryability() {
        assert!(PaymentError::Network("connection reset".into()).is_retryable());
        assert!(PaymentError::Timeout("deadline elapsed".into()).is_retryable());
        assert!(!PaymentError::Validation("bad amount".into()).is_retryable());
        assert!(!PaymentError::InsufficientFunds("0 < 10".into()).is_retryable());
        assert!(!PaymentError::TransactionFailed("reverted".into()).is_retryable());
        assert!(!PaymentError::Wallet("locked".into()).is_retryable());
        assert!(!PaymentError::session_not_found("abc").is_retryable());
    }

    #[test]
    fn test_not_found_message() {
        let err = PaymentError::session_not_found("non-existent");
        assert_eq!(err.to_string(), "Session non-existent not found");
        assert_eq!(err.kind(), PaymentErrorKind::SessionError);
    }
}

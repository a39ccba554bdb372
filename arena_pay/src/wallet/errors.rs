//! Wallet error types.

use thiserror::Error;

use crate::{Amount, UserId};

/// Wallet errors
#[derive(Debug, Error)]
pub enum WalletError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Insufficient balance
    #[error("Insufficient funds for user {user_id}: available {available}, required {required}")]
    InsufficientFunds {
        user_id: UserId,
        available: Amount,
        required: Amount,
    },

    /// Zero or otherwise unusable amount
    #[error("Invalid amount: {0}")]
    InvalidAmount(Amount),

    /// Balance would overflow
    #[error("Balance overflow")]
    BalanceOverflow,

    /// Currency mismatch
    #[error("Currency mismatch: expected {expected}, got {got}")]
    CurrencyMismatch { expected: String, got: String },
}

impl WalletError {
    /// Get a client-safe error message that doesn't leak internal details
    pub fn client_message(&self) -> String {
        match self {
            WalletError::Database(_) => "Internal server error".to_string(),
            WalletError::InsufficientFunds {
                available,
                required,
                ..
            } => format!("Insufficient funds: available {available}, required {required}"),
            _ => self.to_string(),
        }
    }
}

/// Result type for wallet operations
pub type WalletResult<T> = Result<T, WalletError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_hides_user_id() {
        let err = WalletError::InsufficientFunds {
            user_id: 4242,
            available: 150,
            required: 200,
        };
        let msg = err.client_message();
        assert!(!msg.contains("4242"));
        assert!(msg.contains("150"));
        assert!(msg.contains("200"));
    }

    #[test]
    fn test_database_error_sanitized() {
        let err = WalletError::Database(sqlx::Error::PoolTimedOut);
        assert_eq!(err.client_message(), "Internal server error");
    }
}

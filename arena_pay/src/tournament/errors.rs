//! Escrow error types.

use thiserror::Error;

use super::TournamentState;
use crate::ledger::LedgerError;
use crate::wallet::WalletError;
use crate::{Amount, TournamentId};

/// Tournament escrow errors
#[derive(Debug, Error)]
pub enum EscrowError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Tournament not found: {0}")]
    NotFound(TournamentId),

    #[error("Tournament is full")]
    Full,

    #[error("Player already registered")]
    AlreadyRegistered,

    #[error("Tournament is not accepting registrations")]
    NotJoinable,

    #[error("Player not registered")]
    NotRegistered,

    #[error("Tournament already started")]
    AlreadyStarted,

    #[error("Insufficient funds: available {available}, required {required}")]
    InsufficientFunds { available: Amount, required: Amount },

    #[error("Tournament not in correct state: expected {expected}, got {actual}")]
    InvalidState {
        expected: TournamentState,
        actual: TournamentState,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error(transparent)]
    Wallet(WalletError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl From<WalletError> for EscrowError {
    fn from(err: WalletError) -> Self {
        match err {
            WalletError::InsufficientFunds {
                available,
                required,
                ..
            } => EscrowError::InsufficientFunds {
                available,
                required,
            },
            other => EscrowError::Wallet(other),
        }
    }
}

impl EscrowError {
    /// Get a client-safe error message that doesn't leak internal details
    pub fn client_message(&self) -> String {
        match self {
            EscrowError::Database(_) | EscrowError::Decode(_) => {
                "Internal server error".to_string()
            }
            EscrowError::Wallet(err) => err.client_message(),
            EscrowError::Ledger(err) => err.client_message(),
            _ => self.to_string(),
        }
    }
}

/// Result type for escrow operations
pub type EscrowResult<T> = Result<T, EscrowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wallet_shortfall_becomes_insufficient_funds() {
        let err = EscrowError::from(WalletError::InsufficientFunds {
            user_id: 9,
            available: 150,
            required: 200,
        });
        assert!(matches!(
            err,
            EscrowError::InsufficientFunds {
                available: 150,
                required: 200
            }
        ));
    }

    #[test]
    fn test_database_error_sanitized() {
        let err = EscrowError::Database(sqlx::Error::PoolTimedOut);
        assert_eq!(err.client_message(), "Internal server error");
    }
}

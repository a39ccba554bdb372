//! Transaction log error types.

use thiserror::Error;
use uuid::Uuid;

use super::TransactionStatus;

/// Transaction log errors
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Transaction not found
    #[error("Transaction not found: {0}")]
    NotFound(Uuid),

    /// Attempt to move a terminal transaction to a different status
    #[error("Invalid transition for transaction {id}: {from} -> {to}")]
    InvalidTransition {
        id: Uuid,
        from: TransactionStatus,
        to: TransactionStatus,
    },

    /// Stored value could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),
}

impl LedgerError {
    /// Get a client-safe error message that doesn't leak internal details
    pub fn client_message(&self) -> String {
        match self {
            LedgerError::Database(_) | LedgerError::Decode(_) => {
                "Internal server error".to_string()
            }
            LedgerError::NotFound(_) => "Transaction not found".to_string(),
            LedgerError::InvalidTransition { from, to, .. } => {
                format!("Transaction cannot move from {from} to {to}")
            }
        }
    }
}

/// Result type for transaction log operations
pub type LedgerResult<T> = Result<T, LedgerError>;

//! Payment error types.

use thiserror::Error;

use super::ProviderError;
use crate::ledger::{LedgerError, TransactionStatus};
use crate::wallet::WalletError;

/// Payment errors
#[derive(Debug, Error)]
pub enum PaymentError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Bad input; no external call was made and nothing was written
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The external provider could not be reached or refused the request
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(#[from] ProviderError),

    /// The provider reported success without a usable amount or receipt
    #[error("Unusable settlement for {reference}: {problem}")]
    UnusableSettlement { reference: String, problem: String },

    /// Correlation reference already in use
    #[error("Duplicate reference: {0}")]
    DuplicateReference(String),

    /// Unknown intent, order or reference
    #[error("Not found: {0}")]
    NotFound(String),

    /// Attempt to move a terminal intent to a different status
    #[error("Invalid transition for intent {reference}: {from} -> {to}")]
    InvalidTransition {
        reference: String,
        from: TransactionStatus,
        to: TransactionStatus,
    },

    /// Wallet error
    #[error(transparent)]
    Wallet(#[from] WalletError),

    /// Transaction log error
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl PaymentError {
    /// Get a client-safe error message that doesn't leak internal details
    pub fn client_message(&self) -> String {
        match self {
            PaymentError::Database(_) => "Internal server error".to_string(),
            PaymentError::ProviderUnavailable(_) => {
                "Payment provider unavailable, please try again later".to_string()
            }
            PaymentError::NotFound(_) => "Payment not found".to_string(),
            PaymentError::UnusableSettlement { .. } => {
                "Payment provider returned an unusable result; the payment stays pending".to_string()
            }
            PaymentError::InvalidTransition { .. } => "Payment already finalized".to_string(),
            PaymentError::Wallet(err) => err.client_message(),
            PaymentError::Ledger(err) => err.client_message(),
            _ => self.to_string(),
        }
    }

    /// True for conflicts between terminal states, at either the intent or the ledger level
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            PaymentError::InvalidTransition { .. }
                | PaymentError::Ledger(LedgerError::InvalidTransition { .. })
        )
    }
}

/// Result type for payment operations
pub type PaymentResult<T> = Result<T, PaymentError>;

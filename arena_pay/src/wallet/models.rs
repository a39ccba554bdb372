//! Wallet data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Amount, UserId};

/// Wallet model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub user_id: UserId,
    pub balance: Amount,
    pub currency: String,
    pub last_transaction_id: Option<Uuid>,
    pub last_transaction_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// A fresh, empty wallet
    pub fn empty(user_id: UserId, currency: &str) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            balance: 0,
            currency: currency.to_string(),
            last_transaction_id: None,
            last_transaction_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Caller-facing view of a wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletSnapshot {
    pub user_id: UserId,
    pub balance: Amount,
    pub currency: String,
    pub last_transaction_at: Option<DateTime<Utc>>,
}

impl From<Wallet> for WalletSnapshot {
    fn from(wallet: Wallet) -> Self {
        Self {
            user_id: wallet.user_id,
            balance: wallet.balance,
            currency: wallet.currency,
            last_transaction_at: wallet.last_transaction_at,
        }
    }
}

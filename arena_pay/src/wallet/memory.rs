//! In-memory wallet store.
//!
//! Each wallet lives in its own async mutex; the map lock is held only long
//! enough to find or insert the cell, so owners never serialize each other.

use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Wallet, WalletError, WalletResult, WalletStore};
use crate::{Amount, UserId};

struct WalletCell {
    wallet: Wallet,
    applied: HashSet<Uuid>,
}

/// Wallet store backed by process memory
pub struct MemoryWalletStore {
    currency: String,
    cells: Mutex<HashMap<UserId, Arc<Mutex<WalletCell>>>>,
}

impl MemoryWalletStore {
    pub fn new(currency: impl Into<String>) -> Self {
        Self {
            currency: currency.into(),
            cells: Mutex::new(HashMap::new()),
        }
    }

    async fn cell(&self, user_id: UserId) -> Arc<Mutex<WalletCell>> {
        let mut cells = self.cells.lock().await;
        cells
            .entry(user_id)
            .or_insert_with(|| {
                Arc::new(Mutex::new(WalletCell {
                    wallet: Wallet::empty(user_id, &self.currency),
                    applied: HashSet::new(),
                }))
            })
            .clone()
    }

    async fn existing_cell(&self, user_id: UserId) -> Option<Arc<Mutex<WalletCell>>> {
        self.cells.lock().await.get(&user_id).cloned()
    }
}

#[async_trait]
impl WalletStore for MemoryWalletStore {
    fn currency(&self) -> &str {
        &self.currency
    }

    async fn get_or_create(&self, user_id: UserId) -> WalletResult<Wallet> {
        let cell = self.cell(user_id).await;
        let cell = cell.lock().await;
        Ok(cell.wallet.clone())
    }

    async fn get(&self, user_id: UserId) -> WalletResult<Option<Wallet>> {
        match self.existing_cell(user_id).await {
            Some(cell) => Ok(Some(cell.lock().await.wallet.clone())),
            None => Ok(None),
        }
    }

    async fn apply_delta(
        &self,
        user_id: UserId,
        delta: Amount,
        transaction_id: Uuid,
    ) -> WalletResult<Wallet> {
        if delta == 0 {
            return Err(WalletError::InvalidAmount(delta));
        }

        let cell = self.cell(user_id).await;
        let mut cell = cell.lock().await;

        if cell.applied.contains(&transaction_id) {
            debug!("Transaction {transaction_id} already applied to wallet {user_id}");
            return Ok(cell.wallet.clone());
        }

        let current = cell.wallet.balance;
        let new_balance = current
            .checked_add(delta)
            .ok_or(WalletError::BalanceOverflow)?;
        if new_balance < 0 {
            return Err(WalletError::InsufficientFunds {
                user_id,
                available: current,
                required: -delta,
            });
        }

        let now = Utc::now();
        cell.wallet.balance = new_balance;
        cell.wallet.last_transaction_id = Some(transaction_id);
        cell.wallet.last_transaction_at = Some(now);
        cell.wallet.updated_at = now;
        cell.applied.insert(transaction_id);

        Ok(cell.wallet.clone())
    }

    async fn has_applied(&self, user_id: UserId, transaction_id: Uuid) -> WalletResult<bool> {
        match self.existing_cell(user_id).await {
            Some(cell) => Ok(cell.lock().await.applied.contains(&transaction_id)),
            None => Ok(false),
        }
    }
}

//! Wallet module: one running balance per user.
//!
//! This module implements:
//! - Lazily created wallets (first funding or first balance query)
//! - Atomic, per-owner balance deltas that never drive a balance negative
//! - Exactly-once application of a ledger transaction to a wallet
//!
//! Two backends implement [`WalletStore`]: [`MemoryWalletStore`] (per-owner
//! async mutexes) and [`PgWalletStore`] (guarded `UPDATE` inside a SQL transaction).
//!
//! ## Example
//!
//! ```
//! use arena_pay::wallet::{MemoryWalletStore, WalletStore};
//! use uuid::Uuid;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MemoryWalletStore::new("KES");
//! let wallet = store.apply_delta(7, 500, Uuid::new_v4()).await?;
//! assert_eq!(wallet.balance, 500);
//! # Ok(())
//! # }
//! ```

pub mod errors;
pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{Amount, UserId};

pub use errors::{WalletError, WalletResult};
pub use memory::MemoryWalletStore;
pub use models::{Wallet, WalletSnapshot};
pub use postgres::PgWalletStore;

/// Storage contract for wallet balances.
#[async_trait]
pub trait WalletStore: Send + Sync {
    /// Currency every wallet in this store is denominated in
    fn currency(&self) -> &str;

    /// Fetch the wallet for a user, creating an empty one if absent
    async fn get_or_create(&self, user_id: UserId) -> WalletResult<Wallet>;

    /// Fetch the wallet for a user without creating it
    async fn get(&self, user_id: UserId) -> WalletResult<Option<Wallet>>;

    /// Apply a signed delta on behalf of a ledger transaction.
    ///
    /// Linearized per owner. A delta that would make the balance negative fails
    /// with [`WalletError::InsufficientFunds`] and leaves the wallet untouched.
    /// Re-applying a `transaction_id` that already moved this wallet is a no-op
    /// that returns the current wallet.
    async fn apply_delta(
        &self,
        user_id: UserId,
        delta: Amount,
        transaction_id: Uuid,
    ) -> WalletResult<Wallet>;

    /// Whether the given transaction has already moved the user's wallet
    async fn has_applied(&self, user_id: UserId, transaction_id: Uuid) -> WalletResult<bool>;
}

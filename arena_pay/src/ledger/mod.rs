//! Transaction log: append-mostly record of every money movement.
//!
//! Transactions are created (usually `pending`) and later moved to exactly one
//! terminal status. Moving a terminal record to the status it already holds is
//! a successful no-op; moving it anywhere else is [`LedgerError::InvalidTransition`].
//! Both backends implement the move as a compare-and-set on the current status.

pub mod errors;
pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::UserId;

pub use errors::{LedgerError, LedgerResult};
pub use memory::MemoryTransactionLog;
pub use models::{
    Keyed, NewTransaction, Page, ScanCursor, StatusScan, Transaction, TransactionKind, TransactionPatch,
    TransactionQuery, TransactionStatus, TransitionCheck, Transitioned, check_transition,
};
pub use postgres::PgTransactionLog;

/// Storage contract for the transaction log.
#[async_trait]
pub trait TransactionLog: Send + Sync {
    /// Record a new transaction
    async fn create(&self, new: NewTransaction) -> LedgerResult<Transaction>;

    /// Record a keyed credit (`refund` or `prize` with a reference) unless the
    /// owner already holds one with that reference, in which case that record
    /// is returned. Other transactions are always created.
    async fn create_keyed(&self, new: NewTransaction) -> LedgerResult<Keyed<Transaction>>;

    /// Fetch a transaction by id
    async fn get(&self, id: Uuid) -> LedgerResult<Transaction>;

    /// Move a transaction to `status`, writing `patch` only if the move happens
    async fn transition_to(
        &self,
        id: Uuid,
        status: TransactionStatus,
        patch: TransactionPatch,
    ) -> LedgerResult<Transitioned<Transaction>>;

    /// Newest-first history for one owner
    async fn list_for_user(
        &self,
        user_id: UserId,
        query: &TransactionQuery,
    ) -> LedgerResult<Page<Transaction>>;

    /// Most recent transaction of an owner carrying `reference`
    async fn find_by_reference(
        &self,
        user_id: UserId,
        reference: &str,
    ) -> LedgerResult<Option<Transaction>>;

    /// Next page of `scan` among records last touched before `updated_before`, oldest first
    async fn list_by_status(
        &self,
        scan: &StatusScan,
        updated_before: DateTime<Utc>,
    ) -> LedgerResult<Vec<Transaction>>;

    /// Next page of `scan` among records touched at or after `updated_after`, oldest first
    async fn list_updated_since(
        &self,
        scan: &StatusScan,
        updated_after: DateTime<Utc>,
    ) -> LedgerResult<Vec<Transaction>>;
}

//! Tournament membership and entry-fee escrow.
//!
//! This module implements:
//! - Tournament records with capacity and a start timestamp
//! - Membership changes as compare-and-set operations on the tournament store
//! - The escrow coordinator moving entry fees between wallets and tournaments
//!
//! Joining debits the wallet before the membership is written, and a failed
//! membership write is compensated with a refund. Leaving removes the
//! membership first and then refunds under a per-membership idempotency token,
//! so a retried leave can never refund twice.

pub mod errors;
pub mod escrow;
pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{TournamentId, UserId};

pub use errors::{EscrowError, EscrowResult};
pub use escrow::EscrowCoordinator;
pub use memory::MemoryTournamentStore;
pub use models::{
    CancelReport, JoinReceipt, LeaveReceipt, Membership, NewTournament, Tournament,
    TournamentState,
};
pub use postgres::PgTournamentStore;

/// Storage contract for tournaments and their members.
#[async_trait]
pub trait TournamentStore: Send + Sync {
    async fn create(&self, new: NewTournament, currency: &str) -> EscrowResult<Tournament>;

    async fn get(&self, id: TournamentId) -> EscrowResult<Tournament>;

    async fn membership(
        &self,
        tournament_id: TournamentId,
        user_id: UserId,
    ) -> EscrowResult<Option<Membership>>;

    async fn members(&self, tournament_id: TournamentId) -> EscrowResult<Vec<Membership>>;

    /// Add a member and increment the player count in one step.
    ///
    /// Rechecks registration state, capacity and existing membership under the
    /// store's own guard: `NotJoinable`, `Full`, `AlreadyRegistered`.
    async fn add_member(
        &self,
        tournament_id: TournamentId,
        user_id: UserId,
        entry_transaction_id: Option<Uuid>,
    ) -> EscrowResult<Membership>;

    /// Remove a member and decrement the player count in one step.
    ///
    /// Returns the removed membership, or `None` if another caller removed it first.
    async fn remove_member(
        &self,
        tournament_id: TournamentId,
        user_id: UserId,
    ) -> EscrowResult<Option<Membership>>;

    /// Compare-and-set the tournament state
    async fn set_state(
        &self,
        id: TournamentId,
        expected: TournamentState,
        next: TournamentState,
    ) -> EscrowResult<Tournament>;
}

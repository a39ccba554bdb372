//! Entry-fee escrow coordinator.

use chrono::Utc;
use log::{error, info, warn};
use serde_json::json;
use std::sync::Arc;

use super::{
    CancelReport, EscrowError, EscrowResult, JoinReceipt, LeaveReceipt, Membership, NewTournament,
    Tournament, TournamentState, TournamentStore,
};
use crate::ledger::{
    LedgerError, NewTransaction, Transaction, TransactionKind, TransactionLog, TransactionPatch,
    TransactionStatus,
};
use crate::wallet::{Wallet, WalletStore};
use crate::{Amount, TournamentId, UserId};

/// Coordinates wallet debits and credits with tournament membership.
///
/// There is no transaction spanning the wallet, the ledger and the tournament
/// store. Each call is a fixed sequence of single-record steps:
///
/// - join: pending `entry_fee` → wallet debit → `entry_fee` completed → membership
///   (a failed membership write is compensated with a refund)
/// - leave: membership removal → refund keyed by `refund:<membership id>`
pub struct EscrowCoordinator {
    tournaments: Arc<dyn TournamentStore>,
    wallets: Arc<dyn WalletStore>,
    transactions: Arc<dyn TransactionLog>,
}

impl EscrowCoordinator {
    pub fn new(
        tournaments: Arc<dyn TournamentStore>,
        wallets: Arc<dyn WalletStore>,
        transactions: Arc<dyn TransactionLog>,
    ) -> Self {
        Self {
            tournaments,
            wallets,
            transactions,
        }
    }

    pub async fn create_tournament(&self, new: NewTournament) -> EscrowResult<Tournament> {
        if new.name.trim().is_empty() {
            return Err(EscrowError::InvalidRequest("name is required".to_string()));
        }
        if new.entry_fee < 0 {
            return Err(EscrowError::InvalidRequest(
                "entry fee cannot be negative".to_string(),
            ));
        }
        if new.max_players == 0 {
            return Err(EscrowError::InvalidRequest(
                "max players must be positive".to_string(),
            ));
        }

        let tournament = self
            .tournaments
            .create(new, self.wallets.currency())
            .await?;
        info!(
            "Tournament {} '{}' created: fee {} {}, {} seats",
            tournament.id,
            tournament.name,
            tournament.entry_fee,
            tournament.currency,
            tournament.max_players
        );
        Ok(tournament)
    }

    pub async fn tournament(&self, id: TournamentId) -> EscrowResult<Tournament> {
        self.tournaments.get(id).await
    }

    /// Register a user, debiting the entry fee
    pub async fn join(&self, user_id: UserId, tournament_id: TournamentId) -> EscrowResult<JoinReceipt> {
        let tournament = self.tournaments.get(tournament_id).await?;
        if !tournament.accepts_registration(Utc::now()) {
            return Err(EscrowError::NotJoinable);
        }
        if self
            .tournaments
            .membership(tournament_id, user_id)
            .await?
            .is_some()
        {
            return Err(EscrowError::AlreadyRegistered);
        }
        if tournament.is_full() {
            return Err(EscrowError::Full);
        }

        if tournament.entry_fee == 0 {
            let membership = self
                .tournaments
                .add_member(tournament_id, user_id, None)
                .await?;
            let wallet = self.wallets.get_or_create(user_id).await?;
            return self.join_receipt(membership, wallet).await;
        }

        let entry = self.debit_entry_fee(user_id, &tournament).await?;

        match self
            .tournaments
            .add_member(tournament_id, user_id, Some(entry.transaction.id))
            .await
        {
            Ok(membership) => {
                info!(
                    "User {user_id} joined tournament {tournament_id}, fee {}",
                    tournament.entry_fee
                );
                self.join_receipt(membership, entry.wallet).await
            }
            Err(err) => {
                warn!(
                    "Membership for user {user_id} in tournament {tournament_id} failed after debit: {err}; refunding"
                );
                self.compensate(user_id, &tournament, &entry.transaction)
                    .await;
                Err(err)
            }
        }
    }

    /// Withdraw a user before the start, refunding the entry fee
    pub async fn leave(&self, user_id: UserId, tournament_id: TournamentId) -> EscrowResult<LeaveReceipt> {
        let tournament = self.tournaments.get(tournament_id).await?;
        if self
            .tournaments
            .membership(tournament_id, user_id)
            .await?
            .is_none()
        {
            return Err(EscrowError::NotRegistered);
        }
        if !tournament.accepts_registration(Utc::now()) {
            return Err(EscrowError::AlreadyStarted);
        }

        // Only the caller that removes the membership goes on to refund it.
        let membership = self
            .tournaments
            .remove_member(tournament_id, user_id)
            .await?
            .ok_or(EscrowError::NotRegistered)?;

        let (wallet, refunded) = if membership.entry_transaction_id.is_some()
            && tournament.entry_fee > 0
        {
            self.refund_membership(&tournament, &membership, "withdrawal")
                .await?
        } else {
            (self.wallets.get_or_create(user_id).await?, 0)
        };

        info!("User {user_id} left tournament {tournament_id}, refunded {refunded}");
        Ok(LeaveReceipt {
            tournament: self.tournaments.get(tournament_id).await?,
            wallet: wallet.into(),
            refunded,
        })
    }

    /// Close registration and start play
    pub async fn start_tournament(&self, id: TournamentId) -> EscrowResult<Tournament> {
        let tournament = self
            .tournaments
            .set_state(id, TournamentState::Registration, TournamentState::Running)
            .await?;
        info!("Tournament {id} started with {} players", tournament.current_players);
        Ok(tournament)
    }

    pub async fn complete_tournament(&self, id: TournamentId) -> EscrowResult<Tournament> {
        let tournament = self
            .tournaments
            .set_state(id, TournamentState::Running, TournamentState::Completed)
            .await?;
        info!("Tournament {id} completed");
        Ok(tournament)
    }

    /// Cancel a tournament and refund every member.
    ///
    /// Calling it again on a cancelled tournament retries refunds that did not
    /// go through; refunds already made are not repeated.
    pub async fn cancel_tournament(&self, id: TournamentId) -> EscrowResult<CancelReport> {
        let current = self.tournaments.get(id).await?;
        let tournament = match current.state {
            TournamentState::Cancelled => current,
            TournamentState::Registration | TournamentState::Running => {
                self.tournaments
                    .set_state(id, current.state, TournamentState::Cancelled)
                    .await?
            }
            TournamentState::Completed => {
                return Err(EscrowError::InvalidState {
                    expected: TournamentState::Running,
                    actual: TournamentState::Completed,
                });
            }
        };

        let mut report = CancelReport {
            tournament: tournament.clone(),
            refunds_issued: 0,
            refunds_failed: 0,
        };
        if tournament.entry_fee == 0 {
            return Ok(report);
        }

        for membership in self.tournaments.members(id).await? {
            if membership.entry_transaction_id.is_none() {
                continue;
            }
            match self
                .refund_membership(&tournament, &membership, "tournament cancelled")
                .await
            {
                Ok((_, refunded)) if refunded > 0 => report.refunds_issued += 1,
                Ok(_) => {}
                Err(err) => {
                    error!(
                        "Refund for user {} in cancelled tournament {id} failed: {err}",
                        membership.user_id
                    );
                    report.refunds_failed += 1;
                }
            }
        }

        info!(
            "Tournament {id} cancelled: {} refunds issued, {} failed",
            report.refunds_issued, report.refunds_failed
        );
        Ok(report)
    }

    /// Credit a prize to a member of a running or completed tournament.
    /// One prize per member per tournament.
    pub async fn award_prize(
        &self,
        tournament_id: TournamentId,
        user_id: UserId,
        amount: Amount,
    ) -> EscrowResult<Wallet> {
        if amount <= 0 {
            return Err(EscrowError::InvalidRequest(
                "prize must be positive".to_string(),
            ));
        }
        let tournament = self.tournaments.get(tournament_id).await?;
        if !matches!(
            tournament.state,
            TournamentState::Running | TournamentState::Completed
        ) {
            return Err(EscrowError::InvalidState {
                expected: TournamentState::Running,
                actual: tournament.state,
            });
        }
        if self
            .tournaments
            .membership(tournament_id, user_id)
            .await?
            .is_none()
        {
            return Err(EscrowError::NotRegistered);
        }

        let reference = format!("prize:{tournament_id}:{user_id}");
        let (wallet, credited) = self
            .credit_once(
                user_id,
                TransactionKind::Prize,
                amount,
                &reference,
                format!("Prize from tournament {}", tournament.name),
            )
            .await?;
        if credited > 0 {
            info!("Prize of {amount} awarded to user {user_id} in tournament {tournament_id}");
        }
        Ok(wallet)
    }

    async fn debit_entry_fee(
        &self,
        user_id: UserId,
        tournament: &Tournament,
    ) -> EscrowResult<Debited> {
        let fee = tournament.entry_fee;
        let transaction = self
            .transactions
            .create(
                NewTransaction::pending(
                    user_id,
                    TransactionKind::EntryFee,
                    -fee,
                    &tournament.currency,
                )
                .with_reference(format!("tournament:{}", tournament.id))
                .with_description(format!("Entry fee for {}", tournament.name))
                .with_metadata(json!({"tournament_id": tournament.id})),
            )
            .await?;

        let wallet = match self
            .wallets
            .apply_delta(user_id, -fee, transaction.id)
            .await
        {
            Ok(wallet) => wallet,
            Err(err) => {
                self.transactions
                    .transition_to(
                        transaction.id,
                        TransactionStatus::Failed,
                        TransactionPatch::new().description(err.to_string()),
                    )
                    .await?;
                return Err(err.into());
            }
        };

        let transaction = self
            .transactions
            .transition_to(
                transaction.id,
                TransactionStatus::Completed,
                TransactionPatch::new(),
            )
            .await?
            .record;

        Ok(Debited {
            transaction,
            wallet,
        })
    }

    /// Return the entry fee of `membership` unless that refund already exists.
    /// Yields the wallet and the amount credited by this call.
    async fn refund_membership(
        &self,
        tournament: &Tournament,
        membership: &Membership,
        reason: &str,
    ) -> EscrowResult<(Wallet, Amount)> {
        self.credit_once(
            membership.user_id,
            TransactionKind::Refund,
            tournament.entry_fee,
            &membership.refund_reference(),
            format!("Refund for {}: {reason}", tournament.name),
        )
        .await
    }

    /// Credit keyed by `reference` for this owner: written at most once.
    /// Yields the wallet and the amount credited by this call.
    async fn credit_once(
        &self,
        user_id: UserId,
        kind: TransactionKind,
        amount: Amount,
        reference: &str,
        description: String,
    ) -> EscrowResult<(Wallet, Amount)> {
        let keyed = self
            .transactions
            .create_keyed(
                NewTransaction::pending(user_id, kind, amount, self.wallets.currency())
                    .with_reference(reference)
                    .with_description(description),
            )
            .await?;
        let transaction = keyed.record;

        match transaction.status {
            TransactionStatus::Completed => {
                // Completed means applied, unless a crash landed between the two; finish it.
                let wallet = self
                    .wallets
                    .apply_delta(user_id, transaction.amount, transaction.id)
                    .await?;
                return Ok((wallet, 0));
            }
            TransactionStatus::Pending => {}
            closed => {
                warn!("Keyed credit {reference} for user {user_id} is already {closed}");
                return Err(LedgerError::InvalidTransition {
                    id: transaction.id,
                    from: closed,
                    to: TransactionStatus::Completed,
                }
                .into());
            }
        }

        // A pending record found rather than inserted belongs to an interrupted call.
        let credited = if keyed.inserted
            || !self
                .wallets
                .has_applied(user_id, transaction.id)
                .await?
        {
            transaction.amount
        } else {
            0
        };

        let wallet = self
            .wallets
            .apply_delta(user_id, transaction.amount, transaction.id)
            .await?;
        self.transactions
            .transition_to(
                transaction.id,
                TransactionStatus::Completed,
                TransactionPatch::new(),
            )
            .await?;
        Ok((wallet, credited))
    }

    async fn compensate(&self, user_id: UserId, tournament: &Tournament, entry: &Transaction) {
        let reference = format!("compensation:{}", entry.id);
        let result = self
            .credit_once(
                user_id,
                TransactionKind::Refund,
                tournament.entry_fee,
                &reference,
                format!("Refund for {}: registration failed", tournament.name),
            )
            .await;
        if let Err(err) = result {
            error!(
                "Compensating refund {reference} for user {user_id} failed: {err}; left for the reconciliation sweep"
            );
        }
    }

    async fn join_receipt(&self, membership: Membership, wallet: Wallet) -> EscrowResult<JoinReceipt> {
        Ok(JoinReceipt {
            tournament: self.tournaments.get(membership.tournament_id).await?,
            membership,
            wallet: wallet.into(),
        })
    }
}

struct Debited {
    transaction: Transaction,
    wallet: Wallet,
}

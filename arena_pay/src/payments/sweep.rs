//! Background reconciliation sweep.
//!
//! Finishes work interrupted between the ordered single-record steps of a
//! settlement or an escrow movement, and resolves push payments whose callback
//! never arrived. It relies on the wallet accepting each transaction at most
//! once, so it can repeat any step safely.

use chrono::{Duration, Utc};
use log::{debug, error, info, warn};
use serde_json::json;
use std::sync::Arc;
use tokio::task::JoinHandle;

use super::provider::PushPaymentProvider;
use super::{
    CallbackNotification, CallbackReconciler, IntentStore, PaymentIntent, PaymentResult,
    ReconcileOutcome, Settlement,
};
use crate::ledger::{
    StatusScan, Transaction, TransactionKind, TransactionLog, TransactionPatch, TransactionStatus,
};
use crate::wallet::WalletStore;

/// Sweep timing and batch limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepConfig {
    /// Records younger than this are left to the request that created them
    pub grace: Duration,
    /// Pending push intents older than this with no known outcome are cancelled
    pub pending_ttl: Duration,
    /// How far back completed credits are checked against the wallet
    pub lookback: Duration,
    pub batch_size: u32,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            grace: Duration::seconds(120),
            pending_ttl: Duration::seconds(86_400),
            lookback: Duration::seconds(86_400),
            batch_size: 100,
        }
    }
}

/// Counts from one sweep pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub intents_resolved: u32,
    pub intents_expired: u32,
    pub credits_repaired: u32,
    pub escrow_completed: u32,
    pub escrow_abandoned: u32,
    pub errors: u32,
}

impl SweepReport {
    pub fn total_repairs(&self) -> u32 {
        self.intents_resolved
            + self.intents_expired
            + self.credits_repaired
            + self.escrow_completed
            + self.escrow_abandoned
    }
}

pub struct ReconciliationSweep {
    transactions: Arc<dyn TransactionLog>,
    intents: Arc<dyn IntentStore>,
    wallets: Arc<dyn WalletStore>,
    push_provider: Arc<dyn PushPaymentProvider>,
    reconciler: Arc<CallbackReconciler>,
    config: SweepConfig,
}

impl ReconciliationSweep {
    pub fn new(
        transactions: Arc<dyn TransactionLog>,
        intents: Arc<dyn IntentStore>,
        wallets: Arc<dyn WalletStore>,
        push_provider: Arc<dyn PushPaymentProvider>,
        reconciler: Arc<CallbackReconciler>,
        config: SweepConfig,
    ) -> Self {
        Self {
            transactions,
            intents,
            wallets,
            push_provider,
            reconciler,
            config,
        }
    }

    /// Run the sweep every `interval` until the task is aborted. Do not await the handle.
    pub fn spawn(self: Arc<Self>, interval: std::time::Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            info!("Reconciliation sweep started, interval {interval:?}");
            loop {
                timer.tick().await;
                match self.run_once().await {
                    Ok(report) if report.total_repairs() > 0 || report.errors > 0 => {
                        info!("Reconciliation sweep: {report:?}");
                    }
                    Ok(_) => debug!("Reconciliation sweep: nothing to do"),
                    Err(e) => error!("Reconciliation sweep failed: {e}"),
                }
            }
        })
    }

    /// One pass over stale intents, unapplied credits and abandoned escrow entries
    pub async fn run_once(&self) -> PaymentResult<SweepReport> {
        let mut report = SweepReport::default();
        self.resolve_pending_intents(&mut report).await?;
        self.repair_credits(&mut report).await?;
        self.settle_escrow(&mut report).await?;
        Ok(report)
    }

    async fn resolve_pending_intents(&self, report: &mut SweepReport) -> PaymentResult<()> {
        let now = Utc::now();
        let stale = self
            .intents
            .list_pending(now - self.config.grace, self.config.batch_size)
            .await?;

        for intent in stale {
            let expired = intent.created_at < now - self.config.pending_ttl;
            match self.resolve_intent(&intent, expired).await {
                Ok(Resolution::Resolved) => report.intents_resolved += 1,
                Ok(Resolution::Expired) => report.intents_expired += 1,
                Ok(Resolution::Waiting) => {}
                Err(e) => {
                    warn!("Sweep could not resolve intent {}: {e}", intent.reference());
                    report.errors += 1;
                }
            }
        }
        Ok(())
    }

    async fn resolve_intent(
        &self,
        intent: &PaymentIntent,
        expired: bool,
    ) -> PaymentResult<Resolution> {
        let transaction = self.transactions.get(intent.transaction_id).await?;
        match transaction.status {
            TransactionStatus::Completed => {
                // Interrupted settlement: the transaction already carries the settled amount.
                let settlement = Settlement {
                    amount: transaction.amount,
                    receipt: transaction
                        .reference_id
                        .clone()
                        .unwrap_or_else(|| intent.reference().to_string()),
                    settled_at: None,
                };
                self.reconciler.settle(intent, &settlement, None).await?;
                return Ok(Resolution::Resolved);
            }
            TransactionStatus::Failed | TransactionStatus::Cancelled => {
                let reason = transaction
                    .description
                    .clone()
                    .unwrap_or_else(|| format!("transaction {}", transaction.status));
                self.intents
                    .finalize(intent.id, transaction.status, Some(reason), None)
                    .await?;
                return Ok(Resolution::Resolved);
            }
            TransactionStatus::Pending => {}
        }

        if intent.provider == self.push_provider.name() {
            match self.push_provider.query(intent.reference()).await {
                Ok(Some(outcome)) => {
                    let notification = CallbackNotification {
                        reference: intent.reference().to_string(),
                        outcome,
                        payload: json!({"source": "status_query"}),
                    };
                    return match self.reconciler.reconcile(&notification).await {
                        ReconcileOutcome::Credited(_)
                        | ReconcileOutcome::Failed
                        | ReconcileOutcome::AlreadyFinal(_) => Ok(Resolution::Resolved),
                        other => {
                            warn!(
                                "Status query for {} not applied: {}",
                                intent.reference(),
                                other.label()
                            );
                            Ok(Resolution::Waiting)
                        }
                    };
                }
                Ok(None) => {}
                Err(e) => debug!("Status query for {} failed: {e}", intent.reference()),
            }
        }

        if expired {
            self.reconciler.cancel(intent, "expired").await?;
            return Ok(Resolution::Expired);
        }
        Ok(Resolution::Waiting)
    }

    async fn repair_credits(&self, report: &mut SweepReport) -> PaymentResult<()> {
        let since = Utc::now() - self.config.lookback;
        let mut scan = StatusScan::new(
            TransactionStatus::Completed,
            &TransactionKind::CREDITS,
            self.config.batch_size,
        );

        loop {
            let page = self.transactions.list_updated_since(&scan, since).await?;
            for transaction in page.iter().filter(|t| t.amount > 0) {
                match self.repair_credit(transaction).await {
                    Ok(true) => report.credits_repaired += 1,
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Sweep could not credit transaction {}: {e}", transaction.id);
                        report.errors += 1;
                    }
                }
            }
            if !scan.advance(&page) {
                return Ok(());
            }
        }
    }

    async fn repair_credit(&self, transaction: &Transaction) -> PaymentResult<bool> {
        if self
            .wallets
            .has_applied(transaction.user_id, transaction.id)
            .await?
        {
            return Ok(false);
        }
        let wallet = self
            .wallets
            .apply_delta(transaction.user_id, transaction.amount, transaction.id)
            .await?;
        warn!(
            "Sweep finished interrupted credit {} for user {}: balance now {}",
            transaction.id, transaction.user_id, wallet.balance
        );
        Ok(true)
    }

    async fn settle_escrow(&self, report: &mut SweepReport) -> PaymentResult<()> {
        let cutoff = Utc::now() - self.config.grace;
        let mut scan = StatusScan::new(
            TransactionStatus::Pending,
            &TransactionKind::ESCROW,
            self.config.batch_size,
        );

        loop {
            let page = self.transactions.list_by_status(&scan, cutoff).await?;
            for transaction in &page {
                self.close_escrow(transaction, report).await;
            }
            if !scan.advance(&page) {
                return Ok(());
            }
        }
    }

    async fn close_escrow(&self, transaction: &Transaction, report: &mut SweepReport) {
        let applied = match self
            .wallets
            .has_applied(transaction.user_id, transaction.id)
            .await
        {
            Ok(applied) => applied,
            Err(e) => {
                warn!("Sweep could not check transaction {}: {e}", transaction.id);
                report.errors += 1;
                return;
            }
        };

        if !applied && transaction.kind.is_keyed() {
            // An owed refund or prize: its key blocks a second record, so finish this one.
            if let Err(e) = self
                .wallets
                .apply_delta(transaction.user_id, transaction.amount, transaction.id)
                .await
            {
                warn!("Sweep could not credit transaction {}: {e}", transaction.id);
                report.errors += 1;
                return;
            }
        }
        let completes = applied || transaction.kind.is_keyed();

        let (status, patch) = if completes {
            (TransactionStatus::Completed, TransactionPatch::new())
        } else {
            (
                TransactionStatus::Failed,
                TransactionPatch::new().description("abandoned"),
            )
        };
        match self
            .transactions
            .transition_to(transaction.id, status, patch)
            .await
        {
            Ok(t) if t.changed && completes => report.escrow_completed += 1,
            Ok(t) if t.changed => report.escrow_abandoned += 1,
            Ok(_) => {}
            Err(e) => {
                warn!("Sweep could not close transaction {}: {e}", transaction.id);
                report.errors += 1;
            }
        }
    }
}

enum Resolution {
    Resolved,
    Expired,
    Waiting,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{MemoryTransactionLog, NewTransaction};
    use crate::payments::provider::AmountLimits;
    use crate::payments::sandbox::SandboxPushProvider;
    use crate::payments::{IntentStatus, MemoryIntentStore, NewIntent};
    use crate::wallet::MemoryWalletStore;

    struct Fixture {
        transactions: Arc<MemoryTransactionLog>,
        intents: Arc<MemoryIntentStore>,
        wallets: Arc<MemoryWalletStore>,
        provider: Arc<SandboxPushProvider>,
        sweep: ReconciliationSweep,
    }

    /// Zero grace so freshly created records are eligible
    fn fixture(pending_ttl: Duration) -> Fixture {
        fixture_with(SweepConfig {
            grace: Duration::milliseconds(-1),
            pending_ttl,
            ..Default::default()
        })
    }

    fn fixture_with(config: SweepConfig) -> Fixture {
        let transactions = Arc::new(MemoryTransactionLog::new());
        let intents = Arc::new(MemoryIntentStore::new());
        let wallets = Arc::new(MemoryWalletStore::new("KES"));
        let provider = Arc::new(SandboxPushProvider::new(AmountLimits { min: 1, max: 10_000 }));
        let reconciler = Arc::new(CallbackReconciler::new(
            transactions.clone(),
            intents.clone(),
            wallets.clone(),
        ));
        let sweep = ReconciliationSweep::new(
            transactions.clone(),
            intents.clone(),
            wallets.clone(),
            provider.clone(),
            reconciler,
            config,
        );
        Fixture {
            transactions,
            intents,
            wallets,
            provider,
            sweep,
        }
    }

    async fn pending_push(f: &Fixture, reference: &str) -> PaymentIntent {
        let tx = f
            .transactions
            .create(NewTransaction::pending(1, TransactionKind::Topup, 400, "KES"))
            .await
            .unwrap();
        f.intents
            .create(NewIntent {
                provider: "sandbox_push".to_string(),
                local_reference: format!("loc_{reference}"),
                provider_reference: Some(reference.to_string()),
                user_id: 1,
                amount: 400,
                currency: "KES".to_string(),
                transaction_id: tx.id,
                provider_payload: json!({}),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_finishes_interrupted_settlement_once() {
        let f = fixture(Duration::days(1));
        let intent = pending_push(&f, "ws_CO_A").await;
        f.transactions
            .transition_to(
                intent.transaction_id,
                TransactionStatus::Completed,
                TransactionPatch::new().reference("RCPT"),
            )
            .await
            .unwrap();

        let report = f.sweep.run_once().await.unwrap();
        assert_eq!(report.intents_resolved, 1);
        assert_eq!(f.wallets.get_or_create(1).await.unwrap().balance, 400);
        assert_eq!(
            f.intents.get(intent.id).await.unwrap().status,
            IntentStatus::Completed
        );

        let again = f.sweep.run_once().await.unwrap();
        assert_eq!(again.total_repairs(), 0);
        assert_eq!(f.wallets.get_or_create(1).await.unwrap().balance, 400);
    }

    #[tokio::test]
    async fn test_applies_provider_status_query() {
        let f = fixture(Duration::days(1));
        let intent = pending_push(&f, "ws_CO_B").await;
        f.provider
            .script_outcome("ws_CO_B", SandboxPushProvider::settled(400))
            .await;

        let report = f.sweep.run_once().await.unwrap();
        assert_eq!(report.intents_resolved, 1);
        assert_eq!(
            f.intents.get(intent.id).await.unwrap().status,
            IntentStatus::Completed
        );
        assert_eq!(f.wallets.get_or_create(1).await.unwrap().balance, 400);
    }

    #[tokio::test]
    async fn test_expires_unresolved_intents() {
        let f = fixture(Duration::milliseconds(-1));
        let intent = pending_push(&f, "ws_CO_C").await;

        let report = f.sweep.run_once().await.unwrap();
        assert_eq!(report.intents_expired, 1);
        let stored = f.intents.get(intent.id).await.unwrap();
        assert_eq!(stored.status, IntentStatus::Cancelled);
        assert_eq!(stored.failure_reason.as_deref(), Some("expired"));
        assert_eq!(
            f.transactions.get(intent.transaction_id).await.unwrap().status,
            TransactionStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_escrow_entries_closed_by_wallet_state() {
        let f = fixture(Duration::days(1));
        f.wallets
            .apply_delta(2, 1000, uuid::Uuid::new_v4())
            .await
            .unwrap();
        let applied = f
            .transactions
            .create(NewTransaction::pending(2, TransactionKind::EntryFee, -200, "KES"))
            .await
            .unwrap();
        f.wallets.apply_delta(2, -200, applied.id).await.unwrap();
        let abandoned = f
            .transactions
            .create(NewTransaction::pending(2, TransactionKind::EntryFee, -300, "KES"))
            .await
            .unwrap();

        let report = f.sweep.run_once().await.unwrap();
        assert_eq!(report.escrow_completed, 1);
        assert_eq!(report.escrow_abandoned, 1);
        assert_eq!(
            f.transactions.get(applied.id).await.unwrap().status,
            TransactionStatus::Completed
        );
        assert_eq!(
            f.transactions.get(abandoned.id).await.unwrap().status,
            TransactionStatus::Failed
        );
        assert_eq!(f.wallets.get_or_create(2).await.unwrap().balance, 800);
    }

    fn small_batches() -> SweepConfig {
        SweepConfig {
            grace: Duration::milliseconds(-1),
            batch_size: 5,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_escrow_entry_found_behind_pending_topups() {
        let f = fixture_with(small_batches());
        for _ in 0..12 {
            f.transactions
                .create(NewTransaction::pending(1, TransactionKind::Topup, 400, "KES"))
                .await
                .unwrap();
        }
        f.wallets
            .apply_delta(2, 1000, uuid::Uuid::new_v4())
            .await
            .unwrap();
        let entry = f
            .transactions
            .create(NewTransaction::pending(2, TransactionKind::EntryFee, -200, "KES"))
            .await
            .unwrap();
        f.wallets.apply_delta(2, -200, entry.id).await.unwrap();

        let report = f.sweep.run_once().await.unwrap();
        assert_eq!(report.escrow_completed, 1);
        assert_eq!(
            f.transactions.get(entry.id).await.unwrap().status,
            TransactionStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_missing_credit_found_past_first_batch() {
        let f = fixture_with(small_batches());
        f.wallets
            .apply_delta(1, 10_000, uuid::Uuid::new_v4())
            .await
            .unwrap();
        for _ in 0..12 {
            let fee = f
                .transactions
                .create(NewTransaction::pending(1, TransactionKind::EntryFee, -100, "KES"))
                .await
                .unwrap();
            f.wallets.apply_delta(1, -100, fee.id).await.unwrap();
            f.transactions
                .transition_to(fee.id, TransactionStatus::Completed, TransactionPatch::new())
                .await
                .unwrap();

            let credited = f
                .transactions
                .create(NewTransaction::pending(1, TransactionKind::Refund, 100, "KES"))
                .await
                .unwrap();
            f.wallets.apply_delta(1, 100, credited.id).await.unwrap();
            f.transactions
                .transition_to(
                    credited.id,
                    TransactionStatus::Completed,
                    TransactionPatch::new(),
                )
                .await
                .unwrap();
        }
        let missing = f
            .transactions
            .create(NewTransaction::pending(1, TransactionKind::Prize, 700, "KES"))
            .await
            .unwrap();
        f.transactions
            .transition_to(missing.id, TransactionStatus::Completed, TransactionPatch::new())
            .await
            .unwrap();

        let report = f.sweep.run_once().await.unwrap();
        assert_eq!(report.credits_repaired, 1);
        assert_eq!(f.wallets.get_or_create(1).await.unwrap().balance, 10_700);

        let again = f.sweep.run_once().await.unwrap();
        assert_eq!(again.credits_repaired, 0);
    }

    #[tokio::test]
    async fn test_owed_refund_is_finished_not_abandoned() {
        let f = fixture(Duration::days(1));
        let refund = f
            .transactions
            .create(
                NewTransaction::pending(3, TransactionKind::Refund, 250, "KES")
                    .with_reference("refund:abc"),
            )
            .await
            .unwrap();

        let report = f.sweep.run_once().await.unwrap();
        assert_eq!(report.escrow_completed, 1);
        assert_eq!(report.escrow_abandoned, 0);
        assert_eq!(
            f.transactions.get(refund.id).await.unwrap().status,
            TransactionStatus::Completed
        );
        assert_eq!(f.wallets.get_or_create(3).await.unwrap().balance, 250);

        f.sweep.run_once().await.unwrap();
        assert_eq!(f.wallets.get_or_create(3).await.unwrap().balance, 250);
    }
}

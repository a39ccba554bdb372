//! Callback reconciliation.
//!
//! Every outcome notification is applied as a sequence of single-record
//! compare-and-set steps in the order Transaction, Intent, Wallet. Each step is
//! idempotent, so a redelivered notification or a sweep pass finishing an
//! interrupted one never applies money twice.

use log::{error, info, warn};
use serde_json::Value;
use std::sync::Arc;

use super::callback::parse_callback;
use super::{
    CallbackAck, CallbackNotification, CallbackOutcome, IntentStatus, IntentStore, PaymentError,
    PaymentIntent, PaymentResult, ReconcileOutcome, Settlement,
};
use crate::ledger::{TransactionLog, TransactionPatch, TransactionStatus};
use crate::wallet::{Wallet, WalletError, WalletStore};

/// Applies provider outcomes to intents, transactions and wallets
pub struct CallbackReconciler {
    transactions: Arc<dyn TransactionLog>,
    intents: Arc<dyn IntentStore>,
    wallets: Arc<dyn WalletStore>,
}

impl CallbackReconciler {
    pub fn new(
        transactions: Arc<dyn TransactionLog>,
        intents: Arc<dyn IntentStore>,
        wallets: Arc<dyn WalletStore>,
    ) -> Self {
        Self {
            transactions,
            intents,
            wallets,
        }
    }

    /// Process a notification and acknowledge it. The acknowledgment never
    /// depends on the outcome.
    pub async fn handle(&self, notification: &CallbackNotification) -> CallbackAck {
        self.reconcile(notification).await;
        CallbackAck::accepted()
    }

    /// Parse and process a raw callback body
    pub async fn handle_payload(&self, body: &[u8]) -> (CallbackAck, ReconcileOutcome) {
        let outcome = match parse_callback(body) {
            Ok(notification) => self.reconcile(&notification).await,
            Err(err) => {
                warn!("Discarding unreadable callback: {err}");
                ReconcileOutcome::ProtocolError(err.to_string())
            }
        };
        (CallbackAck::accepted(), outcome)
    }

    /// Apply a notification and report what happened
    pub async fn reconcile(&self, notification: &CallbackNotification) -> ReconcileOutcome {
        let reference = notification.reference.as_str();
        let intent = match self.intents.find_by_reference(reference).await {
            Ok(Some(intent)) => intent,
            Ok(None) => {
                warn!("Callback for unknown reference {reference}; acknowledged without changes");
                return ReconcileOutcome::UnknownReference;
            }
            Err(err) => {
                error!("Intent lookup for {reference} failed: {err}");
                return ReconcileOutcome::Internal(err.to_string());
            }
        };

        if intent.status.is_terminal() {
            info!(
                "Duplicate callback for {reference}: intent already {}",
                intent.status
            );
            return ReconcileOutcome::AlreadyFinal(intent.status);
        }

        let result = match &notification.outcome {
            CallbackOutcome::Failure { code, reason } => {
                let reason = format!("{reason} (code {code})");
                self.fail(&intent, &reason, Some(notification.payload.clone()))
                    .await
                    .map(|()| ReconcileOutcome::Failed)
            }
            CallbackOutcome::Success(metadata) => match metadata.validate() {
                Ok(settlement) => self
                    .settle(&intent, &settlement, Some(notification.payload.clone()))
                    .await
                    .map(ReconcileOutcome::Credited),
                Err(problem) => {
                    error!("Success callback for {reference} unusable: {problem}; nothing applied");
                    return ReconcileOutcome::ProtocolError(problem);
                }
            },
        };

        result.unwrap_or_else(|err| {
            if err.is_conflict() {
                error!("Callback for {reference} conflicts with stored state: {err}");
                ReconcileOutcome::Conflict(err.to_string())
            } else {
                error!("Callback for {reference} could not be applied: {err}");
                ReconcileOutcome::Internal(err.to_string())
            }
        })
    }

    /// Complete the transaction with the settled amount, complete the intent,
    /// then credit the wallet.
    ///
    /// Shared by callbacks, pull captures and the sweep. Safe to repeat: each
    /// step is a no-op once done.
    pub async fn settle(
        &self,
        intent: &PaymentIntent,
        settlement: &Settlement,
        provider_payload: Option<Value>,
    ) -> PaymentResult<Wallet> {
        if settlement.amount <= 0 {
            return Err(PaymentError::UnusableSettlement {
                reference: intent.reference().to_string(),
                problem: format!("settlement amount {} is not positive", settlement.amount),
            });
        }
        if intent.currency != self.wallets.currency() {
            return Err(PaymentError::Wallet(WalletError::CurrencyMismatch {
                expected: self.wallets.currency().to_string(),
                got: intent.currency.clone(),
            }));
        }
        if settlement.amount != intent.amount {
            warn!(
                "Intent {} settled {} but requested {}; crediting the settled amount",
                intent.reference(),
                settlement.amount,
                intent.amount
            );
        }

        let mut patch = TransactionPatch::new()
            .amount(settlement.amount)
            .reference(settlement.receipt.clone())
            .meta("receipt", settlement.receipt.clone())
            .meta("requested_amount", intent.amount)
            .meta("correlation_reference", intent.reference());
        if let Some(settled_at) = settlement.settled_at {
            patch = patch.meta("settled_at", settled_at.to_rfc3339());
        }

        let transaction = self
            .transactions
            .transition_to(intent.transaction_id, TransactionStatus::Completed, patch)
            .await?
            .record;

        self.intents
            .finalize(intent.id, IntentStatus::Completed, None, provider_payload)
            .await?;

        let wallet = self
            .wallets
            .apply_delta(transaction.user_id, transaction.amount, transaction.id)
            .await?;

        info!(
            "Credited {} {} to user {} for {} (receipt {})",
            transaction.amount,
            transaction.currency,
            transaction.user_id,
            intent.reference(),
            settlement.receipt
        );
        Ok(wallet)
    }

    /// Mark the transaction and intent failed. No wallet change.
    pub async fn fail(
        &self,
        intent: &PaymentIntent,
        reason: &str,
        provider_payload: Option<Value>,
    ) -> PaymentResult<()> {
        self.close(intent, IntentStatus::Failed, reason, provider_payload)
            .await?;
        info!("Payment {} failed: {reason}", intent.reference());
        Ok(())
    }

    /// Mark the transaction and intent cancelled. No wallet change.
    pub async fn cancel(&self, intent: &PaymentIntent, reason: &str) -> PaymentResult<()> {
        self.close(intent, IntentStatus::Cancelled, reason, None).await?;
        info!("Payment {} cancelled: {reason}", intent.reference());
        Ok(())
    }

    async fn close(
        &self,
        intent: &PaymentIntent,
        status: IntentStatus,
        reason: &str,
        provider_payload: Option<Value>,
    ) -> PaymentResult<()> {
        self.transactions
            .transition_to(
                intent.transaction_id,
                status,
                TransactionPatch::new()
                    .description(reason)
                    .meta("failure_reason", reason),
            )
            .await?;
        self.intents
            .finalize(intent.id, status, Some(reason.to_string()), provider_payload)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{MemoryTransactionLog, NewTransaction, TransactionKind};
    use crate::payments::callback::{failure_body, success_body};
    use crate::payments::{MemoryIntentStore, NewIntent, SettlementMetadata};
    use crate::wallet::MemoryWalletStore;

    struct Fixture {
        transactions: Arc<MemoryTransactionLog>,
        intents: Arc<MemoryIntentStore>,
        wallets: Arc<MemoryWalletStore>,
        reconciler: CallbackReconciler,
    }

    fn fixture() -> Fixture {
        let transactions = Arc::new(MemoryTransactionLog::new());
        let intents = Arc::new(MemoryIntentStore::new());
        let wallets = Arc::new(MemoryWalletStore::new("KES"));
        let reconciler =
            CallbackReconciler::new(transactions.clone(), intents.clone(), wallets.clone());
        Fixture {
            transactions,
            intents,
            wallets,
            reconciler,
        }
    }

    async fn pending_intent(f: &Fixture, reference: &str, amount: i64) -> PaymentIntent {
        let tx = f
            .transactions
            .create(
                NewTransaction::pending(1, TransactionKind::Topup, amount, "KES")
                    .with_reference("loc_x"),
            )
            .await
            .unwrap();
        f.intents
            .create(NewIntent {
                provider: "sandbox_push".to_string(),
                local_reference: format!("loc_{reference}"),
                provider_reference: Some(reference.to_string()),
                user_id: 1,
                amount,
                currency: "KES".to_string(),
                transaction_id: tx.id,
                provider_payload: Value::Null,
            })
            .await
            .unwrap()
    }

    fn notification(body: Value) -> CallbackNotification {
        parse_callback(body.to_string().as_bytes()).unwrap()
    }

    #[tokio::test]
    async fn test_success_credits_once() {
        let f = fixture();
        let intent = pending_intent(&f, "ws_CO_1", 1000).await;
        let callback = notification(success_body("ws_CO_1", 1000, "NLJ7RT61SV"));

        let first = f.reconciler.reconcile(&callback).await;
        assert!(matches!(first, ReconcileOutcome::Credited(ref w) if w.balance == 1000));

        let second = f.reconciler.reconcile(&callback).await;
        assert_eq!(second, ReconcileOutcome::AlreadyFinal(IntentStatus::Completed));
        assert_eq!(f.wallets.get_or_create(1).await.unwrap().balance, 1000);

        let tx = f.transactions.get(intent.transaction_id).await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Completed);
        assert_eq!(tx.reference_id.as_deref(), Some("NLJ7RT61SV"));
    }

    #[tokio::test]
    async fn test_failure_marks_records_without_wallet_change() {
        let f = fixture();
        let intent = pending_intent(&f, "ws_CO_2", 500).await;
        let outcome = f
            .reconciler
            .reconcile(&notification(failure_body("ws_CO_2", 1032, "Request cancelled by user")))
            .await;
        assert_eq!(outcome, ReconcileOutcome::Failed);

        let stored = f.intents.get(intent.id).await.unwrap();
        assert_eq!(stored.status, IntentStatus::Failed);
        assert!(stored.failure_reason.unwrap().contains("cancelled by user"));
        assert!(f.wallets.get(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_settlement_fields_change_nothing() {
        let f = fixture();
        let intent = pending_intent(&f, "ws_CO_3", 500).await;
        let callback = CallbackNotification {
            reference: "ws_CO_3".to_string(),
            outcome: CallbackOutcome::Success(SettlementMetadata {
                amount: Some(500),
                ..Default::default()
            }),
            payload: Value::Null,
        };
        let outcome = f.reconciler.reconcile(&callback).await;
        assert!(matches!(outcome, ReconcileOutcome::ProtocolError(_)));
        assert_eq!(
            f.intents.get(intent.id).await.unwrap().status,
            IntentStatus::Pending
        );
        assert_eq!(
            f.transactions.get(intent.transaction_id).await.unwrap().status,
            TransactionStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_settled_amount_is_credited() {
        let f = fixture();
        pending_intent(&f, "ws_CO_4", 1000).await;
        let outcome = f
            .reconciler
            .reconcile(&notification(success_body("ws_CO_4", 990, "RCPT")))
            .await;
        assert!(matches!(outcome, ReconcileOutcome::Credited(ref w) if w.balance == 990));
    }

    #[tokio::test]
    async fn test_unreadable_payload_is_acknowledged() {
        let f = fixture();
        let (ack, outcome) = f.reconciler.handle_payload(b"{oops").await;
        assert_eq!(ack, CallbackAck::accepted());
        assert!(matches!(outcome, ReconcileOutcome::ProtocolError(_)));
    }

    #[tokio::test]
    async fn test_settle_refuses_non_positive_amount() {
        let f = fixture();
        f.wallets
            .apply_delta(1, 1000, uuid::Uuid::new_v4())
            .await
            .unwrap();
        let intent = pending_intent(&f, "ws_CO_6", 100).await;

        for amount in [0, -500] {
            let settlement = Settlement {
                amount,
                receipt: "RCPT6".to_string(),
                settled_at: None,
            };
            let err = f.reconciler.settle(&intent, &settlement, None).await.unwrap_err();
            assert!(matches!(err, PaymentError::UnusableSettlement { .. }));
        }

        assert_eq!(
            f.transactions.get(intent.transaction_id).await.unwrap().status,
            TransactionStatus::Pending
        );
        assert_eq!(
            f.intents.get(intent.id).await.unwrap().status,
            IntentStatus::Pending
        );
        assert_eq!(f.wallets.get_or_create(1).await.unwrap().balance, 1000);
    }

    #[tokio::test]
    async fn test_resumes_after_transaction_completed() {
        let f = fixture();
        let intent = pending_intent(&f, "ws_CO_5", 700).await;
        // Crash after the first step: transaction completed, intent and wallet untouched.
        f.transactions
            .transition_to(
                intent.transaction_id,
                TransactionStatus::Completed,
                TransactionPatch::new().amount(700),
            )
            .await
            .unwrap();

        let outcome = f
            .reconciler
            .reconcile(&notification(success_body("ws_CO_5", 700, "RCPT5")))
            .await;
        assert!(matches!(outcome, ReconcileOutcome::Credited(ref w) if w.balance == 700));
        assert_eq!(
            f.intents.get(intent.id).await.unwrap().status,
            IntentStatus::Completed
        );
    }
}

//! Push-payment initiation.
//!
//! Local records are written before the provider is called, so a callback
//! that races the provider's response still finds its intent. The push
//! submission itself is sent exactly once per call.

use log::{error, info, warn};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use super::provider::{ProviderError, PushPaymentProvider, PushRequest};
use super::{
    InitiatedPayment, IntentStatus, IntentStore, NewIntent, PaymentError, PaymentIntent,
    PaymentResult, new_local_reference,
};
use crate::ledger::{
    NewTransaction, Transaction, TransactionKind, TransactionLog, TransactionPatch,
    TransactionStatus,
};
use crate::{Amount, UserId};

/// Settings the initiator needs from the engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiatorConfig {
    pub currency: String,
    pub callback_url: String,
    pub provider_timeout: Duration,
}

/// Starts push payments against one provider
pub struct PushPaymentInitiator {
    transactions: Arc<dyn TransactionLog>,
    intents: Arc<dyn IntentStore>,
    provider: Arc<dyn PushPaymentProvider>,
    config: InitiatorConfig,
}

impl PushPaymentInitiator {
    pub fn new(
        transactions: Arc<dyn TransactionLog>,
        intents: Arc<dyn IntentStore>,
        provider: Arc<dyn PushPaymentProvider>,
        config: InitiatorConfig,
    ) -> Self {
        Self {
            transactions,
            intents,
            provider,
            config,
        }
    }

    /// Start a wallet top-up of `amount` from `target`
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` for a bad amount or target; nothing is written
    /// - `ProviderUnavailable` when the provider refuses, fails or times out
    /// - `DuplicateReference` when a correlation reference collides
    pub async fn initiate(
        &self,
        user_id: UserId,
        amount: Amount,
        target: &str,
    ) -> PaymentResult<InitiatedPayment> {
        let target = self.validate(amount, target)?;
        let local_reference = new_local_reference();
        let (transaction, intent) = self
            .record_pending(user_id, amount, &target, &local_reference)
            .await?;

        let request = PushRequest {
            local_reference: local_reference.clone(),
            target,
            amount,
            currency: self.config.currency.clone(),
            callback_url: self.config.callback_url.clone(),
            description: "Wallet top-up".to_string(),
        };

        let response = match tokio::time::timeout(
            self.config.provider_timeout,
            self.provider.initiate(&request),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(self.config.provider_timeout)),
        };

        let accepted = match response {
            Ok(accepted) => accepted,
            Err(err) if err.outcome_unknown() => {
                warn!(
                    "Push payment {local_reference} for user {user_id}: {err}; left pending for reconciliation"
                );
                return Err(PaymentError::ProviderUnavailable(err));
            }
            Err(err) => {
                warn!("Push payment {local_reference} for user {user_id} not started: {err}");
                self.fail_pair(&transaction, &intent, &format!("initiation failed: {err}"))
                    .await;
                return Err(PaymentError::ProviderUnavailable(err));
            }
        };

        let intent = match self
            .intents
            .attach_provider_reference(intent.id, &accepted.provider_reference)
            .await
        {
            Ok(intent) => intent,
            Err(err) => {
                error!(
                    "Could not store provider reference {} on intent {local_reference}: {err}",
                    accepted.provider_reference
                );
                if matches!(err, PaymentError::DuplicateReference(_)) {
                    self.fail_pair(
                        &transaction,
                        &intent,
                        "initiation failed: duplicate provider reference",
                    )
                    .await;
                }
                return Err(err);
            }
        };

        info!(
            "Push payment {} started for user {user_id}: {amount} {}",
            accepted.provider_reference, self.config.currency
        );

        Ok(InitiatedPayment {
            reference: accepted.provider_reference,
            intent_id: intent.id,
            transaction_id: transaction.id,
            status: intent.status,
        })
    }

    fn validate(&self, amount: Amount, target: &str) -> PaymentResult<String> {
        let limits = self.provider.amount_limits();
        if !limits.contains(amount) {
            return Err(PaymentError::InvalidRequest(format!(
                "amount must be between {} and {}",
                limits.min, limits.max
            )));
        }
        self.provider
            .normalize_target(target)
            .ok_or_else(|| PaymentError::InvalidRequest(format!("invalid phone number '{target}'")))
    }

    async fn record_pending(
        &self,
        user_id: UserId,
        amount: Amount,
        target: &str,
        local_reference: &str,
    ) -> PaymentResult<(Transaction, PaymentIntent)> {
        let transaction = self
            .transactions
            .create(
                NewTransaction::pending(
                    user_id,
                    TransactionKind::Topup,
                    amount,
                    &self.config.currency,
                )
                .with_reference(local_reference)
                .with_description(format!("Top-up via {}", self.provider.name()))
                .with_metadata(json!({
                    "provider": self.provider.name(),
                    "target": target,
                })),
            )
            .await?;

        let created = self
            .intents
            .create(NewIntent {
                provider: self.provider.name().to_string(),
                local_reference: local_reference.to_string(),
                provider_reference: None,
                user_id,
                amount,
                currency: self.config.currency.clone(),
                transaction_id: transaction.id,
                provider_payload: json!({}),
            })
            .await;

        match created {
            Ok(intent) => Ok((transaction, intent)),
            Err(err) => {
                if let Err(close_err) = self
                    .transactions
                    .transition_to(
                        transaction.id,
                        TransactionStatus::Failed,
                        TransactionPatch::new().description(format!("initiation failed: {err}")),
                    )
                    .await
                {
                    error!(
                        "Top-up {} left pending without an intent: {close_err}",
                        transaction.id
                    );
                }
                Err(err)
            }
        }
    }

    /// Mark both records failed; errors are logged because the caller already has one to return
    async fn fail_pair(&self, transaction: &Transaction, intent: &PaymentIntent, reason: &str) {
        if let Err(err) = self
            .transactions
            .transition_to(
                transaction.id,
                TransactionStatus::Failed,
                TransactionPatch::new()
                    .description(reason)
                    .meta("failure_reason", reason),
            )
            .await
        {
            error!("Failed to mark transaction {} failed: {err}", transaction.id);
        }
        if let Err(err) = self
            .intents
            .finalize(intent.id, IntentStatus::Failed, Some(reason.to_string()), None)
            .await
        {
            error!("Failed to mark intent {} failed: {err}", intent.local_reference);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryTransactionLog;
    use crate::payments::MemoryIntentStore;
    use crate::payments::provider::AmountLimits;
    use crate::payments::sandbox::{PushBehavior, SandboxPushProvider};

    struct Fixture {
        transactions: Arc<MemoryTransactionLog>,
        intents: Arc<MemoryIntentStore>,
        provider: Arc<SandboxPushProvider>,
        initiator: PushPaymentInitiator,
    }

    fn fixture(timeout: Duration) -> Fixture {
        let transactions = Arc::new(MemoryTransactionLog::new());
        let intents = Arc::new(MemoryIntentStore::new());
        let provider = Arc::new(SandboxPushProvider::new(AmountLimits { min: 10, max: 150_000 }));
        let initiator = PushPaymentInitiator::new(
            transactions.clone(),
            intents.clone(),
            provider.clone(),
            InitiatorConfig {
                currency: "KES".to_string(),
                callback_url: "https://pay.example/callback".to_string(),
                provider_timeout: timeout,
            },
        );
        Fixture {
            transactions,
            intents,
            provider,
            initiator,
        }
    }

    #[tokio::test]
    async fn test_unrecorded_intent_closes_its_transaction() {
        let transactions = Arc::new(MemoryTransactionLog::new());
        let provider = Arc::new(SandboxPushProvider::new(AmountLimits { min: 10, max: 150_000 }));
        let initiator = PushPaymentInitiator::new(
            transactions.clone(),
            Arc::new(crate::payments::intents::UnwritableIntentStore),
            provider.clone(),
            InitiatorConfig {
                currency: "KES".to_string(),
                callback_url: "https://pay.example/callback".to_string(),
                provider_timeout: Duration::from_secs(1),
            },
        );

        let err = initiator.initiate(7, 1000, "0712345678").await.unwrap_err();
        assert!(matches!(err, PaymentError::DuplicateReference(_)));
        assert!(provider.submissions().await.is_empty());

        let history = transactions
            .list_for_user(7, &Default::default())
            .await
            .unwrap();
        assert_eq!(history.total, 1);
        assert_eq!(history.items[0].status, TransactionStatus::Failed);
    }

    #[tokio::test]
    async fn test_initiate_records_pending_pair() {
        let f = fixture(Duration::from_secs(1));
        let started = f.initiator.initiate(7, 1000, "0712345678").await.unwrap();

        let intent = f.intents.find_by_reference(&started.reference).await.unwrap().unwrap();
        assert_eq!(intent.status, IntentStatus::Pending);
        assert_eq!(intent.transaction_id, started.transaction_id);
        let transaction = f.transactions.get(started.transaction_id).await.unwrap();
        assert_eq!(transaction.status, TransactionStatus::Pending);
        assert_eq!(transaction.kind, TransactionKind::Topup);
        assert_eq!(transaction.amount, 1000);

        let submissions = f.provider.submissions().await;
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].target, "254712345678");
    }

    #[tokio::test]
    async fn test_invalid_input_makes_no_call() {
        let f = fixture(Duration::from_secs(1));
        for (amount, phone) in [(5, "0712345678"), (200_000, "0712345678"), (100, "12345")] {
            let err = f.initiator.initiate(7, amount, phone).await.unwrap_err();
            assert!(matches!(err, PaymentError::InvalidRequest(_)));
        }
        assert!(f.provider.submissions().await.is_empty());
        let history = f
            .transactions
            .list_for_user(7, &Default::default())
            .await
            .unwrap();
        assert_eq!(history.total, 0);
    }

    #[tokio::test]
    async fn test_rejection_fails_both_records() {
        let f = fixture(Duration::from_secs(1));
        f.provider
            .set_behavior(PushBehavior::Reject("insufficient float".to_string()))
            .await;
        let err = f.initiator.initiate(7, 1000, "0712345678").await.unwrap_err();
        assert!(matches!(err, PaymentError::ProviderUnavailable(_)));

        let history = f
            .transactions
            .list_for_user(7, &Default::default())
            .await
            .unwrap();
        let transaction = &history.items[0];
        assert_eq!(transaction.status, TransactionStatus::Failed);
        let local = transaction.reference_id.clone().unwrap();
        let intent = f.intents.find_by_reference(&local).await.unwrap().unwrap();
        assert_eq!(intent.status, IntentStatus::Failed);
        assert!(intent.failure_reason.unwrap().starts_with("initiation failed"));
    }

    #[tokio::test]
    async fn test_timeout_leaves_records_pending() {
        let f = fixture(Duration::from_millis(20));
        f.provider
            .set_behavior(PushBehavior::Stall(Duration::from_millis(500)))
            .await;
        let err = f.initiator.initiate(7, 1000, "0712345678").await.unwrap_err();
        assert!(matches!(
            err,
            PaymentError::ProviderUnavailable(ProviderError::Timeout(_))
        ));

        let history = f
            .transactions
            .list_for_user(7, &Default::default())
            .await
            .unwrap();
        assert_eq!(history.items[0].status, TransactionStatus::Pending);
        assert_eq!(f.provider.submissions().await.len(), 1);
    }
}

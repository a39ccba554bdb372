//! Pull-payment (order + capture) flow.
//!
//! Capture is driven synchronously by the user after approving the order at
//! the provider, and settles through the same path as push callbacks.

use log::{error, info, warn};
use serde_json::json;
use std::sync::Arc;

use super::provider::{CaptureStatus, PullPaymentProvider};
use super::{
    CallbackReconciler, CreatedOrder, IntentStore, NewIntent, PaymentError, PaymentIntent,
    PaymentResult, PaymentStatusView, SettlementMetadata, new_local_reference,
};
use crate::ledger::{NewTransaction, TransactionKind, TransactionLog, TransactionStatus, TransactionPatch};
use crate::wallet::WalletStore;
use crate::{Amount, UserId};

/// Order creation and capture against one pull provider
pub struct PullPaymentFlow {
    transactions: Arc<dyn TransactionLog>,
    intents: Arc<dyn IntentStore>,
    wallets: Arc<dyn WalletStore>,
    provider: Arc<dyn PullPaymentProvider>,
    reconciler: Arc<CallbackReconciler>,
}

impl PullPaymentFlow {
    pub fn new(
        transactions: Arc<dyn TransactionLog>,
        intents: Arc<dyn IntentStore>,
        wallets: Arc<dyn WalletStore>,
        provider: Arc<dyn PullPaymentProvider>,
        reconciler: Arc<CallbackReconciler>,
    ) -> Self {
        Self {
            transactions,
            intents,
            wallets,
            provider,
            reconciler,
        }
    }

    /// Create a provider order and record it as a pending top-up
    pub async fn create_order(
        &self,
        user_id: UserId,
        amount: Amount,
        currency: Option<&str>,
    ) -> PaymentResult<CreatedOrder> {
        if amount <= 0 {
            return Err(PaymentError::InvalidRequest(
                "amount must be positive".to_string(),
            ));
        }
        let wallet_currency = self.wallets.currency();
        let currency = currency.unwrap_or(wallet_currency);
        if !currency.eq_ignore_ascii_case(wallet_currency) {
            return Err(PaymentError::InvalidRequest(format!(
                "currency must be {wallet_currency}"
            )));
        }

        let order = self.provider.create_order(amount, wallet_currency).await?;
        let local_reference = new_local_reference();

        let transaction = self
            .transactions
            .create(
                NewTransaction::pending(user_id, TransactionKind::Topup, amount, wallet_currency)
                    .with_reference(order.order_id.clone())
                    .with_description(format!("Top-up via {}", self.provider.name()))
                    .with_metadata(json!({
                        "provider": self.provider.name(),
                        "order_id": order.order_id,
                    })),
            )
            .await?;

        let intent = self
            .intents
            .create(NewIntent {
                provider: self.provider.name().to_string(),
                local_reference,
                provider_reference: Some(order.order_id.clone()),
                user_id,
                amount,
                currency: wallet_currency.to_string(),
                transaction_id: transaction.id,
                provider_payload: json!({"approval_url": order.approval_url}),
            })
            .await;
        let intent = match intent {
            Ok(intent) => intent,
            Err(err) => {
                if let Err(close_err) = self
                    .transactions
                    .transition_to(
                        transaction.id,
                        TransactionStatus::Failed,
                        TransactionPatch::new().description(format!("order not recorded: {err}")),
                    )
                    .await
                {
                    error!(
                        "Top-up {} for order {} left pending without an intent: {close_err}",
                        transaction.id, order.order_id
                    );
                }
                return Err(err);
            }
        };

        info!(
            "Order {} created for user {user_id}: {amount} {wallet_currency}",
            order.order_id
        );
        Ok(CreatedOrder {
            order_id: order.order_id,
            approval_url: order.approval_url,
            intent_id: intent.id,
            transaction_id: transaction.id,
        })
    }

    /// Capture an approved order and settle it
    ///
    /// Capturing an order whose intent is already terminal returns its status
    /// without calling the provider.
    pub async fn capture(&self, user_id: UserId, order_id: &str) -> PaymentResult<PaymentStatusView> {
        let intent = self.owned_intent(user_id, order_id).await?;
        if intent.status.is_terminal() {
            return self.view(intent).await;
        }

        let capture = self.provider.capture_order(order_id).await?;
        match capture.status {
            CaptureStatus::Completed => {
                let metadata = SettlementMetadata {
                    amount: capture.settled_amount,
                    receipt: capture.provider_transaction_id.clone(),
                    settled_at: Some(chrono::Utc::now()),
                    payer: None,
                };
                let settlement = metadata.validate().map_err(|problem| {
                    error!("Capture of order {order_id} unusable: {problem}; left pending");
                    PaymentError::UnusableSettlement {
                        reference: order_id.to_string(),
                        problem,
                    }
                })?;
                self.reconciler
                    .settle(&intent, &settlement, Some(capture.payload))
                    .await?;
            }
            CaptureStatus::Declined => {
                self.reconciler
                    .fail(&intent, "capture declined", Some(capture.payload))
                    .await?;
            }
            CaptureStatus::Pending => {
                warn!("Order {order_id} captured before approval; left pending");
            }
        }

        let intent = self.intents.get(intent.id).await?;
        self.view(intent).await
    }

    async fn owned_intent(&self, user_id: UserId, order_id: &str) -> PaymentResult<PaymentIntent> {
        match self.intents.find_by_reference(order_id).await? {
            Some(intent) if intent.user_id == user_id => Ok(intent),
            _ => Err(PaymentError::NotFound(order_id.to_string())),
        }
    }

    async fn view(&self, intent: PaymentIntent) -> PaymentResult<PaymentStatusView> {
        let transaction = self.transactions.get(intent.transaction_id).await?;
        let wallet = self.wallets.get_or_create(intent.user_id).await?;
        Ok(PaymentStatusView {
            intent,
            transaction,
            wallet_balance: wallet.balance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryTransactionLog;
    use crate::payments::sandbox::{CaptureBehavior, SandboxPullProvider};
    use crate::payments::{IntentStatus, MemoryIntentStore};
    use crate::wallet::MemoryWalletStore;

    fn flow() -> (PullPaymentFlow, Arc<SandboxPullProvider>) {
        let transactions: Arc<dyn TransactionLog> = Arc::new(MemoryTransactionLog::new());
        let intents: Arc<dyn IntentStore> = Arc::new(MemoryIntentStore::new());
        let wallets: Arc<dyn WalletStore> = Arc::new(MemoryWalletStore::new("KES"));
        let provider = Arc::new(SandboxPullProvider::new());
        let reconciler = Arc::new(CallbackReconciler::new(
            transactions.clone(),
            intents.clone(),
            wallets.clone(),
        ));
        (
            PullPaymentFlow::new(transactions, intents, wallets, provider.clone(), reconciler),
            provider,
        )
    }

    #[tokio::test]
    async fn test_capture_credits_and_repeat_is_noop() {
        let (flow, provider) = flow();
        let order = flow.create_order(3, 2500, None).await.unwrap();

        let view = flow.capture(3, &order.order_id).await.unwrap();
        assert_eq!(view.intent.status, IntentStatus::Completed);
        assert_eq!(view.wallet_balance, 2500);

        let again = flow.capture(3, &order.order_id).await.unwrap();
        assert_eq!(again.wallet_balance, 2500);
        assert_eq!(provider.capture_calls().await, 1);
    }

    #[tokio::test]
    async fn test_capture_by_other_user_not_found() {
        let (flow, provider) = flow();
        let order = flow.create_order(3, 2500, Some("KES")).await.unwrap();
        let err = flow.capture(4, &order.order_id).await.unwrap_err();
        assert!(matches!(err, PaymentError::NotFound(_)));
        assert_eq!(provider.capture_calls().await, 0);
    }

    #[tokio::test]
    async fn test_declined_capture_fails_records() {
        let (flow, provider) = flow();
        provider.set_capture_behavior(CaptureBehavior::Decline).await;
        let order = flow.create_order(3, 100, None).await.unwrap();
        let view = flow.capture(3, &order.order_id).await.unwrap();
        assert_eq!(view.intent.status, IntentStatus::Failed);
        assert_eq!(view.transaction.status, TransactionStatus::Failed);
        assert_eq!(view.wallet_balance, 0);
    }

    #[tokio::test]
    async fn test_transport_failure_leaves_order_capturable() {
        let (flow, provider) = flow();
        let order = flow.create_order(3, 100, None).await.unwrap();
        provider
            .set_capture_behavior(CaptureBehavior::TransportFailure)
            .await;
        assert!(matches!(
            flow.capture(3, &order.order_id).await,
            Err(PaymentError::ProviderUnavailable(_))
        ));

        provider.set_capture_behavior(CaptureBehavior::Complete).await;
        let view = flow.capture(3, &order.order_id).await.unwrap();
        assert_eq!(view.wallet_balance, 100);
    }

    async fn capture_with(behavior: CaptureBehavior) -> (PullPaymentFlow, CreatedOrder, PaymentError) {
        let (flow, provider) = flow();
        flow.wallets.apply_delta(3, 1000, uuid::Uuid::new_v4()).await.unwrap();
        let order = flow.create_order(3, 100, None).await.unwrap();
        provider.set_capture_behavior(behavior).await;
        let err = flow.capture(3, &order.order_id).await.unwrap_err();
        (flow, order, err)
    }

    async fn assert_untouched(flow: &PullPaymentFlow, order: &CreatedOrder) {
        let intent = flow.intents.get(order.intent_id).await.unwrap();
        assert_eq!(intent.status, IntentStatus::Pending);
        let tx = flow.transactions.get(order.transaction_id).await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.amount, 100);
        assert_eq!(flow.wallets.get_or_create(3).await.unwrap().balance, 1000);
    }

    #[tokio::test]
    async fn test_negative_settled_amount_never_debits() {
        let (flow, order, err) = capture_with(CaptureBehavior::CompleteWith(-500)).await;
        assert!(matches!(err, PaymentError::UnusableSettlement { .. }));
        assert_untouched(&flow, &order).await;
    }

    #[tokio::test]
    async fn test_zero_settled_amount_leaves_order_pending() {
        let (flow, order, err) = capture_with(CaptureBehavior::CompleteWith(0)).await;
        assert!(matches!(err, PaymentError::UnusableSettlement { .. }));
        assert_untouched(&flow, &order).await;
    }

    #[tokio::test]
    async fn test_missing_settled_amount_is_not_guessed() {
        let (flow, order, err) = capture_with(CaptureBehavior::CompleteWithoutAmount).await;
        assert!(matches!(err, PaymentError::UnusableSettlement { .. }));
        assert_untouched(&flow, &order).await;
    }

    #[tokio::test]
    async fn test_unusable_capture_can_be_retried() {
        let (flow, provider) = flow();
        let order = flow.create_order(3, 100, None).await.unwrap();
        provider.set_capture_behavior(CaptureBehavior::CompleteWith(0)).await;
        assert!(flow.capture(3, &order.order_id).await.is_err());

        provider.set_capture_behavior(CaptureBehavior::Complete).await;
        let view = flow.capture(3, &order.order_id).await.unwrap();
        assert_eq!(view.intent.status, IntentStatus::Completed);
        assert_eq!(view.transaction.amount, 100);
        assert_eq!(view.wallet_balance, 100);
    }

    #[tokio::test]
    async fn test_unrecorded_order_closes_its_transaction() {
        let transactions = Arc::new(MemoryTransactionLog::new());
        let intents: Arc<dyn IntentStore> = Arc::new(crate::payments::intents::UnwritableIntentStore);
        let wallets: Arc<dyn WalletStore> = Arc::new(MemoryWalletStore::new("KES"));
        let reconciler = Arc::new(CallbackReconciler::new(
            transactions.clone(),
            intents.clone(),
            wallets.clone(),
        ));
        let flow = PullPaymentFlow::new(
            transactions.clone(),
            intents,
            wallets,
            Arc::new(SandboxPullProvider::new()),
            reconciler,
        );

        let err = flow.create_order(3, 100, None).await.unwrap_err();
        assert!(matches!(err, PaymentError::DuplicateReference(_)));
        let history = transactions
            .list_for_user(3, &Default::default())
            .await
            .unwrap();
        assert_eq!(history.items[0].status, TransactionStatus::Failed);
    }

    #[tokio::test]
    async fn test_order_validation() {
        let (flow, _) = flow();
        assert!(matches!(
            flow.create_order(3, 0, None).await,
            Err(PaymentError::InvalidRequest(_))
        ));
        assert!(matches!(
            flow.create_order(3, 100, Some("USD")).await,
            Err(PaymentError::InvalidRequest(_))
        ));
    }
}

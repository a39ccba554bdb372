//! Integration tests for push-payment funding and callback reconciliation.
//!
//! Every test runs on the in-memory stores with the sandbox providers.

use arena_pay::ledger::{TransactionKind, TransactionQuery, TransactionStatus};
use arena_pay::payments::callback::{failure_body, success_body};
use arena_pay::payments::{
    CallbackAck, IntentStatus, PaymentError, PushBehavior, ReconcileOutcome, SandboxPullProvider,
    SandboxPushProvider,
};
use arena_pay::{EngineConfig, PaymentEngine, Stores};
use std::sync::Arc;
use uuid::Uuid;

fn sandbox_engine() -> (PaymentEngine, Arc<SandboxPushProvider>) {
    let config = EngineConfig::default();
    let push = Arc::new(SandboxPushProvider::new(config.push_limits));
    let engine = PaymentEngine::new(
        Stores::in_memory("KES"),
        config,
        push.clone(),
        Arc::new(SandboxPullProvider::new()),
    );
    (engine, push)
}

async fn seed_balance(engine: &PaymentEngine, user_id: i64, amount: i64) {
    engine
        .stores()
        .wallets
        .apply_delta(user_id, amount, Uuid::new_v4())
        .await
        .expect("seed wallet");
}

#[tokio::test]
async fn test_successful_callback_credits_once() {
    let (engine, _) = sandbox_engine();
    seed_balance(&engine, 42, 500).await;

    let started = engine.initiate_push(42, 1000, "0712345678").await.unwrap();
    assert_eq!(started.status, IntentStatus::Pending);
    assert_eq!(engine.wallet_snapshot(42).await.unwrap().balance, 500);

    let body = success_body(&started.reference, 1000, "NLJ7RT61SV").to_string();
    let (ack, outcome) = engine.handle_callback(body.as_bytes()).await;
    assert_eq!(ack, CallbackAck::accepted());
    assert!(matches!(outcome, ReconcileOutcome::Credited(ref w) if w.balance == 1500));

    // Provider redelivery
    let (ack, outcome) = engine.handle_callback(body.as_bytes()).await;
    assert_eq!(ack, CallbackAck::accepted());
    assert_eq!(
        outcome,
        ReconcileOutcome::AlreadyFinal(IntentStatus::Completed)
    );
    assert_eq!(engine.wallet_snapshot(42).await.unwrap().balance, 1500);

    let status = engine.payment_status(&started.reference, 42).await.unwrap();
    assert_eq!(status.intent.status, IntentStatus::Completed);
    assert_eq!(status.transaction.status, TransactionStatus::Completed);
    assert_eq!(status.transaction.kind, TransactionKind::Topup);
    assert_eq!(status.wallet_balance, 1500);
}

#[tokio::test]
async fn test_unknown_reference_is_acknowledged_without_effect() {
    let (engine, _) = sandbox_engine();
    seed_balance(&engine, 7, 250).await;

    let body = success_body("ws_CO_does_not_exist", 1000, "QWE123RTY").to_string();
    let (ack, outcome) = engine.handle_callback(body.as_bytes()).await;

    assert_eq!(ack, CallbackAck::accepted());
    assert_eq!(outcome, ReconcileOutcome::UnknownReference);
    assert_eq!(engine.wallet_snapshot(7).await.unwrap().balance, 250);
}

#[tokio::test]
async fn test_failure_callback_leaves_balance_untouched() {
    let (engine, _) = sandbox_engine();
    let started = engine.initiate_push(3, 400, "254712345678").await.unwrap();

    let body = failure_body(&started.reference, 1032, "Request cancelled by user").to_string();
    let (ack, outcome) = engine.handle_callback(body.as_bytes()).await;
    assert_eq!(ack, CallbackAck::accepted());
    assert_eq!(outcome, ReconcileOutcome::Failed);

    // A late success for a failed intent must not credit
    let late = success_body(&started.reference, 400, "LATE00001").to_string();
    let (_, outcome) = engine.handle_callback(late.as_bytes()).await;
    assert_eq!(outcome, ReconcileOutcome::AlreadyFinal(IntentStatus::Failed));
    assert_eq!(engine.wallet_snapshot(3).await.unwrap().balance, 0);

    let status = engine.payment_status(&started.reference, 3).await.unwrap();
    assert_eq!(status.transaction.status, TransactionStatus::Failed);
}

#[tokio::test]
async fn test_malformed_callback_is_still_acknowledged() {
    let (engine, _) = sandbox_engine();
    let (ack, outcome) = engine.handle_callback(b"{not json").await;
    assert_eq!(ack, CallbackAck::accepted());
    assert!(matches!(outcome, ReconcileOutcome::ProtocolError(_)));
}

#[tokio::test]
async fn test_rejected_push_fails_both_records() {
    let (engine, push) = sandbox_engine();
    push.set_behavior(PushBehavior::Reject("Invalid PhoneNumber".to_string()))
        .await;

    let err = engine.initiate_push(5, 100, "0712345678").await.unwrap_err();
    assert!(matches!(err, PaymentError::ProviderUnavailable(_)));

    let history = engine
        .transaction_history(5, &TransactionQuery::default())
        .await
        .unwrap();
    assert_eq!(history.total, 1);
    assert_eq!(history.items[0].status, TransactionStatus::Failed);
    assert_eq!(engine.wallet_snapshot(5).await.unwrap().balance, 0);
}

#[tokio::test]
async fn test_amount_outside_limits_creates_nothing() {
    let (engine, push) = sandbox_engine();

    for amount in [0, -10, 150_001] {
        let err = engine.initiate_push(9, amount, "0712345678").await.unwrap_err();
        assert!(matches!(err, PaymentError::InvalidRequest(_)), "amount {amount}");
    }

    assert!(push.submissions().await.is_empty());
    let history = engine
        .transaction_history(9, &TransactionQuery::default())
        .await
        .unwrap();
    assert_eq!(history.total, 0);
}

#[tokio::test]
async fn test_concurrent_duplicate_callbacks_credit_once() {
    let (engine, _) = sandbox_engine();
    let started = engine.initiate_push(11, 750, "0712345678").await.unwrap();
    let body = success_body(&started.reference, 750, "DUP0000001").to_string();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        let body = body.clone();
        handles.push(tokio::spawn(async move {
            engine.handle_callback(body.as_bytes()).await
        }));
    }

    for handle in handles {
        let (ack, outcome) = handle.await.unwrap();
        assert_eq!(ack, CallbackAck::accepted());
        assert!(matches!(
            outcome,
            ReconcileOutcome::Credited(_) | ReconcileOutcome::AlreadyFinal(IntentStatus::Completed)
        ));
    }

    assert_eq!(engine.wallet_snapshot(11).await.unwrap().balance, 750);
}

#[tokio::test]
async fn test_pull_capture_credits_wallet() {
    let (engine, _) = sandbox_engine();
    let order = engine.create_order(21, 300, None).await.unwrap();

    let view = engine.capture_order(21, &order.order_id).await.unwrap();
    assert_eq!(view.intent.status, IntentStatus::Completed);
    assert_eq!(view.wallet_balance, 300);

    // Capturing again reports the final state without a second credit
    let again = engine.capture_order(21, &order.order_id).await.unwrap();
    assert_eq!(again.wallet_balance, 300);

    // Another user cannot see or capture the order
    assert!(matches!(
        engine.capture_order(22, &order.order_id).await,
        Err(PaymentError::NotFound(_))
    ));
}

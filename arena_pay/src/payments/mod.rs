//! Payments: intents, providers and the reconciliation engine.
//!
//! This module implements:
//! - The payment intent store (one record per attempted external payment)
//! - Push-payment initiation, with local records written before the provider call
//! - Callback reconciliation applying each provider outcome exactly once
//! - The pull-payment order and capture flow sharing the same settlement path
//! - A background sweep finishing interrupted settlements
//! - Callback authenticity verification
//!
//! ## Example
//!
//! ```
//! use arena_pay::payments::callback::success_body;
//! use arena_pay::payments::{CallbackAck, CallbackReconciler, MemoryIntentStore, ReconcileOutcome};
//! use arena_pay::ledger::MemoryTransactionLog;
//! use arena_pay::wallet::MemoryWalletStore;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let reconciler = CallbackReconciler::new(
//!     Arc::new(MemoryTransactionLog::new()),
//!     Arc::new(MemoryIntentStore::new()),
//!     Arc::new(MemoryWalletStore::new("KES")),
//! );
//! let body = success_body("ws_CO_unknown", 100, "NLJ7RT61SV").to_string();
//! let (ack, outcome) = reconciler.handle_payload(body.as_bytes()).await;
//! assert_eq!(ack, CallbackAck::accepted());
//! assert_eq!(outcome, ReconcileOutcome::UnknownReference);
//! # }
//! ```

pub mod callback;
pub mod errors;
pub mod initiator;
pub mod intents;
pub mod models;
pub mod postgres;
pub mod provider;
pub mod pull;
pub mod reconciler;
pub mod sandbox;
pub mod sweep;
pub mod verify;

pub use errors::{PaymentError, PaymentResult};
pub use initiator::{InitiatorConfig, PushPaymentInitiator};
pub use intents::{IntentStore, MemoryIntentStore};
pub use models::{
    CallbackAck, CallbackNotification, CallbackOutcome, CreatedOrder, InitiatedPayment,
    IntentStatus, NewIntent, PaymentIntent, PaymentStatusView, ReconcileOutcome, Settlement,
    SettlementMetadata, new_local_reference,
};
pub use postgres::PgIntentStore;
pub use provider::{
    AmountLimits, CaptureResult, CaptureStatus, ProviderError, PullOrder, PullPaymentProvider,
    PushAccepted, PushPaymentProvider, PushRequest, normalize_msisdn,
};
pub use pull::PullPaymentFlow;
pub use reconciler::CallbackReconciler;
pub use sandbox::{CaptureBehavior, PushBehavior, SandboxPullProvider, SandboxPushProvider};
pub use sweep::{ReconciliationSweep, SweepConfig, SweepReport};
pub use verify::{AcceptAllVerifier, CallbackVerifier, SharedSecretVerifier, SIGNATURE_HEADER};

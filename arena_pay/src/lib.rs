//! # Arena Pay
//!
//! Wallet funding, payment reconciliation and tournament entry-fee escrow.
//!
//! Users fund a single-currency wallet through a mobile-money push provider
//! (asynchronous callback) or a card-style pull provider (synchronous capture),
//! and spend the balance on tournament entry fees that are refunded when they
//! withdraw before the start.
//!
//! ## Architecture
//!
//! Three records move together for every external payment:
//!
//! - a **Payment Intent** (one per attempted external payment, keyed by a correlation reference)
//! - a **Transaction** in the ledger (one per money movement)
//! - the owner's **Wallet** balance
//!
//! Every mutation is a compare-and-set on a single record. Callbacks mutate in
//! the order Transaction, Intent, Wallet, and the wallet accepts each ledger
//! transaction at most once, so a crash between steps is finished by the
//! [`payments::ReconciliationSweep`] without ever double-crediting.
//!
//! ## Core Modules
//!
//! - [`wallet`]: Per-owner balances with atomic, idempotent deltas
//! - [`ledger`]: Transaction log with terminal-state guarded transitions
//! - [`payments`]: Intents, providers, initiation, callback reconciliation, pull capture, sweep
//! - [`tournament`]: Tournament membership and the entry-fee escrow coordinator
//! - [`engine`]: Wiring of every component plus the caller-facing query surface
//! - [`db`]: PostgreSQL pool, configuration and migrations
//!
//! ## Example
//!
//! ```
//! use arena_pay::engine::{EngineConfig, PaymentEngine, Stores};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = PaymentEngine::sandbox(Stores::in_memory("KES"), EngineConfig::default());
//! let snapshot = engine.wallet_snapshot(1).await?;
//! assert_eq!(snapshot.balance, 0);
//! # Ok(())
//! # }
//! ```

/// Identity of a wallet owner
pub type UserId = i64;

/// Identity of a tournament
pub type TournamentId = i64;

/// Money in the smallest unit of the wallet currency
pub type Amount = i64;

pub mod db;
pub mod engine;
pub mod ledger;
pub mod payments;
pub mod tournament;
pub mod wallet;

pub use engine::{EngineConfig, PaymentEngine, Stores};
pub use ledger::{Transaction, TransactionKind, TransactionLog, TransactionStatus};
pub use payments::{CallbackReconciler, PaymentError, PaymentIntent, PushPaymentInitiator};
pub use tournament::{EscrowCoordinator, EscrowError};
pub use wallet::{Wallet, WalletError, WalletStore};

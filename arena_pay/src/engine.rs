//! Engine wiring and the caller-facing query surface.

use chrono::Duration as ChronoDuration;
use log::warn;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::db::Database;
use crate::ledger::{
    MemoryTransactionLog, Page, PgTransactionLog, Transaction, TransactionLog, TransactionQuery,
};
use crate::payments::{
    AmountLimits, CallbackAck, CallbackReconciler, CreatedOrder, InitiatedPayment, InitiatorConfig,
    IntentStore, MemoryIntentStore, PaymentError, PaymentResult, PaymentStatusView, PgIntentStore,
    PullPaymentFlow, PullPaymentProvider, PushPaymentInitiator, PushPaymentProvider,
    ReconcileOutcome, ReconciliationSweep, SandboxPullProvider, SandboxPushProvider, SweepConfig,
};
use crate::tournament::{
    EscrowCoordinator, MemoryTournamentStore, PgTournamentStore, TournamentStore,
};
use crate::wallet::{MemoryWalletStore, PgWalletStore, WalletSnapshot, WalletStore};
use crate::{Amount, UserId};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Engine settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Currency of every wallet
    pub currency: String,
    /// Address the push provider delivers outcome notifications to
    pub callback_url: String,
    pub push_limits: AmountLimits,
    /// Upper bound on a single provider call
    pub provider_timeout: Duration,
    pub sweep_interval: Duration,
    pub sweep: SweepConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            currency: "KES".to_string(),
            callback_url: "http://localhost:8080/api/v1/payments/callback".to_string(),
            push_limits: AmountLimits { min: 1, max: 150_000 },
            provider_timeout: Duration::from_secs(15),
            sweep_interval: Duration::from_secs(60),
            sweep: SweepConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load from environment variables, falling back to defaults
    ///
    /// # Environment Variables
    ///
    /// - `WALLET_CURRENCY` (default `KES`)
    /// - `PUSH_CALLBACK_URL`
    /// - `PUSH_MIN_AMOUNT` / `PUSH_MAX_AMOUNT` (default 1 / 150000)
    /// - `PROVIDER_TIMEOUT_SECS` (default 15)
    /// - `SWEEP_INTERVAL_SECS` (default 60)
    /// - `SWEEP_GRACE_SECS` (default 120)
    /// - `PENDING_INTENT_TTL_SECS` (default 86400)
    /// - `SWEEP_BATCH_SIZE` (default 100)
    /// - `SWEEP_LOOKBACK_SECS` (default 86400)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let currency = std::env::var("WALLET_CURRENCY")
            .map(|c| c.trim().to_uppercase())
            .unwrap_or(defaults.currency);
        let callback_url = std::env::var("PUSH_CALLBACK_URL").unwrap_or(defaults.callback_url);
        let push_limits = AmountLimits {
            min: parse_env_or("PUSH_MIN_AMOUNT", defaults.push_limits.min)?,
            max: parse_env_or("PUSH_MAX_AMOUNT", defaults.push_limits.max)?,
        };

        let config = Self {
            currency,
            callback_url,
            push_limits,
            provider_timeout: Duration::from_secs(parse_env_or("PROVIDER_TIMEOUT_SECS", 15u64)?),
            sweep_interval: Duration::from_secs(parse_env_or("SWEEP_INTERVAL_SECS", 60u64)?),
            sweep: SweepConfig {
                grace: ChronoDuration::seconds(parse_env_or("SWEEP_GRACE_SECS", 120i64)?),
                pending_ttl: ChronoDuration::seconds(parse_env_or(
                    "PENDING_INTENT_TTL_SECS",
                    86_400i64,
                )?),
                lookback: ChronoDuration::seconds(parse_env_or("SWEEP_LOOKBACK_SECS", 86_400i64)?),
                batch_size: parse_env_or("SWEEP_BATCH_SIZE", 100u32)?,
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(ConfigError::Invalid {
                key: "WALLET_CURRENCY",
                reason: format!("'{}' is not a three letter code", self.currency),
            });
        }
        if self.push_limits.min <= 0 || self.push_limits.min > self.push_limits.max {
            return Err(ConfigError::Invalid {
                key: "PUSH_MIN_AMOUNT",
                reason: format!(
                    "range {}..={} is empty or not positive",
                    self.push_limits.min, self.push_limits.max
                ),
            });
        }
        if self.provider_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                key: "PROVIDER_TIMEOUT_SECS",
                reason: "must be positive".to_string(),
            });
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "SWEEP_INTERVAL_SECS",
                reason: "must be positive".to_string(),
            });
        }
        if self.sweep.batch_size == 0 {
            return Err(ConfigError::Invalid {
                key: "SWEEP_BATCH_SIZE",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Parse an environment variable, using `default` when it is unset
fn parse_env_or<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// The four stores the engine runs on
#[derive(Clone)]
pub struct Stores {
    pub wallets: Arc<dyn WalletStore>,
    pub transactions: Arc<dyn TransactionLog>,
    pub intents: Arc<dyn IntentStore>,
    pub tournaments: Arc<dyn TournamentStore>,
    database: Option<Database>,
}

impl Stores {
    /// Process-memory stores; state is lost on restart
    pub fn in_memory(currency: &str) -> Self {
        Self {
            wallets: Arc::new(MemoryWalletStore::new(currency)),
            transactions: Arc::new(MemoryTransactionLog::new()),
            intents: Arc::new(MemoryIntentStore::new()),
            tournaments: Arc::new(MemoryTournamentStore::new()),
            database: None,
        }
    }

    /// PostgreSQL stores sharing one pool
    pub fn postgres(database: Database, currency: &str) -> Self {
        let pool = Arc::new(database.pool().clone());
        Self {
            wallets: Arc::new(PgWalletStore::new(pool.clone(), currency)),
            transactions: Arc::new(PgTransactionLog::new(pool.clone())),
            intents: Arc::new(PgIntentStore::new(pool.clone())),
            tournaments: Arc::new(PgTournamentStore::new(pool)),
            database: Some(database),
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.database.is_some()
    }
}

/// Every component wired over one set of stores and providers
#[derive(Clone)]
pub struct PaymentEngine {
    stores: Stores,
    config: EngineConfig,
    initiator: Arc<PushPaymentInitiator>,
    reconciler: Arc<CallbackReconciler>,
    pull: Arc<PullPaymentFlow>,
    escrow: Arc<EscrowCoordinator>,
    sweep: Arc<ReconciliationSweep>,
}

impl PaymentEngine {
    pub fn new(
        stores: Stores,
        config: EngineConfig,
        push_provider: Arc<dyn PushPaymentProvider>,
        pull_provider: Arc<dyn PullPaymentProvider>,
    ) -> Self {
        if stores.wallets.currency() != config.currency {
            warn!(
                "Wallet store currency {} differs from configured {}",
                stores.wallets.currency(),
                config.currency
            );
        }

        let reconciler = Arc::new(CallbackReconciler::new(
            stores.transactions.clone(),
            stores.intents.clone(),
            stores.wallets.clone(),
        ));
        let initiator = Arc::new(PushPaymentInitiator::new(
            stores.transactions.clone(),
            stores.intents.clone(),
            push_provider.clone(),
            InitiatorConfig {
                currency: config.currency.clone(),
                callback_url: config.callback_url.clone(),
                provider_timeout: config.provider_timeout,
            },
        ));
        let pull = Arc::new(PullPaymentFlow::new(
            stores.transactions.clone(),
            stores.intents.clone(),
            stores.wallets.clone(),
            pull_provider,
            reconciler.clone(),
        ));
        let escrow = Arc::new(EscrowCoordinator::new(
            stores.tournaments.clone(),
            stores.wallets.clone(),
            stores.transactions.clone(),
        ));
        let sweep = Arc::new(ReconciliationSweep::new(
            stores.transactions.clone(),
            stores.intents.clone(),
            stores.wallets.clone(),
            push_provider,
            reconciler.clone(),
            config.sweep.clone(),
        ));

        Self {
            stores,
            config,
            initiator,
            reconciler,
            pull,
            escrow,
            sweep,
        }
    }

    /// Engine backed by the in-process sandbox providers
    pub fn sandbox(stores: Stores, config: EngineConfig) -> Self {
        let push = Arc::new(SandboxPushProvider::new(config.push_limits));
        let pull = Arc::new(SandboxPullProvider::new());
        Self::new(stores, config, push, pull)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn initiator(&self) -> &PushPaymentInitiator {
        &self.initiator
    }

    pub fn reconciler(&self) -> &CallbackReconciler {
        &self.reconciler
    }

    pub fn pull_payments(&self) -> &PullPaymentFlow {
        &self.pull
    }

    pub fn escrow(&self) -> &EscrowCoordinator {
        &self.escrow
    }

    pub fn sweep(&self) -> &ReconciliationSweep {
        &self.sweep
    }

    /// Start the periodic reconciliation sweep
    pub fn spawn_sweep(&self) -> JoinHandle<()> {
        self.sweep.clone().spawn(self.config.sweep_interval)
    }

    pub async fn initiate_push(
        &self,
        user_id: UserId,
        amount: Amount,
        phone: &str,
    ) -> PaymentResult<InitiatedPayment> {
        self.initiator.initiate(user_id, amount, phone).await
    }

    pub async fn handle_callback(&self, body: &[u8]) -> (CallbackAck, ReconcileOutcome) {
        self.reconciler.handle_payload(body).await
    }

    pub async fn create_order(
        &self,
        user_id: UserId,
        amount: Amount,
        currency: Option<&str>,
    ) -> PaymentResult<CreatedOrder> {
        self.pull.create_order(user_id, amount, currency).await
    }

    pub async fn capture_order(
        &self,
        user_id: UserId,
        order_id: &str,
    ) -> PaymentResult<PaymentStatusView> {
        self.pull.capture(user_id, order_id).await
    }

    /// Intent status, its transaction and the owner's balance.
    /// Intents of other users are reported as not found.
    pub async fn payment_status(
        &self,
        reference: &str,
        requester: UserId,
    ) -> PaymentResult<PaymentStatusView> {
        let intent = match self.stores.intents.find_by_reference(reference).await? {
            Some(intent) if intent.user_id == requester => intent,
            _ => return Err(PaymentError::NotFound(reference.to_string())),
        };
        let transaction = self.stores.transactions.get(intent.transaction_id).await?;
        let wallet = self.stores.wallets.get_or_create(requester).await?;
        Ok(PaymentStatusView {
            intent,
            transaction,
            wallet_balance: wallet.balance,
        })
    }

    pub async fn transaction_history(
        &self,
        user_id: UserId,
        query: &TransactionQuery,
    ) -> PaymentResult<Page<Transaction>> {
        Ok(self.stores.transactions.list_for_user(user_id, query).await?)
    }

    /// Balance view, creating the empty wallet on first query
    pub async fn wallet_snapshot(&self, user_id: UserId) -> PaymentResult<WalletSnapshot> {
        Ok(self.stores.wallets.get_or_create(user_id).await?.into())
    }

    /// True when the backing storage answers
    pub async fn health_check(&self) -> bool {
        match &self.stores.database {
            Some(database) => database.health_check().await.is_ok(),
            None => true,
        }
    }
}

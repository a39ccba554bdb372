//! Transaction log data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::LedgerError;
use crate::{Amount, UserId};

/// Largest page size a history query may request
pub const MAX_PER_PAGE: u32 = 100;

/// Page size used when a query does not specify one
pub const DEFAULT_PER_PAGE: u32 = 20;

/// What caused a money movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Topup,
    Withdrawal,
    Payment,
    Refund,
    EntryFee,
    Prize,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Topup => "topup",
            TransactionKind::Withdrawal => "withdrawal",
            TransactionKind::Payment => "payment",
            TransactionKind::Refund => "refund",
            TransactionKind::EntryFee => "entry_fee",
            TransactionKind::Prize => "prize",
        }
    }

    /// Kinds that add money to a wallet
    pub const CREDITS: [TransactionKind; 3] = [
        TransactionKind::Topup,
        TransactionKind::Refund,
        TransactionKind::Prize,
    ];

    /// Kinds written by the escrow coordinator without a payment intent
    pub const ESCROW: [TransactionKind; 3] = [
        TransactionKind::EntryFee,
        TransactionKind::Refund,
        TransactionKind::Prize,
    ];

    /// Credits that are written at most once per owner and reference
    pub fn is_keyed(&self) -> bool {
        matches!(self, TransactionKind::Refund | TransactionKind::Prize)
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "topup" => Ok(TransactionKind::Topup),
            "withdrawal" => Ok(TransactionKind::Withdrawal),
            "payment" => Ok(TransactionKind::Payment),
            "refund" => Ok(TransactionKind::Refund),
            "entry_fee" => Ok(TransactionKind::EntryFee),
            "prize" => Ok(TransactionKind::Prize),
            other => Err(LedgerError::Decode(format!("unknown transaction kind '{other}'"))),
        }
    }
}

/// Lifecycle state shared by transactions and payment intents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            "failed" => Ok(TransactionStatus::Failed),
            "cancelled" => Ok(TransactionStatus::Cancelled),
            other => Err(LedgerError::Decode(format!("unknown status '{other}'"))),
        }
    }
}

/// Outcome of checking a status move against the lifecycle rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionCheck {
    /// Pending record moving to a terminal status
    Apply,
    /// Record already holds the requested terminal status
    Unchanged,
    /// Terminal record asked to change, or a move back to pending
    Forbidden,
}

/// Check moving a record from `from` to `to`. Terminal states are immutable.
pub fn check_transition(from: TransactionStatus, to: TransactionStatus) -> TransitionCheck {
    match (from, to) {
        (TransactionStatus::Pending, TransactionStatus::Pending) => TransitionCheck::Forbidden,
        (TransactionStatus::Pending, _) => TransitionCheck::Apply,
        (current, target) if current == target => TransitionCheck::Unchanged,
        _ => TransitionCheck::Forbidden,
    }
}

/// A recorded money movement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: UserId,
    pub kind: TransactionKind,
    /// Signed effect on the owner's wallet
    pub amount: Amount,
    pub currency: String,
    pub status: TransactionStatus,
    pub reference_id: Option<String>,
    pub description: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Insertion order, breaks ties between equal creation times
    #[serde(skip)]
    pub seq: i64,
}

/// Input for [`super::TransactionLog::create`]
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub user_id: UserId,
    pub kind: TransactionKind,
    pub amount: Amount,
    pub currency: String,
    pub status: TransactionStatus,
    pub reference_id: Option<String>,
    pub description: Option<String>,
    pub metadata: Value,
}

impl NewTransaction {
    /// A pending transaction with no reference, description or metadata
    pub fn pending(
        user_id: UserId,
        kind: TransactionKind,
        amount: Amount,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            kind,
            amount,
            currency: currency.into(),
            status: TransactionStatus::Pending,
            reference_id: None,
            description: None,
            metadata: Value::Object(Map::new()),
        }
    }

    pub fn with_status(mut self, status: TransactionStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference_id = Some(reference.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Field changes written together with a status transition
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionPatch {
    pub amount: Option<Amount>,
    pub reference_id: Option<String>,
    pub description: Option<String>,
    /// Keys merged into the existing metadata object
    pub metadata: Map<String, Value>,
}

impl TransactionPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn amount(mut self, amount: Amount) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.reference_id = Some(reference.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Write the patch onto a record in place
    pub fn apply_to(&self, record: &mut Transaction) {
        if let Some(amount) = self.amount {
            record.amount = amount;
        }
        if let Some(reference) = &self.reference_id {
            record.reference_id = Some(reference.clone());
        }
        if let Some(description) = &self.description {
            record.description = Some(description.clone());
        }
        if !self.metadata.is_empty() {
            if !record.metadata.is_object() {
                record.metadata = Value::Object(Map::new());
            }
            if let Value::Object(existing) = &mut record.metadata {
                for (key, value) in &self.metadata {
                    existing.insert(key.clone(), value.clone());
                }
            }
        }
    }
}

/// Filters and pagination for history queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionQuery {
    pub kind: Option<TransactionKind>,
    pub status: Option<TransactionStatus>,
    /// 1-based page number
    pub page: u32,
    pub per_page: u32,
}

impl Default for TransactionQuery {
    fn default() -> Self {
        Self {
            kind: None,
            status: None,
            page: 1,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

impl TransactionQuery {
    /// Same query with page and page size forced into their valid ranges
    pub fn normalized(&self) -> Self {
        Self {
            kind: self.kind,
            status: self.status,
            page: self.page.max(1),
            per_page: self.per_page.clamp(1, MAX_PER_PAGE),
        }
    }

    /// Rows to skip, for a normalized query
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.per_page)
    }

    pub fn matches(&self, record: &Transaction) -> bool {
        self.kind.is_none_or(|kind| record.kind == kind)
            && self.status.is_none_or(|status| record.status == status)
    }
}

/// One page of results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
}

/// Position of a record in oldest-update-first order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ScanCursor {
    pub updated_at: DateTime<Utc>,
    pub seq: i64,
}

impl ScanCursor {
    pub fn of(record: &Transaction) -> Self {
        Self {
            updated_at: record.updated_at,
            seq: record.seq,
        }
    }
}

/// Log-wide scan by status and kind, walked one page at a time
#[derive(Debug, Clone, PartialEq)]
pub struct StatusScan {
    pub status: TransactionStatus,
    /// Empty matches every kind
    pub kinds: Vec<TransactionKind>,
    /// Only records strictly after this position
    pub after: Option<ScanCursor>,
    pub limit: u32,
}

impl StatusScan {
    pub fn new(status: TransactionStatus, kinds: &[TransactionKind], limit: u32) -> Self {
        Self {
            status,
            kinds: kinds.to_vec(),
            after: None,
            limit: limit.max(1),
        }
    }

    /// Status, kind and cursor conditions; the time window is applied by the caller
    pub fn matches(&self, record: &Transaction) -> bool {
        record.status == self.status
            && (self.kinds.is_empty() || self.kinds.contains(&record.kind))
            && self
                .after
                .is_none_or(|cursor| ScanCursor::of(record) > cursor)
    }

    /// Move past `page`. Returns false once the scan is exhausted.
    pub fn advance(&mut self, page: &[Transaction]) -> bool {
        match page.last() {
            Some(last) if page.len() >= self.limit as usize => {
                self.after = Some(ScanCursor::of(last));
                true
            }
            _ => false,
        }
    }

    pub fn kind_names(&self) -> Vec<String> {
        self.kinds.iter().map(|kind| kind.as_str().to_string()).collect()
    }
}

/// Result of a create-if-absent
#[derive(Debug, Clone, PartialEq)]
pub struct Keyed<T> {
    pub record: T,
    /// False when an earlier record with the same key was returned instead
    pub inserted: bool,
}

/// Result of a compare-and-set status transition
#[derive(Debug, Clone, PartialEq)]
pub struct Transitioned<T> {
    pub record: T,
    /// False when the record already held the requested terminal status
    pub changed: bool,
}

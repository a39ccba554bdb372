//! Payment intent and callback data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::ledger::{Transaction, TransactionStatus};
use crate::wallet::Wallet;
use crate::{Amount, UserId};

/// Intents share the transaction lifecycle
pub type IntentStatus = TransactionStatus;

/// Generate a local correlation reference (`loc_<uuid>`)
pub fn new_local_reference() -> String {
    format!("loc_{}", Uuid::new_v4().simple())
}

/// One attempted external payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: Uuid,
    pub provider: String,
    /// Generated before the provider is called, never changes
    pub local_reference: String,
    /// Assigned by the provider once it accepts the request
    pub provider_reference: Option<String>,
    pub user_id: UserId,
    pub amount: Amount,
    pub currency: String,
    pub status: IntentStatus,
    pub failure_reason: Option<String>,
    pub transaction_id: Uuid,
    pub provider_payload: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentIntent {
    /// Tracking handle: the provider reference when known, the local one otherwise
    pub fn reference(&self) -> &str {
        self.provider_reference
            .as_deref()
            .unwrap_or(&self.local_reference)
    }

    pub fn matches_reference(&self, reference: &str) -> bool {
        self.local_reference == reference || self.provider_reference.as_deref() == Some(reference)
    }
}

/// Input for [`super::IntentStore::create`]
#[derive(Debug, Clone, PartialEq)]
pub struct NewIntent {
    pub provider: String,
    pub local_reference: String,
    pub provider_reference: Option<String>,
    pub user_id: UserId,
    pub amount: Amount,
    pub currency: String,
    pub transaction_id: Uuid,
    pub provider_payload: Value,
}

/// Settlement fields as delivered; any of them may be missing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettlementMetadata {
    pub amount: Option<Amount>,
    pub receipt: Option<String>,
    pub settled_at: Option<DateTime<Utc>>,
    pub payer: Option<String>,
}

impl SettlementMetadata {
    /// Check that the mandatory fields are present
    pub fn validate(&self) -> Result<Settlement, String> {
        let amount = self.amount.ok_or("settlement amount missing")?;
        if amount <= 0 {
            return Err(format!("settlement amount {amount} is not positive"));
        }
        let receipt = self
            .receipt
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .ok_or("settlement receipt missing")?;

        Ok(Settlement {
            amount,
            receipt: receipt.to_string(),
            settled_at: self.settled_at,
        })
    }
}

/// A settlement with every mandatory field present
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub amount: Amount,
    pub receipt: String,
    pub settled_at: Option<DateTime<Utc>>,
}

/// Outcome reported by a provider for one reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CallbackOutcome {
    Success(SettlementMetadata),
    Failure { code: i64, reason: String },
}

/// Inbound asynchronous outcome notification
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackNotification {
    pub reference: String,
    pub outcome: CallbackOutcome,
    /// Raw provider body, kept on the intent for audit
    pub payload: Value,
}

/// What the reconciler did with one notification
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// No intent carries the reference
    UnknownReference,
    /// The intent was already terminal; nothing changed
    AlreadyFinal(IntentStatus),
    /// Intent and transaction marked failed
    Failed,
    /// Intent and transaction completed and the wallet credited
    Credited(Wallet),
    /// Payload unusable; nothing changed
    ProtocolError(String),
    /// Records disagree on the terminal status
    Conflict(String),
    /// Storage failure
    Internal(String),
}

impl ReconcileOutcome {
    /// Short label for logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            ReconcileOutcome::UnknownReference => "unknown_reference",
            ReconcileOutcome::AlreadyFinal(_) => "duplicate",
            ReconcileOutcome::Failed => "failed",
            ReconcileOutcome::Credited(_) => "credited",
            ReconcileOutcome::ProtocolError(_) => "protocol_error",
            ReconcileOutcome::Conflict(_) => "conflict",
            ReconcileOutcome::Internal(_) => "internal_error",
        }
    }
}

/// Acknowledgment body returned to the push provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CallbackAck {
    pub result_code: i64,
    pub result_desc: String,
}

impl CallbackAck {
    pub fn accepted() -> Self {
        Self {
            result_code: 0,
            result_desc: "Accepted".to_string(),
        }
    }
}

/// Tracking handle returned to the caller of a push payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitiatedPayment {
    pub reference: String,
    pub intent_id: Uuid,
    pub transaction_id: Uuid,
    pub status: IntentStatus,
}

/// Pull-provider order created for a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedOrder {
    pub order_id: String,
    pub approval_url: String,
    pub intent_id: Uuid,
    pub transaction_id: Uuid,
}

/// Answer to a payment status query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentStatusView {
    pub intent: PaymentIntent,
    pub transaction: Transaction,
    pub wallet_balance: Amount,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settlement_requires_amount_and_receipt() {
        let missing_amount = SettlementMetadata {
            receipt: Some("NLJ7RT61SV".to_string()),
            ..Default::default()
        };
        assert!(missing_amount.validate().is_err());

        let blank_receipt = SettlementMetadata {
            amount: Some(100),
            receipt: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(blank_receipt.validate().is_err());

        let ok = SettlementMetadata {
            amount: Some(100),
            receipt: Some("NLJ7RT61SV".to_string()),
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert_eq!(ok.amount, 100);
        assert_eq!(ok.receipt, "NLJ7RT61SV");
    }

    #[test]
    fn test_ack_wire_shape() {
        let json = serde_json::to_value(CallbackAck::accepted()).unwrap();
        assert_eq!(json, serde_json::json!({"ResultCode": 0, "ResultDesc": "Accepted"}));
    }

    #[test]
    fn test_local_reference_format() {
        let reference = new_local_reference();
        assert!(reference.starts_with("loc_"));
        assert_eq!(reference.len(), 4 + 32);
    }
}

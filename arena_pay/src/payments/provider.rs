//! External payment provider abstractions.
//!
//! The engine needs only two things from a push provider ("submit a push
//! payment, get a reference back" and an optional status lookup) and two from
//! a pull provider (create an order, capture it). Transport and authentication
//! belong to the implementations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use super::CallbackOutcome;
use crate::Amount;

/// Provider call failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// The provider answered and refused the request
    #[error("rejected by provider: {0}")]
    Rejected(String),

    /// The request could not be delivered or the answer was unreadable
    #[error("transport failure: {0}")]
    Transport(String),

    /// No answer within the allowed time; the outcome is unknown
    #[error("no response after {0:?}")]
    Timeout(Duration),
}

impl ProviderError {
    /// Whether the provider may have acted on the request
    pub fn outcome_unknown(&self) -> bool {
        matches!(self, ProviderError::Timeout(_))
    }
}

/// Inclusive amount range a provider accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmountLimits {
    pub min: Amount,
    pub max: Amount,
}

impl AmountLimits {
    pub fn contains(&self, amount: Amount) -> bool {
        amount >= self.min && amount <= self.max
    }
}

/// Push payment submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRequest {
    pub local_reference: String,
    /// Normalized target identifier (MSISDN for mobile money)
    pub target: String,
    pub amount: Amount,
    pub currency: String,
    pub callback_url: String,
    pub description: String,
}

/// Provider acceptance of a push payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushAccepted {
    pub provider_reference: String,
    pub payload: Value,
}

/// Mobile-money style push provider
#[async_trait]
pub trait PushPaymentProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Canonical form of a target identifier, or `None` if it is not valid for this provider
    fn normalize_target(&self, raw: &str) -> Option<String>;

    fn amount_limits(&self) -> AmountLimits;

    /// Submit a push payment. Never retried by the engine.
    async fn initiate(&self, request: &PushRequest) -> Result<PushAccepted, ProviderError>;

    /// Look up the outcome of an earlier push, if the provider supports it
    async fn query(&self, _reference: &str) -> Result<Option<CallbackOutcome>, ProviderError> {
        Ok(None)
    }
}

/// Order awaiting user approval at a pull provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullOrder {
    pub order_id: String,
    pub approval_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureStatus {
    Completed,
    Declined,
    /// Not approved yet; the order can be captured later
    Pending,
}

/// Result of capturing an approved order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureResult {
    pub status: CaptureStatus,
    pub settled_amount: Option<Amount>,
    pub provider_transaction_id: Option<String>,
    pub payload: Value,
}

/// Card or wallet style provider driven by synchronous capture
#[async_trait]
pub trait PullPaymentProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn create_order(&self, amount: Amount, currency: &str)
    -> Result<PullOrder, ProviderError>;

    async fn capture_order(&self, order_id: &str) -> Result<CaptureResult, ProviderError>;
}

/// Normalize a Kenyan mobile number to `254XXXXXXXXX`.
///
/// Accepts `07…`, `01…`, `+2547…`, `2547…`, `2541…` and the bare nine digit
/// form. Spaces and dashes are ignored.
pub fn normalize_msisdn(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-'))
        .collect();
    let digits = cleaned.strip_prefix('+').unwrap_or(&cleaned);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let subscriber = match digits.len() {
        12 if digits.starts_with("254") => &digits[3..],
        10 if digits.starts_with('0') => &digits[1..],
        9 => digits,
        _ => return None,
    };

    if subscriber.starts_with('7') || subscriber.starts_with('1') {
        Some(format!("254{subscriber}"))
    } else {
        None
    }
}

//! In-process sandbox providers for development mode and tests.

use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use rand::Rng;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::provider::{
    AmountLimits, CaptureResult, CaptureStatus, ProviderError, PullOrder, PullPaymentProvider,
    PushAccepted, PushPaymentProvider, PushRequest, normalize_msisdn,
};
use super::{CallbackOutcome, SettlementMetadata};
use crate::Amount;

/// How the sandbox push provider answers the next submissions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushBehavior {
    Accept,
    Reject(String),
    TransportFailure,
    /// Sleep before accepting, long enough to trip the caller's timeout
    Stall(Duration),
}

struct PushState {
    behavior: PushBehavior,
    submissions: Vec<PushRequest>,
    references: Vec<String>,
    outcomes: HashMap<String, CallbackOutcome>,
}

/// Push provider that accepts submissions without contacting anyone
pub struct SandboxPushProvider {
    limits: AmountLimits,
    state: Mutex<PushState>,
}

impl SandboxPushProvider {
    pub fn new(limits: AmountLimits) -> Self {
        Self {
            limits,
            state: Mutex::new(PushState {
                behavior: PushBehavior::Accept,
                submissions: Vec::new(),
                references: Vec::new(),
                outcomes: HashMap::new(),
            }),
        }
    }

    pub async fn set_behavior(&self, behavior: PushBehavior) {
        self.state.lock().await.behavior = behavior;
    }

    /// Every request received, including rejected ones
    pub async fn submissions(&self) -> Vec<PushRequest> {
        self.state.lock().await.submissions.clone()
    }

    /// References handed out, oldest first
    pub async fn references(&self) -> Vec<String> {
        self.state.lock().await.references.clone()
    }

    /// Answer for later `query` calls on `reference`
    pub async fn script_outcome(&self, reference: &str, outcome: CallbackOutcome) {
        self.state
            .lock()
            .await
            .outcomes
            .insert(reference.to_string(), outcome);
    }

    /// A successful settlement with a random receipt
    pub fn settled(amount: Amount) -> CallbackOutcome {
        CallbackOutcome::Success(SettlementMetadata {
            amount: Some(amount),
            receipt: Some(random_receipt()),
            settled_at: Some(Utc::now()),
            payer: None,
        })
    }
}

#[async_trait]
impl PushPaymentProvider for SandboxPushProvider {
    fn name(&self) -> &str {
        "sandbox_push"
    }

    fn normalize_target(&self, raw: &str) -> Option<String> {
        normalize_msisdn(raw)
    }

    fn amount_limits(&self) -> AmountLimits {
        self.limits
    }

    async fn initiate(&self, request: &PushRequest) -> Result<PushAccepted, ProviderError> {
        let behavior = {
            let mut state = self.state.lock().await;
            state.submissions.push(request.clone());
            state.behavior.clone()
        };

        match behavior {
            PushBehavior::Accept => {}
            PushBehavior::Reject(reason) => return Err(ProviderError::Rejected(reason)),
            PushBehavior::TransportFailure => {
                return Err(ProviderError::Transport("connection refused".to_string()));
            }
            PushBehavior::Stall(delay) => tokio::time::sleep(delay).await,
        }

        let reference = checkout_reference();
        debug!(
            "Sandbox push accepted {} for {} as {reference}",
            request.local_reference, request.target
        );
        self.state.lock().await.references.push(reference.clone());

        Ok(PushAccepted {
            provider_reference: reference.clone(),
            payload: json!({
                "MerchantRequestID": Uuid::new_v4().simple().to_string(),
                "CheckoutRequestID": reference,
                "ResponseCode": "0",
                "ResponseDescription": "Success. Request accepted for processing",
            }),
        })
    }

    async fn query(&self, reference: &str) -> Result<Option<CallbackOutcome>, ProviderError> {
        Ok(self.state.lock().await.outcomes.get(reference).cloned())
    }
}

/// How the sandbox pull provider answers captures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureBehavior {
    /// Settle the full order amount
    Complete,
    /// Settle a different amount
    CompleteWith(Amount),
    /// Report completion without a settled amount
    CompleteWithoutAmount,
    Decline,
    NotApproved,
    TransportFailure,
}

struct PullState {
    orders: HashMap<String, Amount>,
    capture: CaptureBehavior,
    fail_create: bool,
    captures: u32,
}

/// Pull provider that keeps its orders in memory
pub struct SandboxPullProvider {
    state: Mutex<PullState>,
}

impl Default for SandboxPullProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SandboxPullProvider {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PullState {
                orders: HashMap::new(),
                capture: CaptureBehavior::Complete,
                fail_create: false,
                captures: 0,
            }),
        }
    }

    pub async fn set_capture_behavior(&self, behavior: CaptureBehavior) {
        self.state.lock().await.capture = behavior;
    }

    pub async fn fail_order_creation(&self, fail: bool) {
        self.state.lock().await.fail_create = fail;
    }

    /// Number of capture calls received
    pub async fn capture_calls(&self) -> u32 {
        self.state.lock().await.captures
    }
}

#[async_trait]
impl PullPaymentProvider for SandboxPullProvider {
    fn name(&self) -> &str {
        "sandbox_pull"
    }

    async fn create_order(
        &self,
        amount: Amount,
        currency: &str,
    ) -> Result<PullOrder, ProviderError> {
        let mut state = self.state.lock().await;
        if state.fail_create {
            return Err(ProviderError::Transport("order service unreachable".to_string()));
        }
        let order_id = format!(
            "ORD-{}",
            Uuid::new_v4().simple().to_string()[..17].to_uppercase()
        );
        state.orders.insert(order_id.clone(), amount);
        debug!("Sandbox order {order_id} created for {amount} {currency}");

        Ok(PullOrder {
            approval_url: format!("https://sandbox.arena-pay.local/checkoutnow?token={order_id}"),
            order_id,
        })
    }

    async fn capture_order(&self, order_id: &str) -> Result<CaptureResult, ProviderError> {
        let mut state = self.state.lock().await;
        state.captures += 1;
        let amount = *state
            .orders
            .get(order_id)
            .ok_or_else(|| ProviderError::Rejected(format!("unknown order {order_id}")))?;

        let (status, settled_amount) = match state.capture {
            CaptureBehavior::Complete => (CaptureStatus::Completed, Some(amount)),
            CaptureBehavior::CompleteWith(settled) => (CaptureStatus::Completed, Some(settled)),
            CaptureBehavior::CompleteWithoutAmount => (CaptureStatus::Completed, None),
            CaptureBehavior::Decline => (CaptureStatus::Declined, None),
            CaptureBehavior::NotApproved => (CaptureStatus::Pending, None),
            CaptureBehavior::TransportFailure => {
                return Err(ProviderError::Transport("connection reset".to_string()));
            }
        };
        let provider_transaction_id =
            (status == CaptureStatus::Completed).then(|| format!("CAP-{}", random_receipt()));

        Ok(CaptureResult {
            status,
            settled_amount,
            payload: json!({
                "id": order_id,
                "status": status,
                "capture_id": provider_transaction_id,
            }),
            provider_transaction_id,
        })
    }
}

fn checkout_reference() -> String {
    let suffix: u32 = rand::rng().random_range(1_000_000..10_000_000);
    format!("ws_CO_{}{suffix}", Utc::now().format("%d%m%Y%H%M%S"))
}

/// Ten character receipt in the mobile-money style
fn random_receipt() -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::rng();
    (0..10)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}

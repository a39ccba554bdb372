//! Mobile-money STK push callback wire format.
//!
//! ```json
//! {"Body":{"stkCallback":{"MerchantRequestID":"…","CheckoutRequestID":"ws_CO_…",
//!   "ResultCode":0,"ResultDesc":"…","CallbackMetadata":{"Item":[
//!   {"Name":"Amount","Value":1000},{"Name":"MpesaReceiptNumber","Value":"NLJ7RT61SV"},
//!   {"Name":"TransactionDate","Value":20191219102115},{"Name":"PhoneNumber","Value":254708374149}]}}}}
//! ```

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::{CallbackNotification, CallbackOutcome, SettlementMetadata};
use crate::Amount;

/// Reasons an inbound callback body cannot be turned into a notification
#[derive(Debug, Error)]
pub enum CallbackParseError {
    #[error("malformed callback body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("callback carries no correlation reference")]
    MissingReference,

    #[error("unreadable result code: {0}")]
    InvalidResultCode(Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StkEnvelope {
    #[serde(rename = "Body")]
    pub body: StkBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StkBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID", default)]
    pub merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID", default)]
    pub checkout_request_id: String,
    /// Number or numeric string depending on the gateway version
    pub result_code: Value,
    #[serde(default)]
    pub result_desc: String,
    #[serde(default)]
    pub callback_metadata: Option<StkMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StkMetadata {
    #[serde(rename = "Item", default)]
    pub items: Vec<StkItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StkItem {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value", default)]
    pub value: Option<Value>,
}

impl StkMetadata {
    fn get(&self, name: &str) -> Option<&Value> {
        self.items
            .iter()
            .find(|item| item.name == name)
            .and_then(|item| item.value.as_ref())
    }
}

/// Parse a raw callback body into a notification
pub fn parse_callback(body: &[u8]) -> Result<CallbackNotification, CallbackParseError> {
    let payload: Value = serde_json::from_slice(body)?;
    let envelope: StkEnvelope = serde_json::from_value(payload.clone())?;
    let callback = envelope.body.stk_callback;

    let reference = callback.checkout_request_id.trim().to_string();
    if reference.is_empty() {
        return Err(CallbackParseError::MissingReference);
    }

    let code = result_code(&callback.result_code)
        .ok_or_else(|| CallbackParseError::InvalidResultCode(callback.result_code.clone()))?;

    let outcome = if code == 0 {
        let metadata = callback.callback_metadata.unwrap_or(StkMetadata { items: Vec::new() });
        CallbackOutcome::Success(SettlementMetadata {
            amount: metadata.get("Amount").and_then(integral_amount),
            receipt: metadata
                .get("MpesaReceiptNumber")
                .and_then(Value::as_str)
                .map(str::to_string),
            settled_at: metadata.get("TransactionDate").and_then(transaction_date),
            payer: metadata.get("PhoneNumber").map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }),
        })
    } else {
        CallbackOutcome::Failure {
            code,
            reason: callback.result_desc,
        }
    };

    Ok(CallbackNotification {
        reference,
        outcome,
        payload,
    })
}

fn result_code(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Amounts must be whole numbers; `1000` and `1000.0` are accepted, `999.5` is not.
fn integral_amount(value: &Value) -> Option<Amount> {
    let Value::Number(n) = value else {
        return None;
    };
    if let Some(amount) = n.as_i64() {
        return Some(amount);
    }
    let float = n.as_f64()?;
    (float.fract() == 0.0 && float.abs() < i64::MAX as f64).then_some(float as Amount)
}

/// `TransactionDate` is `%Y%m%d%H%M%S`, sent as a number or a string
fn transaction_date(value: &Value) -> Option<DateTime<Utc>> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        _ => return None,
    };
    NaiveDateTime::parse_from_str(&text, "%Y%m%d%H%M%S")
        .ok()
        .map(|dt| dt.and_utc())
}

/// Build a callback body; used by the sandbox tooling and tests
pub fn success_body(reference: &str, amount: Amount, receipt: &str) -> Value {
    serde_json::json!({
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": reference,
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully.",
                "CallbackMetadata": {
                    "Item": [
                        {"Name": "Amount", "Value": amount},
                        {"Name": "MpesaReceiptNumber", "Value": receipt},
                        {"Name": "TransactionDate", "Value": 20191219102115u64},
                        {"Name": "PhoneNumber", "Value": 254708374149u64}
                    ]
                }
            }
        }
    })
}

/// Build a failure callback body
pub fn failure_body(reference: &str, code: i64, reason: &str) -> Value {
    serde_json::json!({
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": reference,
                "ResultCode": code,
                "ResultDesc": reason
            }
        }
    })
}

//! Payment API handlers: push initiation, provider callbacks, pull orders and status.
//!
//! # Examples
//!
//! Start a push payment:
//! ```bash
//! curl -X POST http://localhost:8080/api/v1/payments/push \
//!   -H "Authorization: Bearer TOKEN" \
//!   -H "Content-Type: application/json" \
//!   -d '{"amount": 1000, "phone": "0712345678"}'
//! ```

use arena_pay::UserId;
use arena_pay::payments::{
    CallbackAck, CreatedOrder, InitiatedPayment, PaymentError, PaymentStatusView,
    ReconcileOutcome, SIGNATURE_HEADER,
};
use axum::{
    Json,
    body::Bytes,
    extract::{Extension, Path, State},
    http::{HeaderMap, StatusCode},
};
use serde::Deserialize;

use super::AppState;
use super::error::{ApiResult, error_response, from_payment};
use super::request_id::RequestId;
use crate::{logging, metrics};

#[derive(Debug, Deserialize)]
pub struct PushPaymentRequest {
    pub amount: i64,
    pub phone: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub amount: i64,
    pub currency: Option<String>,
}

/// Receive a provider outcome notification.
///
/// The raw body is authenticated before parsing. Authentic notifications are
/// always answered `200 OK` with an acknowledgement, whatever the reconcile
/// outcome, so the provider does not keep redelivering.
///
/// # Errors
///
/// - `401 Unauthorized`: Signature missing or wrong
pub async fn callback(
    State(state): State<AppState>,
    request_id: RequestId,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<CallbackAck>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    if !state.callback_verifier.is_authentic(signature, &body) {
        metrics::payment_callbacks_total("unauthenticated");
        logging::log_security_event(
            "callback_signature_invalid",
            None,
            None,
            &format!("Rejected payment callback {}", request_id.as_str()),
        );
        return Err(error_response(
            StatusCode::UNAUTHORIZED,
            "Invalid callback signature",
        ));
    }

    let (ack, outcome) = state.engine.handle_callback(&body).await;
    metrics::payment_callbacks_total(outcome.label());

    match &outcome {
        ReconcileOutcome::UnknownReference => logging::log_reconciliation_anomaly(
            outcome.label(),
            Some(request_id.as_str()),
            "callback for a reference with no payment intent",
        ),
        ReconcileOutcome::ProtocolError(detail)
        | ReconcileOutcome::Conflict(detail)
        | ReconcileOutcome::Internal(detail) => logging::log_reconciliation_anomaly(
            outcome.label(),
            Some(request_id.as_str()),
            detail,
        ),
        ReconcileOutcome::AlreadyFinal(_)
        | ReconcileOutcome::Failed
        | ReconcileOutcome::Credited(_) => {}
    }

    Ok(Json(ack))
}

/// Start a push payment to the caller's phone.
///
/// # Response
///
/// `202 Accepted` with the tracking reference; the wallet is credited when
/// the provider's callback arrives.
///
/// # Errors
///
/// - `400 Bad Request`: Amount outside limits or invalid phone number
/// - `503 Service Unavailable`: Provider refused or could not be reached
pub async fn initiate_push(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Json(request): Json<PushPaymentRequest>,
) -> ApiResult<(StatusCode, Json<InitiatedPayment>)> {
    match state
        .engine
        .initiate_push(user_id, request.amount, &request.phone)
        .await
    {
        Ok(initiated) => {
            metrics::payments_initiated_total("accepted");
            Ok((StatusCode::ACCEPTED, Json(initiated)))
        }
        Err(err) => {
            metrics::payments_initiated_total(match &err {
                PaymentError::InvalidRequest(_) => "invalid",
                PaymentError::ProviderUnavailable(_) => "provider_unavailable",
                _ => "error",
            });
            Err(from_payment(err))
        }
    }
}

/// Status of one of the caller's payments, by local, provider or order reference
pub async fn payment_status(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Path(reference): Path<String>,
) -> ApiResult<Json<PaymentStatusView>> {
    state
        .engine
        .payment_status(&reference, user_id)
        .await
        .map(Json)
        .map_err(from_payment)
}

/// Create a pull-payment order for the caller to approve
pub async fn create_order(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Json(request): Json<CreateOrderRequest>,
) -> ApiResult<(StatusCode, Json<CreatedOrder>)> {
    state
        .engine
        .create_order(user_id, request.amount, request.currency.as_deref())
        .await
        .map(|order| (StatusCode::CREATED, Json(order)))
        .map_err(from_payment)
}

/// Capture an approved order, crediting the wallet on completion.
///
/// Capturing an order that is already final returns its state unchanged.
pub async fn capture_order(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Path(order_id): Path<String>,
) -> ApiResult<Json<PaymentStatusView>> {
    match state.engine.capture_order(user_id, &order_id).await {
        Ok(view) => {
            metrics::pull_captures_total(view.intent.status.as_str());
            Ok(Json(view))
        }
        Err(err) => {
            metrics::pull_captures_total("error");
            Err(from_payment(err))
        }
    }
}

//! Mapping from engine errors to HTTP responses.

use arena_pay::ledger::LedgerError;
use arena_pay::payments::PaymentError;
use arena_pay::tournament::EscrowError;
use arena_pay::wallet::WalletError;
use axum::{Json, http::StatusCode};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Error half of every handler result
pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub type ApiResult<T> = Result<T, ApiError>;

pub fn error_response(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

pub fn bad_request(message: impl Into<String>) -> ApiError {
    error_response(StatusCode::BAD_REQUEST, message)
}

fn wallet_status(err: &WalletError) -> StatusCode {
    match err {
        WalletError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
        WalletError::InvalidAmount(_) | WalletError::CurrencyMismatch { .. } => {
            StatusCode::BAD_REQUEST
        }
        WalletError::BalanceOverflow => StatusCode::CONFLICT,
        WalletError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn ledger_status(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::InvalidTransition { .. } => StatusCode::CONFLICT,
        LedgerError::Database(_) | LedgerError::Decode(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn payment_status(err: &PaymentError) -> StatusCode {
    match err {
        PaymentError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        PaymentError::ProviderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        PaymentError::UnusableSettlement { .. } => StatusCode::BAD_GATEWAY,
        PaymentError::DuplicateReference(_) | PaymentError::InvalidTransition { .. } => {
            StatusCode::CONFLICT
        }
        PaymentError::NotFound(_) => StatusCode::NOT_FOUND,
        PaymentError::Wallet(err) => wallet_status(err),
        PaymentError::Ledger(err) => ledger_status(err),
        PaymentError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn escrow_status(err: &EscrowError) -> StatusCode {
    match err {
        EscrowError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        EscrowError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
        EscrowError::NotFound(_) | EscrowError::NotRegistered => StatusCode::NOT_FOUND,
        EscrowError::Full
        | EscrowError::AlreadyRegistered
        | EscrowError::NotJoinable
        | EscrowError::AlreadyStarted
        | EscrowError::InvalidState { .. } => StatusCode::CONFLICT,
        EscrowError::Wallet(err) => wallet_status(err),
        EscrowError::Ledger(err) => ledger_status(err),
        EscrowError::Database(_) | EscrowError::Decode(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn from_payment(err: PaymentError) -> ApiError {
    let status = payment_status(&err);
    if status.is_server_error() {
        tracing::error!("Payment request failed: {err}");
    }
    error_response(status, err.client_message())
}

pub fn from_escrow(err: EscrowError) -> ApiError {
    let status = escrow_status(&err);
    if status.is_server_error() {
        tracing::error!("Escrow request failed: {err}");
    }
    error_response(status, err.client_message())
}

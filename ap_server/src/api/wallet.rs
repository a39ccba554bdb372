//! Wallet API handlers.

use arena_pay::UserId;
use arena_pay::ledger::{Page, Transaction, TransactionKind, TransactionQuery, TransactionStatus};
use arena_pay::wallet::WalletSnapshot;
use axum::{
    Json,
    extract::{Extension, Query, State},
};
use serde::Deserialize;

use super::AppState;
use super::error::{ApiResult, bad_request, from_payment};

/// Query string of the history endpoint
#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub kind: Option<String>,
    pub status: Option<String>,
}

impl HistoryParams {
    fn into_query(self) -> Result<TransactionQuery, String> {
        let defaults = TransactionQuery::default();
        Ok(TransactionQuery {
            kind: self
                .kind
                .map(|k| k.parse::<TransactionKind>())
                .transpose()
                .map_err(|e| e.to_string())?,
            status: self
                .status
                .map(|s| s.parse::<TransactionStatus>())
                .transpose()
                .map_err(|e| e.to_string())?,
            page: self.page.unwrap_or(defaults.page),
            per_page: self.per_page.unwrap_or(defaults.per_page),
        })
    }
}

/// Caller's balance; the wallet is created empty on first use
pub async fn get_wallet(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
) -> ApiResult<Json<WalletSnapshot>> {
    state
        .engine
        .wallet_snapshot(user_id)
        .await
        .map(Json)
        .map_err(from_payment)
}

/// Caller's transactions, newest first
///
/// `?page=1&per_page=20&kind=topup&status=completed`; page size is capped at 100.
pub async fn list_transactions(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Query(params): Query<HistoryParams>,
) -> ApiResult<Json<Page<Transaction>>> {
    let query = params.into_query().map_err(bad_request)?;
    state
        .engine
        .transaction_history(user_id, &query)
        .await
        .map(Json)
        .map_err(from_payment)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_parse_filters() {
        let query = HistoryParams {
            page: Some(2),
            per_page: None,
            kind: Some("entry_fee".to_string()),
            status: Some("completed".to_string()),
        }
        .into_query()
        .unwrap();
        assert_eq!(query.page, 2);
        assert_eq!(query.per_page, TransactionQuery::default().per_page);
        assert_eq!(query.kind, Some(TransactionKind::EntryFee));
        assert_eq!(query.status, Some(TransactionStatus::Completed));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let params = HistoryParams {
            kind: Some("bonus".to_string()),
            ..Default::default()
        };
        assert!(params.into_query().is_err());
    }
}

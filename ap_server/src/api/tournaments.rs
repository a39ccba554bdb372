//! Tournament API handlers.
//!
//! Join a tournament:
//! ```bash
//! curl -X POST http://localhost:8080/api/v1/tournaments/1/join \
//!   -H "Authorization: Bearer TOKEN"
//! ```

use arena_pay::tournament::{JoinReceipt, LeaveReceipt, NewTournament, Tournament};
use arena_pay::{TournamentId, UserId};
use axum::{
    Json,
    extract::{Extension, Path, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::AppState;
use super::error::{ApiResult, from_escrow};
use crate::metrics;

#[derive(Debug, Deserialize)]
pub struct CreateTournamentRequest {
    pub name: String,
    pub entry_fee: i64,
    pub max_players: u32,
    pub starts_at: DateTime<Utc>,
}

pub async fn create_tournament(
    State(state): State<AppState>,
    Json(request): Json<CreateTournamentRequest>,
) -> ApiResult<(StatusCode, Json<Tournament>)> {
    let result = state
        .engine
        .escrow()
        .create_tournament(NewTournament {
            name: request.name,
            entry_fee: request.entry_fee,
            max_players: request.max_players,
            starts_at: request.starts_at,
        })
        .await;
    metrics::escrow_operations_total("create", outcome(&result));
    result
        .map(|t| (StatusCode::CREATED, Json(t)))
        .map_err(from_escrow)
}

pub async fn get_tournament(
    State(state): State<AppState>,
    Path(tournament_id): Path<TournamentId>,
) -> ApiResult<Json<Tournament>> {
    state
        .engine
        .escrow()
        .tournament(tournament_id)
        .await
        .map(Json)
        .map_err(from_escrow)
}

/// Register the caller, debiting the entry fee.
///
/// # Errors
///
/// - `402 Payment Required`: Balance below the entry fee
/// - `404 Not Found`: Unknown tournament
/// - `409 Conflict`: Full, already registered, or registration closed
pub async fn join_tournament(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Path(tournament_id): Path<TournamentId>,
) -> ApiResult<Json<JoinReceipt>> {
    let result = state.engine.escrow().join(user_id, tournament_id).await;
    metrics::escrow_operations_total("join", outcome(&result));
    result.map(Json).map_err(from_escrow)
}

/// Withdraw the caller before the start, refunding the entry fee.
///
/// # Errors
///
/// - `404 Not Found`: Unknown tournament or caller not registered
/// - `409 Conflict`: Tournament already started
pub async fn leave_tournament(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Path(tournament_id): Path<TournamentId>,
) -> ApiResult<Json<LeaveReceipt>> {
    let result = state.engine.escrow().leave(user_id, tournament_id).await;
    metrics::escrow_operations_total("leave", outcome(&result));
    result.map(Json).map_err(from_escrow)
}

fn outcome<T, E>(result: &Result<T, E>) -> &'static str {
    if result.is_ok() { "ok" } else { "rejected" }
}

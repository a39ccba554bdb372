//! PostgreSQL tournament store.

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use std::sync::Arc;
use uuid::Uuid;

use super::{
    EscrowError, EscrowResult, Membership, NewTournament, Tournament, TournamentState,
    TournamentStore,
};
use crate::db::timeouts::{into_sqlx, with_default_timeout};
use crate::{TournamentId, UserId};

const TOURNAMENT_COLUMNS: &str = "id, name, entry_fee, currency, max_players, current_players, state, starts_at, created_at, updated_at";
const MEMBER_COLUMNS: &str = "id, tournament_id, user_id, entry_transaction_id, joined_at";

/// Tournament store backed by the `tournaments` and `tournament_members` tables
#[derive(Clone)]
pub struct PgTournamentStore {
    pool: Arc<PgPool>,
}

impl PgTournamentStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TournamentStore for PgTournamentStore {
    async fn create(&self, new: NewTournament, currency: &str) -> EscrowResult<Tournament> {
        let sql = format!(
            "INSERT INTO tournaments (name, entry_fee, currency, max_players, starts_at)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {TOURNAMENT_COLUMNS}"
        );
        let row = with_default_timeout(
            sqlx::query(&sql)
                .bind(&new.name)
                .bind(new.entry_fee)
                .bind(currency)
                .bind(new.max_players as i32)
                .bind(new.starts_at.naive_utc())
                .fetch_one(self.pool.as_ref()),
        )
        .await
        .map_err(into_sqlx)?;

        tournament_from_row(&row)
    }

    async fn get(&self, id: TournamentId) -> EscrowResult<Tournament> {
        let sql = format!("SELECT {TOURNAMENT_COLUMNS} FROM tournaments WHERE id = $1");
        let row = with_default_timeout(
            sqlx::query(&sql)
                .bind(id)
                .fetch_optional(self.pool.as_ref()),
        )
        .await
        .map_err(into_sqlx)?;

        match row {
            Some(row) => tournament_from_row(&row),
            None => Err(EscrowError::NotFound(id)),
        }
    }

    async fn membership(
        &self,
        tournament_id: TournamentId,
        user_id: UserId,
    ) -> EscrowResult<Option<Membership>> {
        let sql = format!(
            "SELECT {MEMBER_COLUMNS} FROM tournament_members WHERE tournament_id = $1 AND user_id = $2"
        );
        let row = with_default_timeout(
            sqlx::query(&sql)
                .bind(tournament_id)
                .bind(user_id)
                .fetch_optional(self.pool.as_ref()),
        )
        .await
        .map_err(into_sqlx)?;

        Ok(row.as_ref().map(membership_from_row))
    }

    async fn members(&self, tournament_id: TournamentId) -> EscrowResult<Vec<Membership>> {
        let sql = format!(
            "SELECT {MEMBER_COLUMNS} FROM tournament_members WHERE tournament_id = $1 ORDER BY joined_at"
        );
        let rows = with_default_timeout(
            sqlx::query(&sql)
                .bind(tournament_id)
                .fetch_all(self.pool.as_ref()),
        )
        .await
        .map_err(into_sqlx)?;

        Ok(rows.iter().map(membership_from_row).collect())
    }

    async fn add_member(
        &self,
        tournament_id: TournamentId,
        user_id: UserId,
        entry_transaction_id: Option<Uuid>,
    ) -> EscrowResult<Membership> {
        let mut tx = self.pool.begin().await?;

        // Capacity and state are checked by the guarded UPDATE itself.
        let reserved = sqlx::query(
            "UPDATE tournaments
             SET current_players = current_players + 1, updated_at = NOW()
             WHERE id = $1 AND state = 'registration' AND starts_at > NOW() AT TIME ZONE 'UTC'
               AND current_players < max_players
             RETURNING id",
        )
        .bind(tournament_id)
        .fetch_optional(&mut *tx)
        .await?;

        if reserved.is_none() {
            tx.rollback().await?;
            let tournament = self.get(tournament_id).await?;
            return Err(if !tournament.accepts_registration(Utc::now()) {
                EscrowError::NotJoinable
            } else {
                EscrowError::Full
            });
        }

        let sql = format!(
            "INSERT INTO tournament_members (id, tournament_id, user_id, entry_transaction_id)
             VALUES ($1, $2, $3, $4)
             RETURNING {MEMBER_COLUMNS}"
        );
        let inserted = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(tournament_id)
            .bind(user_id)
            .bind(entry_transaction_id)
            .fetch_one(&mut *tx)
            .await;

        let row = match inserted {
            Ok(row) => row,
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                tx.rollback().await?;
                return Err(EscrowError::AlreadyRegistered);
            }
            Err(e) => return Err(e.into()),
        };

        tx.commit().await?;
        Ok(membership_from_row(&row))
    }

    async fn remove_member(
        &self,
        tournament_id: TournamentId,
        user_id: UserId,
    ) -> EscrowResult<Option<Membership>> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "DELETE FROM tournament_members WHERE tournament_id = $1 AND user_id = $2
             RETURNING {MEMBER_COLUMNS}"
        );
        let removed = sqlx::query(&sql)
            .bind(tournament_id)
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = removed else {
            tx.rollback().await?;
            return Ok(None);
        };

        sqlx::query(
            "UPDATE tournaments
             SET current_players = GREATEST(current_players - 1, 0), updated_at = NOW()
             WHERE id = $1",
        )
        .bind(tournament_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(membership_from_row(&row)))
    }

    async fn set_state(
        &self,
        id: TournamentId,
        expected: TournamentState,
        next: TournamentState,
    ) -> EscrowResult<Tournament> {
        let sql = format!(
            "UPDATE tournaments SET state = $3, updated_at = NOW()
             WHERE id = $1 AND state = $2
             RETURNING {TOURNAMENT_COLUMNS}"
        );
        let row = with_default_timeout(
            sqlx::query(&sql)
                .bind(id)
                .bind(expected.as_str())
                .bind(next.as_str())
                .fetch_optional(self.pool.as_ref()),
        )
        .await
        .map_err(into_sqlx)?;

        match row {
            Some(row) => tournament_from_row(&row),
            None => {
                let current = self.get(id).await?;
                Err(EscrowError::InvalidState {
                    expected,
                    actual: current.state,
                })
            }
        }
    }
}

fn tournament_from_row(row: &PgRow) -> EscrowResult<Tournament> {
    Ok(Tournament {
        id: row.get("id"),
        name: row.get("name"),
        entry_fee: row.get("entry_fee"),
        currency: row.get("currency"),
        max_players: row.get::<i32, _>("max_players").max(0) as u32,
        current_players: row.get::<i32, _>("current_players").max(0) as u32,
        state: row.get::<String, _>("state").parse()?,
        starts_at: row.get::<NaiveDateTime, _>("starts_at").and_utc(),
        created_at: row.get::<NaiveDateTime, _>("created_at").and_utc(),
        updated_at: row.get::<NaiveDateTime, _>("updated_at").and_utc(),
    })
}

fn membership_from_row(row: &PgRow) -> Membership {
    Membership {
        id: row.get("id"),
        tournament_id: row.get("tournament_id"),
        user_id: row.get("user_id"),
        entry_transaction_id: row.get("entry_transaction_id"),
        joined_at: row.get::<NaiveDateTime, _>("joined_at").and_utc(),
    }
}

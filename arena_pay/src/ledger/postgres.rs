//! PostgreSQL transaction log.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use log::warn;
use serde_json::Value;
use sqlx::{PgPool, Row, postgres::PgRow};
use std::sync::Arc;
use uuid::Uuid;

use super::{
    Keyed, LedgerError, LedgerResult, NewTransaction, Page, StatusScan, Transaction, TransactionLog,
    TransactionPatch, TransactionQuery, TransactionStatus, TransitionCheck, Transitioned,
    check_transition,
};
use crate::UserId;
use crate::db::timeouts::{into_sqlx, with_default_timeout};

const COLUMNS: &str = "id, seq, user_id, kind, amount, currency, status, reference_id, description, metadata, created_at, updated_at";

/// Transaction log backed by the `transactions` table
#[derive(Clone)]
pub struct PgTransactionLog {
    pool: Arc<PgPool>,
}

impl PgTransactionLog {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    async fn list_window(
        &self,
        scan: &StatusScan,
        comparison: &str,
        bound: DateTime<Utc>,
    ) -> LedgerResult<Vec<Transaction>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM transactions
             WHERE status = $1
               AND (cardinality($2::text[]) = 0 OR kind = ANY($2))
               AND updated_at {comparison} $3
               AND ($4::timestamp IS NULL OR (updated_at, seq) > ($4, $5))
             ORDER BY updated_at ASC, seq ASC
             LIMIT $6"
        );
        let rows = with_default_timeout(
            sqlx::query(&sql)
                .bind(scan.status.as_str())
                .bind(scan.kind_names())
                .bind(bound.naive_utc())
                .bind(scan.after.map(|cursor| cursor.updated_at.naive_utc()))
                .bind(scan.after.map_or(0, |cursor| cursor.seq))
                .bind(i64::from(scan.limit))
                .fetch_all(self.pool.as_ref()),
        )
        .await
        .map_err(into_sqlx)?;

        rows.iter().map(transaction_from_row).collect()
    }
}

#[async_trait]
impl TransactionLog for PgTransactionLog {
    async fn create(&self, new: NewTransaction) -> LedgerResult<Transaction> {
        let sql = format!(
            "INSERT INTO transactions (id, user_id, kind, amount, currency, status, reference_id, description, metadata)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING {COLUMNS}"
        );
        let row = with_default_timeout(
            sqlx::query(&sql)
                .bind(Uuid::new_v4())
                .bind(new.user_id)
                .bind(new.kind.as_str())
                .bind(new.amount)
                .bind(&new.currency)
                .bind(new.status.as_str())
                .bind(&new.reference_id)
                .bind(&new.description)
                .bind(&new.metadata)
                .fetch_one(self.pool.as_ref()),
        )
        .await
        .map_err(into_sqlx)?;

        transaction_from_row(&row)
    }

    async fn create_keyed(&self, new: NewTransaction) -> LedgerResult<Keyed<Transaction>> {
        let user_id = new.user_id;
        let reference = new.reference_id.clone();
        match self.create(new).await {
            Ok(record) => Ok(Keyed {
                record,
                inserted: true,
            }),
            // idx_transactions_keyed_credit: another writer holds the key
            Err(LedgerError::Database(sqlx::Error::Database(db_err)))
                if db_err.is_unique_violation() =>
            {
                let reference = reference.unwrap_or_default();
                let record = self
                    .find_by_reference(user_id, &reference)
                    .await?
                    .ok_or_else(|| {
                        LedgerError::Decode(format!(
                            "keyed credit {reference} for user {user_id} conflicted but was not found"
                        ))
                    })?;
                Ok(Keyed {
                    record,
                    inserted: false,
                })
            }
            Err(err) => Err(err),
        }
    }

    async fn get(&self, id: Uuid) -> LedgerResult<Transaction> {
        let sql = format!("SELECT {COLUMNS} FROM transactions WHERE id = $1");
        let row = with_default_timeout(
            sqlx::query(&sql)
                .bind(id)
                .fetch_optional(self.pool.as_ref()),
        )
        .await
        .map_err(into_sqlx)?;

        match row {
            Some(row) => transaction_from_row(&row),
            None => Err(LedgerError::NotFound(id)),
        }
    }

    async fn transition_to(
        &self,
        id: Uuid,
        status: TransactionStatus,
        patch: TransactionPatch,
    ) -> LedgerResult<Transitioned<Transaction>> {
        if status == TransactionStatus::Pending {
            let current = self.get(id).await?;
            return Err(LedgerError::InvalidTransition {
                id,
                from: current.status,
                to: status,
            });
        }

        let sql = format!(
            "UPDATE transactions
             SET status = $2,
                 amount = COALESCE($3, amount),
                 reference_id = COALESCE($4, reference_id),
                 description = COALESCE($5, description),
                 metadata = metadata || $6,
                 updated_at = NOW()
             WHERE id = $1 AND status = 'pending'
             RETURNING {COLUMNS}"
        );
        let updated = with_default_timeout(
            sqlx::query(&sql)
                .bind(id)
                .bind(status.as_str())
                .bind(patch.amount)
                .bind(&patch.reference_id)
                .bind(&patch.description)
                .bind(Value::Object(patch.metadata.clone()))
                .fetch_optional(self.pool.as_ref()),
        )
        .await
        .map_err(into_sqlx)?;

        if let Some(row) = updated {
            return Ok(Transitioned {
                record: transaction_from_row(&row)?,
                changed: true,
            });
        }

        // Lost the compare-and-set: classify against the stored status.
        let current = self.get(id).await?;
        match check_transition(current.status, status) {
            TransitionCheck::Unchanged => Ok(Transitioned {
                record: current,
                changed: false,
            }),
            _ => {
                warn!(
                    "Rejected transition of transaction {id} from {} to {status}",
                    current.status
                );
                Err(LedgerError::InvalidTransition {
                    id,
                    from: current.status,
                    to: status,
                })
            }
        }
    }

    async fn list_for_user(
        &self,
        user_id: UserId,
        query: &TransactionQuery,
    ) -> LedgerResult<Page<Transaction>> {
        let query = query.normalized();
        let kind = query.kind.map(|k| k.as_str());
        let status = query.status.map(|s| s.as_str());

        let total_row = with_default_timeout(
            sqlx::query(
                "SELECT COUNT(*) AS total FROM transactions
                 WHERE user_id = $1
                   AND ($2::TEXT IS NULL OR kind = $2)
                   AND ($3::TEXT IS NULL OR status = $3)",
            )
            .bind(user_id)
            .bind(kind)
            .bind(status)
            .fetch_one(self.pool.as_ref()),
        )
        .await
        .map_err(into_sqlx)?;
        let total: i64 = total_row.get("total");

        let sql = format!(
            "SELECT {COLUMNS} FROM transactions
             WHERE user_id = $1
               AND ($2::TEXT IS NULL OR kind = $2)
               AND ($3::TEXT IS NULL OR status = $3)
             ORDER BY created_at DESC, seq DESC
             LIMIT $4 OFFSET $5"
        );
        let rows = with_default_timeout(
            sqlx::query(&sql)
                .bind(user_id)
                .bind(kind)
                .bind(status)
                .bind(i64::from(query.per_page))
                .bind(query.offset() as i64)
                .fetch_all(self.pool.as_ref()),
        )
        .await
        .map_err(into_sqlx)?;

        Ok(Page {
            items: rows
                .iter()
                .map(transaction_from_row)
                .collect::<LedgerResult<_>>()?,
            page: query.page,
            per_page: query.per_page,
            total: total.max(0) as u64,
        })
    }

    async fn find_by_reference(
        &self,
        user_id: UserId,
        reference: &str,
    ) -> LedgerResult<Option<Transaction>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM transactions
             WHERE user_id = $1 AND reference_id = $2
             ORDER BY created_at DESC, seq DESC
             LIMIT 1"
        );
        let row = with_default_timeout(
            sqlx::query(&sql)
                .bind(user_id)
                .bind(reference)
                .fetch_optional(self.pool.as_ref()),
        )
        .await
        .map_err(into_sqlx)?;

        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn list_by_status(
        &self,
        scan: &StatusScan,
        updated_before: DateTime<Utc>,
    ) -> LedgerResult<Vec<Transaction>> {
        self.list_window(scan, "<", updated_before).await
    }

    async fn list_updated_since(
        &self,
        scan: &StatusScan,
        updated_after: DateTime<Utc>,
    ) -> LedgerResult<Vec<Transaction>> {
        self.list_window(scan, ">=", updated_after).await
    }
}

fn transaction_from_row(row: &PgRow) -> LedgerResult<Transaction> {
    Ok(Transaction {
        id: row.get("id"),
        seq: row.get("seq"),
        user_id: row.get("user_id"),
        kind: row.get::<String, _>("kind").parse()?,
        amount: row.get("amount"),
        currency: row.get("currency"),
        status: row.get::<String, _>("status").parse()?,
        reference_id: row.get("reference_id"),
        description: row.get("description"),
        metadata: row.get("metadata"),
        created_at: row.get::<NaiveDateTime, _>("created_at").and_utc(),
        updated_at: row.get::<NaiveDateTime, _>("updated_at").and_utc(),
    })
}

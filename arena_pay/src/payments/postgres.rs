//! PostgreSQL payment intent store.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use log::warn;
use serde_json::Value;
use sqlx::{PgPool, Row, postgres::PgRow};
use std::sync::Arc;
use uuid::Uuid;

use super::{IntentStatus, IntentStore, NewIntent, PaymentError, PaymentIntent, PaymentResult};
use crate::db::timeouts::{into_sqlx, with_default_timeout};
use crate::ledger::{TransitionCheck, Transitioned, check_transition};

const COLUMNS: &str = "id, provider, local_reference, provider_reference, user_id, amount, currency, status, failure_reason, transaction_id, provider_payload, created_at, updated_at";

/// Intent store backed by the `payment_intents` table
#[derive(Clone)]
pub struct PgIntentStore {
    pool: Arc<PgPool>,
}

impl PgIntentStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

/// Map a unique-index violation onto `DuplicateReference`
fn map_unique(err: sqlx::Error, reference: &str) -> PaymentError {
    match err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            PaymentError::DuplicateReference(reference.to_string())
        }
        other => PaymentError::Database(other),
    }
}

#[async_trait]
impl IntentStore for PgIntentStore {
    async fn create(&self, new: NewIntent) -> PaymentResult<PaymentIntent> {
        let sql = format!(
            "INSERT INTO payment_intents
                (id, provider, local_reference, provider_reference, user_id, amount, currency, status, transaction_id, provider_payload)
             VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', $8, $9)
             RETURNING {COLUMNS}"
        );
        let row = with_default_timeout(
            sqlx::query(&sql)
                .bind(Uuid::new_v4())
                .bind(&new.provider)
                .bind(&new.local_reference)
                .bind(&new.provider_reference)
                .bind(new.user_id)
                .bind(new.amount)
                .bind(&new.currency)
                .bind(new.transaction_id)
                .bind(&new.provider_payload)
                .fetch_one(self.pool.as_ref()),
        )
        .await
        .map_err(|e| map_unique(into_sqlx(e), &new.local_reference))?;

        intent_from_row(&row)
    }

    async fn get(&self, id: Uuid) -> PaymentResult<PaymentIntent> {
        let sql = format!("SELECT {COLUMNS} FROM payment_intents WHERE id = $1");
        let row = with_default_timeout(
            sqlx::query(&sql)
                .bind(id)
                .fetch_optional(self.pool.as_ref()),
        )
        .await
        .map_err(into_sqlx)?;

        match row {
            Some(row) => intent_from_row(&row),
            None => Err(PaymentError::NotFound(id.to_string())),
        }
    }

    async fn find_by_reference(&self, reference: &str) -> PaymentResult<Option<PaymentIntent>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM payment_intents
             WHERE provider_reference = $1 OR local_reference = $1
             LIMIT 1"
        );
        let row = with_default_timeout(
            sqlx::query(&sql)
                .bind(reference)
                .fetch_optional(self.pool.as_ref()),
        )
        .await
        .map_err(into_sqlx)?;

        row.as_ref().map(intent_from_row).transpose()
    }

    async fn attach_provider_reference(
        &self,
        id: Uuid,
        reference: &str,
    ) -> PaymentResult<PaymentIntent> {
        let sql = format!(
            "UPDATE payment_intents
             SET provider_reference = $2, updated_at = NOW()
             WHERE id = $1
             RETURNING {COLUMNS}"
        );
        let row = with_default_timeout(
            sqlx::query(&sql)
                .bind(id)
                .bind(reference)
                .fetch_optional(self.pool.as_ref()),
        )
        .await
        .map_err(|e| map_unique(into_sqlx(e), reference))?;

        match row {
            Some(row) => intent_from_row(&row),
            None => Err(PaymentError::NotFound(id.to_string())),
        }
    }

    async fn finalize(
        &self,
        id: Uuid,
        status: IntentStatus,
        failure_reason: Option<String>,
        provider_payload: Option<Value>,
    ) -> PaymentResult<Transitioned<PaymentIntent>> {
        if status != IntentStatus::Pending {
            let sql = format!(
                "UPDATE payment_intents
                 SET status = $2,
                     failure_reason = $3,
                     provider_payload = COALESCE($4, provider_payload),
                     updated_at = NOW()
                 WHERE id = $1 AND status = 'pending'
                 RETURNING {COLUMNS}"
            );
            let updated = with_default_timeout(
                sqlx::query(&sql)
                    .bind(id)
                    .bind(status.as_str())
                    .bind(&failure_reason)
                    .bind(&provider_payload)
                    .fetch_optional(self.pool.as_ref()),
            )
            .await
            .map_err(into_sqlx)?;

            if let Some(row) = updated {
                return Ok(Transitioned {
                    record: intent_from_row(&row)?,
                    changed: true,
                });
            }
        }

        let current = self.get(id).await?;
        match check_transition(current.status, status) {
            TransitionCheck::Unchanged => Ok(Transitioned {
                record: current,
                changed: false,
            }),
            _ => {
                warn!(
                    "Rejected finalization of intent {} from {} to {status}",
                    current.reference(),
                    current.status
                );
                Err(PaymentError::InvalidTransition {
                    reference: current.reference().to_string(),
                    from: current.status,
                    to: status,
                })
            }
        }
    }

    async fn list_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: u32,
    ) -> PaymentResult<Vec<PaymentIntent>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM payment_intents
             WHERE status = 'pending' AND created_at < $1
             ORDER BY created_at ASC
             LIMIT $2"
        );
        let rows = with_default_timeout(
            sqlx::query(&sql)
                .bind(created_before.naive_utc())
                .bind(i64::from(limit))
                .fetch_all(self.pool.as_ref()),
        )
        .await
        .map_err(into_sqlx)?;

        rows.iter().map(intent_from_row).collect()
    }
}

fn intent_from_row(row: &PgRow) -> PaymentResult<PaymentIntent> {
    Ok(PaymentIntent {
        id: row.get("id"),
        provider: row.get("provider"),
        local_reference: row.get("local_reference"),
        provider_reference: row.get("provider_reference"),
        user_id: row.get("user_id"),
        amount: row.get("amount"),
        currency: row.get("currency"),
        status: row.get::<String, _>("status").parse()?,
        failure_reason: row.get("failure_reason"),
        transaction_id: row.get("transaction_id"),
        provider_payload: row.get("provider_payload"),
        created_at: row.get::<NaiveDateTime, _>("created_at").and_utc(),
        updated_at: row.get::<NaiveDateTime, _>("updated_at").and_utc(),
    })
}

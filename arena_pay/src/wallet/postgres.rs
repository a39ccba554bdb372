//! PostgreSQL wallet store.
#![allow(clippy::needless_raw_string_hashes)]

use async_trait::async_trait;
use log::debug;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use std::sync::Arc;
use uuid::Uuid;

use super::{Wallet, WalletError, WalletResult, WalletStore};
use crate::db::timeouts::{into_sqlx, with_default_timeout, with_transaction_timeout};
use crate::{Amount, UserId};

/// Wallet store backed by the `wallets` and `wallet_applications` tables
#[derive(Clone)]
pub struct PgWalletStore {
    pool: Arc<PgPool>,
    currency: String,
}

impl PgWalletStore {
    pub fn new(pool: Arc<PgPool>, currency: impl Into<String>) -> Self {
        Self {
            pool,
            currency: currency.into(),
        }
    }

    async fn ensure_wallet(&self, tx: &mut Transaction<'_, Postgres>, user_id: UserId) -> sqlx::Result<()> {
        sqlx::query(
            "INSERT INTO wallets (user_id, balance, currency) VALUES ($1, 0, $2)
             ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(&self.currency)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn fetch_wallet(tx: &mut Transaction<'_, Postgres>, user_id: UserId) -> sqlx::Result<Wallet> {
        let row = sqlx::query(
            r#"
            SELECT user_id, balance, currency, last_transaction_id, last_transaction_at, created_at, updated_at
            FROM wallets
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(&mut **tx)
        .await?;
        Ok(wallet_from_row(&row))
    }

    async fn apply_in_transaction(
        &self,
        user_id: UserId,
        delta: Amount,
        transaction_id: Uuid,
    ) -> WalletResult<Wallet> {
        let mut tx = with_default_timeout(self.pool.begin()).await.map_err(into_sqlx)?;
        self.ensure_wallet(&mut tx, user_id).await?;

        // The row lock taken by this UPDATE serializes concurrent deltas for one owner.
        let updated = sqlx::query(
            r#"
            UPDATE wallets
            SET balance = balance + $1,
                last_transaction_id = $3,
                last_transaction_at = NOW(),
                updated_at = NOW()
            WHERE user_id = $2 AND balance + $1 >= 0
              AND NOT EXISTS (SELECT 1 FROM wallet_applications WHERE transaction_id = $3)
            RETURNING user_id, balance, currency, last_transaction_id, last_transaction_at, created_at, updated_at
            "#,
        )
        .bind(delta)
        .bind(user_id)
        .bind(transaction_id)
        .fetch_optional(&mut *tx)
        .await?;

        let wallet = match updated {
            Some(row) => wallet_from_row(&row),
            None => {
                let current = Self::fetch_wallet(&mut tx, user_id).await?;
                let already = sqlx::query("SELECT 1 FROM wallet_applications WHERE transaction_id = $1")
                    .bind(transaction_id)
                    .fetch_optional(&mut *tx)
                    .await?;
                tx.rollback().await?;
                if already.is_some() {
                    debug!("Transaction {transaction_id} already applied to wallet {user_id}");
                    return Ok(current);
                }
                return Err(WalletError::InsufficientFunds {
                    user_id,
                    available: current.balance,
                    required: -delta,
                });
            }
        };

        sqlx::query(
            "INSERT INTO wallet_applications (transaction_id, user_id, amount, balance_after)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(transaction_id)
        .bind(user_id)
        .bind(delta)
        .bind(wallet.balance)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(wallet)
    }
}

#[async_trait]
impl WalletStore for PgWalletStore {
    fn currency(&self) -> &str {
        &self.currency
    }

    async fn get_or_create(&self, user_id: UserId) -> WalletResult<Wallet> {
        let work = async {
            let mut tx = self.pool.begin().await?;
            self.ensure_wallet(&mut tx, user_id).await?;
            let wallet = Self::fetch_wallet(&mut tx, user_id).await?;
            tx.commit().await?;
            Ok::<_, sqlx::Error>(wallet)
        };
        Ok(with_transaction_timeout(work).await.map_err(into_sqlx)?)
    }

    async fn get(&self, user_id: UserId) -> WalletResult<Option<Wallet>> {
        let row = with_default_timeout(
            sqlx::query(
                r#"
                SELECT user_id, balance, currency, last_transaction_id, last_transaction_at, created_at, updated_at
                FROM wallets
                WHERE user_id = $1
                "#,
            )
            .bind(user_id)
            .fetch_optional(self.pool.as_ref()),
        )
        .await
        .map_err(into_sqlx)?;

        Ok(row.as_ref().map(wallet_from_row))
    }

    async fn apply_delta(
        &self,
        user_id: UserId,
        delta: Amount,
        transaction_id: Uuid,
    ) -> WalletResult<Wallet> {
        if delta == 0 {
            return Err(WalletError::InvalidAmount(delta));
        }
        self.apply_in_transaction(user_id, delta, transaction_id).await
    }

    async fn has_applied(&self, user_id: UserId, transaction_id: Uuid) -> WalletResult<bool> {
        let row = with_default_timeout(
            sqlx::query("SELECT 1 FROM wallet_applications WHERE transaction_id = $1 AND user_id = $2")
                .bind(transaction_id)
                .bind(user_id)
                .fetch_optional(self.pool.as_ref()),
        )
        .await
        .map_err(into_sqlx)?;
        Ok(row.is_some())
    }
}

fn wallet_from_row(row: &PgRow) -> Wallet {
    Wallet {
        user_id: row.get("user_id"),
        balance: row.get("balance"),
        currency: row.get("currency"),
        last_transaction_id: row.get("last_transaction_id"),
        last_transaction_at: row
            .get::<Option<chrono::NaiveDateTime>, _>("last_transaction_at")
            .map(|dt| dt.and_utc()),
        created_at: row.get::<chrono::NaiveDateTime, _>("created_at").and_utc(),
        updated_at: row.get::<chrono::NaiveDateTime, _>("updated_at").and_utc(),
    }
}

//! In-memory transaction log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::warn;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    Keyed, LedgerError, LedgerResult, NewTransaction, Page, StatusScan, Transaction, TransactionLog,
    TransactionPatch, TransactionQuery, TransactionStatus, TransitionCheck, Transitioned,
    check_transition,
};
use crate::UserId;

#[derive(Default)]
struct LogInner {
    records: HashMap<Uuid, Transaction>,
    next_seq: i64,
}

impl LogInner {
    fn insert(&mut self, new: NewTransaction) -> Transaction {
        self.next_seq += 1;
        let now = Utc::now();
        let record = Transaction {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            kind: new.kind,
            amount: new.amount,
            currency: new.currency,
            status: new.status,
            reference_id: new.reference_id,
            description: new.description,
            metadata: new.metadata,
            created_at: now,
            updated_at: now,
            seq: self.next_seq,
        };
        self.records.insert(record.id, record.clone());
        record
    }
}

/// Transaction log backed by process memory
#[derive(Default)]
pub struct MemoryTransactionLog {
    inner: RwLock<LogInner>,
}

impl MemoryTransactionLog {
    pub fn new() -> Self {
        Self::default()
    }

    async fn scan_page(
        &self,
        scan: &StatusScan,
        in_window: impl Fn(&Transaction) -> bool,
    ) -> Vec<Transaction> {
        let inner = self.inner.read().await;
        let mut matching: Vec<Transaction> = inner
            .records
            .values()
            .filter(|record| scan.matches(record) && in_window(record))
            .cloned()
            .collect();
        matching.sort_by(oldest_update_first);
        matching.truncate(scan.limit as usize);
        matching
    }
}

fn newest_first(a: &Transaction, b: &Transaction) -> std::cmp::Ordering {
    b.created_at.cmp(&a.created_at).then(b.seq.cmp(&a.seq))
}

fn oldest_update_first(a: &Transaction, b: &Transaction) -> std::cmp::Ordering {
    a.updated_at.cmp(&b.updated_at).then(a.seq.cmp(&b.seq))
}

#[async_trait]
impl TransactionLog for MemoryTransactionLog {
    async fn create(&self, new: NewTransaction) -> LedgerResult<Transaction> {
        let mut inner = self.inner.write().await;
        Ok(inner.insert(new))
    }

    async fn create_keyed(&self, new: NewTransaction) -> LedgerResult<Keyed<Transaction>> {
        let mut inner = self.inner.write().await;
        if let Some(reference) = new.reference_id.as_deref().filter(|_| new.kind.is_keyed()) {
            let existing = inner.records.values().find(|record| {
                record.user_id == new.user_id
                    && record.kind.is_keyed()
                    && record.reference_id.as_deref() == Some(reference)
            });
            if let Some(existing) = existing {
                return Ok(Keyed {
                    record: existing.clone(),
                    inserted: false,
                });
            }
        }
        Ok(Keyed {
            record: inner.insert(new),
            inserted: true,
        })
    }

    async fn get(&self, id: Uuid) -> LedgerResult<Transaction> {
        self.inner
            .read()
            .await
            .records
            .get(&id)
            .cloned()
            .ok_or(LedgerError::NotFound(id))
    }

    async fn transition_to(
        &self,
        id: Uuid,
        status: TransactionStatus,
        patch: TransactionPatch,
    ) -> LedgerResult<Transitioned<Transaction>> {
        let mut inner = self.inner.write().await;
        let record = inner.records.get_mut(&id).ok_or(LedgerError::NotFound(id))?;

        match check_transition(record.status, status) {
            TransitionCheck::Apply => {
                patch.apply_to(record);
                record.status = status;
                record.updated_at = Utc::now();
                Ok(Transitioned {
                    record: record.clone(),
                    changed: true,
                })
            }
            TransitionCheck::Unchanged => Ok(Transitioned {
                record: record.clone(),
                changed: false,
            }),
            TransitionCheck::Forbidden => {
                warn!(
                    "Rejected transition of transaction {id} from {} to {status}",
                    record.status
                );
                Err(LedgerError::InvalidTransition {
                    id,
                    from: record.status,
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
        let inner = self.inner.read().await;
        let mut matching: Vec<&Transaction> = inner
            .records
            .values()
            .filter(|record| record.user_id == user_id && query.matches(record))
            .collect();
        matching.sort_by(|a, b| newest_first(a, b));

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.per_page as usize)
            .cloned()
            .collect();

        Ok(Page {
            items,
            page: query.page,
            per_page: query.per_page,
            total,
        })
    }

    async fn find_by_reference(
        &self,
        user_id: UserId,
        reference: &str,
    ) -> LedgerResult<Option<Transaction>> {
        let inner = self.inner.read().await;
        Ok(inner
            .records
            .values()
            .filter(|record| {
                record.user_id == user_id && record.reference_id.as_deref() == Some(reference)
            })
            .min_by(|a, b| newest_first(a, b))
            .cloned())
    }

    async fn list_by_status(
        &self,
        scan: &StatusScan,
        updated_before: DateTime<Utc>,
    ) -> LedgerResult<Vec<Transaction>> {
        Ok(self
            .scan_page(scan, |record| record.updated_at < updated_before)
            .await)
    }

    async fn list_updated_since(
        &self,
        scan: &StatusScan,
        updated_after: DateTime<Utc>,
    ) -> LedgerResult<Vec<Transaction>> {
        Ok(self
            .scan_page(scan, |record| record.updated_at >= updated_after)
            .await)
    }
}

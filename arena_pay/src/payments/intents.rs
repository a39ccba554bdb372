//! Payment intent store contract and its in-memory implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::warn;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{IntentStatus, NewIntent, PaymentError, PaymentIntent, PaymentResult};
use crate::ledger::{TransitionCheck, Transitioned, check_transition};

/// Storage contract for payment intents.
#[async_trait]
pub trait IntentStore: Send + Sync {
    /// Record a pending intent; fails with `DuplicateReference` if either reference is taken
    async fn create(&self, new: NewIntent) -> PaymentResult<PaymentIntent>;

    async fn get(&self, id: Uuid) -> PaymentResult<PaymentIntent>;

    /// Find an intent by its provider reference or its local reference
    async fn find_by_reference(&self, reference: &str) -> PaymentResult<Option<PaymentIntent>>;

    /// Store the provider's correlation reference on a pending intent
    async fn attach_provider_reference(
        &self,
        id: Uuid,
        reference: &str,
    ) -> PaymentResult<PaymentIntent>;

    /// Compare-and-set the intent from `pending` to a terminal status.
    ///
    /// Repeating the terminal status already held is a no-op; asking for a
    /// different terminal status is `InvalidTransition` and leaves the intent untouched.
    async fn finalize(
        &self,
        id: Uuid,
        status: IntentStatus,
        failure_reason: Option<String>,
        provider_payload: Option<Value>,
    ) -> PaymentResult<Transitioned<PaymentIntent>>;

    /// Pending intents created before `created_before`, oldest first
    async fn list_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: u32,
    ) -> PaymentResult<Vec<PaymentIntent>>;
}

#[derive(Default)]
struct IntentTable {
    rows: HashMap<Uuid, PaymentIntent>,
    by_reference: HashMap<String, Uuid>,
}

/// Intent store backed by process memory
#[derive(Default)]
pub struct MemoryIntentStore {
    table: RwLock<IntentTable>,
}

impl MemoryIntentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IntentStore for MemoryIntentStore {
    async fn create(&self, new: NewIntent) -> PaymentResult<PaymentIntent> {
        let mut table = self.table.write().await;
        let references = std::iter::once(&new.local_reference).chain(new.provider_reference.iter());
        for reference in references {
            if table.by_reference.contains_key(reference) {
                return Err(PaymentError::DuplicateReference(reference.clone()));
            }
        }

        let now = Utc::now();
        let intent = PaymentIntent {
            id: Uuid::new_v4(),
            provider: new.provider,
            local_reference: new.local_reference,
            provider_reference: new.provider_reference,
            user_id: new.user_id,
            amount: new.amount,
            currency: new.currency,
            status: IntentStatus::Pending,
            failure_reason: None,
            transaction_id: new.transaction_id,
            provider_payload: new.provider_payload,
            created_at: now,
            updated_at: now,
        };

        table
            .by_reference
            .insert(intent.local_reference.clone(), intent.id);
        if let Some(reference) = &intent.provider_reference {
            table.by_reference.insert(reference.clone(), intent.id);
        }
        table.rows.insert(intent.id, intent.clone());
        Ok(intent)
    }

    async fn get(&self, id: Uuid) -> PaymentResult<PaymentIntent> {
        self.table
            .read()
            .await
            .rows
            .get(&id)
            .cloned()
            .ok_or_else(|| PaymentError::NotFound(id.to_string()))
    }

    async fn find_by_reference(&self, reference: &str) -> PaymentResult<Option<PaymentIntent>> {
        let table = self.table.read().await;
        Ok(table
            .by_reference
            .get(reference)
            .and_then(|id| table.rows.get(id))
            .cloned())
    }

    async fn attach_provider_reference(
        &self,
        id: Uuid,
        reference: &str,
    ) -> PaymentResult<PaymentIntent> {
        let mut table = self.table.write().await;
        if let Some(owner) = table.by_reference.get(reference)
            && *owner != id
        {
            return Err(PaymentError::DuplicateReference(reference.to_string()));
        }

        let intent = table
            .rows
            .get_mut(&id)
            .ok_or_else(|| PaymentError::NotFound(id.to_string()))?;
        if let Some(previous) = intent.provider_reference.replace(reference.to_string())
            && previous != reference
        {
            warn!("Intent {id} provider reference replaced: {previous} -> {reference}");
        }
        intent.updated_at = Utc::now();
        let intent = intent.clone();
        table.by_reference.insert(reference.to_string(), id);
        Ok(intent)
    }

    async fn finalize(
        &self,
        id: Uuid,
        status: IntentStatus,
        failure_reason: Option<String>,
        provider_payload: Option<Value>,
    ) -> PaymentResult<Transitioned<PaymentIntent>> {
        let mut table = self.table.write().await;
        let intent = table
            .rows
            .get_mut(&id)
            .ok_or_else(|| PaymentError::NotFound(id.to_string()))?;

        match check_transition(intent.status, status) {
            TransitionCheck::Apply => {
                intent.status = status;
                intent.failure_reason = failure_reason;
                if let Some(payload) = provider_payload {
                    intent.provider_payload = payload;
                }
                intent.updated_at = Utc::now();
                Ok(Transitioned {
                    record: intent.clone(),
                    changed: true,
                })
            }
            TransitionCheck::Unchanged => Ok(Transitioned {
                record: intent.clone(),
                changed: false,
            }),
            TransitionCheck::Forbidden => {
                warn!(
                    "Rejected finalization of intent {} from {} to {status}",
                    intent.reference(),
                    intent.status
                );
                Err(PaymentError::InvalidTransition {
                    reference: intent.reference().to_string(),
                    from: intent.status,
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
        let table = self.table.read().await;
        let mut pending: Vec<PaymentIntent> = table
            .rows
            .values()
            .filter(|i| i.status == IntentStatus::Pending && i.created_at < created_before)
            .cloned()
            .collect();
        pending.sort_by_key(|i| i.created_at);
        pending.truncate(limit as usize);
        Ok(pending)
    }
}

/// Intent store that refuses every write, for exercising failure paths
#[cfg(test)]
pub(crate) struct UnwritableIntentStore;

#[cfg(test)]
#[async_trait]
impl IntentStore for UnwritableIntentStore {
    async fn create(&self, new: NewIntent) -> PaymentResult<PaymentIntent> {
        Err(PaymentError::DuplicateReference(new.local_reference))
    }

    async fn get(&self, id: Uuid) -> PaymentResult<PaymentIntent> {
        Err(PaymentError::NotFound(id.to_string()))
    }

    async fn find_by_reference(&self, _reference: &str) -> PaymentResult<Option<PaymentIntent>> {
        Ok(None)
    }

    async fn attach_provider_reference(
        &self,
        id: Uuid,
        _reference: &str,
    ) -> PaymentResult<PaymentIntent> {
        Err(PaymentError::NotFound(id.to_string()))
    }

    async fn finalize(
        &self,
        id: Uuid,
        _status: IntentStatus,
        _failure_reason: Option<String>,
        _provider_payload: Option<Value>,
    ) -> PaymentResult<Transitioned<PaymentIntent>> {
        Err(PaymentError::NotFound(id.to_string()))
    }

    async fn list_pending(
        &self,
        _created_before: DateTime<Utc>,
        _limit: u32,
    ) -> PaymentResult<Vec<PaymentIntent>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::new_local_reference;

    fn new_intent(local_reference: &str) -> NewIntent {
        NewIntent {
            provider: "sandbox_push".to_string(),
            local_reference: local_reference.to_string(),
            provider_reference: None,
            user_id: 1,
            amount: 1000,
            currency: "KES".to_string(),
            transaction_id: Uuid::new_v4(),
            provider_payload: Value::Null,
        }
    }

    #[tokio::test]
    async fn test_duplicate_local_reference_rejected() {
        let store = MemoryIntentStore::new();
        store.create(new_intent("loc_a")).await.unwrap();
        let err = store.create(new_intent("loc_a")).await.unwrap_err();
        assert!(matches!(err, PaymentError::DuplicateReference(r) if r == "loc_a"));
    }

    #[tokio::test]
    async fn test_lookup_by_either_reference() {
        let store = MemoryIntentStore::new();
        let local = new_local_reference();
        let intent = store.create(new_intent(&local)).await.unwrap();
        store
            .attach_provider_reference(intent.id, "ws_CO_1")
            .await
            .unwrap();

        let by_local = store.find_by_reference(&local).await.unwrap().unwrap();
        let by_provider = store.find_by_reference("ws_CO_1").await.unwrap().unwrap();
        assert_eq!(by_local.id, intent.id);
        assert_eq!(by_provider.id, intent.id);
        assert_eq!(by_provider.reference(), "ws_CO_1");
        assert!(store.find_by_reference("ws_CO_2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_provider_reference_collision() {
        let store = MemoryIntentStore::new();
        let a = store.create(new_intent("loc_a")).await.unwrap();
        let b = store.create(new_intent("loc_b")).await.unwrap();
        store.attach_provider_reference(a.id, "ws_CO_1").await.unwrap();
        let err = store
            .attach_provider_reference(b.id, "ws_CO_1")
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::DuplicateReference(_)));
    }

    #[tokio::test]
    async fn test_finalize_is_idempotent_and_guarded() {
        let store = MemoryIntentStore::new();
        let intent = store.create(new_intent("loc_a")).await.unwrap();

        let first = store
            .finalize(intent.id, IntentStatus::Completed, None, None)
            .await
            .unwrap();
        assert!(first.changed);

        let again = store
            .finalize(intent.id, IntentStatus::Completed, None, None)
            .await
            .unwrap();
        assert!(!again.changed);

        let conflict = store
            .finalize(intent.id, IntentStatus::Failed, Some("late".to_string()), None)
            .await
            .unwrap_err();
        assert!(matches!(conflict, PaymentError::InvalidTransition { .. }));
        let stored = store.get(intent.id).await.unwrap();
        assert_eq!(stored.status, IntentStatus::Completed);
        assert_eq!(stored.failure_reason, None);
    }
}

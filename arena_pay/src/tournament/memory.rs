//! In-memory tournament store.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    EscrowError, EscrowResult, Membership, NewTournament, Tournament, TournamentState,
    TournamentStore,
};
use crate::{TournamentId, UserId};

struct Entry {
    tournament: Tournament,
    members: Vec<Membership>,
}

#[derive(Default)]
struct Registry {
    entries: HashMap<TournamentId, Entry>,
    next_id: TournamentId,
}

/// Tournament store backed by process memory
#[derive(Default)]
pub struct MemoryTournamentStore {
    registry: RwLock<Registry>,
}

impl MemoryTournamentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TournamentStore for MemoryTournamentStore {
    async fn create(&self, new: NewTournament, currency: &str) -> EscrowResult<Tournament> {
        let mut registry = self.registry.write().await;
        registry.next_id += 1;
        let now = Utc::now();
        let tournament = Tournament {
            id: registry.next_id,
            name: new.name,
            entry_fee: new.entry_fee,
            currency: currency.to_string(),
            max_players: new.max_players,
            current_players: 0,
            state: TournamentState::Registration,
            starts_at: new.starts_at,
            created_at: now,
            updated_at: now,
        };
        registry.entries.insert(
            tournament.id,
            Entry {
                tournament: tournament.clone(),
                members: Vec::new(),
            },
        );
        Ok(tournament)
    }

    async fn get(&self, id: TournamentId) -> EscrowResult<Tournament> {
        self.registry
            .read()
            .await
            .entries
            .get(&id)
            .map(|entry| entry.tournament.clone())
            .ok_or(EscrowError::NotFound(id))
    }

    async fn membership(
        &self,
        tournament_id: TournamentId,
        user_id: UserId,
    ) -> EscrowResult<Option<Membership>> {
        let registry = self.registry.read().await;
        let entry = registry
            .entries
            .get(&tournament_id)
            .ok_or(EscrowError::NotFound(tournament_id))?;
        Ok(entry.members.iter().find(|m| m.user_id == user_id).cloned())
    }

    async fn members(&self, tournament_id: TournamentId) -> EscrowResult<Vec<Membership>> {
        let registry = self.registry.read().await;
        let entry = registry
            .entries
            .get(&tournament_id)
            .ok_or(EscrowError::NotFound(tournament_id))?;
        Ok(entry.members.clone())
    }

    async fn add_member(
        &self,
        tournament_id: TournamentId,
        user_id: UserId,
        entry_transaction_id: Option<Uuid>,
    ) -> EscrowResult<Membership> {
        let mut registry = self.registry.write().await;
        let entry = registry
            .entries
            .get_mut(&tournament_id)
            .ok_or(EscrowError::NotFound(tournament_id))?;

        let now = Utc::now();
        if !entry.tournament.accepts_registration(now) {
            return Err(EscrowError::NotJoinable);
        }
        if entry.members.iter().any(|m| m.user_id == user_id) {
            return Err(EscrowError::AlreadyRegistered);
        }
        if entry.tournament.is_full() {
            return Err(EscrowError::Full);
        }

        let membership = Membership {
            id: Uuid::new_v4(),
            tournament_id,
            user_id,
            entry_transaction_id,
            joined_at: now,
        };
        entry.members.push(membership.clone());
        entry.tournament.current_players += 1;
        entry.tournament.updated_at = now;
        Ok(membership)
    }

    async fn remove_member(
        &self,
        tournament_id: TournamentId,
        user_id: UserId,
    ) -> EscrowResult<Option<Membership>> {
        let mut registry = self.registry.write().await;
        let entry = registry
            .entries
            .get_mut(&tournament_id)
            .ok_or(EscrowError::NotFound(tournament_id))?;

        let Some(position) = entry.members.iter().position(|m| m.user_id == user_id) else {
            return Ok(None);
        };
        let membership = entry.members.remove(position);
        entry.tournament.current_players = entry.tournament.current_players.saturating_sub(1);
        entry.tournament.updated_at = Utc::now();
        Ok(Some(membership))
    }

    async fn set_state(
        &self,
        id: TournamentId,
        expected: TournamentState,
        next: TournamentState,
    ) -> EscrowResult<Tournament> {
        let mut registry = self.registry.write().await;
        let entry = registry
            .entries
            .get_mut(&id)
            .ok_or(EscrowError::NotFound(id))?;
        if entry.tournament.state != expected {
            return Err(EscrowError::InvalidState {
                expected,
                actual: entry.tournament.state,
            });
        }
        entry.tournament.state = next;
        entry.tournament.updated_at = Utc::now();
        Ok(entry.tournament.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_tournament(max_players: u32) -> NewTournament {
        NewTournament {
            name: "Weekend Cup".to_string(),
            entry_fee: 200,
            max_players,
            starts_at: Utc::now() + Duration::hours(2),
        }
    }

    #[tokio::test]
    async fn test_add_and_remove_member_tracks_count() {
        let store = MemoryTournamentStore::new();
        let t = store.create(new_tournament(4), "KES").await.unwrap();

        store.add_member(t.id, 1, None).await.unwrap();
        assert_eq!(store.get(t.id).await.unwrap().current_players, 1);
        assert!(matches!(
            store.add_member(t.id, 1, None).await,
            Err(EscrowError::AlreadyRegistered)
        ));

        assert!(store.remove_member(t.id, 1).await.unwrap().is_some());
        assert!(store.remove_member(t.id, 1).await.unwrap().is_none());
        assert_eq!(store.get(t.id).await.unwrap().current_players, 0);
    }

    #[tokio::test]
    async fn test_capacity_enforced() {
        let store = MemoryTournamentStore::new();
        let t = store.create(new_tournament(1), "KES").await.unwrap();
        store.add_member(t.id, 1, None).await.unwrap();
        assert!(matches!(
            store.add_member(t.id, 2, None).await,
            Err(EscrowError::Full)
        ));
    }

    #[tokio::test]
    async fn test_set_state_compare_and_set() {
        let store = MemoryTournamentStore::new();
        let t = store.create(new_tournament(2), "KES").await.unwrap();
        store
            .set_state(t.id, TournamentState::Registration, TournamentState::Running)
            .await
            .unwrap();
        let err = store
            .set_state(t.id, TournamentState::Registration, TournamentState::Running)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EscrowError::InvalidState {
                actual: TournamentState::Running,
                ..
            }
        ));
    }
}

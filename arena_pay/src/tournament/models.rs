//! Tournament data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::EscrowError;
use crate::wallet::WalletSnapshot;
use crate::{Amount, TournamentId, UserId};

/// Tournament state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TournamentState {
    /// Accepting registrations
    Registration,
    /// Tournament in progress
    Running,
    /// Tournament finished
    Completed,
    /// Tournament cancelled, entry fees refunded
    Cancelled,
}

impl TournamentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TournamentState::Registration => "registration",
            TournamentState::Running => "running",
            TournamentState::Completed => "completed",
            TournamentState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TournamentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TournamentState {
    type Err = EscrowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "registration" => Ok(TournamentState::Registration),
            "running" => Ok(TournamentState::Running),
            "completed" => Ok(TournamentState::Completed),
            "cancelled" => Ok(TournamentState::Cancelled),
            other => Err(EscrowError::Decode(format!("unknown tournament state '{other}'"))),
        }
    }
}

/// Tournament listing with capacity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tournament {
    pub id: TournamentId,
    pub name: String,
    pub entry_fee: Amount,
    pub currency: String,
    pub max_players: u32,
    pub current_players: u32,
    pub state: TournamentState,
    pub starts_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tournament {
    pub fn is_full(&self) -> bool {
        self.current_players >= self.max_players
    }

    /// Registration open and start time not reached
    pub fn accepts_registration(&self, now: DateTime<Utc>) -> bool {
        self.state == TournamentState::Registration && now < self.starts_at
    }
}

/// Input for creating a tournament
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTournament {
    pub name: String,
    pub entry_fee: Amount,
    pub max_players: u32,
    pub starts_at: DateTime<Utc>,
}

/// A user's registration in a tournament
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub id: Uuid,
    pub tournament_id: TournamentId,
    pub user_id: UserId,
    /// Entry fee transaction; `None` for free tournaments
    pub entry_transaction_id: Option<Uuid>,
    pub joined_at: DateTime<Utc>,
}

impl Membership {
    /// Idempotency token for the refund of this membership
    pub fn refund_reference(&self) -> String {
        format!("refund:{}", self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinReceipt {
    pub membership: Membership,
    pub tournament: Tournament,
    pub wallet: WalletSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveReceipt {
    pub tournament: Tournament,
    pub wallet: WalletSnapshot,
    /// Amount credited back by this call
    pub refunded: Amount,
}

/// Result of cancelling a tournament
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelReport {
    pub tournament: Tournament,
    pub refunds_issued: u32,
    pub refunds_failed: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn tournament(state: TournamentState, starts_in: Duration) -> Tournament {
        let now = Utc::now();
        Tournament {
            id: 1,
            name: "Friday Freeroll".to_string(),
            entry_fee: 200,
            currency: "KES".to_string(),
            max_players: 2,
            current_players: 1,
            state,
            starts_at: now + starts_in,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_accepts_registration() {
        let now = Utc::now();
        assert!(tournament(TournamentState::Registration, Duration::hours(1)).accepts_registration(now));
        assert!(!tournament(TournamentState::Registration, Duration::hours(-1)).accepts_registration(now));
        assert!(!tournament(TournamentState::Running, Duration::hours(1)).accepts_registration(now));
    }

    #[test]
    fn test_is_full() {
        let mut t = tournament(TournamentState::Registration, Duration::hours(1));
        assert!(!t.is_full());
        t.current_players = 2;
        assert!(t.is_full());
    }

    #[test]
    fn test_state_parse() {
        assert_eq!("running".parse::<TournamentState>().unwrap(), TournamentState::Running);
        assert!("finished".parse::<TournamentState>().is_err());
    }
}

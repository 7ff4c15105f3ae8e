// Tournament, player and wallet-session records.
//
// These mirror the backend's JSON (camelCase keys, numeric status codes) and
// carry the invariants the sync layer relies on: capacity bounds, ordered
// timing windows, and a one-way status machine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantError {
    #[error("tournament {id}: current players {current} exceed max players {max}")]
    OverCapacity { id: u64, current: u32, max: u32 },

    #[error("tournament {id}: timing windows out of order (lobby close {lobby_close}, start {start}, end {end})")]
    TimeOrder {
        id: u64,
        lobby_close: i64,
        start: i64,
        end: i64,
    },

    #[error("tournament {id}: winners present while status is {status}")]
    PrematureWinners { id: u64, status: TournamentStatus },
}

// ---------------------------------------------------------------------------
// TournamentStatus
// ---------------------------------------------------------------------------

/// Lifecycle of a tournament. Encoded on the wire as `0..=3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum TournamentStatus {
    #[default]
    Created,
    Active,
    Completed,
    Canceled,
}

impl TournamentStatus {
    /// COMPLETED and CANCELED accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Canceled)
    }

    fn stage(self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Active => 1,
            Self::Completed | Self::Canceled => 2,
        }
    }

    /// Whether a cached record in `self` may be replaced by one in `next`.
    ///
    /// Staying put is always allowed. Otherwise the status must move strictly
    /// forward along CREATED -> ACTIVE -> {COMPLETED | CANCELED}. A snapshot
    /// may skip ACTIVE when the intermediate state was never observed, which
    /// is still a forward move along the same path.
    pub fn can_advance_to(self, next: TournamentStatus) -> bool {
        if self == next {
            return true;
        }
        !self.is_terminal() && next.stage() > self.stage()
    }
}

impl TryFrom<u8> for TournamentStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Created),
            1 => Ok(Self::Active),
            2 => Ok(Self::Completed),
            3 => Ok(Self::Canceled),
            other => Err(format!("unknown tournament status code {other}")),
        }
    }
}

impl From<TournamentStatus> for u8 {
    fn from(status: TournamentStatus) -> Self {
        match status {
            TournamentStatus::Created => 0,
            TournamentStatus::Active => 1,
            TournamentStatus::Completed => 2,
            TournamentStatus::Canceled => 3,
        }
    }
}

impl std::fmt::Display for TournamentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "CREATED"),
            Self::Active => write!(f, "ACTIVE"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Canceled => write!(f, "CANCELED"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tournament
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tournament {
    pub id: u64,
    pub name: String,
    /// Smallest on-chain unit, kept as a string to avoid precision loss.
    pub entry_fee: String,
    pub max_players: u32,
    pub current_players: u32,
    pub start_time: i64,
    pub end_time: i64,
    pub lobby_close_time: i64,
    #[serde(default)]
    pub game_type: u32,
    pub status: TournamentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winners: Option<Vec<String>>,
}

impl Tournament {
    /// Check the record-level invariants.
    pub fn validate(&self) -> Result<(), InvariantError> {
        if self.current_players > self.max_players {
            return Err(InvariantError::OverCapacity {
                id: self.id,
                current: self.current_players,
                max: self.max_players,
            });
        }
        if !(self.lobby_close_time <= self.start_time && self.start_time <= self.end_time) {
            return Err(InvariantError::TimeOrder {
                id: self.id,
                lobby_close: self.lobby_close_time,
                start: self.start_time,
                end: self.end_time,
            });
        }
        let has_winners = self.winners.as_ref().is_some_and(|w| !w.is_empty());
        if has_winners && self.status != TournamentStatus::Completed {
            return Err(InvariantError::PrematureWinners {
                id: self.id,
                status: self.status,
            });
        }
        Ok(())
    }

    pub fn is_full(&self) -> bool {
        self.current_players >= self.max_players
    }

    /// Joining is allowed strictly before the lobby close time.
    pub fn is_lobby_open_at(&self, now_secs: i64) -> bool {
        now_secs < self.lobby_close_time
    }

    pub fn is_lobby_open(&self) -> bool {
        self.is_lobby_open_at(chrono::Utc::now().timestamp())
    }

    /// Whether a scoreboard should be kept live for this tournament.
    pub fn is_observable(&self) -> bool {
        matches!(
            self.status,
            TournamentStatus::Active | TournamentStatus::Completed
        )
    }

    /// Decide what replaces `self` when a newer snapshot of the same
    /// tournament arrives. Returns `None` when `self` should be kept.
    ///
    /// Terminal records are frozen except that a COMPLETED record adopts the
    /// winners list it did not yet have. The player count never decreases.
    pub fn reconcile(&self, incoming: &Tournament) -> Option<Tournament> {
        if incoming.id != self.id || incoming.validate().is_err() {
            return None;
        }
        if self.status.is_terminal() {
            if self.status == TournamentStatus::Completed
                && incoming.status == TournamentStatus::Completed
                && incoming.winners.is_some()
                && incoming.winners != self.winners
            {
                return Some(Tournament {
                    winners: incoming.winners.clone(),
                    ..self.clone()
                });
            }
            return None;
        }
        if !self.status.can_advance_to(incoming.status) {
            return None;
        }
        let mut next = incoming.clone();
        // Seats are never given back; a lagging read keeps the higher count.
        if self.current_players > next.current_players && self.current_players <= next.max_players {
            next.current_players = self.current_players;
        }
        if next == *self {
            return None;
        }
        Some(next)
    }

    /// Apply a `tournament-completed` push: status and winners only.
    pub fn with_completion(&self, update: &Tournament) -> Option<Tournament> {
        if update.id != self.id || !self.status.can_advance_to(update.status) {
            return None;
        }
        if self.status.is_terminal() {
            // Already COMPLETED: only a winners assignment may land.
            return self.reconcile(update);
        }
        let next = Tournament {
            status: update.status,
            winners: update.winners.clone(),
            ..self.clone()
        };
        next.validate().ok().map(|_| next)
    }

    /// Apply a `tournament-canceled` push: status only.
    pub fn with_cancellation(&self, update: &Tournament) -> Option<Tournament> {
        if update.id != self.id
            || self.status.is_terminal()
            || !self.status.can_advance_to(update.status)
        {
            return None;
        }
        Some(Tournament {
            status: update.status,
            ..self.clone()
        })
    }

    /// A copy with a new player count, as reported by a successful join.
    pub fn with_player_count(&self, current_players: u32, max_players: u32) -> Option<Tournament> {
        let next = Tournament {
            current_players,
            max_players,
            ..self.clone()
        };
        next.validate().ok().map(|_| next)
    }
}

// ---------------------------------------------------------------------------
// Players and scores
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub score: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
}

impl Player {
    /// Username when set, otherwise a shortened `0x1234...abcd` address.
    pub fn display_name(&self) -> String {
        match self.username.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => short_address(&self.address),
        }
    }
}

/// `0x1234...abcd` form used wherever an address is shown.
pub fn short_address(address: &str) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() <= 10 {
        return address.to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TournamentPlayers {
    #[serde(default)]
    pub players: Vec<Player>,
    #[serde(default)]
    pub last_updated: Option<String>,
}

/// Payload of the `score-updated` push event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreUpdate {
    /// Present when the backend scopes the event to a room.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tournament_id: Option<u64>,
    pub player_address: String,
    pub score: u64,
}

/// `data` of a successful `POST /api/tournaments/{id}/join`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinReceipt {
    pub tournament_id: u64,
    pub player_address: String,
    pub tx_hash: String,
    pub current_players: u32,
    pub max_players: u32,
}

// ---------------------------------------------------------------------------
// WalletSession
// ---------------------------------------------------------------------------

/// Coarse state of the wallet session, derived from [`WalletSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Disconnected,
    Connecting,
    Connected,
    Errored,
}

/// The client's relationship to the signing agent. One per process.
///
/// Invariant: `address` is set exactly when `chain_id` and `balance` are.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletSession {
    pub address: Option<String>,
    pub chain_id: Option<u64>,
    /// Native balance as an ether-denominated decimal string.
    pub balance: Option<String>,
    #[serde(default)]
    pub is_connecting: bool,
    /// Fatal reason when errored, advisory note when connected.
    pub error: Option<String>,
    /// Set once a live handshake has confirmed the address this process.
    /// Never persisted, so a restored session starts unverified.
    #[serde(skip)]
    pub verified: bool,
}

impl WalletSession {
    pub fn disconnected() -> Self {
        Self::default()
    }

    pub fn connected(
        address: String,
        chain_id: u64,
        balance: String,
        advisory: Option<String>,
    ) -> Self {
        Self {
            address: Some(address),
            chain_id: Some(chain_id),
            balance: Some(balance),
            is_connecting: false,
            error: advisory,
            verified: true,
        }
    }

    pub fn errored(reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn status(&self) -> SessionStatus {
        if self.is_connecting {
            SessionStatus::Connecting
        } else if self.address.is_some() {
            SessionStatus::Connected
        } else if self.error.is_some() {
            SessionStatus::Errored
        } else {
            SessionStatus::Disconnected
        }
    }

    /// No torn states: address, chain id and balance are all set or all unset.
    pub fn is_consistent(&self) -> bool {
        let set = [
            self.address.is_some(),
            self.chain_id.is_some(),
            self.balance.is_some(),
        ];
        set.iter().all(|s| *s) || set.iter().all(|s| !*s)
    }

    /// Address usable for actions: present and confirmed this process.
    pub fn verified_address(&self) -> Option<&str> {
        if self.verified && !self.is_connecting {
            self.address.as_deref()
        } else {
            None
        }
    }
}

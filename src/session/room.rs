//! Rooms
//!
//! A room is one group of players plus the game they play together. Rooms
//! move strictly forward through `lobby → loading → active → ended`; the
//! session manager owns every room and is the only writer.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::game::combatant::PlayerId;
use crate::game::content::CharacterId;
use super::manager::SessionError;
use super::modes::ModeState;

/// Characters a room code is drawn from (no 0/O, 1/I).
pub const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Room code length.
pub const ROOM_CODE_LEN: usize = 6;

// =============================================================================
// ROOM CODE
// =============================================================================

/// Six-character join code.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomCode(String);

impl RoomCode {
    /// Random code. Collisions are the caller's problem.
    pub fn generate() -> Self {
        // 32 symbols divide 256, so `byte % 32` stays uniform
        let entropy = uuid::Uuid::new_v4();
        let code = entropy
            .as_bytes()
            .iter()
            .take(ROOM_CODE_LEN)
            .map(|b| ROOM_CODE_ALPHABET[(*b as usize) % ROOM_CODE_ALPHABET.len()] as char)
            .collect();
        Self(code)
    }

    /// Normalize user input. Returns `None` for anything that cannot be a code.
    pub fn parse(input: &str) -> Option<Self> {
        let code = input.trim().to_ascii_uppercase();
        let valid = code.len() == ROOM_CODE_LEN && code.bytes().all(|b| ROOM_CODE_ALPHABET.contains(&b));
        valid.then_some(Self(code))
    }

    /// Borrow as str.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// GAME MODES
// =============================================================================

/// Game mode a room plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    /// Party vs generated encounter
    Pve,
    /// One player side against the other
    ArenaPvp,
    /// Party vs the Maestro, rhythm input required
    RhythmChallenge,
    /// Two teams of five
    FiveVFive,
    /// Free-for-all with a shrinking zone
    BattleRoyale,
    /// Waves until the party falls
    EndlessDungeon,
    /// Sandbox against training dummies
    Creative,
}

impl GameMode {
    /// Every mode.
    pub const ALL: [GameMode; 7] = [
        GameMode::Pve,
        GameMode::ArenaPvp,
        GameMode::RhythmChallenge,
        GameMode::FiveVFive,
        GameMode::BattleRoyale,
        GameMode::EndlessDungeon,
        GameMode::Creative,
    ];

    /// Members needed before a lobby may start.
    pub fn min_players(self) -> usize {
        match self {
            GameMode::ArenaPvp | GameMode::FiveVFive | GameMode::BattleRoyale => 2,
            _ => 1,
        }
    }

    /// Queue size that forms a match, and the most one match takes.
    pub fn queue_bounds(self) -> (usize, usize) {
        match self {
            GameMode::Pve | GameMode::RhythmChallenge | GameMode::EndlessDungeon => (2, 4),
            GameMode::ArenaPvp => (2, 2),
            GameMode::FiveVFive => (10, 10),
            GameMode::BattleRoyale => (4, 8),
            GameMode::Creative => (1, 8),
        }
    }

    /// Room capacity ceiling.
    pub fn max_players(self) -> usize {
        self.queue_bounds().1
    }

    /// Players must submit rhythm input before every action.
    pub fn rhythm_required(self) -> bool {
        self == GameMode::RhythmChallenge
    }

    /// Victory spawns another wave instead of ending.
    pub fn is_endless(self) -> bool {
        self == GameMode::EndlessDungeon
    }

    /// Both sides are players; no PvE rewards.
    pub fn is_pvp(self) -> bool {
        matches!(self, GameMode::ArenaPvp | GameMode::FiveVFive | GameMode::BattleRoyale)
    }
}

// =============================================================================
// ROOM STATE
// =============================================================================

/// Room lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomState {
    /// Gathering players
    Lobby,
    /// Countdown running
    Loading,
    /// Game running
    Active,
    /// Game over
    Ended,
}

impl RoomState {
    /// The only state this one may move to.
    pub fn next(self) -> Option<RoomState> {
        match self {
            RoomState::Lobby => Some(RoomState::Loading),
            RoomState::Loading => Some(RoomState::Active),
            RoomState::Active => Some(RoomState::Ended),
            RoomState::Ended => None,
        }
    }
}

/// Member of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomMember {
    /// Player id
    pub id: PlayerId,
    /// Display name
    pub name: String,
    /// Avatar icon
    pub icon: String,
    /// Selected character
    pub character: Option<CharacterId>,
    /// Ready flag
    pub ready: bool,
    /// Host flag (exactly one member holds it)
    pub is_host: bool,
    /// Join time
    pub joined_at: DateTime<Utc>,
    /// Join order within the room
    pub join_seq: u64,
}

/// A room.
#[derive(Debug)]
pub struct Room {
    /// Join code
    pub code: RoomCode,
    /// Mode
    pub mode: GameMode,
    /// Members by id
    pub members: BTreeMap<PlayerId, RoomMember>,
    /// Lifecycle state
    pub state: RoomState,
    /// Capacity
    pub max_players: usize,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// When the room reached `ended`
    pub ended_at: Option<DateTime<Utc>>,
    /// Running game
    pub game: Option<ModeState>,
    /// Countdown ticks left while loading
    pub countdown_remaining: u8,
    seq: u64,
}

impl Room {
    /// Empty lobby. `max_players` is clamped to what the mode allows.
    pub fn new(code: RoomCode, mode: GameMode, max_players: usize, now: DateTime<Utc>) -> Self {
        Self {
            code,
            mode,
            members: BTreeMap::new(),
            state: RoomState::Lobby,
            max_players: max_players.clamp(mode.min_players(), mode.max_players()),
            created_at: now,
            ended_at: None,
            game: None,
            countdown_remaining: 0,
            seq: 0,
        }
    }

    /// Add a member. The first member becomes host.
    pub fn add_member(
        &mut self,
        id: PlayerId,
        name: String,
        icon: String,
        now: DateTime<Utc>,
    ) -> Result<&RoomMember, SessionError> {
        if self.state != RoomState::Lobby {
            return Err(SessionError::GameInProgress(self.code.clone()));
        }
        if self.members.contains_key(&id) {
            return Err(SessionError::AlreadyInRoom);
        }
        if self.members.len() >= self.max_players {
            return Err(SessionError::RoomFull(self.code.clone()));
        }

        self.seq += 1;
        let member = RoomMember {
            id: id.clone(),
            name,
            icon,
            character: None,
            ready: false,
            is_host: self.members.is_empty(),
            joined_at: now,
            join_seq: self.seq,
        };
        Ok(self.members.entry(id).or_insert(member))
    }

    /// Remove a member. Returns the new host if the host left.
    pub fn remove_member(&mut self, id: &PlayerId) -> Option<PlayerId> {
        let removed = self.members.remove(id)?;
        if removed.is_host {
            return self.ensure_host();
        }
        None
    }

    /// Make sure exactly one member is host: the earliest joined.
    ///
    /// Returns the member promoted, if any.
    pub fn ensure_host(&mut self) -> Option<PlayerId> {
        if self.members.values().any(|m| m.is_host) {
            return None;
        }
        let next = self.members.values_mut().min_by_key(|m| m.join_seq)?;
        next.is_host = true;
        info!(room = %self.code, host = %next.id, "Host reassigned");
        Some(next.id.clone())
    }

    /// Current host.
    pub fn host(&self) -> Option<&PlayerId> {
        self.members.values().find(|m| m.is_host).map(|m| &m.id)
    }

    /// Whether `id` is host.
    pub fn is_host(&self, id: &PlayerId) -> bool {
        self.members.get(id).map_or(false, |m| m.is_host)
    }

    /// Pick a character. Two members never share one.
    pub fn select_character(&mut self, id: &PlayerId, character: CharacterId) -> Result<(), SessionError> {
        if self.state != RoomState::Lobby {
            return Err(SessionError::GameInProgress(self.code.clone()));
        }
        let taken = self.members.values().any(|m| &m.id != id && m.character == Some(character));
        if taken {
            return Err(SessionError::CharacterTaken(character));
        }
        let member = self.members.get_mut(id).ok_or(SessionError::NotInRoom)?;
        member.character = Some(character);
        Ok(())
    }

    /// Set a member's ready flag.
    pub fn set_ready(&mut self, id: &PlayerId, ready: bool) -> Result<(), SessionError> {
        if self.state != RoomState::Lobby {
            return Err(SessionError::GameInProgress(self.code.clone()));
        }
        let member = self.members.get_mut(id).ok_or(SessionError::NotInRoom)?;
        member.ready = ready;
        Ok(())
    }

    /// Every member is ready and has a character.
    pub fn all_ready(&self) -> bool {
        !self.members.is_empty() && self.members.values().all(|m| m.ready && m.character.is_some())
    }

    /// First character nobody in the room holds.
    pub fn first_free_character(&self) -> Option<CharacterId> {
        CharacterId::ALL
            .into_iter()
            .find(|c| self.members.values().all(|m| m.character != Some(*c)))
    }

    /// Members in join order.
    pub fn members_in_order(&self) -> Vec<&RoomMember> {
        let mut members: Vec<&RoomMember> = self.members.values().collect();
        members.sort_by_key(|m| m.join_seq);
        members
    }

    /// Member ids in join order.
    pub fn member_ids(&self) -> Vec<PlayerId> {
        self.members_in_order().into_iter().map(|m| m.id.clone()).collect()
    }

    /// Move to `next`. Only single forward steps are accepted.
    pub fn transition(&mut self, next: RoomState, now: DateTime<Utc>) -> Result<(), SessionError> {
        if self.state.next() != Some(next) {
            return Err(SessionError::InvalidTransition { from: self.state, to: next });
        }
        info!(room = %self.code, from = ?self.state, to = ?next, "Room state changed");
        self.state = next;
        if next == RoomState::Ended {
            self.ended_at = Some(now);
        }
        Ok(())
    }

    /// Empty, or ended for longer than `ttl`.
    pub fn is_stale(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        if self.members.is_empty() {
            return true;
        }
        match (self.state, self.ended_at) {
            (RoomState::Ended, Some(ended)) => now - ended > ttl,
            _ => false,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

//! Session Manager
//!
//! Owns every room, the player → room index, player profiles and the
//! matchmaking queues. All mutation goes through `&mut self`; the server
//! serializes calls behind one lock, so nothing in here needs its own.
//!
//! Outgoing messages go through the [`Transport`] boundary. Timers are
//! requested, never spawned: see [`TimerCommand`].
//!
//! Error policy: every rejected client intent produces exactly one `error`
//! message to the caller. Timer-driven paths never report, they only log.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::hash::short_hex;
use crate::game::ai::ActionTarget;
use crate::game::battle::{ActionError, BattleOutcome, BattleState};
use crate::game::combatant::{CombatantId, PlayerId, Side};
use crate::game::content::CharacterId;
use crate::game::events::{BattleEvent, BattleEventData};
use crate::game::rewards::{CombatantStats, Rewards};
use crate::game::rhythm::RhythmResult;
use crate::game::royale::RoyaleError;
use crate::game::skill::{SkillId, TargetKind};
use crate::network::protocol::{ClientMessage, ErrorCode, GameView, PartyView, ServerMessage};
use crate::network::transport::Transport;
use super::matchmaker::{Matchmaker, QueueOutcome};
use super::modes::{self, MobaState, ModeState, Participant};
use super::room::{GameMode, Room, RoomCode, RoomState};
use super::timers::{CountdownStep, TimerCommand};

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Session-layer settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Countdown length in 1 Hz ticks
    pub countdown_ticks: u8,
    /// How long an ended room lingers before the sweep removes it
    pub ended_room_ttl: chrono::Duration,
    /// Capacity when `create_party` names none
    pub default_max_players: usize,
    /// Chat message cap, in characters
    pub chat_max_len: usize,
    /// Grace period between `match_found` and the matched room starting
    pub match_launch_delay: std::time::Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            countdown_ticks: 3,
            ended_room_ttl: chrono::Duration::minutes(5),
            default_max_players: 4,
            chat_max_len: 200,
            match_launch_delay: std::time::Duration::from_secs(2),
        }
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Rejected session request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// No room with that code
    #[error("room {0} not found")]
    RoomNotFound(String),

    /// Room at capacity
    #[error("room {0} is full")]
    RoomFull(RoomCode),

    /// Room left the lobby
    #[error("room {0} already started")]
    GameInProgress(RoomCode),

    /// Another member holds the character
    #[error("character {0:?} is already taken")]
    CharacterTaken(CharacterId),

    /// Someone is not ready or has no character
    #[error("not every member is ready")]
    NotAllReady,

    /// Host-only request
    #[error("only the host can do that")]
    NotHost,

    /// Player has no room
    #[error("not in a room")]
    NotInRoom,

    /// Player already has a room
    #[error("already in a room")]
    AlreadyInRoom,

    /// Too few members for the mode
    #[error("need {need} players, have {have}")]
    NotEnoughPlayers {
        /// Mode minimum
        need: usize,
        /// Members present
        have: usize,
    },

    /// Acting out of turn
    #[error("not your turn")]
    NotYourTurn,

    /// Rejected by the game
    #[error("invalid action: {0}")]
    InvalidAction(String),

    /// Unparseable message
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Room state machine refused a step
    #[error("cannot move room from {from:?} to {to:?}")]
    InvalidTransition {
        /// Current state
        from: RoomState,
        /// Requested state
        to: RoomState,
    },
}

impl SessionError {
    /// Wire code.
    pub fn code(&self) -> ErrorCode {
        match self {
            SessionError::RoomNotFound(_) => ErrorCode::RoomNotFound,
            SessionError::RoomFull(_) => ErrorCode::RoomFull,
            SessionError::GameInProgress(_) => ErrorCode::GameInProgress,
            SessionError::CharacterTaken(_) => ErrorCode::CharacterTaken,
            SessionError::NotAllReady => ErrorCode::NotAllReady,
            SessionError::NotHost => ErrorCode::NotHost,
            SessionError::NotInRoom => ErrorCode::NotInRoom,
            SessionError::AlreadyInRoom => ErrorCode::AlreadyInRoom,
            SessionError::NotEnoughPlayers { .. } => ErrorCode::NotEnoughPlayers,
            SessionError::NotYourTurn => ErrorCode::NotYourTurn,
            SessionError::InvalidAction(_) | SessionError::InvalidTransition { .. } => ErrorCode::InvalidAction,
            SessionError::InvalidMessage(_) => ErrorCode::InvalidMessage,
        }
    }

    /// The `error` message for the caller.
    pub fn to_message(&self) -> ServerMessage {
        ServerMessage::error(self.code(), self.to_string())
    }
}

impl From<ActionError> for SessionError {
    fn from(err: ActionError) -> Self {
        match err {
            ActionError::NotYourTurn => SessionError::NotYourTurn,
            other => SessionError::InvalidAction(other.to_string()),
        }
    }
}

impl From<RoyaleError> for SessionError {
    fn from(err: RoyaleError) -> Self {
        SessionError::InvalidAction(err.to_string())
    }
}

// =============================================================================
// SESSION MANAGER
// =============================================================================

/// Display details registered on connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerProfile {
    /// Display name
    pub name: String,
    /// Avatar icon
    pub icon: String,
}

/// Room registry and lobby lifecycle.
pub struct SessionManager {
    config: SessionConfig,
    rooms: BTreeMap<RoomCode, Room>,
    player_rooms: BTreeMap<PlayerId, RoomCode>,
    profiles: BTreeMap<PlayerId, PlayerProfile>,
    matchmaker: Matchmaker,
    transport: Arc<dyn Transport>,
    timers: Vec<TimerCommand>,
}

impl SessionManager {
    /// Empty registry sending through `transport`.
    pub fn new(config: SessionConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            rooms: BTreeMap::new(),
            player_rooms: BTreeMap::new(),
            profiles: BTreeMap::new(),
            matchmaker: Matchmaker::new(),
            transport,
            timers: Vec::new(),
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Settings.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Room by code.
    pub fn room(&self, code: &RoomCode) -> Option<&Room> {
        self.rooms.get(code)
    }

    /// Room a player is in.
    pub fn room_of(&self, player: &PlayerId) -> Option<&RoomCode> {
        self.player_rooms.get(player)
    }

    /// Live rooms.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Matchmaking queues.
    pub fn matchmaker(&self) -> &Matchmaker {
        &self.matchmaker
    }

    /// Drain timer requests queued since the last call.
    pub fn take_timer_commands(&mut self) -> Vec<TimerCommand> {
        std::mem::take(&mut self.timers)
    }

    // -------------------------------------------------------------------------
    // Connections
    // -------------------------------------------------------------------------

    /// Register (or update) a player's display details.
    pub fn register_player(&mut self, player: PlayerId, name: impl Into<String>, icon: impl Into<String>) {
        let profile = PlayerProfile { name: name.into(), icon: icon.into() };
        debug!(player = %player, name = %profile.name, "Player registered");
        self.profiles.insert(player, profile);
    }

    /// Player went away: leave queues and room, forget the profile.
    pub fn disconnect(&mut self, player: &PlayerId) {
        self.matchmaker.dequeue(player);
        if self.player_rooms.contains_key(player) {
            self.remove_player(player);
        }
        self.profiles.remove(player);
        info!(player = %player, "Player disconnected");
    }

    fn profile(&self, player: &PlayerId) -> PlayerProfile {
        self.profiles.get(player).cloned().unwrap_or_else(|| PlayerProfile {
            name: player.to_string(),
            icon: String::new(),
        })
    }

    // -------------------------------------------------------------------------
    // Client intents
    // -------------------------------------------------------------------------

    /// Apply one client message. A rejection is sent back to the caller as
    /// a single `error` message and also returned.
    pub fn handle(&mut self, player: &PlayerId, message: ClientMessage) -> Result<(), SessionError> {
        let result = self.dispatch(player, message);
        if let Err(err) = &result {
            debug!(player = %player, code = ?err.code(), error = %err, "Request rejected");
            self.transport.send_to_player(player, err.to_message());
        }
        result
    }

    /// Report a message that failed to parse.
    pub fn reject_malformed(&mut self, player: &PlayerId, reason: &str) {
        let err = SessionError::InvalidMessage(reason.to_string());
        debug!(player = %player, error = %err, "Malformed message");
        self.transport.send_to_player(player, err.to_message());
    }

    fn dispatch(&mut self, player: &PlayerId, message: ClientMessage) -> Result<(), SessionError> {
        match message {
            ClientMessage::CreateParty { mode, max_size } => self.create_room(player, mode, max_size).map(|_| ()),
            ClientMessage::JoinParty { code } => self.join_room(player, &code).map(|_| ()),
            ClientMessage::LeaveParty => self.leave_room(player),
            ClientMessage::SelectCharacter { character_id } => self.select_character(player, character_id),
            ClientMessage::SetReady { ready } => self.set_ready(player, ready),
            ClientMessage::StartGame => self.start_game(player),
            ClientMessage::SelectAction { skill_id, target_id } => self.select_action(player, skill_id, target_id),
            ClientMessage::RhythmResult { result } => self.submit_rhythm(player, &result),
            ClientMessage::Queue { mode } => self.enqueue(player, mode),
            ClientMessage::Dequeue => {
                self.matchmaker.dequeue(player);
                Ok(())
            }
            ClientMessage::Emote { emote_id } => self.emote(player, emote_id),
            ClientMessage::Chat { message } => self.chat(player, &message),
        }
    }

    /// Open a room with `player` as host.
    pub fn create_room(
        &mut self,
        player: &PlayerId,
        mode: GameMode,
        max_players: Option<usize>,
    ) -> Result<RoomCode, SessionError> {
        self.ensure_roomless(player)?;
        self.matchmaker.dequeue(player);

        let now = Utc::now();
        let code = self.fresh_code();
        let capacity = max_players.unwrap_or(self.config.default_max_players);
        let mut room = Room::new(code.clone(), mode, capacity, now);
        let profile = self.profile(player);
        room.add_member(player.clone(), profile.name, profile.icon, now)?;

        info!(room = %code, mode = ?mode, host = %player, max_players = room.max_players, "Room created");
        self.rooms.insert(code.clone(), room);
        self.player_rooms.insert(player.clone(), code.clone());
        self.publish_party(&code);
        Ok(code)
    }

    /// Join a room by code.
    pub fn join_room(&mut self, player: &PlayerId, code: &str) -> Result<RoomCode, SessionError> {
        self.ensure_roomless(player)?;
        let code = RoomCode::parse(code).ok_or_else(|| SessionError::RoomNotFound(code.to_string()))?;
        let profile = self.profile(player);
        let room = self
            .rooms
            .get_mut(&code)
            .ok_or_else(|| SessionError::RoomNotFound(code.to_string()))?;
        room.add_member(player.clone(), profile.name, profile.icon, Utc::now())?;

        self.matchmaker.dequeue(player);
        self.player_rooms.insert(player.clone(), code.clone());
        info!(room = %code, player = %player, "Player joined room");
        self.publish_party(&code);
        Ok(code)
    }

    /// Leave the current room.
    pub fn leave_room(&mut self, player: &PlayerId) -> Result<(), SessionError> {
        if !self.player_rooms.contains_key(player) {
            return Err(SessionError::NotInRoom);
        }
        self.remove_player(player);
        Ok(())
    }

    /// Pick a character in the lobby.
    pub fn select_character(&mut self, player: &PlayerId, character: CharacterId) -> Result<(), SessionError> {
        let code = self.current_room(player)?;
        let room = self.room_mut(&code)?;
        room.select_character(player, character)?;
        self.publish_party(&code);
        Ok(())
    }

    /// Set the ready flag.
    pub fn set_ready(&mut self, player: &PlayerId, ready: bool) -> Result<(), SessionError> {
        let code = self.current_room(player)?;
        let room = self.room_mut(&code)?;
        room.set_ready(player, ready)?;
        self.publish_party(&code);
        Ok(())
    }

    /// Host starts the countdown.
    pub fn start_game(&mut self, player: &PlayerId) -> Result<(), SessionError> {
        let code = self.current_room(player)?;
        let countdown = self.config.countdown_ticks;
        let room = self.room_mut(&code)?;
        if !room.is_host(player) {
            return Err(SessionError::NotHost);
        }
        if room.state != RoomState::Lobby {
            return Err(SessionError::GameInProgress(code));
        }
        let need = room.mode.min_players();
        if room.members.len() < need {
            return Err(SessionError::NotEnoughPlayers { need, have: room.members.len() });
        }
        if !room.all_ready() {
            return Err(SessionError::NotAllReady);
        }

        room.transition(RoomState::Loading, Utc::now())?;
        room.countdown_remaining = countdown;
        info!(room = %code, mode = ?room.mode, players = room.members.len(), "Countdown started");

        self.broadcast(&code, ServerMessage::GameStarting { countdown });
        self.publish_party(&code);
        self.timers.push(TimerCommand::StartCountdown(code));
        Ok(())
    }

    /// Act on the current turn, or strike in battle royale.
    pub fn select_action(
        &mut self,
        player: &PlayerId,
        skill: SkillId,
        target: Option<CombatantId>,
    ) -> Result<(), SessionError> {
        let code = self.current_room(player)?;
        let game = self.active_game(&code)?;
        match game {
            ModeState::Battle(battle) | ModeState::Moba(MobaState { battle, .. }) => {
                battle.process_player_action(player, skill, action_target(skill, target))?;
            }
            ModeState::Royale(royale) => {
                let target = target.ok_or_else(|| SessionError::InvalidAction("strike needs a target".into()))?;
                royale.strike(player, target, skill)?;
            }
        }
        self.flush_game(&code);
        Ok(())
    }

    /// Submit the hit tally for the open rhythm prompt.
    pub fn submit_rhythm(&mut self, player: &PlayerId, result: &RhythmResult) -> Result<(), SessionError> {
        let code = self.current_room(player)?;
        let game = self.active_game(&code)?;
        let battle = game
            .battle_mut()
            .ok_or_else(|| SessionError::InvalidAction("no rhythm phase in this mode".into()))?;
        let judgement = battle.submit_rhythm(player, result)?;
        debug!(room = %code, player = %player, ?judgement, "Rhythm judged");
        self.flush_game(&code);
        Ok(())
    }

    /// Join a matchmaking queue.
    pub fn enqueue(&mut self, player: &PlayerId, mode: GameMode) -> Result<(), SessionError> {
        self.ensure_roomless(player)?;
        match self.matchmaker.enqueue(player.clone(), mode, Utc::now()) {
            QueueOutcome::Waiting(status) => {
                self.transport.send_to_player(
                    player,
                    ServerMessage::QueueStatus {
                        position: status.position,
                        estimated_wait: status.estimated_wait,
                        mode: status.mode,
                    },
                );
                Ok(())
            }
            QueueOutcome::Matched(players) => {
                self.form_match(mode, players);
                Ok(())
            }
        }
    }

    /// Show an emote to the room.
    pub fn emote(&mut self, player: &PlayerId, emote_id: String) -> Result<(), SessionError> {
        let code = self.current_room(player)?;
        self.broadcast(&code, ServerMessage::PlayerEmote { player_id: player.clone(), emote_id });
        Ok(())
    }

    /// Room chat. Trimmed and capped; empty messages are dropped.
    pub fn chat(&mut self, player: &PlayerId, message: &str) -> Result<(), SessionError> {
        let code = self.current_room(player)?;
        let trimmed = message.trim();
        if trimmed.is_empty() {
            return Ok(());
        }
        let message: String = trimmed.chars().take(self.config.chat_max_len).collect();
        let player_name = self
            .rooms
            .get(&code)
            .and_then(|r| r.members.get(player))
            .map(|m| m.name.clone())
            .unwrap_or_else(|| self.profile(player).name);
        self.broadcast(&code, ServerMessage::ChatMessage { player_id: player.clone(), player_name, message });
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Timer entry points
    // -------------------------------------------------------------------------

    /// One countdown second. Launches the game on the last tick.
    pub fn countdown_tick(&mut self, code: &RoomCode) -> CountdownStep {
        let Some(room) = self.rooms.get_mut(code) else {
            return CountdownStep::Aborted;
        };
        if room.state != RoomState::Loading {
            debug!(room = %code, state = ?room.state, "Countdown tick ignored");
            return CountdownStep::Aborted;
        }

        room.countdown_remaining = room.countdown_remaining.saturating_sub(1);
        let remaining = room.countdown_remaining;
        debug!(room = %code, remaining, "Countdown tick");
        if remaining > 0 {
            self.broadcast(code, ServerMessage::GameStarting { countdown: remaining });
            return CountdownStep::Tick(remaining);
        }

        if self.launch(code) {
            CountdownStep::Launched
        } else {
            CountdownStep::Aborted
        }
    }

    /// Start a matched room: fill in missing characters, ready everyone,
    /// and run the host's start.
    pub fn launch_matched(&mut self, code: &RoomCode) -> bool {
        let Some(room) = self.rooms.get_mut(code) else {
            return false;
        };
        if room.state != RoomState::Lobby {
            return false;
        }

        for id in room.member_ids() {
            let missing = room.members.get(&id).map_or(false, |m| m.character.is_none());
            if missing {
                if let Some(character) = room.first_free_character() {
                    if let Err(err) = room.select_character(&id, character) {
                        debug!(room = %code, player = %id, error = %err, "Auto-pick failed");
                    }
                }
            }
            if let Err(err) = room.set_ready(&id, true) {
                debug!(room = %code, player = %id, error = %err, "Auto-ready failed");
            }
        }

        let Some(host) = room.host().cloned() else {
            return false;
        };
        match self.start_game(&host) {
            Ok(()) => true,
            Err(err) => {
                debug!(room = %code, error = %err, "Matched room could not start");
                false
            }
        }
    }

    /// One battle-timer tick: drive a non-player turn or advance the royale.
    ///
    /// Returns false once the room no longer needs the timer.
    pub fn battle_tick(&mut self, code: &RoomCode) -> bool {
        let Some(room) = self.rooms.get_mut(code) else {
            return false;
        };
        if room.state != RoomState::Active {
            return false;
        }
        let Some(game) = room.game.as_mut() else {
            return false;
        };

        let changed = match game {
            ModeState::Battle(battle) | ModeState::Moba(MobaState { battle, .. }) => battle.auto_step(),
            ModeState::Royale(royale) => {
                royale.tick();
                true
            }
        };
        if changed {
            self.flush_game(code);
        }
        self.rooms.get(code).map_or(false, |r| r.state == RoomState::Active)
    }

    /// Destroy rooms that are empty or ended longer than the TTL.
    pub fn sweep_stale_rooms(&mut self, now: DateTime<Utc>) -> usize {
        let ttl = self.config.ended_room_ttl;
        let stale: Vec<RoomCode> = self
            .rooms
            .values()
            .filter(|r| r.is_stale(now, ttl))
            .map(|r| r.code.clone())
            .collect();
        for code in &stale {
            self.destroy_room(code);
        }
        if !stale.is_empty() {
            info!(removed = stale.len(), remaining = self.rooms.len(), "Stale rooms swept");
        }
        stale.len()
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn current_room(&self, player: &PlayerId) -> Result<RoomCode, SessionError> {
        self.player_rooms.get(player).cloned().ok_or(SessionError::NotInRoom)
    }

    fn room_mut(&mut self, code: &RoomCode) -> Result<&mut Room, SessionError> {
        self.rooms.get_mut(code).ok_or_else(|| SessionError::RoomNotFound(code.to_string()))
    }

    fn active_game(&mut self, code: &RoomCode) -> Result<&mut ModeState, SessionError> {
        let room = self.room_mut(code)?;
        if room.state != RoomState::Active {
            return Err(SessionError::InvalidAction("no game running".into()));
        }
        room.game.as_mut().ok_or_else(|| SessionError::InvalidAction("no game running".into()))
    }

    /// Fails if the player is in a room that is still going. A finished
    /// room is left silently.
    fn ensure_roomless(&mut self, player: &PlayerId) -> Result<(), SessionError> {
        let Some(code) = self.player_rooms.get(player) else {
            return Ok(());
        };
        let ended = self.rooms.get(code).map_or(true, |r| r.state == RoomState::Ended);
        if !ended {
            return Err(SessionError::AlreadyInRoom);
        }
        self.remove_player(player);
        Ok(())
    }

    fn fresh_code(&self) -> RoomCode {
        loop {
            let code = RoomCode::generate();
            if !self.rooms.contains_key(&code) {
                return code;
            }
        }
    }

    /// Take a player out of their room. Destroys the room if it empties;
    /// otherwise the battle keeps going with the player on autopilot.
    fn remove_player(&mut self, player: &PlayerId) {
        let Some(code) = self.player_rooms.remove(player) else {
            return;
        };
        let Some(room) = self.rooms.get_mut(&code) else {
            return;
        };

        let new_host = room.remove_member(player);
        info!(room = %code, player = %player, remaining = room.members.len(), "Player left room");
        if room.members.is_empty() {
            self.destroy_room(&code);
            return;
        }
        if let Some(host) = new_host {
            debug!(room = %code, host = %host, "Host handed over");
        }

        let autopiloted = room
            .game
            .as_mut()
            .and_then(ModeState::battle_mut)
            .map_or(false, |battle| battle.set_autopilot(player));
        self.publish_party(&code);
        if autopiloted {
            self.flush_game(&code);
        }
    }

    fn form_match(&mut self, mode: GameMode, players: Vec<PlayerId>) {
        let Some(host) = players.first().cloned() else {
            return;
        };
        let code = match self.create_room(&host, mode, Some(players.len())) {
            Ok(code) => code,
            Err(err) => {
                warn!(mode = ?mode, host = %host, error = %err, "Could not open matched room");
                return;
            }
        };
        for player in players.iter().skip(1) {
            if let Err(err) = self.join_room(player, code.as_str()) {
                warn!(room = %code, player = %player, error = %err, "Matched player could not join");
            }
        }

        let members = self.rooms.get(&code).map(Room::member_ids).unwrap_or_default();
        for player in &members {
            self.transport.send_to_player(
                player,
                ServerMessage::MatchFound { room_id: code.clone(), mode, players: members.clone() },
            );
        }
        info!(room = %code, mode = ?mode, players = members.len(), "Matched room opened");
        self.timers.push(TimerCommand::ScheduleLaunch(code));
    }

    /// Countdown reached zero: build the mode's game and go active.
    fn launch(&mut self, code: &RoomCode) -> bool {
        let Some(room) = self.rooms.get_mut(code) else {
            return false;
        };
        let participants: Vec<Participant> = room
            .members_in_order()
            .into_iter()
            .filter_map(|m| {
                m.character.map(|character| Participant { player: m.id.clone(), name: m.name.clone(), character })
            })
            .collect();

        let nonce = uuid::Uuid::new_v4().into_bytes();
        let seed = modes::battle_seed(code, &nonce, &participants);
        let game = modes::initialize(room.mode, seed, &participants);
        if let Err(err) = room.transition(RoomState::Active, Utc::now()) {
            warn!(room = %code, error = %err, "Launch refused");
            return false;
        }
        room.game = Some(game);
        info!(room = %code, mode = ?room.mode, players = participants.len(), "Game launched");

        self.timers.push(TimerCommand::StartBattle(code.clone()));
        self.publish_party(code);
        self.flush_game(code);
        true
    }

    /// Push fresh events and a snapshot to the room, then handle the end of
    /// the game (or the next endless wave).
    fn flush_game(&mut self, code: &RoomCode) {
        let Some(room) = self.rooms.get_mut(code) else {
            return;
        };
        let transport = self.transport.as_ref();
        let recipients = room.member_ids();
        let endless = room.mode.is_endless();
        let Some(game) = room.game.as_mut() else {
            return;
        };

        loop {
            match game {
                ModeState::Battle(battle) => {
                    let events = battle.take_events();
                    publish_battle_events(transport, code, &recipients, battle, &events);
                }
                ModeState::Moba(moba) => {
                    let events = moba.battle.take_events();
                    moba.record(&events);
                    publish_battle_events(transport, code, &recipients, &moba.battle, &events);
                }
                ModeState::Royale(royale) => {
                    for event in royale.take_events() {
                        if let Some(message) = ServerMessage::from_royale_event(&event) {
                            transport.broadcast(code, &recipients, message);
                        }
                    }
                }
            }
            transport.broadcast(code, &recipients, ServerMessage::BattleState { state: GameView::from(&*game) });

            match game {
                ModeState::Battle(battle) if endless && battle.outcome() == Some(BattleOutcome::Victory) => {
                    let enemies = modes::next_wave_enemies(battle);
                    battle.next_wave(enemies);
                }
                _ => break,
            }
        }

        if game.is_finished() {
            self.end_game(code);
        }
    }

    /// Send every member their result, close the room and stop its timer.
    fn end_game(&mut self, code: &RoomCode) {
        let Some(room) = self.rooms.get_mut(code) else {
            return;
        };
        let Some(mut game) = room.game.take() else {
            return;
        };
        let mode = room.mode;
        let players = room.member_ids();

        let results: Vec<(PlayerId, ServerMessage)> = match &mut game {
            ModeState::Battle(battle) | ModeState::Moba(MobaState { battle, .. }) => {
                let outcome = battle.outcome().unwrap_or(BattleOutcome::Draw);
                let rewards = if mode.is_pvp() { Rewards::default() } else { battle.roll_rewards(mode.is_endless()) };
                players
                    .iter()
                    .map(|p| {
                        let side = battle.controlled_by(p).next().map_or(Side::Party, |c| c.side);
                        let message = ServerMessage::BattleEnd {
                            result: outcome.for_side(side),
                            rewards: rewards.clone(),
                            stats: battle.player_stats(p),
                        };
                        (p.clone(), message)
                    })
                    .collect()
            }
            ModeState::Royale(royale) => {
                let winner = royale.winner().cloned();
                players
                    .iter()
                    .map(|p| {
                        let result = match &winner {
                            Some(w) if w == p => BattleOutcome::Victory,
                            Some(_) => BattleOutcome::Defeat,
                            None => BattleOutcome::Draw,
                        };
                        let kills = royale.entrants.get(p).map_or(0, |e| e.kills);
                        let stats = CombatantStats { knockouts: kills, ..Default::default() };
                        (p.clone(), ServerMessage::BattleEnd { result, rewards: Rewards::default(), stats })
                    })
                    .collect()
            }
        };

        info!(
            room = %code,
            mode = ?mode,
            outcome = ?game.outcome(),
            hash = %short_hex(&game.compute_hash()),
            "Game over"
        );
        for (player, message) in results {
            self.transport.send_to_player(&player, message);
        }
        if let Err(err) = room.transition(RoomState::Ended, Utc::now()) {
            warn!(room = %code, error = %err, "Could not close room");
        }
        self.timers.push(TimerCommand::StopBattle(code.clone()));
        self.publish_party(code);
    }

    /// Remove a room and everything pointing at it.
    fn destroy_room(&mut self, code: &RoomCode) {
        let Some(room) = self.rooms.remove(code) else {
            return;
        };
        for player in room.members.keys() {
            if self.player_rooms.get(player) == Some(code) {
                self.player_rooms.remove(player);
            }
        }
        self.timers.push(TimerCommand::Cancel(code.clone()));
        self.transport.on_session_end(code);
        info!(room = %code, state = ?room.state, "Room destroyed");
    }

    fn broadcast(&self, code: &RoomCode, message: ServerMessage) {
        if let Some(room) = self.rooms.get(code) {
            self.transport.broadcast(code, &room.member_ids(), message);
        }
    }

    fn publish_party(&self, code: &RoomCode) {
        if let Some(room) = self.rooms.get(code) {
            self.broadcast(code, ServerMessage::PartyUpdated { party: PartyView::from(room) });
        }
    }
}

/// Default target when the client sends none.
fn action_target(skill: SkillId, target: Option<CombatantId>) -> ActionTarget {
    match (target, skill.definition().target) {
        (Some(id), _) => ActionTarget::Single(id),
        (None, TargetKind::SelfOnly | TargetKind::SingleAlly) => ActionTarget::SelfTarget,
        (None, _) => ActionTarget::All,
    }
}

fn publish_battle_events(
    transport: &dyn Transport,
    code: &RoomCode,
    recipients: &[PlayerId],
    battle: &BattleState,
    events: &[BattleEvent],
) {
    for event in events {
        if let BattleEventData::RhythmPrompt { player, skill, sequence, .. } = &event.data {
            transport.send_to_player(
                player,
                ServerMessage::RhythmStart { sequence: sequence.clone(), skill_id: *skill },
            );
            continue;
        }
        if let Some(message) = ServerMessage::from_battle_event(battle, event) {
            transport.broadcast(code, recipients, message);
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::battle::BattleSetup;
    use crate::game::combatant::tests::dummy;
    use crate::game::combatant::Controller;
    use crate::game::content::Environment;
    use crate::network::transport::MemoryTransport;

    fn setup() -> (SessionManager, Arc<MemoryTransport>) {
        let transport = Arc::new(MemoryTransport::new());
        let manager = SessionManager::new(SessionConfig::default(), transport.clone());
        (manager, transport)
    }

    fn pid(s: &str) -> PlayerId {
        PlayerId::new(s)
    }

    fn errors(transport: &MemoryTransport, player: &PlayerId) -> Vec<ErrorCode> {
        transport
            .messages_for(player)
            .into_iter()
            .filter_map(|m| match m {
                ServerMessage::Error { code, .. } => Some(code),
                _ => None,
            })
            .collect()
    }

    fn ready_up(manager: &mut SessionManager, player: &PlayerId, character: CharacterId) {
        manager.handle(player, ClientMessage::SelectCharacter { character_id: character }).unwrap();
        manager.handle(player, ClientMessage::SetReady { ready: true }).unwrap();
    }

    /// Single-player room, counted down and launched.
    fn launched(manager: &mut SessionManager, player: &PlayerId, mode: GameMode) -> RoomCode {
        let code = manager.create_room(player, mode, None).unwrap();
        ready_up(manager, player, CharacterId::Ember);
        manager.start_game(player).unwrap();
        for _ in 0..3 {
            manager.countdown_tick(&code);
        }
        code
    }

    fn launched_creative(manager: &mut SessionManager, player: &PlayerId) -> RoomCode {
        launched(manager, player, GameMode::Creative)
    }

    /// One-shot hero against a single training dummy.
    fn quick_win(player: &PlayerId) -> BattleState {
        let mut hero = dummy(1, Side::Party, None);
        hero.controller = Controller::Player(player.clone());
        hero.stats.atk = 5000;
        hero.stats.speed = 200;
        BattleState::new(BattleSetup {
            seed: 1,
            party: vec![hero],
            enemies: vec![dummy(101, Side::Enemies, None)],
            environment: Environment::Arena,
            is_boss_encounter: false,
            rhythm_required: false,
        })
    }

    #[test]
    fn test_room_full_error_to_caller_only() {
        let (mut manager, transport) = setup();
        let code = manager.create_room(&pid("host"), GameMode::Pve, Some(4)).unwrap();
        for p in ["b", "c", "d"] {
            manager.handle(&pid(p), ClientMessage::JoinParty { code: code.to_string() }).unwrap();
        }

        let result = manager.handle(&pid("e"), ClientMessage::JoinParty { code: code.to_string() });
        assert!(matches!(result, Err(SessionError::RoomFull(_))));
        assert_eq!(errors(&transport, &pid("e")), vec![ErrorCode::RoomFull]);
        assert!(errors(&transport, &pid("host")).is_empty());
        assert_eq!(manager.room(&code).unwrap().members.len(), 4);
    }

    #[test]
    fn test_join_errors() {
        let (mut manager, transport) = setup();
        let code = manager.create_room(&pid("host"), GameMode::Pve, None).unwrap();

        let _ = manager.handle(&pid("x"), ClientMessage::JoinParty { code: "ZZZZZZ".into() });
        let _ = manager.handle(&pid("x"), ClientMessage::JoinParty { code: "bad".into() });
        assert_eq!(errors(&transport, &pid("x")), vec![ErrorCode::RoomNotFound, ErrorCode::RoomNotFound]);

        let _ = manager.handle(&pid("host"), ClientMessage::JoinParty { code: code.to_string() });
        assert_eq!(errors(&transport, &pid("host")), vec![ErrorCode::AlreadyInRoom]);

        // Codes are case-insensitive
        manager.handle(&pid("y"), ClientMessage::JoinParty { code: code.as_str().to_lowercase() }).unwrap();
    }

    #[test]
    fn test_start_requires_everyone_ready() {
        let (mut manager, transport) = setup();
        let code = manager.create_room(&pid("host"), GameMode::Pve, None).unwrap();
        manager.join_room(&pid("b"), code.as_str()).unwrap();
        ready_up(&mut manager, &pid("host"), CharacterId::Ember);

        let result = manager.handle(&pid("host"), ClientMessage::StartGame);
        assert_eq!(result, Err(SessionError::NotAllReady));
        assert_eq!(errors(&transport, &pid("host")), vec![ErrorCode::NotAllReady]);
        assert_eq!(manager.room(&code).unwrap().state, RoomState::Lobby);

        // Only the host may start
        ready_up(&mut manager, &pid("b"), CharacterId::Tide);
        assert_eq!(manager.start_game(&pid("b")), Err(SessionError::NotHost));
        manager.start_game(&pid("host")).unwrap();
        assert_eq!(manager.room(&code).unwrap().state, RoomState::Loading);
    }

    #[test]
    fn test_character_taken() {
        let (mut manager, transport) = setup();
        let code = manager.create_room(&pid("host"), GameMode::Pve, None).unwrap();
        manager.join_room(&pid("b"), code.as_str()).unwrap();
        manager.select_character(&pid("host"), CharacterId::Volt).unwrap();

        let _ = manager.handle(&pid("b"), ClientMessage::SelectCharacter { character_id: CharacterId::Volt });
        assert_eq!(errors(&transport, &pid("b")), vec![ErrorCode::CharacterTaken]);
    }

    #[test]
    fn test_not_enough_players() {
        let (mut manager, _) = setup();
        manager.create_room(&pid("host"), GameMode::ArenaPvp, None).unwrap();
        ready_up(&mut manager, &pid("host"), CharacterId::Ember);
        assert_eq!(manager.start_game(&pid("host")), Err(SessionError::NotEnoughPlayers { need: 2, have: 1 }));
    }

    #[test]
    fn test_host_disconnect_reassigns_once() {
        let (mut manager, transport) = setup();
        let code = manager.create_room(&pid("host"), GameMode::Pve, None).unwrap();
        manager.join_room(&pid("b"), code.as_str()).unwrap();
        manager.join_room(&pid("c"), code.as_str()).unwrap();

        manager.disconnect(&pid("host"));
        let room = manager.room(&code).unwrap();
        let hosts: Vec<&PlayerId> = room.members.values().filter(|m| m.is_host).map(|m| &m.id).collect();
        assert_eq!(hosts, vec![&pid("b")]);
        assert_eq!(manager.room_of(&pid("host")), None);

        let last = transport.messages_for(&pid("c")).into_iter().last().unwrap();
        let ServerMessage::PartyUpdated { party } = last else {
            panic!("expected party update");
        };
        assert_eq!(party.members.len(), 2);
        assert!(party.members[0].is_host);
    }

    #[test]
    fn test_last_member_leaving_destroys_room() {
        let (mut manager, transport) = setup();
        let code = manager.create_room(&pid("host"), GameMode::Pve, None).unwrap();
        manager.handle(&pid("host"), ClientMessage::LeaveParty).unwrap();
        assert_eq!(manager.room_count(), 0);
        assert_eq!(transport.ended_sessions(), vec![code.clone()]);
        assert!(manager.take_timer_commands().contains(&TimerCommand::Cancel(code)));

        let _ = manager.handle(&pid("host"), ClientMessage::LeaveParty);
        assert_eq!(errors(&transport, &pid("host")), vec![ErrorCode::NotInRoom]);
    }

    #[test]
    fn test_countdown_launches_once() {
        let (mut manager, transport) = setup();
        let p = pid("solo");
        let code = manager.create_room(&p, GameMode::Creative, None).unwrap();
        ready_up(&mut manager, &p, CharacterId::Ember);
        manager.start_game(&p).unwrap();
        assert_eq!(manager.take_timer_commands(), vec![TimerCommand::StartCountdown(code.clone())]);

        assert_eq!(manager.countdown_tick(&code), CountdownStep::Tick(2));
        assert_eq!(manager.countdown_tick(&code), CountdownStep::Tick(1));
        assert_eq!(manager.countdown_tick(&code), CountdownStep::Launched);
        assert_eq!(manager.countdown_tick(&code), CountdownStep::Aborted);

        assert_eq!(manager.room(&code).unwrap().state, RoomState::Active);
        assert_eq!(manager.take_timer_commands(), vec![TimerCommand::StartBattle(code.clone())]);

        let messages = transport.messages_for(&p);
        let countdowns: Vec<u8> = messages
            .iter()
            .filter_map(|m| match m {
                ServerMessage::GameStarting { countdown } => Some(*countdown),
                _ => None,
            })
            .collect();
        assert_eq!(countdowns, vec![3, 2, 1]);
        assert!(messages.iter().any(|m| matches!(m, ServerMessage::BattleState { .. })));
    }

    #[test]
    fn test_player_turn_prompts_rhythm() {
        let (mut manager, transport) = setup();
        let p = pid("solo");
        launched_creative(&mut manager, &p);

        // Training dummies are slower than every character
        let prompt = transport
            .messages_for(&p)
            .into_iter()
            .find(|m| matches!(m, ServerMessage::RhythmStart { .. }));
        assert!(matches!(prompt, Some(ServerMessage::RhythmStart { skill_id: SkillId::FlameLash, .. })));
    }

    #[test]
    fn test_rejected_actions_report_once() {
        let (mut manager, transport) = setup();
        let p = pid("solo");
        launched_creative(&mut manager, &p);
        transport.clear();

        let _ = manager.handle(&p, ClientMessage::SelectAction { skill_id: SkillId::Cataclysm, target_id: None });
        let _ = manager.handle(&p, ClientMessage::SelectAction { skill_id: SkillId::Strike, target_id: Some(CombatantId(999)) });
        assert_eq!(errors(&transport, &p), vec![ErrorCode::InvalidAction, ErrorCode::InvalidAction]);
        assert_eq!(transport.messages_for(&p).len(), 2);

        let outsider = pid("outsider");
        let _ = manager.handle(&outsider, ClientMessage::SelectAction { skill_id: SkillId::Strike, target_id: None });
        assert_eq!(errors(&transport, &outsider), vec![ErrorCode::NotInRoom]);
    }

    #[test]
    fn test_action_broadcasts_damage() {
        let (mut manager, transport) = setup();
        let p = pid("solo");
        launched_creative(&mut manager, &p);
        transport.clear();

        manager
            .handle(&p, ClientMessage::SelectAction { skill_id: SkillId::Strike, target_id: Some(CombatantId(101)) })
            .unwrap();
        let messages = transport.messages_for(&p);
        assert!(messages.iter().any(|m| matches!(m, ServerMessage::DamageDealt { damage } if damage.target == CombatantId(101))));
        assert!(matches!(messages.last(), Some(ServerMessage::BattleState { .. })));
    }

    #[test]
    fn test_victory_ends_room() {
        let (mut manager, transport) = setup();
        let p = pid("solo");
        let code = launched_creative(&mut manager, &p);
        manager.take_timer_commands();
        manager.rooms.get_mut(&code).unwrap().game = Some(ModeState::Battle(quick_win(&p)));
        transport.clear();

        manager
            .handle(&p, ClientMessage::SelectAction { skill_id: SkillId::Strike, target_id: Some(CombatantId(101)) })
            .unwrap();

        let room = manager.room(&code).unwrap();
        assert_eq!(room.state, RoomState::Ended);
        assert!(room.game.is_none());
        assert_eq!(manager.take_timer_commands(), vec![TimerCommand::StopBattle(code.clone())]);

        let end = transport
            .messages_for(&p)
            .into_iter()
            .find(|m| matches!(m, ServerMessage::BattleEnd { .. }))
            .unwrap();
        let ServerMessage::BattleEnd { result, stats, .. } = end else {
            unreachable!();
        };
        assert_eq!(result, BattleOutcome::Victory);
        assert_eq!(stats.knockouts, 1);

        // Timer ticks after the end are no-ops
        assert!(!manager.battle_tick(&code));

        // A finished room does not block a new one
        manager.create_room(&p, GameMode::Pve, None).unwrap();
        assert_eq!(manager.room_count(), 1);
    }

    #[test]
    fn test_endless_victory_spawns_next_wave() {
        let (mut manager, transport) = setup();
        let p = pid("solo");
        let code = launched(&mut manager, &p, GameMode::EndlessDungeon);
        assert_eq!(manager.room(&code).unwrap().state, RoomState::Active);
        manager.take_timer_commands();
        manager.rooms.get_mut(&code).unwrap().game = Some(ModeState::Battle(quick_win(&p)));
        transport.clear();

        manager
            .handle(&p, ClientMessage::SelectAction { skill_id: SkillId::Strike, target_id: Some(CombatantId(101)) })
            .unwrap();

        let room = manager.room(&code).unwrap();
        assert_eq!(room.state, RoomState::Active);
        let battle = room.game.as_ref().and_then(ModeState::battle).unwrap();
        assert_eq!(battle.wave, 2);
        assert_eq!(battle.outcome(), None);
        assert!(!battle.enemies.is_empty());
        assert!(battle.enemies.iter().all(|e| e.alive && e.stats.hp == e.stats.max_hp));

        let messages = transport.messages_for(&p);
        assert!(!messages.iter().any(|m| matches!(m, ServerMessage::BattleEnd { .. })));
        assert!(matches!(
            messages.last(),
            Some(ServerMessage::BattleState { state: GameView::Battle(view) }) if view.wave == 2
        ));

        // The battle timer keeps driving the new wave
        assert!(!manager.take_timer_commands().contains(&TimerCommand::StopBattle(code.clone())));
        assert!(manager.battle_tick(&code));
        assert!(manager.take_timer_commands().is_empty());
    }

    #[test]
    fn test_leaving_during_countdown_keeps_timer() {
        let (mut manager, transport) = setup();
        let code = manager.create_room(&pid("a"), GameMode::Pve, None).unwrap();
        manager.join_room(&pid("b"), code.as_str()).unwrap();
        ready_up(&mut manager, &pid("a"), CharacterId::Ember);
        ready_up(&mut manager, &pid("b"), CharacterId::Tide);
        manager.start_game(&pid("a")).unwrap();
        assert_eq!(manager.take_timer_commands(), vec![TimerCommand::StartCountdown(code.clone())]);
        assert_eq!(manager.countdown_tick(&code), CountdownStep::Tick(2));

        manager.handle(&pid("a"), ClientMessage::LeaveParty).unwrap();
        let room = manager.room(&code).unwrap();
        assert_eq!(room.state, RoomState::Loading);
        assert!(room.is_host(&pid("b")));
        assert!(manager.take_timer_commands().is_empty());

        // The countdown carries on for whoever stayed
        assert_eq!(manager.countdown_tick(&code), CountdownStep::Tick(1));
        assert_eq!(manager.countdown_tick(&code), CountdownStep::Launched);
        let room = manager.room(&code).unwrap();
        assert_eq!(room.state, RoomState::Active);
        let battle = room.game.as_ref().and_then(ModeState::battle).unwrap();
        assert_eq!(battle.party.len(), 1);
        assert!(transport
            .messages_for(&pid("b"))
            .iter()
            .any(|m| matches!(m, ServerMessage::BattleState { .. })));
        assert!(!transport
            .messages_for(&pid("a"))
            .iter()
            .any(|m| matches!(m, ServerMessage::GameStarting { countdown: 1 })));
    }

    #[test]
    fn test_matchmaking_forms_room() {
        let (mut manager, transport) = setup();
        manager.handle(&pid("a"), ClientMessage::Queue { mode: GameMode::Pve }).unwrap();
        assert!(matches!(
            transport.messages_for(&pid("a")).last(),
            Some(ServerMessage::QueueStatus { position: 1, estimated_wait: 15, .. })
        ));

        manager.handle(&pid("b"), ClientMessage::Queue { mode: GameMode::Pve }).unwrap();
        let code = manager.room_of(&pid("a")).cloned().unwrap();
        assert_eq!(manager.room_of(&pid("b")), Some(&code));
        assert!(manager.room(&code).unwrap().is_host(&pid("a")));
        for p in ["a", "b"] {
            assert!(transport
                .messages_for(&pid(p))
                .iter()
                .any(|m| matches!(m, ServerMessage::MatchFound { players, .. } if players.len() == 2)));
        }
        assert!(manager.take_timer_commands().contains(&TimerCommand::ScheduleLaunch(code.clone())));

        assert!(manager.launch_matched(&code));
        let room = manager.room(&code).unwrap();
        assert_eq!(room.state, RoomState::Loading);
        assert!(room.members.values().all(|m| m.ready && m.character.is_some()));
        assert_eq!(manager.take_timer_commands(), vec![TimerCommand::StartCountdown(code)]);
    }

    #[test]
    fn test_queue_while_in_room_rejected() {
        let (mut manager, transport) = setup();
        manager.create_room(&pid("a"), GameMode::Pve, None).unwrap();
        let _ = manager.handle(&pid("a"), ClientMessage::Queue { mode: GameMode::Pve });
        assert_eq!(errors(&transport, &pid("a")), vec![ErrorCode::AlreadyInRoom]);

        // Dequeue is idempotent and silent
        manager.handle(&pid("z"), ClientMessage::Dequeue).unwrap();
        assert!(transport.messages_for(&pid("z")).is_empty());
    }

    #[test]
    fn test_chat_trimmed_and_capped() {
        let (mut manager, transport) = setup();
        manager.register_player(pid("a"), "Ann", "cat");
        let code = manager.create_room(&pid("a"), GameMode::Pve, None).unwrap();
        manager.join_room(&pid("b"), code.as_str()).unwrap();
        transport.clear();

        manager.chat(&pid("a"), "   ").unwrap();
        assert!(transport.messages_for(&pid("b")).is_empty());

        manager.chat(&pid("a"), &format!("  {}  ", "x".repeat(300))).unwrap();
        let Some(ServerMessage::ChatMessage { player_name, message, .. }) = transport.messages_for(&pid("b")).pop() else {
            panic!("expected chat");
        };
        assert_eq!(player_name, "Ann");
        assert_eq!(message.len(), 200);
    }

    #[test]
    fn test_sweep_removes_ended_rooms() {
        let (mut manager, transport) = setup();
        let code = manager.create_room(&pid("a"), GameMode::Pve, None).unwrap();
        let now = Utc::now();
        {
            let room = manager.rooms.get_mut(&code).unwrap();
            room.transition(RoomState::Loading, now).unwrap();
            room.transition(RoomState::Active, now).unwrap();
            room.transition(RoomState::Ended, now).unwrap();
        }
        manager.take_timer_commands();

        assert_eq!(manager.sweep_stale_rooms(now + chrono::Duration::minutes(1)), 0);
        assert_eq!(manager.sweep_stale_rooms(now + chrono::Duration::minutes(6)), 1);
        assert_eq!(manager.room_of(&pid("a")), None);
        assert_eq!(manager.take_timer_commands(), vec![TimerCommand::Cancel(code.clone())]);
        assert_eq!(transport.ended_sessions(), vec![code]);
    }

    #[test]
    fn test_disconnect_mid_battle_hands_over_to_autopilot() {
        let (mut manager, _) = setup();
        let code = manager.create_room(&pid("a"), GameMode::Creative, None).unwrap();
        manager.join_room(&pid("b"), code.as_str()).unwrap();
        ready_up(&mut manager, &pid("a"), CharacterId::Ember);
        ready_up(&mut manager, &pid("b"), CharacterId::Tide);
        manager.start_game(&pid("a")).unwrap();
        for _ in 0..3 {
            manager.countdown_tick(&code);
        }

        manager.disconnect(&pid("b"));
        let room = manager.room(&code).unwrap();
        assert_eq!(room.state, RoomState::Active);
        let battle = room.game.as_ref().and_then(ModeState::battle).unwrap();
        let tide = battle.party.iter().find(|c| c.name == "b").unwrap();
        assert!(matches!(tide.controller, Controller::Ai(_)));
    }
}

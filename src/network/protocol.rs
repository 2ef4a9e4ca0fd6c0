//! Protocol Messages
//!
//! Wire format between clients and the session layer. One tagged union per
//! direction, serialized as JSON (`{"type": "join_party", "code": "..."}`).
//! Field names are camelCase on the wire.

use serde::{Serialize, Deserialize};

use crate::core::fixed::to_float;
use crate::core::hash::short_hex;
use crate::game::battle::{BattleOutcome, BattlePhase, BattleState, FieldElement};
use crate::game::combatant::{Combatant, CombatantId, PlayerId, Side};
use crate::game::content::{CharacterId, Environment};
use crate::game::damage::HitResult;
use crate::game::element::Element;
use crate::game::events::{BattleEvent, BattleEventData};
use crate::game::reaction::ReactionKind;
use crate::game::rewards::{CombatantStats, Rewards};
use crate::game::rhythm::{RhythmResult, RhythmSequence};
use crate::game::royale::{BattleRoyaleState, RoyaleEvent};
use crate::game::skill::SkillId;
use crate::game::status::StatusType;
use crate::session::modes::{MobaState, ModeState};
use crate::session::room::{GameMode, Room, RoomCode, RoomState};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Open a new room and join it as host.
    CreateParty {
        mode: GameMode,
        #[serde(rename = "maxSize", default)]
        max_size: Option<usize>,
    },

    /// Join a room by code.
    JoinParty { code: String },

    /// Leave the current room.
    LeaveParty,

    /// Pick a character.
    SelectCharacter {
        #[serde(rename = "characterId")]
        character_id: CharacterId,
    },

    /// Toggle ready.
    SetReady { ready: bool },

    /// Host starts the game.
    StartGame,

    /// Act on the current turn (or strike, in battle royale).
    SelectAction {
        #[serde(rename = "skillId")]
        skill_id: SkillId,
        #[serde(rename = "targetId", default)]
        target_id: Option<CombatantId>,
    },

    /// Hit tally for the open rhythm prompt.
    RhythmResult { result: RhythmResult },

    /// Join a matchmaking queue.
    Queue { mode: GameMode },

    /// Leave every matchmaking queue.
    Dequeue,

    /// Show an emote to the room.
    Emote {
        #[serde(rename = "emoteId")]
        emote_id: String,
    },

    /// Room chat.
    Chat { message: String },
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Full game snapshot.
    BattleState { state: GameView },

    /// A hit landed (or was dodged).
    DamageDealt { damage: DamageView },

    /// An elemental reaction fired.
    ReactionTriggered {
        reaction: ReactionKind,
        damage: i32,
        position: FieldPosition,
    },

    /// Game over, from the recipient's point of view.
    BattleEnd {
        result: BattleOutcome,
        rewards: Rewards,
        stats: CombatantStats,
    },

    /// Room roster changed.
    PartyUpdated { party: PartyView },

    /// Matchmaking progress.
    QueueStatus {
        position: u32,
        #[serde(rename = "estimatedWait")]
        estimated_wait: u32,
        mode: GameMode,
    },

    /// Matchmaking formed a room.
    MatchFound {
        #[serde(rename = "roomId")]
        room_id: RoomCode,
        mode: GameMode,
        players: Vec<PlayerId>,
    },

    /// Rhythm window opened for the recipient.
    RhythmStart {
        sequence: RhythmSequence,
        #[serde(rename = "skillId")]
        skill_id: SkillId,
    },

    /// Countdown seconds left.
    GameStarting { countdown: u8 },

    /// Somebody emoted.
    PlayerEmote {
        #[serde(rename = "playerId")]
        player_id: PlayerId,
        #[serde(rename = "emoteId")]
        emote_id: String,
    },

    /// Room chat line.
    ChatMessage {
        #[serde(rename = "playerId")]
        player_id: PlayerId,
        #[serde(rename = "playerName")]
        player_name: String,
        message: String,
    },

    /// Rejected request.
    Error { code: ErrorCode, message: String },
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// No room with that code
    RoomNotFound,
    /// Room at capacity
    RoomFull,
    /// Room already left the lobby
    GameInProgress,
    /// Another member holds the character
    CharacterTaken,
    /// Someone is not ready or has no character
    NotAllReady,
    /// Host-only request
    NotHost,
    /// Player is not in a room
    NotInRoom,
    /// Player is already in a room
    AlreadyInRoom,
    /// Fewer members than the mode needs
    NotEnoughPlayers,
    /// Acting out of turn
    NotYourTurn,
    /// Action rejected by the game
    InvalidAction,
    /// Unparseable message
    InvalidMessage,
}

impl ServerMessage {
    /// Error message shorthand.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error { code, message: message.into() }
    }

    /// Client-facing message for a battle event, if it has one.
    ///
    /// Rhythm prompts are not mapped here: they go to one player only.
    pub fn from_battle_event(battle: &BattleState, event: &BattleEvent) -> Option<Self> {
        match &event.data {
            BattleEventData::Damage { attacker, target, amount, absorbed, result, counter, .. } => {
                Some(ServerMessage::DamageDealt {
                    damage: DamageView {
                        attacker: *attacker,
                        target: *target,
                        amount: *amount,
                        absorbed: *absorbed,
                        result: *result,
                        counter: *counter,
                    },
                })
            }
            BattleEventData::Evaded { attacker, target } => Some(ServerMessage::DamageDealt {
                damage: DamageView {
                    attacker: *attacker,
                    target: *target,
                    amount: 0,
                    absorbed: 0,
                    result: HitResult::Evaded,
                    counter: false,
                },
            }),
            BattleEventData::Reaction { target, kind, damage, slot, .. } => {
                let side = battle.combatant(*target).map_or(Side::Enemies, |c| c.side);
                Some(ServerMessage::ReactionTriggered {
                    reaction: *kind,
                    damage: *damage,
                    position: FieldPosition { target: *target, side, slot: *slot },
                })
            }
            _ => None,
        }
    }

    /// Client-facing message for a royale event, if it has one.
    pub fn from_royale_event(event: &RoyaleEvent) -> Option<Self> {
        match event {
            RoyaleEvent::Strike { attacker, target, amount, result } => Some(ServerMessage::DamageDealt {
                damage: DamageView {
                    attacker: *attacker,
                    target: *target,
                    amount: *amount,
                    absorbed: 0,
                    result: *result,
                    counter: false,
                },
            }),
            _ => None,
        }
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

// =============================================================================
// VIEWS
// =============================================================================

/// One hit as shown to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DamageView {
    /// Attacker
    pub attacker: CombatantId,
    /// Target
    pub target: CombatantId,
    /// HP removed
    pub amount: i32,
    /// Absorbed by shields
    pub absorbed: i32,
    /// Hit / critical / perfect_critical / evaded
    pub result: HitResult,
    /// Counter strike
    pub counter: bool,
}

/// Where a reaction went off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldPosition {
    /// Combatant at the centre
    pub target: CombatantId,
    /// Its side
    pub side: Side,
    /// Its formation slot
    pub slot: u8,
}

/// Active status effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    /// Kind
    pub kind: StatusType,
    /// Stacks
    pub stacks: u8,
    /// Turns left
    pub duration: u8,
    /// Buff (true) or debuff
    pub beneficial: bool,
}

/// Combatant as shown to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombatantView {
    /// Battle-local id
    pub id: CombatantId,
    /// Display name
    pub name: String,
    /// Side
    pub side: Side,
    /// Formation slot
    pub slot: u8,
    /// Current HP
    pub hp: i32,
    /// Max HP
    pub max_hp: i32,
    /// Innate element
    pub element: Option<Element>,
    /// Applied aura
    pub current_element: Option<Element>,
    /// Active effects
    pub statuses: Vec<StatusView>,
    /// Alive flag
    pub alive: bool,
    /// Controlling player
    pub player_id: Option<PlayerId>,
    /// Skill kit
    pub skills: Vec<SkillId>,
}

impl From<&Combatant> for CombatantView {
    fn from(c: &Combatant) -> Self {
        Self {
            id: c.id,
            name: c.name.clone(),
            side: c.side,
            slot: c.slot,
            hp: c.stats.hp,
            max_hp: c.stats.max_hp,
            element: c.element,
            current_element: c.current_element,
            statuses: c
                .status
                .iter()
                .map(|e| StatusView {
                    kind: e.kind,
                    stacks: e.stacks,
                    duration: e.duration,
                    beneficial: e.kind.is_beneficial(),
                })
                .collect(),
            alive: c.alive,
            player_id: c.player_id().cloned(),
            skills: c.skills.clone(),
        }
    }
}

/// Turn-based battle snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BattleView {
    /// Phase
    pub phase: BattlePhase,
    /// Turn counter
    pub turn: u32,
    /// Round counter
    pub round: u32,
    /// Wave (endless dungeon)
    pub wave: u32,
    /// Acting combatant
    pub current_actor: Option<CombatantId>,
    /// Order for this round
    pub turn_order: Vec<CombatantId>,
    /// Team A
    pub party: Vec<CombatantView>,
    /// Team B
    pub enemies: Vec<CombatantView>,
    /// Area residue
    pub field: Vec<FieldElement>,
    /// Combo hits
    pub combo: u32,
    /// Backdrop
    pub environment: Environment,
    /// Short state hash
    pub state_hash: String,
}

impl From<&BattleState> for BattleView {
    fn from(b: &BattleState) -> Self {
        Self {
            phase: b.phase,
            turn: b.turn,
            round: b.round,
            wave: b.wave,
            current_actor: b.current_actor_id(),
            turn_order: b.turn_order.clone(),
            party: b.party.iter().map(CombatantView::from).collect(),
            enemies: b.enemies.iter().map(CombatantView::from).collect(),
            field: b.field.clone(),
            combo: b.combo.hits,
            environment: b.environment,
            state_hash: short_hex(&b.compute_hash()),
        }
    }
}

/// Five-versus-five snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MobaView {
    /// Underlying battle
    pub battle: BattleView,
    /// Knockouts by team A
    pub blue_kills: u32,
    /// Knockouts by team B
    pub red_kills: u32,
}

impl From<&MobaState> for MobaView {
    fn from(m: &MobaState) -> Self {
        Self {
            battle: BattleView::from(&m.battle),
            blue_kills: m.kills.get(&Side::Party).copied().unwrap_or(0),
            red_kills: m.kills.get(&Side::Enemies).copied().unwrap_or(0),
        }
    }
}

/// Royale entrant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntrantView {
    /// Player
    pub player_id: PlayerId,
    /// Fighter
    pub combatant: CombatantView,
    /// Distance from the centre
    pub distance: f32,
    /// First tick a strike is allowed
    pub ready_at: u32,
    /// Eliminations
    pub kills: u32,
    /// Final placement
    pub placement: Option<u8>,
}

/// Battle royale snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoyaleView {
    /// Ticks elapsed
    pub tick: u32,
    /// Safe radius
    pub zone_radius: f32,
    /// Entrants
    pub entrants: Vec<EntrantView>,
    /// Living entrants
    pub alive: usize,
    /// Short state hash
    pub state_hash: String,
}

impl From<&BattleRoyaleState> for RoyaleView {
    fn from(r: &BattleRoyaleState) -> Self {
        Self {
            tick: r.tick,
            zone_radius: to_float(r.zone_radius),
            entrants: r
                .entrants
                .values()
                .map(|e| EntrantView {
                    player_id: e.player.clone(),
                    combatant: CombatantView::from(&e.combatant),
                    distance: to_float(e.distance),
                    ready_at: e.ready_at,
                    kills: e.kills,
                    placement: e.placement,
                })
                .collect(),
            alive: r.alive_count(),
            state_hash: short_hex(&r.compute_hash()),
        }
    }
}

/// Snapshot of whatever game a room runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GameView {
    /// Turn-based battle
    Battle(BattleView),
    /// Five-versus-five
    Moba(MobaView),
    /// Battle royale
    Royale(RoyaleView),
}

impl From<&ModeState> for GameView {
    fn from(state: &ModeState) -> Self {
        match state {
            ModeState::Battle(b) => GameView::Battle(BattleView::from(b)),
            ModeState::Moba(m) => GameView::Moba(MobaView::from(m)),
            ModeState::Royale(r) => GameView::Royale(RoyaleView::from(r)),
        }
    }
}

/// Room member as shown to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberView {
    /// Player id
    pub id: PlayerId,
    /// Display name
    pub name: String,
    /// Avatar
    pub icon: String,
    /// Selected character
    pub character_id: Option<CharacterId>,
    /// Ready flag
    pub ready: bool,
    /// Host flag
    pub is_host: bool,
}

/// Room as shown to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartyView {
    /// Join code
    pub code: RoomCode,
    /// Mode
    pub mode: GameMode,
    /// Lifecycle state
    pub state: RoomState,
    /// Capacity
    pub max_players: usize,
    /// Members in join order
    pub members: Vec<MemberView>,
}

impl From<&Room> for PartyView {
    fn from(room: &Room) -> Self {
        Self {
            code: room.code.clone(),
            mode: room.mode,
            state: room.state,
            max_players: room.max_players,
            members: room
                .members_in_order()
                .into_iter()
                .map(|m| MemberView {
                    id: m.id.clone(),
                    name: m.name.clone(),
                    icon: m.icon.clone(),
                    character_id: m.character,
                    ready: m.ready,
                    is_host: m.is_host,
                })
                .collect(),
        }
    }
}

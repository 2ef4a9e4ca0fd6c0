//! Mode Initializers
//!
//! Turns a room's members into the game its mode plays. Every mode except
//! battle royale runs on the turn-based [`BattleState`]; five-versus-five
//! wraps it with a team kill score.
//!
//! Party combatants take ids `1..`, AI enemies `101..`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::hash::StateHash;
use crate::core::rng::{derive_battle_seed, DeterministicRng};
use crate::game::battle::{BattleOutcome, BattleSetup, BattleState};
use crate::game::combatant::{Combatant, CombatantId, PlayerId, Side};
use crate::game::content::{
    generate_encounter, spawn_character, spawn_enemy, CharacterId, EnemyKind, Environment,
    DEFAULT_CHARACTER_LEVEL,
};
use crate::game::events::{BattleEvent, BattleEventData};
use crate::game::royale::BattleRoyaleState;
use super::room::{GameMode, RoomCode};

/// First id handed to AI enemies.
pub const ENEMY_ID_BASE: u16 = 101;

/// Players per team in five-versus-five.
pub const TEAM_SIZE: usize = 5;

/// Training dummies in creative mode.
pub const CREATIVE_DUMMIES: usize = 3;

/// A player entering the game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    /// Player
    pub player: PlayerId,
    /// Display name
    pub name: String,
    /// Selected character
    pub character: CharacterId,
}

// =============================================================================
// MODE STATE
// =============================================================================

/// Five-versus-five: a battle between two player teams plus a kill score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MobaState {
    /// Underlying battle (party = blue, enemies = red)
    pub battle: BattleState,
    /// Knockouts scored by each side
    pub kills: BTreeMap<Side, u32>,
}

impl MobaState {
    /// Wrap a battle with an empty score.
    pub fn new(battle: BattleState) -> Self {
        let kills = [(Side::Party, 0), (Side::Enemies, 0)].into_iter().collect();
        Self { battle, kills }
    }

    /// Credit knockouts from freshly drained battle events.
    pub fn record(&mut self, events: &[BattleEvent]) {
        for event in events {
            if let BattleEventData::Defeated { id } = &event.data {
                let Some(victim) = self.battle.combatant(*id) else {
                    continue;
                };
                *self.kills.entry(victim.side.opposite()).or_default() += 1;
            }
        }
    }
}

/// Game a room is running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModeState {
    /// Turn-based battle (PvE, arena, rhythm challenge, endless, creative)
    Battle(BattleState),
    /// Five-versus-five
    Moba(MobaState),
    /// Free-for-all
    Royale(BattleRoyaleState),
}

impl ModeState {
    /// Turn-based battle, if this mode has one.
    pub fn battle(&self) -> Option<&BattleState> {
        match self {
            ModeState::Battle(battle) => Some(battle),
            ModeState::Moba(moba) => Some(&moba.battle),
            ModeState::Royale(_) => None,
        }
    }

    /// Mutable turn-based battle.
    pub fn battle_mut(&mut self) -> Option<&mut BattleState> {
        match self {
            ModeState::Battle(battle) => Some(battle),
            ModeState::Moba(moba) => Some(&mut moba.battle),
            ModeState::Royale(_) => None,
        }
    }

    /// Battle outcome, if the game has one.
    pub fn outcome(&self) -> Option<BattleOutcome> {
        self.battle().and_then(BattleState::outcome)
    }

    /// Whether the game is over.
    pub fn is_finished(&self) -> bool {
        match self {
            ModeState::Royale(royale) => royale.is_ended(),
            other => other.outcome().is_some(),
        }
    }

    /// State hash for logs and replay checks.
    pub fn compute_hash(&self) -> StateHash {
        match self {
            ModeState::Royale(royale) => royale.compute_hash(),
            other => other.battle().map(BattleState::compute_hash).unwrap_or_default(),
        }
    }
}

// =============================================================================
// INITIALIZERS
// =============================================================================

/// Seed for a room's game.
pub fn battle_seed(code: &RoomCode, nonce: &[u8; 16], participants: &[Participant]) -> u64 {
    let ids: Vec<&str> = participants.iter().map(|p| p.player.as_str()).collect();
    derive_battle_seed(code.as_str(), nonce, &ids)
}

/// Build the game for `mode`.
pub fn initialize(mode: GameMode, seed: u64, participants: &[Participant]) -> ModeState {
    let state = match mode {
        GameMode::Pve => ModeState::Battle(encounter(seed, participants)),
        GameMode::ArenaPvp => ModeState::Battle(versus(seed, participants, participants.len())),
        GameMode::RhythmChallenge => ModeState::Battle(rhythm_challenge(seed, participants)),
        GameMode::FiveVFive => ModeState::Moba(MobaState::new(versus(seed, participants, TEAM_SIZE * 2))),
        GameMode::BattleRoyale => ModeState::Royale(royale(seed, participants)),
        GameMode::EndlessDungeon => ModeState::Battle(encounter(seed, participants)),
        GameMode::Creative => ModeState::Battle(creative(seed, participants)),
    };
    info!(
        mode = ?mode,
        players = participants.len(),
        seed = %hex::encode(seed.to_be_bytes()),
        "Game initialized"
    );
    state
}

fn party(participants: &[Participant]) -> Vec<Combatant> {
    participants
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let id = CombatantId(i as u16 + 1);
            spawn_character(id, p.character, DEFAULT_CHARACTER_LEVEL, Side::Party, p.player.clone(), &p.name)
        })
        .collect()
}

fn enemies(roster: &[(EnemyKind, u8)], first_id: CombatantId) -> Vec<Combatant> {
    roster
        .iter()
        .enumerate()
        .map(|(i, (kind, level))| spawn_enemy(CombatantId(first_id.0 + i as u16), *kind, *level, Side::Enemies))
        .collect()
}

/// Party against a rolled encounter (PvE and the first endless wave).
fn encounter(seed: u64, participants: &[Participant]) -> BattleState {
    let mut rng = DeterministicRng::new(seed);
    let encounter = generate_encounter(participants.len(), DEFAULT_CHARACTER_LEVEL, &mut rng);
    BattleState::new(BattleSetup {
        seed,
        party: party(participants),
        enemies: enemies(&encounter.enemies, CombatantId(ENEMY_ID_BASE)),
        environment: encounter.environment,
        is_boss_encounter: encounter.is_boss,
        rhythm_required: false,
    })
}

/// Players alternate between the two sides, `cap` players at most.
fn versus(seed: u64, participants: &[Participant], cap: usize) -> BattleState {
    let mut blue = Vec::new();
    let mut red = Vec::new();
    for (i, combatant) in party(participants).into_iter().take(cap).enumerate() {
        if i % 2 == 0 {
            blue.push(combatant);
        } else {
            red.push(combatant);
        }
    }
    BattleState::new(BattleSetup {
        seed,
        party: blue,
        enemies: red,
        environment: Environment::Arena,
        is_boss_encounter: false,
        rhythm_required: false,
    })
}

fn rhythm_challenge(seed: u64, participants: &[Participant]) -> BattleState {
    BattleState::new(BattleSetup {
        seed,
        party: party(participants),
        enemies: enemies(&[(EnemyKind::Maestro, DEFAULT_CHARACTER_LEVEL)], CombatantId(ENEMY_ID_BASE)),
        environment: Environment::Stormpeak,
        is_boss_encounter: true,
        rhythm_required: true,
    })
}

fn creative(seed: u64, participants: &[Participant]) -> BattleState {
    let dummies = [(EnemyKind::TrainingDummy, DEFAULT_CHARACTER_LEVEL); CREATIVE_DUMMIES];
    BattleState::new(BattleSetup {
        seed,
        party: party(participants),
        enemies: enemies(&dummies, CombatantId(ENEMY_ID_BASE)),
        environment: Environment::Arena,
        is_boss_encounter: false,
        rhythm_required: false,
    })
}

fn royale(seed: u64, participants: &[Participant]) -> BattleRoyaleState {
    let fighters = participants.iter().cloned().zip(party(participants)).map(|(p, c)| (p.player, c)).collect();
    BattleRoyaleState::new(seed, fighters)
}

/// Enemies for the endless dungeon's next wave.
///
/// Wave `n` fields enemies `n - 1` levels above the first wave. The roster
/// is rolled from its own stream so the battle RNG is untouched.
pub fn next_wave_enemies(battle: &BattleState) -> Vec<Combatant> {
    let wave = battle.wave.saturating_add(1);
    let mut rng = DeterministicRng::new(battle.seed.wrapping_add(wave as u64));
    let level = DEFAULT_CHARACTER_LEVEL.saturating_add(battle.wave.min(u8::MAX as u32) as u8);
    let party_size = battle.side(Side::Party).len();
    let encounter = generate_encounter(party_size, level, &mut rng);
    enemies(&encounter.enemies, battle.next_combatant_id())
}

// =============================================================================
// TESTS
// =============================================================================

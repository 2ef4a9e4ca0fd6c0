//! Combatants
//!
//! A [`Combatant`] is one actor in a battle: a player's character instance
//! or an enemy instance. Both share the same stat block, status ledger and
//! HP invariants so the damage engine never has to care which is which.
//!
//! HP is always clamped to `[0, max_hp]` and `alive` flips to `false`
//! exactly when HP reaches 0.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::fixed::{clamp_unit, ratio, scale_int, Fixed};
use super::ai::AiArchetype;
use super::content::{CharacterId, EnemyKind};
use super::element::Element;
use super::skill::SkillId;
use super::status::{StatDelta, StatusLedger};

/// Player identifier (opaque string assigned by the transport).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub String);

impl PlayerId {
    /// Wrap an existing id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow as str.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Battle-local combatant id. Unique within one battle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CombatantId(pub u16);

impl fmt::Display for CombatantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which side of the battle a combatant fights on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// Player party (team A in PvP)
    Party,
    /// Enemy side (team B in PvP)
    Enemies,
}

impl Side {
    /// The other side.
    pub fn opposite(self) -> Self {
        match self {
            Side::Party => Side::Enemies,
            Side::Enemies => Side::Party,
        }
    }
}

/// Who decides this combatant's actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Controller {
    /// A connected player
    Player(PlayerId),
    /// Server-side AI
    Ai(AiArchetype),
}

/// Content definition behind a combatant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Template {
    /// Playable character
    Character(CharacterId),
    /// Enemy
    Enemy(EnemyKind),
}

/// Stat block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    /// Current HP
    pub hp: i32,
    /// Maximum HP
    pub max_hp: i32,
    /// Attack
    pub atk: i32,
    /// Defense
    pub def: i32,
    /// Speed (initiative)
    pub speed: i32,
    /// Crit chance [0, 1]
    pub crit_rate: Fixed,
    /// Crit damage multiplier (1.5 = +50%)
    pub crit_damage: Fixed,
    /// Hit chance before evasion [0, 1]
    pub accuracy: Fixed,
    /// Dodge chance [0, 1]
    pub evasion: Fixed,
    /// Reaction damage scaling
    pub elemental_mastery: i32,
}

impl Stats {
    /// Apply ledger deltas. Rates clamp to `[0, 1]`, nothing goes negative.
    pub fn with_modifiers(&self, delta: &StatDelta) -> Stats {
        Stats {
            hp: self.hp,
            max_hp: self.max_hp,
            atk: apply_fraction(self.atk, delta.atk),
            def: apply_fraction(self.def, delta.def),
            speed: apply_fraction(self.speed, delta.speed),
            crit_rate: clamp_unit(self.crit_rate.saturating_add(delta.crit_rate)),
            crit_damage: self.crit_damage.max(0),
            accuracy: clamp_unit(self.accuracy.saturating_add(delta.accuracy)),
            evasion: clamp_unit(self.evasion.saturating_add(delta.evasion)),
            elemental_mastery: self.elemental_mastery.max(0),
        }
    }
}

fn apply_fraction(base: i32, fraction: Fixed) -> i32 {
    base.saturating_add(scale_int(base, fraction)).max(0)
}

/// One actor in a battle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Combatant {
    /// Battle-local id
    pub id: CombatantId,
    /// Display name
    pub name: String,
    /// Content definition
    pub template: Template,
    /// Level
    pub level: u8,
    /// Side
    pub side: Side,
    /// Decision maker
    pub controller: Controller,
    /// Base stats (HP lives here)
    pub stats: Stats,
    /// Innate element (`None` = physical)
    pub element: Option<Element>,
    /// Applied aura waiting for a reaction
    pub current_element: Option<Element>,
    /// Usable skills; the first is the basic attack
    pub skills: Vec<SkillId>,
    /// Active status effects
    pub status: StatusLedger,
    /// False exactly when HP is 0
    pub alive: bool,
    /// Formation slot (used for area reactions)
    pub slot: u8,
    /// Position in a boss skill rotation
    pub ai_cursor: u8,
}

impl Combatant {
    /// Build a combatant at full HP.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: CombatantId,
        name: impl Into<String>,
        template: Template,
        level: u8,
        side: Side,
        controller: Controller,
        mut stats: Stats,
        element: Option<Element>,
        skills: Vec<SkillId>,
    ) -> Self {
        stats.max_hp = stats.max_hp.max(1);
        stats.hp = stats.max_hp;
        Self {
            id,
            name: name.into(),
            template,
            level,
            side,
            controller,
            stats,
            element,
            current_element: None,
            skills,
            status: StatusLedger::new(),
            alive: true,
            slot: 0,
            ai_cursor: 0,
        }
    }

    /// Subtract HP. Returns the HP actually lost.
    pub fn apply_damage(&mut self, amount: i32) -> i32 {
        if !self.alive || amount <= 0 {
            return 0;
        }
        let dealt = amount.min(self.stats.hp);
        self.stats.hp -= dealt;
        if self.stats.hp == 0 {
            self.alive = false;
            self.status.clear();
            self.current_element = None;
        }
        dealt
    }

    /// Restore HP up to max. Dead combatants cannot be healed.
    pub fn heal(&mut self, amount: i32) -> i32 {
        if !self.alive || amount <= 0 {
            return 0;
        }
        let restored = amount.min(self.stats.max_hp - self.stats.hp);
        self.stats.hp += restored;
        restored
    }

    /// Current HP as a fraction of max.
    pub fn hp_ratio(&self) -> Fixed {
        ratio(self.stats.hp, self.stats.max_hp)
    }

    /// Stats after status modifiers.
    pub fn effective_stats(&self) -> Stats {
        self.stats.with_modifiers(&self.status.stat_modifiers())
    }

    /// Element a reaction pairs with: the aura if present, else innate.
    pub fn reaction_partner(&self) -> Option<Element> {
        self.current_element.or(self.element)
    }

    /// The always-available basic attack.
    pub fn basic_skill(&self) -> SkillId {
        self.skills
            .iter()
            .copied()
            .find(|s| s.definition().basic)
            .unwrap_or(SkillId::Strike)
    }

    /// Controlling player, if any.
    pub fn player_id(&self) -> Option<&PlayerId> {
        match &self.controller {
            Controller::Player(id) => Some(id),
            Controller::Ai(_) => None,
        }
    }

    /// Whether a player (not AI) drives this combatant.
    pub fn is_player_controlled(&self) -> bool {
        self.player_id().is_some()
    }

    /// Hand control to an aggressive autopilot.
    pub fn set_autopilot(&mut self) {
        self.controller = Controller::Ai(AiArchetype::Aggressive);
    }
}

// =============================================================================
// TESTS
// =============================================================================

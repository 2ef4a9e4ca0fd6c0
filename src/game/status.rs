//! Status Effect Ledger
//!
//! Per-combatant collection of timed, stacking effects.
//!
//! ## Stacking
//!
//! Applying a kind that is already present never adds a second entry:
//! - duration becomes `max(old, new)`
//! - below max stacks: one stack is added and the magnitude grows by half
//!   of the incoming value
//! - at max stacks: only the duration refreshes
//!
//! ## Ticking
//!
//! Once per turn every living combatant ticks its ledger: periodic damage
//! (burn, poison, bleed, shock) and regen resolve as a fraction of max HP
//! scaled by stacks, then durations decrement and finished effects expire.
//! Shock only fires on even turn numbers.

use serde::{Deserialize, Serialize};

use crate::core::fixed::{fixed_mul, ratio, scale_int, Fixed, FIXED_HALF, FIXED_ONE};
use super::combatant::CombatantId;

/// Default stack cap.
pub const DEFAULT_MAX_STACKS: u8 = 3;

/// Kind of status effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusType {
    /// Periodic damage
    Burn,
    /// Periodic damage
    Poison,
    /// Periodic damage
    Bleed,
    /// Periodic damage on even turns
    Shock,
    /// Cannot act; cannot evade
    Freeze,
    /// Cannot act
    Stun,
    /// Basic skill only
    Silence,
    /// Lowers accuracy
    Blind,
    /// Raises ATK
    AtkUp,
    /// Lowers ATK
    AtkDown,
    /// Raises DEF
    DefUp,
    /// Lowers DEF
    DefDown,
    /// Raises speed
    SpdUp,
    /// Lowers speed
    SpdDown,
    /// Raises crit rate
    CritUp,
    /// Absorbs damage (value = fraction of max HP)
    Shield,
    /// Periodic healing
    Regen,
    /// Strikes back once when hit
    Counter,
}

impl StatusType {
    /// Maximum number of stacks for this kind.
    pub fn max_stacks(self) -> u8 {
        match self {
            StatusType::Freeze
            | StatusType::Stun
            | StatusType::Silence
            | StatusType::Shield
            | StatusType::Counter => 1,
            _ => DEFAULT_MAX_STACKS,
        }
    }

    /// Effects that limit the bearer's own turn. They only decay when the
    /// bearer's turn ends, so a one-turn stun costs exactly one turn.
    pub fn is_turn_bound(self) -> bool {
        matches!(self, StatusType::Stun | StatusType::Freeze | StatusType::Silence)
    }

    /// Whether this kind deals damage on tick.
    pub fn is_periodic_damage(self) -> bool {
        matches!(
            self,
            StatusType::Burn | StatusType::Poison | StatusType::Bleed | StatusType::Shock
        )
    }

    /// Whether this kind helps its bearer.
    pub fn is_beneficial(self) -> bool {
        matches!(
            self,
            StatusType::AtkUp
                | StatusType::DefUp
                | StatusType::SpdUp
                | StatusType::CritUp
                | StatusType::Shield
                | StatusType::Regen
                | StatusType::Counter
        )
    }

    /// Stable hash id.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// One active effect on a combatant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEffect {
    /// Effect kind
    pub kind: StatusType,
    /// Current stacks (1..=max_stacks)
    pub stacks: u8,
    /// Turns remaining
    pub duration: u8,
    /// Magnitude (fraction of max HP, or stat fraction)
    pub value: Fixed,
    /// Who applied it
    pub source: Option<CombatantId>,
}

impl StatusEffect {
    /// Single-stack effect with no source.
    pub fn new(kind: StatusType, duration: u8, value: Fixed) -> Self {
        Self {
            kind,
            stacks: 1,
            duration,
            value,
            source: None,
        }
    }

    /// Attach the applying combatant.
    pub fn with_source(mut self, source: CombatantId) -> Self {
        self.source = Some(source);
        self
    }

    fn periodic_amount(&self, max_hp: i32) -> i32 {
        let per_stack = scale_int(max_hp, self.value);
        per_stack.saturating_mul(self.stacks as i32).max(1)
    }
}

/// Result of applying an effect to a ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackChange {
    /// New entry
    Added,
    /// Existing entry gained a stack
    Stacked,
    /// Existing entry at max stacks; duration refreshed only
    Refreshed,
}

/// Why a combatant cannot take its turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionBlock {
    /// Stun present
    Stunned,
    /// Freeze present
    Frozen,
}

/// Output of one ledger tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickOutcome {
    /// Periodic damage to apply
    pub damage: i32,
    /// Periodic healing to apply
    pub healing: i32,
    /// Kinds that expired this tick
    pub expired: Vec<StatusType>,
}

/// Aggregated stat deltas, each a signed fraction (e.g. -25% DEF).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatDelta {
    /// ATK fraction delta
    pub atk: Fixed,
    /// DEF fraction delta
    pub def: Fixed,
    /// Speed fraction delta
    pub speed: Fixed,
    /// Crit rate absolute delta
    pub crit_rate: Fixed,
    /// Accuracy absolute delta
    pub accuracy: Fixed,
    /// Evasion absolute delta
    pub evasion: Fixed,
}

/// Active effects on one combatant. At most one entry per kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusLedger {
    effects: Vec<StatusEffect>,
}

impl StatusLedger {
    /// Empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an effect using the stacking rules.
    pub fn apply(&mut self, incoming: StatusEffect) -> StackChange {
        let max = incoming.kind.max_stacks();
        if let Some(existing) = self.effects.iter_mut().find(|e| e.kind == incoming.kind) {
            existing.duration = existing.duration.max(incoming.duration);
            if incoming.source.is_some() {
                existing.source = incoming.source;
            }
            if existing.stacks < max {
                existing.stacks += 1;
                existing.value = existing
                    .value
                    .saturating_add(fixed_mul(incoming.value, FIXED_HALF));
                StackChange::Stacked
            } else {
                StackChange::Refreshed
            }
        } else {
            let mut effect = incoming;
            effect.stacks = effect.stacks.clamp(1, max);
            self.effects.push(effect);
            StackChange::Added
        }
    }

    /// Resolve one turn of periodic effects, then decay durations.
    ///
    /// `own_turn` is true when the turn that just ended was the bearer's;
    /// turn-bound effects decay only then.
    pub fn tick(&mut self, max_hp: i32, turn: u32, own_turn: bool) -> TickOutcome {
        let mut outcome = TickOutcome::default();

        for effect in &self.effects {
            match effect.kind {
                StatusType::Shock if turn % 2 != 0 => {}
                kind if kind.is_periodic_damage() => {
                    outcome.damage = outcome.damage.saturating_add(effect.periodic_amount(max_hp));
                }
                StatusType::Regen => {
                    outcome.healing = outcome.healing.saturating_add(effect.periodic_amount(max_hp));
                }
                _ => {}
            }
        }

        for effect in self.effects.iter_mut().filter(|e| own_turn || !e.kind.is_turn_bound()) {
            effect.duration = effect.duration.saturating_sub(1);
        }
        self.effects.retain(|e| {
            if e.duration == 0 {
                outcome.expired.push(e.kind);
                false
            } else {
                true
            }
        });

        outcome
    }

    /// Whether the bearer can take a turn.
    pub fn can_act(&self) -> Result<(), ActionBlock> {
        if self.has(StatusType::Stun) {
            Err(ActionBlock::Stunned)
        } else if self.has(StatusType::Freeze) {
            Err(ActionBlock::Frozen)
        } else {
            Ok(())
        }
    }

    /// Whether non-basic skills are allowed.
    pub fn can_use_skills(&self) -> bool {
        !self.has(StatusType::Silence)
    }

    /// Sum the stat deltas of every active effect.
    pub fn stat_modifiers(&self) -> StatDelta {
        let mut delta = StatDelta::default();
        for e in &self.effects {
            match e.kind {
                StatusType::AtkUp => delta.atk += e.value,
                StatusType::AtkDown => delta.atk -= e.value,
                StatusType::DefUp => delta.def += e.value,
                StatusType::DefDown => delta.def -= e.value,
                StatusType::SpdUp => delta.speed += e.value,
                StatusType::SpdDown => delta.speed -= e.value,
                StatusType::CritUp => delta.crit_rate += e.value,
                StatusType::Blind => delta.accuracy -= e.value,
                StatusType::Freeze => delta.evasion -= FIXED_ONE,
                _ => {}
            }
        }
        delta
    }

    /// Soak damage with an active shield. Returns damage left over.
    pub fn absorb_with_shield(&mut self, max_hp: i32, damage: i32) -> i32 {
        let Some(idx) = self.effects.iter().position(|e| e.kind == StatusType::Shield) else {
            return damage;
        };
        let capacity = scale_int(max_hp, self.effects[idx].value);
        let absorbed = capacity.min(damage).max(0);
        let left = capacity - absorbed;
        if left <= 0 {
            self.effects.remove(idx);
        } else {
            self.effects[idx].value = ratio(left, max_hp);
        }
        damage - absorbed
    }

    /// Consume a counter stance, if any.
    pub fn take_counter(&mut self) -> bool {
        self.remove(StatusType::Counter).is_some()
    }

    /// Remove an effect by kind.
    pub fn remove(&mut self, kind: StatusType) -> Option<StatusEffect> {
        let idx = self.effects.iter().position(|e| e.kind == kind)?;
        Some(self.effects.remove(idx))
    }

    /// Whether a kind is active.
    pub fn has(&self, kind: StatusType) -> bool {
        self.effects.iter().any(|e| e.kind == kind)
    }

    /// Look up an active effect.
    pub fn get(&self, kind: StatusType) -> Option<&StatusEffect> {
        self.effects.iter().find(|e| e.kind == kind)
    }

    /// Iterate active effects.
    pub fn iter(&self) -> impl Iterator<Item = &StatusEffect> {
        self.effects.iter()
    }

    /// Number of active effects.
    pub fn len(&self) -> usize {
        self.effects.len()
    }

    /// True when nothing is active.
    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    /// Drop every effect (on death).
    pub fn clear(&mut self) {
        self.effects.clear();
    }
}

// =============================================================================
// TESTS
// =============================================================================

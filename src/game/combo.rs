//! Combo Chain
//!
//! Consecutive landed hits by one side build a chain that amplifies the
//! next hit. An evaded hit or a rhythm miss resets the chain; so does the
//! other side landing a hit.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::core::fixed::Fixed;
use super::combatant::{CombatantId, Side};
use super::damage::combo_multiplier;
use super::element::Element;

/// Running combo state for a battle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComboChain {
    /// Consecutive landed hits
    pub hits: u32,
    /// Elements touched during the chain
    pub elements: BTreeSet<Element>,
    /// Damage dealt during the chain
    pub total_damage: i64,
    /// Last combatant to extend the chain
    pub last_actor: Option<CombatantId>,
    /// Side that owns the chain
    pub last_side: Option<Side>,
    /// Whether a chain is running
    pub active: bool,
}

impl ComboChain {
    /// Empty, inactive chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Extend the chain with a landed hit.
    pub fn register_hit(&mut self, actor: CombatantId, side: Side, element: Option<Element>, damage: i32) {
        if self.active && self.last_side != Some(side) {
            self.reset();
        }
        self.hits = self.hits.saturating_add(1);
        if let Some(e) = element {
            self.elements.insert(e);
        }
        self.total_damage = self.total_damage.saturating_add(damage.max(0) as i64);
        self.last_actor = Some(actor);
        self.last_side = Some(side);
        self.active = true;
    }

    /// Break the chain (evade or rhythm miss).
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Hits that count toward `side`'s next attack.
    pub fn count_for(&self, side: Side) -> u32 {
        if self.active && self.last_side == Some(side) {
            self.hits
        } else {
            0
        }
    }

    /// Current multiplier for the owning side.
    pub fn multiplier(&self) -> Fixed {
        combo_multiplier(self.hits)
    }
}

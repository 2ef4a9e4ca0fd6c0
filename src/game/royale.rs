//! Battle Royale
//!
//! Free-for-all variant. There are no turns: every entrant may strike any
//! other entrant once its cooldown is up. The server ticks the state at the
//! battle cadence; each tick the safe zone shrinks and entrants caught
//! outside it lose a fraction of their max HP.
//!
//! Distances are abstract: each entrant sits at a fixed distance from the
//! centre in `[0, 1]`, and the zone is a radius on the same scale.

use std::collections::BTreeMap;

use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::core::fixed::{percent, scale_int, Fixed, FIXED_ONE};
use crate::core::hash::{compute_state_hash, StateHash};
use crate::core::rng::DeterministicRng;
use super::combatant::{Combatant, CombatantId, PlayerId, Side};
use super::damage::{self, AttackContext, HitResult};
use super::skill::{SkillId, SkillKind};

/// Zone radius lost per tick.
pub const ZONE_SHRINK_PER_TICK: Fixed = percent(1) / 2;

/// Smallest zone radius.
pub const ZONE_MIN_RADIUS: Fixed = percent(10);

/// Max-HP fraction drained per tick outside the zone.
pub const ZONE_DRAIN: Fixed = percent(2);

/// Ticks between two strikes by the same entrant.
pub const STRIKE_COOLDOWN_TICKS: u32 = 10;

/// Royale phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoyalePhase {
    /// Fighting
    Active,
    /// One (or no) entrant left
    Ended,
}

/// One participant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoyaleEntrant {
    /// Controlling player
    pub player: PlayerId,
    /// The fighter
    pub combatant: Combatant,
    /// Distance from the zone centre
    pub distance: Fixed,
    /// First tick the entrant may strike again
    pub ready_at: u32,
    /// Eliminations credited
    pub kills: u32,
    /// Final placement (1 = winner)
    pub placement: Option<u8>,
}

/// Something that happened in the royale.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoyaleEvent {
    /// Entrant struck another
    Strike {
        attacker: CombatantId,
        target: CombatantId,
        amount: i32,
        result: HitResult,
    },
    /// Zone drained an entrant
    ZoneDamage {
        target: CombatantId,
        amount: i32,
    },
    /// Entrant knocked out
    Eliminated {
        id: CombatantId,
        by: Option<CombatantId>,
        placement: u8,
    },
    /// Last entrant standing
    Winner {
        player: PlayerId,
    },
}

/// Rejected strike.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum RoyaleError {
    /// Royale is over
    #[error("battle royale has ended")]
    Ended,

    /// Player has no entrant
    #[error("player is not an entrant")]
    NotEntrant,

    /// Player's entrant is out
    #[error("entrant has been eliminated")]
    Eliminated,

    /// Target missing, dead or self
    #[error("invalid target")]
    InvalidTarget,

    /// Cooldown not elapsed
    #[error("strike on cooldown until tick {ready_at}")]
    OnCooldown {
        /// First tick a strike is allowed
        ready_at: u32,
    },

    /// Skill not usable for strikes
    #[error("skill {0:?} cannot be used here")]
    UnknownSkill(SkillId),
}

/// Free-for-all state with a shrinking zone.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattleRoyaleState {
    /// RNG seed
    pub seed: u64,
    rng: DeterministicRng,
    /// Ticks elapsed
    pub tick: u32,
    /// Current phase
    pub phase: RoyalePhase,
    /// Safe radius
    pub zone_radius: Fixed,
    /// Entrants by player
    pub entrants: BTreeMap<PlayerId, RoyaleEntrant>,
    events: Vec<RoyaleEvent>,
}

impl BattleRoyaleState {
    /// Place every entrant at a random distance from the centre.
    pub fn new(seed: u64, fighters: Vec<(PlayerId, Combatant)>) -> Self {
        let mut rng = DeterministicRng::new(seed);
        let mut entrants = BTreeMap::new();
        for (slot, (player, mut combatant)) in fighters.into_iter().enumerate() {
            combatant.side = Side::Party;
            combatant.slot = slot.min(u8::MAX as usize) as u8;
            let distance = rng.next_fixed(FIXED_ONE);
            entrants.insert(
                player.clone(),
                RoyaleEntrant { player, combatant, distance, ready_at: 0, kills: 0, placement: None },
            );
        }
        info!(entrants = entrants.len(), "Battle royale created");

        let mut state = Self {
            seed,
            rng,
            tick: 0,
            phase: RoyalePhase::Active,
            zone_radius: FIXED_ONE,
            entrants,
            events: Vec::new(),
        };
        state.check_winner();
        state
    }

    /// Living entrants.
    pub fn alive_count(&self) -> usize {
        self.entrants.values().filter(|e| e.combatant.alive).count()
    }

    /// Whether the royale is over.
    pub fn is_ended(&self) -> bool {
        self.phase == RoyalePhase::Ended
    }

    /// Winner, once ended. `None` when the last entrants fell together.
    pub fn winner(&self) -> Option<&PlayerId> {
        self.entrants.values().find(|e| e.placement == Some(1)).map(|e| &e.player)
    }

    /// Drain events recorded since the last call.
    pub fn take_events(&mut self) -> Vec<RoyaleEvent> {
        std::mem::take(&mut self.events)
    }

    /// Strike another entrant.
    pub fn strike(&mut self, player: &PlayerId, target: CombatantId, skill: SkillId) -> Result<i32, RoyaleError> {
        if self.is_ended() {
            return Err(RoyaleError::Ended);
        }
        let attacker = self.entrants.get(player).ok_or(RoyaleError::NotEntrant)?;
        if !attacker.combatant.alive {
            return Err(RoyaleError::Eliminated);
        }
        if self.tick < attacker.ready_at {
            return Err(RoyaleError::OnCooldown { ready_at: attacker.ready_at });
        }
        let def = skill.definition();
        if !attacker.combatant.skills.contains(&skill) || def.kind != SkillKind::Attack {
            return Err(RoyaleError::UnknownSkill(skill));
        }
        if !def.basic && !attacker.combatant.status.can_use_skills() {
            return Err(RoyaleError::UnknownSkill(skill));
        }
        let victim_player = self
            .entrants
            .values()
            .find(|e| e.combatant.id == target && e.combatant.alive && &e.player != player)
            .map(|e| e.player.clone())
            .ok_or(RoyaleError::InvalidTarget)?;

        let attacker_id = attacker.combatant.id;
        let attacker_stats = attacker.combatant.effective_stats();
        let victim = &self.entrants[&victim_player].combatant;
        let defender_stats = victim.effective_stats();
        let ctx = AttackContext {
            attacker: &attacker_stats,
            defender: &defender_stats,
            skill: def,
            judgement: None,
            combo_count: 0,
            attacker_element: def.element,
            defender_element: victim.element,
            defender_aura: victim.reaction_partner(),
            field_elements: &[],
            power_scale: FIXED_ONE,
        };
        let outcome = damage::resolve_attack(&ctx, &mut self.rng);

        let ready_at = self.tick + STRIKE_COOLDOWN_TICKS;
        if let Some(entrant) = self.entrants.get_mut(player) {
            entrant.ready_at = ready_at;
        }

        let mut dealt = 0;
        if let Some(entrant) = self.entrants.get_mut(&victim_player) {
            let c = &mut entrant.combatant;
            let remaining = c.status.absorb_with_shield(c.stats.max_hp, outcome.damage);
            dealt = c.apply_damage(remaining);
            if outcome.landed() && c.alive {
                for effect in &outcome.target_effects {
                    c.status.apply(effect.with_source(attacker_id));
                }
            }
        }
        self.events.push(RoyaleEvent::Strike { attacker: attacker_id, target, amount: dealt, result: outcome.result });

        let eliminated = self.entrants.get(&victim_player).map_or(false, |e| !e.combatant.alive);
        if eliminated {
            let placement = self.alive_count() as u8 + 1;
            self.eliminate(&victim_player, Some(player), placement);
            self.check_winner();
        }
        Ok(dealt)
    }

    /// Advance one tick: shrink the zone, drain entrants outside it.
    pub fn tick(&mut self) {
        if self.is_ended() {
            return;
        }
        self.tick += 1;
        self.zone_radius = (self.zone_radius - ZONE_SHRINK_PER_TICK).max(ZONE_MIN_RADIUS);

        let zone = self.zone_radius;
        let mut fallen = Vec::new();
        for entrant in self.entrants.values_mut() {
            let c = &mut entrant.combatant;
            if !c.alive || entrant.distance <= zone {
                continue;
            }
            let amount = scale_int(c.stats.max_hp, ZONE_DRAIN).max(1);
            let dealt = c.apply_damage(amount);
            self.events.push(RoyaleEvent::ZoneDamage { target: c.id, amount: dealt });
            if !c.alive {
                fallen.push(entrant.player.clone());
            }
        }

        // Entrants drained out on the same tick share the lower placement
        let placement = (self.alive_count() + fallen.len()).min(u8::MAX as usize) as u8;
        for player in &fallen {
            self.eliminate(player, None, placement);
        }
        if !fallen.is_empty() {
            self.check_winner();
        }
    }

    fn eliminate(&mut self, victim: &PlayerId, killer: Option<&PlayerId>, placement: u8) {
        let killer_id = killer.and_then(|k| self.entrants.get(k)).map(|e| e.combatant.id);

        let Some(entrant) = self.entrants.get_mut(victim) else {
            return;
        };
        if entrant.placement.is_some() {
            return;
        }
        entrant.placement = Some(placement);
        let id = entrant.combatant.id;

        if let Some(k) = killer.and_then(|k| self.entrants.get_mut(k)) {
            k.kills += 1;
        }
        debug!(victim = %id, placement, "Entrant eliminated");
        self.events.push(RoyaleEvent::Eliminated { id, by: killer_id, placement });
    }

    fn check_winner(&mut self) {
        let alive: Vec<PlayerId> = self
            .entrants
            .values()
            .filter(|e| e.combatant.alive)
            .map(|e| e.player.clone())
            .collect();
        if alive.len() > 1 {
            return;
        }
        self.phase = RoyalePhase::Ended;
        if let Some(winner) = alive.into_iter().next() {
            if let Some(entrant) = self.entrants.get_mut(&winner) {
                entrant.placement = Some(1);
            }
            info!(winner = %winner, tick = self.tick, "Battle royale won");
            self.events.push(RoyaleEvent::Winner { player: winner });
        } else {
            info!(tick = self.tick, "Battle royale ended with no survivor");
        }
    }

    /// Players sorted by placement, winner first.
    pub fn placements(&self) -> Vec<(PlayerId, u8, u32)> {
        let mut results: Vec<_> = self
            .entrants
            .values()
            .map(|e| (e.player.clone(), e.placement.unwrap_or(0), e.kills))
            .collect();
        results.sort_by_key(|(_, placement, _)| *placement);
        results
    }

    /// Compute hash of current state.
    pub fn compute_hash(&self) -> StateHash {
        compute_state_hash(self.tick, self.seed, |hasher| {
            hasher.update_fixed(self.zone_radius);
            for entrant in self.entrants.values() {
                hasher.update_str(entrant.player.as_str());
                hasher.update_i32(entrant.combatant.stats.hp);
                hasher.update_bool(entrant.combatant.alive);
                hasher.update_u32(entrant.ready_at);
                hasher.update_u32(entrant.kills);
                hasher.update_u8(entrant.placement.unwrap_or(0));
            }
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================

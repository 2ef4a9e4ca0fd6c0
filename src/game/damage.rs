//! Damage Engine
//!
//! Computes one action's numeric outcome against one target.
//!
//! ## Pipeline
//!
//! ```text
//!  atk × power
//!    × timing (rhythm judgement, 1.0 without a rhythm phase)
//!    × combo (1 + 0.1·n, capped at 3.0)
//!    × affinity (resisted / advantaged / disadvantaged / neutral)
//!    × scale (environment boost, counter strikes)
//!    × (1 − def / (def + 500))
//!  ── hit roll: accuracy − evasion, clamped to [5%, 100%] ── miss → evaded
//!  ── crit roll: × crit damage
//!  ── reaction: basis × reaction mult × mastery bonus (added, not replaced)
//!  ── total = max(1, base + reaction)
//!  ── status procs rolled independently, reaction status appended
//! ```
//!
//! All arithmetic is integer/Q16.16 with i64 intermediates. Every roll
//! draws from the battle's [`DeterministicRng`] in a fixed order.

use serde::{Deserialize, Serialize};

use crate::core::fixed::{fixed_clamp, fixed_mul, percent, ratio, to_fixed, Fixed, FIXED_ONE, FIXED_SCALE};
use crate::core::rng::DeterministicRng;
use super::combatant::Stats;
use super::element::{Affinity, Element};
use super::reaction::{self, ReactionHit, StatusTarget};
use super::rhythm::{timing_multiplier, Judgement};
use super::skill::SkillDefinition;
use super::status::StatusEffect;

/// Mitigation constant `k` in `def / (def + k)`.
pub const DEFENSE_CONSTANT: i32 = 500;

/// Combo bonus per hit.
pub const COMBO_STEP: Fixed = percent(10);

/// Combo multiplier cap.
pub const COMBO_CAP: Fixed = percent(300);

/// Floor on hit chance.
pub const MIN_HIT_CHANCE: Fixed = percent(5);

/// Mastery curve numerator (2.78) and knee (1400).
pub const MASTERY_SCALE: Fixed = to_fixed(2.78);
const MASTERY_KNEE: i32 = 1400;

/// Outcome tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitResult {
    /// Normal hit
    Hit,
    /// Critical hit
    Critical,
    /// Critical hit on a perfect rhythm judgement
    PerfectCritical,
    /// Dodged; no damage, no effects
    Evaded,
}

/// Everything the engine needs to resolve one hit.
#[derive(Debug, Clone, Copy)]
pub struct AttackContext<'a> {
    /// Attacker's effective stats
    pub attacker: &'a Stats,
    /// Defender's effective stats
    pub defender: &'a Stats,
    /// Skill used
    pub skill: &'static SkillDefinition,
    /// Rhythm judgement, if the turn had a rhythm phase
    pub judgement: Option<Judgement>,
    /// Hits already in the combo chain
    pub combo_count: u32,
    /// Element of the attack (`None` = physical)
    pub attacker_element: Option<Element>,
    /// Defender's innate element (affinity)
    pub defender_element: Option<Element>,
    /// Defender's reaction partner: aura, else innate element
    pub defender_aura: Option<Element>,
    /// Residue elements in range of the defender
    pub field_elements: &'a [Element],
    /// Extra scale (environment boost, counter strike penalty)
    pub power_scale: Fixed,
}

/// Resolved hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DamageOutcome {
    /// Outcome tag
    pub result: HitResult,
    /// Damage before the reaction bonus
    pub base_damage: i32,
    /// Final damage (base + reaction, min 1 unless evaded)
    pub damage: i32,
    /// Crit landed
    pub critical: bool,
    /// Affinity classification
    pub affinity: Affinity,
    /// Reaction that fired
    pub reaction: Option<ReactionHit>,
    /// Reaction contribution to `damage`
    pub reaction_damage: i32,
    /// Effects for the defender
    pub target_effects: Vec<StatusEffect>,
    /// Effects for the attacker
    pub self_effects: Vec<StatusEffect>,
}

impl DamageOutcome {
    fn evaded(affinity: Affinity) -> Self {
        Self {
            result: HitResult::Evaded,
            base_damage: 0,
            damage: 0,
            critical: false,
            affinity,
            reaction: None,
            reaction_damage: 0,
            target_effects: Vec::new(),
            self_effects: Vec::new(),
        }
    }

    /// Whether the hit connected.
    pub fn landed(&self) -> bool {
        self.result != HitResult::Evaded
    }
}

#[inline]
fn mul_wide(value: i64, factor: Fixed) -> i64 {
    (value * factor as i64) >> FIXED_SCALE
}

#[inline]
fn to_i32(value: i64) -> i32 {
    value.clamp(0, i32::MAX as i64) as i32
}

/// Combo multiplier for a chain of `count` prior hits.
pub fn combo_multiplier(count: u32) -> Fixed {
    let bonus = (count.min(100) as i64 * COMBO_STEP as i64).min(i32::MAX as i64) as Fixed;
    (FIXED_ONE + bonus).min(COMBO_CAP)
}

/// Fraction of damage that gets through `def`. Never reaches zero.
pub fn mitigation_factor(def: i32) -> Fixed {
    let def = def.max(0);
    FIXED_ONE - ratio(def, def.saturating_add(DEFENSE_CONSTANT))
}

/// Chance to land a hit.
pub fn hit_chance(accuracy: Fixed, evasion: Fixed) -> Fixed {
    fixed_clamp(accuracy - evasion, MIN_HIT_CHANCE, FIXED_ONE)
}

/// Reaction damage scaling from elemental mastery.
pub fn mastery_bonus(elemental_mastery: i32) -> Fixed {
    let em = elemental_mastery.max(0);
    FIXED_ONE + fixed_mul(MASTERY_SCALE, ratio(em, em.saturating_add(MASTERY_KNEE)))
}

/// `floor(basis × multiplier × mastery bonus)`.
pub fn reaction_damage(basis: i32, multiplier: Fixed, elemental_mastery: i32) -> i32 {
    let scaled = mul_wide(basis.max(0) as i64, multiplier);
    to_i32(mul_wide(scaled, mastery_bonus(elemental_mastery)))
}

/// Resolve one attack against one target.
pub fn resolve_attack(ctx: &AttackContext<'_>, rng: &mut DeterministicRng) -> DamageOutcome {
    let affinity = Affinity::of(ctx.attacker_element, ctx.defender_element);

    // Steps 1-5
    let mut raw = mul_wide(ctx.attacker.atk.max(0) as i64, ctx.skill.power);
    raw = mul_wide(raw, timing_multiplier(ctx.judgement));
    raw = mul_wide(raw, combo_multiplier(ctx.combo_count));
    raw = mul_wide(raw, affinity.multiplier());
    raw = mul_wide(raw, ctx.power_scale);
    let pre_mitigation = raw;
    let mitigated = mul_wide(raw, mitigation_factor(ctx.defender.def));

    // Step 6
    if !rng.next_bool(hit_chance(ctx.attacker.accuracy, ctx.defender.evasion)) {
        return DamageOutcome::evaded(affinity);
    }

    // Step 7
    let critical = rng.next_bool(ctx.attacker.crit_rate);
    let crit_factor = if critical { ctx.attacker.crit_damage.max(FIXED_ONE) } else { FIXED_ONE };
    let base_damage = to_i32(mul_wide(mitigated, crit_factor));
    let result = match (critical, ctx.judgement) {
        (true, Some(Judgement::Perfect)) => HitResult::PerfectCritical,
        (true, _) => HitResult::Critical,
        (false, _) => HitResult::Hit,
    };

    // Step 8
    let reaction = reaction::resolve(ctx.attacker_element, ctx.defender_aura, ctx.field_elements);
    let mut reaction_dmg = 0;
    let mut target_effects = Vec::new();
    let mut self_effects = Vec::new();
    if let Some(hit) = &reaction {
        let descriptor = hit.descriptor();
        let basis = if descriptor.true_damage {
            to_i32(mul_wide(pre_mitigation, crit_factor))
        } else {
            base_damage
        };
        reaction_dmg = reaction_damage(basis, descriptor.multiplier, ctx.attacker.elemental_mastery);
    }

    // Step 9
    let damage = base_damage.saturating_add(reaction_dmg).max(1);

    // Step 10
    for proc in ctx.skill.effects {
        if rng.next_bool(proc.chance) {
            if proc.on_self {
                self_effects.push(proc.to_effect());
            } else {
                target_effects.push(proc.to_effect());
            }
        }
    }
    if let Some(status) = reaction.as_ref().and_then(|h| h.descriptor().status) {
        match status.target {
            StatusTarget::Defender => target_effects.push(status.to_effect()),
            StatusTarget::Attacker => self_effects.push(status.to_effect()),
        }
    }

    DamageOutcome {
        result,
        base_damage,
        damage,
        critical,
        affinity,
        reaction,
        reaction_damage: reaction_dmg,
        target_effects,
        self_effects,
    }
}

/// HP restored by a heal skill. At least 1.
pub fn heal_amount(healer: &Stats, skill: &SkillDefinition, judgement: Option<Judgement>, power_scale: Fixed) -> i32 {
    let mut raw = mul_wide(healer.atk.max(0) as i64, skill.power);
    raw = mul_wide(raw, timing_multiplier(judgement));
    raw = mul_wide(raw, power_scale);
    to_i32(raw).max(1)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::combatant::tests::stats;
    use crate::game::reaction::ReactionKind;
    use crate::game::skill::SkillId;
    use crate::game::status::StatusType;

    fn ctx<'a>(
        attacker: &'a Stats,
        defender: &'a Stats,
        skill: SkillId,
        attacker_element: Option<Element>,
        defender_element: Option<Element>,
    ) -> AttackContext<'a> {
        AttackContext {
            attacker,
            defender,
            skill: skill.definition(),
            judgement: None,
            combo_count: 0,
            attacker_element,
            defender_element,
            defender_aura: defender_element,
            field_elements: &[],
            power_scale: FIXED_ONE,
        }
    }

    #[test]
    fn test_physical_hit_no_defense() {
        let a = stats(1000, 100, 0, 100);
        let d = stats(1000, 50, 0, 100);
        let out = resolve_attack(&ctx(&a, &d, SkillId::Strike, None, None), &mut DeterministicRng::new(1));
        assert_eq!(out.result, HitResult::Hit);
        assert_eq!(out.damage, 100);
        assert_eq!(out.reaction, None);
    }

    #[test]
    fn test_mitigation_diminishing() {
        assert_eq!(mitigation_factor(0), FIXED_ONE);
        assert_eq!(mitigation_factor(500), FIXED_ONE / 2);
        assert!(mitigation_factor(1_000_000) > 0);
        assert!(mitigation_factor(100) > mitigation_factor(200));

        let a = stats(1000, 100, 0, 100);
        let d = stats(1000, 50, 500, 100);
        let out = resolve_attack(&ctx(&a, &d, SkillId::Strike, None, None), &mut DeterministicRng::new(1));
        assert_eq!(out.damage, 50);
    }

    #[test]
    fn test_minimum_one_damage() {
        let a = stats(1000, 1, 0, 100);
        let d = stats(1000, 50, 100_000, 100);
        let out = resolve_attack(&ctx(&a, &d, SkillId::Strike, None, None), &mut DeterministicRng::new(1));
        assert_eq!(out.damage, 1);
    }

    #[test]
    fn test_combo_multiplier_capped() {
        assert_eq!(combo_multiplier(0), FIXED_ONE);
        assert_eq!(combo_multiplier(5), FIXED_ONE + 5 * COMBO_STEP);
        assert_eq!(combo_multiplier(25), COMBO_CAP);
        assert_eq!(combo_multiplier(u32::MAX), COMBO_CAP);
        for n in 0..30 {
            assert!(combo_multiplier(n) <= combo_multiplier(n + 1));
        }
    }

    #[test]
    fn test_timing_multiplier_applies() {
        let a = stats(1000, 100, 0, 100);
        let d = stats(1000, 50, 0, 100);
        let mut c = ctx(&a, &d, SkillId::Strike, None, None);
        c.judgement = Some(Judgement::Perfect);
        let out = resolve_attack(&c, &mut DeterministicRng::new(1));
        assert_eq!(out.damage, 150);
    }

    #[test]
    fn test_evasion_short_circuits() {
        let mut a = stats(1000, 100, 0, 100);
        a.accuracy = 0;
        let mut d = stats(1000, 50, 0, 100);
        d.evasion = FIXED_ONE;

        // 5% floor: most rolls miss
        let mut rng = DeterministicRng::new(99);
        let misses = (0..200)
            .map(|_| resolve_attack(&ctx(&a, &d, SkillId::FlameLash, Some(Element::Fire), Some(Element::Ice)), &mut rng))
            .filter(|o| {
                if o.result == HitResult::Evaded {
                    assert_eq!(o.damage, 0);
                    assert!(o.target_effects.is_empty());
                    assert!(o.reaction.is_none());
                    true
                } else {
                    false
                }
            })
            .count();
        assert!(misses > 150 && misses < 200, "misses = {}", misses);
    }

    #[test]
    fn test_guaranteed_crit() {
        let mut a = stats(1000, 100, 0, 100);
        a.crit_rate = FIXED_ONE;
        a.crit_damage = percent(200);
        let d = stats(1000, 50, 0, 100);
        let mut c = ctx(&a, &d, SkillId::Strike, None, None);
        let out = resolve_attack(&c, &mut DeterministicRng::new(5));
        assert_eq!(out.result, HitResult::Critical);
        assert_eq!(out.damage, 200);

        c.judgement = Some(Judgement::Perfect);
        let out = resolve_attack(&c, &mut DeterministicRng::new(5));
        assert_eq!(out.result, HitResult::PerfectCritical);
    }

    #[test]
    fn test_water_on_fire_vaporizes() {
        let mut a = stats(1000, 100, 0, 100);
        a.elemental_mastery = 0;
        let d = stats(1000, 50, 0, 100);
        let out = resolve_attack(
            &ctx(&a, &d, SkillId::AquaJet, Some(Element::Water), Some(Element::Fire)),
            &mut DeterministicRng::new(8),
        );
        assert_eq!(out.reaction.as_ref().map(|r| r.kind), Some(ReactionKind::Vaporize));
        assert_eq!(out.affinity, Affinity::Advantaged);
        // Aqua Jet 130% × advantaged 150%
        assert_eq!(out.base_damage, 195);
        assert_eq!(out.reaction_damage, out.base_damage * 2);
        assert_eq!(out.damage, out.base_damage + out.reaction_damage);
    }

    #[test]
    fn test_mastery_scales_reaction() {
        assert_eq!(mastery_bonus(0), FIXED_ONE);
        assert!(mastery_bonus(200) > FIXED_ONE);
        assert!(mastery_bonus(100_000) < FIXED_ONE + MASTERY_SCALE);

        let mut a = stats(1000, 100, 0, 100);
        a.elemental_mastery = 200;
        let d = stats(1000, 50, 0, 100);
        let out = resolve_attack(
            &ctx(&a, &d, SkillId::FlameLash, Some(Element::Fire), Some(Element::Water)),
            &mut DeterministicRng::new(8),
        );
        assert_eq!(out.reaction.as_ref().map(|r| r.kind), Some(ReactionKind::Vaporize));
        assert_eq!(out.reaction_damage, reaction_damage(out.base_damage, percent(200), 200));
        assert!(out.reaction_damage > out.base_damage * 2);
    }

    #[test]
    fn test_reaction_status_routing() {
        let a = stats(1000, 100, 0, 100);
        let d = stats(1000, 50, 0, 100);

        let out = resolve_attack(
            &ctx(&a, &d, SkillId::AquaJet, Some(Element::Water), Some(Element::Ice)),
            &mut DeterministicRng::new(8),
        );
        assert!(out.target_effects.iter().any(|e| e.kind == StatusType::Freeze));

        let out = resolve_attack(
            &ctx(&a, &d, SkillId::StoneFist, Some(Element::Earth), Some(Element::Fire)),
            &mut DeterministicRng::new(8),
        );
        assert_eq!(out.reaction.as_ref().map(|r| r.kind), Some(ReactionKind::Crystallize));
        assert!(out.self_effects.iter().any(|e| e.kind == StatusType::Shield));
    }

    #[test]
    fn test_annihilate_ignores_defense() {
        let a = stats(1000, 100, 0, 100);
        let d = stats(1000, 50, 500, 100);
        let out = resolve_attack(
            &ctx(&a, &d, SkillId::Cataclysm, Some(Element::Void), Some(Element::Fire)),
            &mut DeterministicRng::new(8),
        );
        // Cataclysm 130 raw, 65 after mitigation; reaction uses the raw 130
        assert_eq!(out.base_damage, 65);
        assert_eq!(out.reaction_damage, reaction_damage(130, percent(140), 0));
    }

    #[test]
    fn test_guaranteed_self_effects() {
        let a = stats(1000, 100, 0, 100);
        let d = stats(1000, 50, 0, 100);
        let heal = heal_amount(&a, SkillId::Renewal.definition(), Some(Judgement::Great), FIXED_ONE);
        assert_eq!(heal, 187);
        assert_eq!(heal_amount(&stats(10, 0, 0, 1), SkillId::Mend.definition(), None, FIXED_ONE), 1);

        let out = resolve_attack(&ctx(&a, &d, SkillId::Strike, None, None), &mut DeterministicRng::new(2));
        assert!(out.self_effects.is_empty());
    }

    #[test]
    fn test_determinism() {
        let a = stats(1000, 120, 20, 100);
        let d = stats(1000, 50, 80, 100);
        let c = ctx(&a, &d, SkillId::ThunderClap, Some(Element::Thunder), Some(Element::Water));
        let mut r1 = DeterministicRng::new(4242);
        let mut r2 = DeterministicRng::new(4242);
        for _ in 0..100 {
            assert_eq!(resolve_attack(&c, &mut r1), resolve_attack(&c, &mut r2));
        }
    }
}

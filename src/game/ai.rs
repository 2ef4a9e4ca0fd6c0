//! Enemy AI
//!
//! Strategy dispatch by archetype tag. The AI only decides; the battle
//! state machine validates and executes the decision like any player
//! intent.
//!
//! | Archetype      | Rule                                                          |
//! |----------------|---------------------------------------------------------------|
//! | aggressive     | lowest-HP opponent, highest-power attack                      |
//! | defensive      | unused self/ally support skill, else basic attack at random   |
//! | support        | heal the most wounded ally, else random                       |
//! | boss_pattern   | fixed rotation per HP phase, highest-ATK opponent             |
//! | random         | uniform skill and target                                      |

use serde::{Deserialize, Serialize};

use crate::core::fixed::{percent, Fixed};
use crate::core::rng::DeterministicRng;
use super::combatant::{Combatant, CombatantId, Template};
use super::skill::{SkillId, SkillKind, TargetKind};

/// Support archetypes heal when an ally drops below this HP fraction.
pub const SUPPORT_HEAL_THRESHOLD: Fixed = percent(80);

/// Behavioral strategy of an AI-controlled combatant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiArchetype {
    /// Focus the weakest opponent
    Aggressive,
    /// Buff and guard first
    Defensive,
    /// Heal allies first
    Support,
    /// Scripted rotation
    BossPattern,
    /// Anything goes
    Random,
}

/// Target of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionTarget {
    /// One combatant
    Single(CombatantId),
    /// Every valid target for the skill
    All,
    /// The actor
    SelfTarget,
}

/// What an AI wants to do this turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiDecision {
    /// Use a skill
    Act {
        /// Skill
        skill: SkillId,
        /// Target
        target: ActionTarget,
    },
    /// Nothing to do (no valid targets)
    Wait,
}

/// Pick a skill and target for `actor`.
///
/// `opponents` and `allies` may include dead combatants; they are filtered
/// here. `allies` should include the actor itself.
pub fn choose_action(
    archetype: AiArchetype,
    actor: &Combatant,
    opponents: &[&Combatant],
    allies: &[&Combatant],
    rng: &mut DeterministicRng,
) -> AiDecision {
    let opponents: Vec<&Combatant> = opponents.iter().copied().filter(|c| c.alive).collect();
    let allies: Vec<&Combatant> = allies.iter().copied().filter(|c| c.alive).collect();
    if opponents.is_empty() || !actor.alive {
        return AiDecision::Wait;
    }

    let usable = usable_skills(actor);
    match archetype {
        AiArchetype::Aggressive => aggressive(actor, &usable, &opponents),
        AiArchetype::Defensive => defensive(actor, &usable, &opponents, rng),
        AiArchetype::Support => support(actor, &usable, &opponents, &allies, rng),
        AiArchetype::BossPattern => boss_pattern(actor, &usable, &opponents),
        AiArchetype::Random => random(actor, &usable, &opponents, &allies, rng),
    }
}

/// Skills the actor may use right now (basic only while silenced).
pub fn usable_skills(actor: &Combatant) -> Vec<SkillId> {
    if actor.status.can_use_skills() {
        actor.skills.clone()
    } else {
        vec![actor.basic_skill()]
    }
}

fn act(skill: SkillId, target: ActionTarget) -> AiDecision {
    AiDecision::Act { skill, target }
}

fn aggressive(actor: &Combatant, usable: &[SkillId], opponents: &[&Combatant]) -> AiDecision {
    let skill = usable
        .iter()
        .copied()
        .filter(|s| s.definition().kind == SkillKind::Attack)
        .max_by_key(|s| s.definition().power)
        .unwrap_or_else(|| actor.basic_skill());

    if skill.definition().target.is_area() {
        return act(skill, ActionTarget::All);
    }
    match opponents.iter().min_by_key(|c| (c.stats.hp, c.id)) {
        Some(target) => act(skill, ActionTarget::Single(target.id)),
        None => AiDecision::Wait,
    }
}

fn defensive(
    actor: &Combatant,
    usable: &[SkillId],
    opponents: &[&Combatant],
    rng: &mut DeterministicRng,
) -> AiDecision {
    let fresh_support = usable.iter().copied().find(|s| {
        let def = s.definition();
        def.kind == SkillKind::Support
            && def.target.is_friendly()
            && def.effects.iter().any(|e| !actor.status.has(e.status))
    });

    if let Some(skill) = fresh_support {
        let target = match skill.definition().target {
            TargetKind::AllAllies => ActionTarget::All,
            TargetKind::SingleAlly => ActionTarget::Single(actor.id),
            _ => ActionTarget::SelfTarget,
        };
        return act(skill, target);
    }

    match rng.choose(opponents) {
        Some(target) => act(actor.basic_skill(), ActionTarget::Single(target.id)),
        None => AiDecision::Wait,
    }
}

fn support(
    actor: &Combatant,
    usable: &[SkillId],
    opponents: &[&Combatant],
    allies: &[&Combatant],
    rng: &mut DeterministicRng,
) -> AiDecision {
    let heal = usable.iter().copied().find(|s| s.definition().kind == SkillKind::Heal);
    let wounded = allies
        .iter()
        .filter(|c| c.hp_ratio() < SUPPORT_HEAL_THRESHOLD)
        .min_by_key(|c| (c.hp_ratio(), c.id));

    if let (Some(skill), Some(ally)) = (heal, wounded) {
        let target = if skill.definition().target.is_area() {
            ActionTarget::All
        } else {
            ActionTarget::Single(ally.id)
        };
        return act(skill, target);
    }

    random(actor, usable, opponents, allies, rng)
}

fn boss_pattern(actor: &Combatant, usable: &[SkillId], opponents: &[&Combatant]) -> AiDecision {
    let pattern = match actor.template {
        Template::Enemy(kind) => kind.definition().boss,
        Template::Character(_) => None,
    };
    let Some(pattern) = pattern else {
        return aggressive(actor, usable, opponents);
    };

    let rotation = if actor.hp_ratio() <= pattern.threshold {
        pattern.phase_two
    } else {
        pattern.phase_one
    };
    let scripted = rotation
        .get(actor.ai_cursor as usize % rotation.len().max(1))
        .copied()
        .unwrap_or_else(|| actor.basic_skill());
    let skill = if usable.contains(&scripted) { scripted } else { actor.basic_skill() };

    let def = skill.definition();
    if def.target.is_area() {
        return act(skill, ActionTarget::All);
    }
    if def.target.is_friendly() {
        return act(skill, ActionTarget::SelfTarget);
    }
    match opponents.iter().max_by_key(|c| (c.effective_stats().atk, std::cmp::Reverse(c.id))) {
        Some(target) => act(skill, ActionTarget::Single(target.id)),
        None => AiDecision::Wait,
    }
}

fn random(
    actor: &Combatant,
    usable: &[SkillId],
    opponents: &[&Combatant],
    allies: &[&Combatant],
    rng: &mut DeterministicRng,
) -> AiDecision {
    let skill = rng.choose(usable).copied().unwrap_or_else(|| actor.basic_skill());
    let target = match skill.definition().target {
        TargetKind::AllEnemies | TargetKind::AllAllies => Some(ActionTarget::All),
        TargetKind::SelfOnly => Some(ActionTarget::SelfTarget),
        TargetKind::SingleAlly => rng.choose(allies).map(|c| ActionTarget::Single(c.id)),
        TargetKind::SingleEnemy => rng.choose(opponents).map(|c| ActionTarget::Single(c.id)),
    };
    match target {
        Some(target) => act(skill, target),
        None => AiDecision::Wait,
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::combatant::Side;
    use crate::game::content::{spawn_character, spawn_enemy, CharacterId, EnemyKind};
    use crate::game::combatant::PlayerId;
    use crate::game::status::{StatusEffect, StatusType};

    fn party() -> Vec<Combatant> {
        vec![
            spawn_character(CombatantId(1), CharacterId::Ember, 10, Side::Party, PlayerId::new("a"), ""),
            spawn_character(CombatantId(2), CharacterId::Terra, 10, Side::Party, PlayerId::new("b"), ""),
            spawn_character(CombatantId(3), CharacterId::Volt, 10, Side::Party, PlayerId::new("c"), ""),
        ]
    }

    fn refs(v: &[Combatant]) -> Vec<&Combatant> {
        v.iter().collect()
    }

    #[test]
    fn test_no_targets_waits() {
        let goblin = spawn_enemy(CombatantId(10), EnemyKind::Goblin, 5, Side::Enemies);
        let mut rng = DeterministicRng::new(1);
        for archetype in [
            AiArchetype::Aggressive,
            AiArchetype::Defensive,
            AiArchetype::Support,
            AiArchetype::BossPattern,
            AiArchetype::Random,
        ] {
            assert_eq!(choose_action(archetype, &goblin, &[], &[&goblin], &mut rng), AiDecision::Wait);
        }

        let mut p = party();
        for c in &mut p {
            c.apply_damage(i32::MAX);
        }
        assert_eq!(
            choose_action(AiArchetype::Aggressive, &goblin, &refs(&p), &[&goblin], &mut rng),
            AiDecision::Wait
        );
    }

    #[test]
    fn test_aggressive_targets_lowest_hp() {
        let goblin = spawn_enemy(CombatantId(10), EnemyKind::Goblin, 5, Side::Enemies);
        let mut p = party();
        let max_hp = p[1].stats.max_hp;
        p[1].apply_damage(max_hp - 5);
        let decision = choose_action(AiArchetype::Aggressive, &goblin, &refs(&p), &[&goblin], &mut DeterministicRng::new(1));
        assert_eq!(
            decision,
            AiDecision::Act { skill: SkillId::GaleBlade, target: ActionTarget::Single(CombatantId(2)) }
        );
    }

    #[test]
    fn test_silence_restricts_to_basic() {
        let mut goblin = spawn_enemy(CombatantId(10), EnemyKind::Goblin, 5, Side::Enemies);
        goblin.status.apply(StatusEffect::new(StatusType::Silence, 2, 0));
        let p = party();
        let decision = choose_action(AiArchetype::Aggressive, &goblin, &refs(&p), &[&goblin], &mut DeterministicRng::new(1));
        assert!(matches!(decision, AiDecision::Act { skill: SkillId::Strike, .. }));
    }

    #[test]
    fn test_defensive_guards_then_attacks() {
        let mut golem = spawn_enemy(CombatantId(10), EnemyKind::Golem, 5, Side::Enemies);
        let p = party();
        let mut rng = DeterministicRng::new(3);

        let first = choose_action(AiArchetype::Defensive, &golem, &refs(&p), &[&golem], &mut rng);
        assert_eq!(first, AiDecision::Act { skill: SkillId::Guard, target: ActionTarget::SelfTarget });

        golem.status.apply(StatusEffect::new(StatusType::DefUp, 2, percent(40)));
        let second = choose_action(AiArchetype::Defensive, &golem, &refs(&p), &[&golem], &mut rng);
        assert!(matches!(second, AiDecision::Act { skill: SkillId::Strike, target: ActionTarget::Single(_) }));
    }

    #[test]
    fn test_support_heals_most_wounded() {
        let shaman = spawn_enemy(CombatantId(10), EnemyKind::Shaman, 5, Side::Enemies);
        let mut slime = spawn_enemy(CombatantId(11), EnemyKind::Slime, 5, Side::Enemies);
        let mut goblin = spawn_enemy(CombatantId(12), EnemyKind::Goblin, 5, Side::Enemies);
        slime.apply_damage(slime.stats.max_hp / 2);
        goblin.apply_damage(goblin.stats.max_hp * 3 / 4);
        let p = party();

        let decision = choose_action(
            AiArchetype::Support,
            &shaman,
            &refs(&p),
            &[&shaman, &slime, &goblin],
            &mut DeterministicRng::new(1),
        );
        assert_eq!(decision, AiDecision::Act { skill: SkillId::Mend, target: ActionTarget::Single(CombatantId(12)) });
    }

    #[test]
    fn test_boss_cycles_and_phases() {
        let mut drake = spawn_enemy(CombatantId(10), EnemyKind::Drake, 10, Side::Enemies);
        let p = party();
        let mut rng = DeterministicRng::new(1);

        // Phase one: Dragon Claw at the highest-ATK member (Volt)
        let d0 = choose_action(AiArchetype::BossPattern, &drake, &refs(&p), &[&drake], &mut rng);
        assert_eq!(d0, AiDecision::Act { skill: SkillId::DragonClaw, target: ActionTarget::Single(CombatantId(3)) });

        drake.ai_cursor = 1;
        let d1 = choose_action(AiArchetype::BossPattern, &drake, &refs(&p), &[&drake], &mut rng);
        assert_eq!(d1, AiDecision::Act { skill: SkillId::Firestorm, target: ActionTarget::All });

        // Phase two at half HP
        drake.ai_cursor = 0;
        drake.apply_damage(drake.stats.max_hp / 2 + 1);
        let d2 = choose_action(AiArchetype::BossPattern, &drake, &refs(&p), &[&drake], &mut rng);
        assert_eq!(d2, AiDecision::Act { skill: SkillId::Roar, target: ActionTarget::SelfTarget });
    }

    #[test]
    fn test_random_is_deterministic() {
        let slime = spawn_enemy(CombatantId(10), EnemyKind::Slime, 5, Side::Enemies);
        let p = party();
        let mut r1 = DeterministicRng::new(9);
        let mut r2 = DeterministicRng::new(9);
        for _ in 0..20 {
            let a = choose_action(AiArchetype::Random, &slime, &refs(&p), &[&slime], &mut r1);
            let b = choose_action(AiArchetype::Random, &slime, &refs(&p), &[&slime], &mut r2);
            assert_eq!(a, b);
            assert_ne!(a, AiDecision::Wait);
        }
    }
}

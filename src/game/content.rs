//! Content Tables
//!
//! Playable characters, enemies, environments and encounter generation.
//! Everything here is static data plus a few constructors that turn a
//! definition into a battle-ready [`Combatant`].

use serde::{Deserialize, Serialize};

use crate::core::fixed::{percent, scale_int, Fixed};
use crate::core::rng::DeterministicRng;
use super::ai::AiArchetype;
use super::combatant::{Combatant, CombatantId, Controller, PlayerId, Side, Stats, Template};
use super::element::Element;
use super::skill::SkillId;

/// Level characters enter battle at.
pub const DEFAULT_CHARACTER_LEVEL: u8 = 10;

/// Per-level growth of HP/ATK/DEF.
pub const LEVEL_GROWTH: Fixed = percent(8);

/// Chance a PvE encounter is a boss fight.
pub const BOSS_ENCOUNTER_CHANCE: Fixed = percent(20);

// =============================================================================
// STATS
// =============================================================================

/// Level-1 stat line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseStats {
    /// HP
    pub hp: i32,
    /// ATK
    pub atk: i32,
    /// DEF
    pub def: i32,
    /// Speed
    pub speed: i32,
    /// Crit chance
    pub crit_rate: Fixed,
    /// Crit multiplier
    pub crit_damage: Fixed,
    /// Accuracy
    pub accuracy: Fixed,
    /// Evasion
    pub evasion: Fixed,
    /// Elemental mastery
    pub elemental_mastery: i32,
}

impl BaseStats {
    /// Scale HP/ATK/DEF for a level. Level 1 returns the base values.
    pub fn at_level(&self, level: u8) -> Stats {
        let growth = LEVEL_GROWTH * (level.max(1) as i32 - 1);
        let grow = |v: i32| v.saturating_add(scale_int(v, growth));
        Stats {
            hp: grow(self.hp),
            max_hp: grow(self.hp),
            atk: grow(self.atk),
            def: grow(self.def),
            speed: self.speed,
            crit_rate: self.crit_rate,
            crit_damage: self.crit_damage,
            accuracy: self.accuracy,
            evasion: self.evasion,
            elemental_mastery: self.elemental_mastery,
        }
    }
}

#[allow(clippy::too_many_arguments)]
const fn base(hp: i32, atk: i32, def: i32, speed: i32, crit: i32, acc: i32, eva: i32, em: i32) -> BaseStats {
    BaseStats {
        hp,
        atk,
        def,
        speed,
        crit_rate: percent(crit),
        crit_damage: percent(150),
        accuracy: percent(acc),
        evasion: percent(eva),
        elemental_mastery: em,
    }
}

// =============================================================================
// CHARACTERS
// =============================================================================

/// Playable character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CharacterId {
    /// Fire striker
    Ember,
    /// Water healer
    Tide,
    /// Ice controller
    Frost,
    /// Thunder nuker
    Volt,
    /// Wind support
    Gale,
    /// Earth tank
    Terra,
    /// Nature healer
    Sylva,
    /// Light guardian
    Lumen,
}

/// Static character data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacterDefinition {
    /// Identifier
    pub id: CharacterId,
    /// Display name
    pub name: &'static str,
    /// Innate element
    pub element: Element,
    /// Level-1 stats
    pub base: BaseStats,
    /// Skill list; index 1 is the signature skill
    pub skills: &'static [SkillId],
}

static CHARACTERS: [CharacterDefinition; 8] = [
    CharacterDefinition {
        id: CharacterId::Ember,
        name: "Ember",
        element: Element::Fire,
        base: base(520, 68, 30, 110, 15, 95, 5, 60),
        skills: &[SkillId::Strike, SkillId::FlameLash, SkillId::Inferno],
    },
    CharacterDefinition {
        id: CharacterId::Tide,
        name: "Tide",
        element: Element::Water,
        base: base(580, 52, 36, 100, 5, 95, 5, 90),
        skills: &[SkillId::Strike, SkillId::AquaJet, SkillId::HealingRain],
    },
    CharacterDefinition {
        id: CharacterId::Frost,
        name: "Frost",
        element: Element::Ice,
        base: base(540, 60, 34, 96, 10, 95, 5, 70),
        skills: &[SkillId::Strike, SkillId::FrostLance, SkillId::Blizzard],
    },
    CharacterDefinition {
        id: CharacterId::Volt,
        name: "Volt",
        element: Element::Thunder,
        base: base(500, 72, 28, 118, 12, 92, 8, 80),
        skills: &[SkillId::Strike, SkillId::ThunderClap, SkillId::StaticField],
    },
    CharacterDefinition {
        id: CharacterId::Gale,
        name: "Gale",
        element: Element::Wind,
        base: base(510, 58, 30, 124, 10, 95, 12, 100),
        skills: &[SkillId::Strike, SkillId::GaleBlade, SkillId::Tailwind],
    },
    CharacterDefinition {
        id: CharacterId::Terra,
        name: "Terra",
        element: Element::Earth,
        base: base(700, 50, 52, 84, 5, 95, 3, 50),
        skills: &[SkillId::Strike, SkillId::StoneFist, SkillId::Bulwark],
    },
    CharacterDefinition {
        id: CharacterId::Sylva,
        name: "Sylva",
        element: Element::Nature,
        base: base(560, 54, 34, 104, 8, 95, 6, 110),
        skills: &[SkillId::Strike, SkillId::ThornWhip, SkillId::Renewal],
    },
    CharacterDefinition {
        id: CharacterId::Lumen,
        name: "Lumen",
        element: Element::Light,
        base: base(600, 56, 42, 98, 8, 95, 5, 70),
        skills: &[SkillId::Strike, SkillId::Radiance, SkillId::Sanctuary],
    },
];

impl CharacterId {
    /// Every character in roster order.
    pub const ALL: [CharacterId; 8] = [
        CharacterId::Ember,
        CharacterId::Tide,
        CharacterId::Frost,
        CharacterId::Volt,
        CharacterId::Gale,
        CharacterId::Terra,
        CharacterId::Sylva,
        CharacterId::Lumen,
    ];

    /// Static definition.
    pub fn definition(self) -> &'static CharacterDefinition {
        &CHARACTERS[self as usize]
    }

    /// Skill offered in the rhythm prompt.
    pub fn signature_skill(self) -> SkillId {
        self.definition().skills.get(1).copied().unwrap_or(SkillId::Strike)
    }
}

/// Build a player-controlled combatant.
pub fn spawn_character(
    id: CombatantId,
    character: CharacterId,
    level: u8,
    side: Side,
    player: PlayerId,
    display_name: &str,
) -> Combatant {
    let def = character.definition();
    let name = if display_name.is_empty() { def.name } else { display_name };
    Combatant::new(
        id,
        name,
        Template::Character(character),
        level,
        side,
        Controller::Player(player),
        def.base.at_level(level),
        Some(def.element),
        def.skills.to_vec(),
    )
}

// =============================================================================
// ENEMIES
// =============================================================================

/// Enemy type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnemyKind {
    /// Weak water blob
    Slime,
    /// Physical skirmisher
    Goblin,
    /// Dark caster
    Wraith,
    /// Earth bruiser
    Golem,
    /// Nature healer
    Shaman,
    /// Fire boss
    Drake,
    /// Rhythm-challenge boss
    Maestro,
    /// Creative-mode punching bag
    TrainingDummy,
}

/// Two-phase boss rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BossPattern {
    /// Rotation above the threshold
    pub phase_one: &'static [SkillId],
    /// Rotation at or below the threshold
    pub phase_two: &'static [SkillId],
    /// HP fraction where phase two starts
    pub threshold: Fixed,
}

/// Possible drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LootEntry {
    /// Item id
    pub item: &'static str,
    /// Drop chance
    pub chance: Fixed,
}

/// Static enemy data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnemyDefinition {
    /// Identifier
    pub kind: EnemyKind,
    /// Display name
    pub name: &'static str,
    /// Innate element
    pub element: Option<Element>,
    /// Level-1 stats
    pub base: BaseStats,
    /// Skill list; the first is the basic attack
    pub skills: &'static [SkillId],
    /// Decision strategy
    pub archetype: AiArchetype,
    /// Boss rotation
    pub boss: Option<BossPattern>,
    /// Gold per level
    pub gold: u32,
    /// XP per level
    pub xp: u32,
    /// Drops
    pub loot: &'static [LootEntry],
}

const fn loot(item: &'static str, chance: i32) -> LootEntry {
    LootEntry { item, chance: percent(chance) }
}

const SLIME_LOOT: &[LootEntry] = &[loot("slime_gel", 60), loot("water_shard", 10)];
const GOBLIN_LOOT: &[LootEntry] = &[loot("rusty_blade", 30), loot("gold_pouch", 15)];
const WRAITH_LOOT: &[LootEntry] = &[loot("shadow_essence", 35), loot("dark_shard", 12)];
const GOLEM_LOOT: &[LootEntry] = &[loot("stone_core", 40), loot("earth_shard", 12)];
const SHAMAN_LOOT: &[LootEntry] = &[loot("herb_bundle", 50), loot("nature_shard", 12)];
const DRAKE_LOOT: &[LootEntry] = &[loot("drake_scale", 100), loot("fire_crystal", 40), loot("ancient_relic", 5)];
const MAESTRO_LOOT: &[LootEntry] = &[loot("golden_baton", 100), loot("thunder_crystal", 40)];

static ENEMIES: [EnemyDefinition; 8] = [
    EnemyDefinition {
        kind: EnemyKind::Slime,
        name: "Slime",
        element: Some(Element::Water),
        base: base(260, 34, 18, 80, 5, 90, 5, 20),
        skills: &[SkillId::Strike, SkillId::AquaJet],
        archetype: AiArchetype::Random,
        boss: None,
        gold: 4,
        xp: 6,
        loot: SLIME_LOOT,
    },
    EnemyDefinition {
        kind: EnemyKind::Goblin,
        name: "Goblin",
        element: None,
        base: base(300, 42, 20, 106, 10, 92, 10, 0),
        skills: &[SkillId::Strike, SkillId::GaleBlade],
        archetype: AiArchetype::Aggressive,
        boss: None,
        gold: 6,
        xp: 8,
        loot: GOBLIN_LOOT,
    },
    EnemyDefinition {
        kind: EnemyKind::Wraith,
        name: "Wraith",
        element: Some(Element::Dark),
        base: base(280, 46, 16, 112, 10, 92, 15, 60),
        skills: &[SkillId::Strike, SkillId::DarkBolt],
        archetype: AiArchetype::Aggressive,
        boss: None,
        gold: 7,
        xp: 10,
        loot: WRAITH_LOOT,
    },
    EnemyDefinition {
        kind: EnemyKind::Golem,
        name: "Golem",
        element: Some(Element::Earth),
        base: base(480, 38, 44, 70, 5, 90, 0, 20),
        skills: &[SkillId::Strike, SkillId::StoneFist, SkillId::Guard],
        archetype: AiArchetype::Defensive,
        boss: None,
        gold: 8,
        xp: 12,
        loot: GOLEM_LOOT,
    },
    EnemyDefinition {
        kind: EnemyKind::Shaman,
        name: "Shaman",
        element: Some(Element::Nature),
        base: base(290, 36, 22, 96, 5, 92, 8, 80),
        skills: &[SkillId::Strike, SkillId::VenomSpit, SkillId::Mend],
        archetype: AiArchetype::Support,
        boss: None,
        gold: 7,
        xp: 10,
        loot: SHAMAN_LOOT,
    },
    EnemyDefinition {
        kind: EnemyKind::Drake,
        name: "Elder Drake",
        element: Some(Element::Fire),
        base: base(1600, 58, 40, 100, 10, 95, 5, 120),
        skills: &[SkillId::Strike, SkillId::DragonClaw, SkillId::Firestorm, SkillId::Roar, SkillId::Cataclysm],
        archetype: AiArchetype::BossPattern,
        boss: Some(BossPattern {
            phase_one: &[SkillId::DragonClaw, SkillId::Firestorm, SkillId::Strike],
            phase_two: &[SkillId::Roar, SkillId::Cataclysm, SkillId::DragonClaw, SkillId::Firestorm],
            threshold: percent(50),
        }),
        gold: 40,
        xp: 60,
        loot: DRAKE_LOOT,
    },
    EnemyDefinition {
        kind: EnemyKind::Maestro,
        name: "Storm Maestro",
        element: Some(Element::Thunder),
        base: base(1400, 54, 36, 108, 10, 95, 8, 140),
        skills: &[SkillId::Strike, SkillId::Crescendo, SkillId::ThunderClap, SkillId::Roar],
        archetype: AiArchetype::BossPattern,
        boss: Some(BossPattern {
            phase_one: &[SkillId::ThunderClap, SkillId::Crescendo, SkillId::Strike],
            phase_two: &[SkillId::Roar, SkillId::Crescendo, SkillId::Crescendo, SkillId::ThunderClap],
            threshold: percent(50),
        }),
        gold: 45,
        xp: 70,
        loot: MAESTRO_LOOT,
    },
    EnemyDefinition {
        kind: EnemyKind::TrainingDummy,
        name: "Training Dummy",
        element: None,
        base: base(5000, 1, 0, 1, 0, 50, 0, 0),
        skills: &[SkillId::Strike, SkillId::Guard],
        archetype: AiArchetype::Defensive,
        boss: None,
        gold: 0,
        xp: 0,
        loot: &[],
    },
];

impl EnemyKind {
    /// Enemies that appear in ordinary encounters.
    pub const COMMON: [EnemyKind; 5] = [
        EnemyKind::Slime,
        EnemyKind::Goblin,
        EnemyKind::Wraith,
        EnemyKind::Golem,
        EnemyKind::Shaman,
    ];

    /// Static definition.
    pub fn definition(self) -> &'static EnemyDefinition {
        &ENEMIES[self as usize]
    }

    /// Whether this is a boss.
    pub fn is_boss(self) -> bool {
        self.definition().boss.is_some()
    }
}

/// Build an AI-controlled enemy.
pub fn spawn_enemy(id: CombatantId, kind: EnemyKind, level: u8, side: Side) -> Combatant {
    let def = kind.definition();
    Combatant::new(
        id,
        def.name,
        Template::Enemy(kind),
        level,
        side,
        Controller::Ai(def.archetype),
        def.base.at_level(level),
        def.element,
        def.skills.to_vec(),
    )
}

// =============================================================================
// ENVIRONMENTS & ENCOUNTERS
// =============================================================================

/// Battlefield backdrop. An element-aligned environment boosts matching skills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    /// Neutral ground
    Arena,
    /// Fire-aligned
    Volcano,
    /// Water-aligned
    Coast,
    /// Ice-aligned
    Glacier,
    /// Thunder-aligned
    Stormpeak,
    /// Nature-aligned
    Grove,
    /// Light-aligned
    Sanctum,
    /// Dark-aligned
    Abyss,
}

impl Environment {
    /// Every environment.
    pub const ALL: [Environment; 8] = [
        Environment::Arena,
        Environment::Volcano,
        Environment::Coast,
        Environment::Glacier,
        Environment::Stormpeak,
        Environment::Grove,
        Environment::Sanctum,
        Environment::Abyss,
    ];

    /// Boosted element.
    pub fn element(self) -> Option<Element> {
        match self {
            Environment::Arena => None,
            Environment::Volcano => Some(Element::Fire),
            Environment::Coast => Some(Element::Water),
            Environment::Glacier => Some(Element::Ice),
            Environment::Stormpeak => Some(Element::Thunder),
            Environment::Grove => Some(Element::Nature),
            Environment::Sanctum => Some(Element::Light),
            Environment::Abyss => Some(Element::Dark),
        }
    }
}

/// Enemy roster for one battle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encounter {
    /// Enemies and their levels
    pub enemies: Vec<(EnemyKind, u8)>,
    /// Backdrop
    pub environment: Environment,
    /// Contains a boss
    pub is_boss: bool,
}

/// Roll a PvE encounter for a party.
///
/// Ordinary fights field one more enemy than the party has members.
/// Boss fights field the drake plus up to two escorts.
pub fn generate_encounter(party_size: usize, level: u8, rng: &mut DeterministicRng) -> Encounter {
    let environment = rng.choose(&Environment::ALL).copied().unwrap_or(Environment::Arena);
    let is_boss = rng.next_bool(BOSS_ENCOUNTER_CHANCE);

    let mut enemies = Vec::new();
    if is_boss {
        enemies.push((EnemyKind::Drake, level));
        for _ in 0..party_size.min(2) {
            let kind = rng.choose(&EnemyKind::COMMON).copied().unwrap_or(EnemyKind::Slime);
            enemies.push((kind, level.saturating_sub(2).max(1)));
        }
    } else {
        for _ in 0..party_size.max(1) + 1 {
            let kind = rng.choose(&EnemyKind::COMMON).copied().unwrap_or(EnemyKind::Slime);
            let jitter = rng.next_int_range(-1, 1);
            enemies.push((kind, (level as i32 + jitter).clamp(1, u8::MAX as i32) as u8));
        }
    }

    Encounter { enemies, environment, is_boss }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_indexed_by_id() {
        for c in CharacterId::ALL {
            assert_eq!(c.definition().id, c);
            assert!(c.definition().skills.first() == Some(&SkillId::Strike));
        }
        for kind in EnemyKind::COMMON {
            assert_eq!(kind.definition().kind, kind);
            assert!(!kind.is_boss());
        }
        assert!(EnemyKind::Drake.is_boss());
        assert!(EnemyKind::Maestro.is_boss());
    }

    #[test]
    fn test_level_scaling() {
        let base = CharacterId::Ember.definition().base;
        let l1 = base.at_level(1);
        let l10 = base.at_level(10);
        assert_eq!(l1.max_hp, base.hp);
        assert!(l10.max_hp > l1.max_hp);
        assert!(l10.atk > l1.atk);
        assert_eq!(l10.speed, l1.speed);
        assert_eq!(l10.hp, l10.max_hp);
    }

    #[test]
    fn test_spawn_character() {
        let c = spawn_character(
            CombatantId(1),
            CharacterId::Tide,
            DEFAULT_CHARACTER_LEVEL,
            Side::Party,
            PlayerId::new("p1"),
            "Alice",
        );
        assert_eq!(c.name, "Alice");
        assert_eq!(c.element, Some(Element::Water));
        assert_eq!(c.player_id(), Some(&PlayerId::new("p1")));
        assert_eq!(CharacterId::Tide.signature_skill(), SkillId::AquaJet);
    }

    #[test]
    fn test_spawn_enemy_uses_archetype() {
        let e = spawn_enemy(CombatantId(9), EnemyKind::Shaman, 5, Side::Enemies);
        assert_eq!(e.controller, Controller::Ai(AiArchetype::Support));
        assert!(e.alive);
    }

    #[test]
    fn test_encounter_generation_deterministic() {
        let mut rng1 = DeterministicRng::new(77);
        let mut rng2 = DeterministicRng::new(77);
        for _ in 0..50 {
            let a = generate_encounter(3, 10, &mut rng1);
            let b = generate_encounter(3, 10, &mut rng2);
            assert_eq!(a, b);
            if a.is_boss {
                assert_eq!(a.enemies[0].0, EnemyKind::Drake);
                assert_eq!(a.enemies.len(), 3);
            } else {
                assert_eq!(a.enemies.len(), 4);
            }
        }
    }
}

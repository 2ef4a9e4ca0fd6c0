//! Skill Definitions
//!
//! Skills are a closed set keyed by [`SkillId`]; each maps to one static
//! [`SkillDefinition`]. Power is a fraction of the user's ATK.

use serde::{Deserialize, Serialize};

use crate::core::fixed::{percent, Fixed, FIXED_ONE};
use super::element::Element;
use super::status::{StatusEffect, StatusType};

/// Skill identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillId {
    /// Basic physical attack
    Strike,
    /// Fire single target
    FlameLash,
    /// Fire area
    Inferno,
    /// Water single target
    AquaJet,
    /// Water party heal
    HealingRain,
    /// Ice single target
    FrostLance,
    /// Ice area
    Blizzard,
    /// Thunder single target
    ThunderClap,
    /// Thunder area
    StaticField,
    /// Wind single target
    GaleBlade,
    /// Wind party haste
    Tailwind,
    /// Earth single target
    StoneFist,
    /// Earth self shield + counter
    Bulwark,
    /// Nature single target
    ThornWhip,
    /// Nature single heal
    Renewal,
    /// Light single target
    Radiance,
    /// Light party guard
    Sanctuary,
    /// Enemy poison attack
    VenomSpit,
    /// Enemy self guard
    Guard,
    /// Enemy dark attack
    DarkBolt,
    /// Enemy ally heal
    Mend,
    /// Boss heavy physical
    DragonClaw,
    /// Boss fire area
    Firestorm,
    /// Boss self buff
    Roar,
    /// Boss void area
    Cataclysm,
    /// Rhythm boss thunder area
    Crescendo,
}

/// Broad skill category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillKind {
    /// Deals damage
    Attack,
    /// Restores HP
    Heal,
    /// Applies effects only
    Support,
}

/// Who a skill can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    /// One opponent
    SingleEnemy,
    /// Every living opponent
    AllEnemies,
    /// The user
    SelfOnly,
    /// One ally (user included)
    SingleAlly,
    /// Every living ally
    AllAllies,
}

impl TargetKind {
    /// Hits every valid target without a selection.
    pub fn is_area(self) -> bool {
        matches!(self, TargetKind::AllEnemies | TargetKind::AllAllies)
    }

    /// Targets the user's own side.
    pub fn is_friendly(self) -> bool {
        matches!(self, TargetKind::SelfOnly | TargetKind::SingleAlly | TargetKind::AllAllies)
    }
}

/// Status a skill may inflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkillEffect {
    /// Effect kind
    pub status: StatusType,
    /// Proc chance
    pub chance: Fixed,
    /// Turns
    pub duration: u8,
    /// Magnitude
    pub value: Fixed,
    /// Applied to the user instead of the target
    pub on_self: bool,
}

impl SkillEffect {
    /// Materialize as a ledger entry.
    pub fn to_effect(&self) -> StatusEffect {
        StatusEffect::new(self.status, self.duration, self.value)
    }
}

/// Static skill data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkillDefinition {
    /// Identifier
    pub id: SkillId,
    /// Display name
    pub name: &'static str,
    /// Category
    pub kind: SkillKind,
    /// Targeting
    pub target: TargetKind,
    /// ATK fraction
    pub power: Fixed,
    /// Element (`None` = physical)
    pub element: Option<Element>,
    /// Possible status procs
    pub effects: &'static [SkillEffect],
    /// Usable while silenced
    pub basic: bool,
}

const fn effect(status: StatusType, chance: i32, duration: u8, value: i32) -> SkillEffect {
    SkillEffect {
        status,
        chance: percent(chance),
        duration,
        value: percent(value),
        on_self: false,
    }
}

const fn self_effect(status: StatusType, duration: u8, value: i32) -> SkillEffect {
    SkillEffect {
        status,
        chance: FIXED_ONE,
        duration,
        value: percent(value),
        on_self: true,
    }
}

const fn attack(
    id: SkillId,
    name: &'static str,
    target: TargetKind,
    power: i32,
    element: Option<Element>,
    effects: &'static [SkillEffect],
) -> SkillDefinition {
    SkillDefinition { id, name, kind: SkillKind::Attack, target, power: percent(power), element, effects, basic: false }
}

use Element as E;
use StatusType as S;
use TargetKind as T;

const FLAME_LASH_FX: &[SkillEffect] = &[effect(S::Burn, 30, 3, 5)];
const INFERNO_FX: &[SkillEffect] = &[effect(S::Burn, 20, 2, 4)];
const HEALING_RAIN_FX: &[SkillEffect] = &[effect(S::Regen, 100, 2, 5)];
const FROST_LANCE_FX: &[SkillEffect] = &[effect(S::Freeze, 15, 1, 0)];
const BLIZZARD_FX: &[SkillEffect] = &[effect(S::SpdDown, 30, 2, 15)];
const THUNDER_CLAP_FX: &[SkillEffect] = &[effect(S::Stun, 10, 1, 0)];
const STATIC_FIELD_FX: &[SkillEffect] = &[effect(S::Shock, 40, 2, 4)];
const GALE_BLADE_FX: &[SkillEffect] = &[effect(S::Bleed, 30, 3, 3)];
const TAILWIND_FX: &[SkillEffect] = &[effect(S::SpdUp, 100, 3, 20)];
const STONE_FIST_FX: &[SkillEffect] = &[effect(S::DefDown, 30, 2, 15)];
const BULWARK_FX: &[SkillEffect] = &[self_effect(S::Shield, 3, 20), self_effect(S::Counter, 2, 0)];
const THORN_WHIP_FX: &[SkillEffect] = &[effect(S::Poison, 40, 3, 4)];
const RENEWAL_FX: &[SkillEffect] = &[effect(S::Regen, 100, 3, 6)];
const RADIANCE_FX: &[SkillEffect] = &[effect(S::Blind, 25, 2, 20)];
const SANCTUARY_FX: &[SkillEffect] = &[effect(S::DefUp, 100, 3, 25)];
const VENOM_SPIT_FX: &[SkillEffect] = &[effect(S::Poison, 50, 3, 4)];
const GUARD_FX: &[SkillEffect] = &[self_effect(S::DefUp, 2, 40)];
const DARK_BOLT_FX: &[SkillEffect] = &[effect(S::Blind, 20, 2, 20)];
const DRAGON_CLAW_FX: &[SkillEffect] = &[effect(S::Bleed, 40, 3, 3)];
const FIRESTORM_FX: &[SkillEffect] = &[effect(S::Burn, 35, 3, 5)];
const ROAR_FX: &[SkillEffect] = &[self_effect(S::AtkUp, 3, 30)];
const CRESCENDO_FX: &[SkillEffect] = &[effect(S::Shock, 30, 2, 4)];

static STRIKE: SkillDefinition = SkillDefinition {
    basic: true,
    ..attack(SkillId::Strike, "Strike", T::SingleEnemy, 100, None, &[])
};
static FLAME_LASH: SkillDefinition =
    attack(SkillId::FlameLash, "Flame Lash", T::SingleEnemy, 140, Some(E::Fire), FLAME_LASH_FX);
static INFERNO: SkillDefinition =
    attack(SkillId::Inferno, "Inferno", T::AllEnemies, 90, Some(E::Fire), INFERNO_FX);
static AQUA_JET: SkillDefinition =
    attack(SkillId::AquaJet, "Aqua Jet", T::SingleEnemy, 130, Some(E::Water), &[]);
static HEALING_RAIN: SkillDefinition = SkillDefinition {
    kind: SkillKind::Heal,
    ..attack(SkillId::HealingRain, "Healing Rain", T::AllAllies, 60, Some(E::Water), HEALING_RAIN_FX)
};
static FROST_LANCE: SkillDefinition =
    attack(SkillId::FrostLance, "Frost Lance", T::SingleEnemy, 140, Some(E::Ice), FROST_LANCE_FX);
static BLIZZARD: SkillDefinition =
    attack(SkillId::Blizzard, "Blizzard", T::AllEnemies, 85, Some(E::Ice), BLIZZARD_FX);
static THUNDER_CLAP: SkillDefinition =
    attack(SkillId::ThunderClap, "Thunder Clap", T::SingleEnemy, 150, Some(E::Thunder), THUNDER_CLAP_FX);
static STATIC_FIELD: SkillDefinition =
    attack(SkillId::StaticField, "Static Field", T::AllEnemies, 80, Some(E::Thunder), STATIC_FIELD_FX);
static GALE_BLADE: SkillDefinition =
    attack(SkillId::GaleBlade, "Gale Blade", T::SingleEnemy, 120, Some(E::Wind), GALE_BLADE_FX);
static TAILWIND: SkillDefinition = SkillDefinition {
    kind: SkillKind::Support,
    ..attack(SkillId::Tailwind, "Tailwind", T::AllAllies, 0, Some(E::Wind), TAILWIND_FX)
};
static STONE_FIST: SkillDefinition =
    attack(SkillId::StoneFist, "Stone Fist", T::SingleEnemy, 140, Some(E::Earth), STONE_FIST_FX);
static BULWARK: SkillDefinition = SkillDefinition {
    kind: SkillKind::Support,
    ..attack(SkillId::Bulwark, "Bulwark", T::SelfOnly, 0, Some(E::Earth), BULWARK_FX)
};
static THORN_WHIP: SkillDefinition =
    attack(SkillId::ThornWhip, "Thorn Whip", T::SingleEnemy, 130, Some(E::Nature), THORN_WHIP_FX);
static RENEWAL: SkillDefinition = SkillDefinition {
    kind: SkillKind::Heal,
    ..attack(SkillId::Renewal, "Renewal", T::SingleAlly, 150, Some(E::Nature), RENEWAL_FX)
};
static RADIANCE: SkillDefinition =
    attack(SkillId::Radiance, "Radiance", T::SingleEnemy, 140, Some(E::Light), RADIANCE_FX);
static SANCTUARY: SkillDefinition = SkillDefinition {
    kind: SkillKind::Support,
    ..attack(SkillId::Sanctuary, "Sanctuary", T::AllAllies, 0, Some(E::Light), SANCTUARY_FX)
};
static VENOM_SPIT: SkillDefinition =
    attack(SkillId::VenomSpit, "Venom Spit", T::SingleEnemy, 110, Some(E::Nature), VENOM_SPIT_FX);
static GUARD: SkillDefinition = SkillDefinition {
    kind: SkillKind::Support,
    ..attack(SkillId::Guard, "Guard", T::SelfOnly, 0, None, GUARD_FX)
};
static DARK_BOLT: SkillDefinition =
    attack(SkillId::DarkBolt, "Dark Bolt", T::SingleEnemy, 140, Some(E::Dark), DARK_BOLT_FX);
static MEND: SkillDefinition = SkillDefinition {
    kind: SkillKind::Heal,
    ..attack(SkillId::Mend, "Mend", T::SingleAlly, 120, Some(E::Nature), &[])
};
static DRAGON_CLAW: SkillDefinition =
    attack(SkillId::DragonClaw, "Dragon Claw", T::SingleEnemy, 160, None, DRAGON_CLAW_FX);
static FIRESTORM: SkillDefinition =
    attack(SkillId::Firestorm, "Firestorm", T::AllEnemies, 110, Some(E::Fire), FIRESTORM_FX);
static ROAR: SkillDefinition = SkillDefinition {
    kind: SkillKind::Support,
    ..attack(SkillId::Roar, "Roar", T::SelfOnly, 0, None, ROAR_FX)
};
static CATACLYSM: SkillDefinition =
    attack(SkillId::Cataclysm, "Cataclysm", T::AllEnemies, 130, Some(E::Void), &[]);
static CRESCENDO: SkillDefinition =
    attack(SkillId::Crescendo, "Crescendo", T::AllEnemies, 100, Some(E::Thunder), CRESCENDO_FX);

impl SkillId {
    /// Static definition.
    pub fn definition(self) -> &'static SkillDefinition {
        match self {
            SkillId::Strike => &STRIKE,
            SkillId::FlameLash => &FLAME_LASH,
            SkillId::Inferno => &INFERNO,
            SkillId::AquaJet => &AQUA_JET,
            SkillId::HealingRain => &HEALING_RAIN,
            SkillId::FrostLance => &FROST_LANCE,
            SkillId::Blizzard => &BLIZZARD,
            SkillId::ThunderClap => &THUNDER_CLAP,
            SkillId::StaticField => &STATIC_FIELD,
            SkillId::GaleBlade => &GALE_BLADE,
            SkillId::Tailwind => &TAILWIND,
            SkillId::StoneFist => &STONE_FIST,
            SkillId::Bulwark => &BULWARK,
            SkillId::ThornWhip => &THORN_WHIP,
            SkillId::Renewal => &RENEWAL,
            SkillId::Radiance => &RADIANCE,
            SkillId::Sanctuary => &SANCTUARY,
            SkillId::VenomSpit => &VENOM_SPIT,
            SkillId::Guard => &GUARD,
            SkillId::DarkBolt => &DARK_BOLT,
            SkillId::Mend => &MEND,
            SkillId::DragonClaw => &DRAGON_CLAW,
            SkillId::Firestorm => &FIRESTORM,
            SkillId::Roar => &ROAR,
            SkillId::Cataclysm => &CATACLYSM,
            SkillId::Crescendo => &CRESCENDO,
        }
    }

    /// Stable hash id.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [SkillId; 26] = [
        SkillId::Strike, SkillId::FlameLash, SkillId::Inferno, SkillId::AquaJet,
        SkillId::HealingRain, SkillId::FrostLance, SkillId::Blizzard, SkillId::ThunderClap,
        SkillId::StaticField, SkillId::GaleBlade, SkillId::Tailwind, SkillId::StoneFist,
        SkillId::Bulwark, SkillId::ThornWhip, SkillId::Renewal, SkillId::Radiance,
        SkillId::Sanctuary, SkillId::VenomSpit, SkillId::Guard, SkillId::DarkBolt,
        SkillId::Mend, SkillId::DragonClaw, SkillId::Firestorm, SkillId::Roar,
        SkillId::Cataclysm, SkillId::Crescendo,
    ];

    #[test]
    fn test_definitions_match_ids() {
        for id in ALL {
            assert_eq!(id.definition().id, id);
        }
    }

    #[test]
    fn test_only_strike_is_basic() {
        let basics: Vec<SkillId> = ALL.into_iter().filter(|s| s.definition().basic).collect();
        assert_eq!(basics, vec![SkillId::Strike]);
    }

    #[test]
    fn test_attacks_have_power() {
        for id in ALL {
            let def = id.definition();
            match def.kind {
                SkillKind::Attack | SkillKind::Heal => assert!(def.power > 0, "{:?}", id),
                SkillKind::Support => assert!(!def.effects.is_empty(), "{:?}", id),
            }
        }
    }

    #[test]
    fn test_wire_names() {
        let json = serde_json::to_string(&SkillId::FlameLash).unwrap_or_default();
        assert_eq!(json, "\"flame_lash\"");
        assert!(serde_json::from_str::<SkillId>("\"not_a_skill\"").is_err());
    }
}

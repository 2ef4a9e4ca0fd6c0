//! Elemental Reaction Resolver
//!
//! Pure rules table mapping element pairs (and one triple) to a reaction.
//!
//! ```text
//! ┌──────────────┬──────────────────────────────┬───────┬──────────────────┐
//! │ Reaction     │ Trigger                      │ Mult  │ Effect           │
//! ├──────────────┼──────────────────────────────┼───────┼──────────────────┤
//! │ resonance    │ same element                 │ 0.25  │ -                │
//! │ vaporize     │ fire + water                 │ 2.00  │ -                │
//! │ melt         │ fire + ice                   │ 2.00  │ -                │
//! │ overload     │ fire + thunder               │ 1.75  │ stun, radius 1   │
//! │ burning      │ fire + nature                │ 1.25  │ burn             │
//! │ frozen       │ water + ice                  │ 1.25  │ freeze           │
//! │ electro_chgd │ water + thunder              │ 1.50  │ shock            │
//! │ bloom        │ water + nature               │ 1.50  │ radius 1         │
//! │ superconduct │ ice + thunder                │ 1.50  │ def down         │
//! │ quicken      │ thunder + nature             │ 1.50  │ spd down         │
//! │ eclipse      │ light + dark                 │ 2.50  │ silence          │
//! │ swirl        │ wind + fire/water/ice/thunder│ 1.60  │ radius 2         │
//! │ crystallize  │ earth + fire/water/ice/thndr │ 1.30  │ shield attacker  │
//! │ annihilate   │ void + anything else         │ 1.40  │ true damage      │
//! │ tempest      │ water + wind + thunder       │ 3.00  │ shock, radius 3  │
//! └──────────────┴──────────────────────────────┴───────┴──────────────────┘
//! ```
//!
//! Lookups are symmetric: the pair is normalized to `(min, max)` before
//! matching, so argument order can never change the result.

use serde::{Deserialize, Serialize};

use crate::core::fixed::{percent, Fixed};
use super::element::Element;
use super::status::{StatusEffect, StatusType};

/// Elements wind and earth react with.
pub const UNIVERSAL_PARTNERS: [Element; 4] =
    [Element::Fire, Element::Water, Element::Ice, Element::Thunder];

/// The three-element combination that outranks every pair.
pub const TEMPEST_TRIGGERS: [Element; 3] = [Element::Water, Element::Thunder, Element::Wind];

/// Reaction identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionKind {
    /// Same element twice
    Resonance,
    /// Fire + water
    Vaporize,
    /// Fire + ice
    Melt,
    /// Fire + thunder
    Overload,
    /// Fire + nature
    Burning,
    /// Water + ice
    Frozen,
    /// Water + thunder
    ElectroCharged,
    /// Water + nature
    Bloom,
    /// Ice + thunder
    Superconduct,
    /// Thunder + nature
    Quicken,
    /// Light + dark
    Eclipse,
    /// Wind + fire/water/ice/thunder
    Swirl,
    /// Earth + fire/water/ice/thunder
    Crystallize,
    /// Void + any other element
    Annihilate,
    /// Water + wind + thunder
    Tempest,
}

/// Who receives a reaction's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTarget {
    /// The combatant that was hit
    Defender,
    /// The combatant that triggered the reaction
    Attacker,
}

/// Status inflicted by a reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReactionStatus {
    /// Effect kind
    pub status: StatusType,
    /// Turns
    pub duration: u8,
    /// Magnitude
    pub value: Fixed,
    /// Recipient
    pub target: StatusTarget,
}

impl ReactionStatus {
    /// Materialize as a ledger entry.
    pub fn to_effect(&self) -> StatusEffect {
        StatusEffect::new(self.status, self.duration, self.value)
    }
}

/// Immutable reaction descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementalReaction {
    /// Identifier
    pub kind: ReactionKind,
    /// Defining elements. Universal reactions list only the universal element.
    pub triggers: &'static [Element],
    /// Damage multiplier applied to the reaction basis
    pub multiplier: Fixed,
    /// Inflicted status
    pub status: Option<ReactionStatus>,
    /// Splash radius in formation slots
    pub area_radius: Option<u8>,
    /// Ignores defender mitigation
    pub true_damage: bool,
}

const fn reaction(kind: ReactionKind, triggers: &'static [Element], mult: i32) -> ElementalReaction {
    ElementalReaction {
        kind,
        triggers,
        multiplier: percent(mult),
        status: None,
        area_radius: None,
        true_damage: false,
    }
}

const fn on_defender(status: StatusType, duration: u8, value: Fixed) -> Option<ReactionStatus> {
    Some(ReactionStatus { status, duration, value, target: StatusTarget::Defender })
}

use Element as E;

static RESONANCE: ElementalReaction = reaction(ReactionKind::Resonance, &[], 25);
static VAPORIZE: ElementalReaction = reaction(ReactionKind::Vaporize, &[E::Fire, E::Water], 200);
static MELT: ElementalReaction = reaction(ReactionKind::Melt, &[E::Fire, E::Ice], 200);
static OVERLOAD: ElementalReaction = ElementalReaction {
    status: on_defender(StatusType::Stun, 1, 0),
    area_radius: Some(1),
    ..reaction(ReactionKind::Overload, &[E::Fire, E::Thunder], 175)
};
static BURNING: ElementalReaction = ElementalReaction {
    status: on_defender(StatusType::Burn, 3, percent(5)),
    ..reaction(ReactionKind::Burning, &[E::Fire, E::Nature], 125)
};
static FROZEN: ElementalReaction = ElementalReaction {
    status: on_defender(StatusType::Freeze, 1, 0),
    ..reaction(ReactionKind::Frozen, &[E::Water, E::Ice], 125)
};
static ELECTRO_CHARGED: ElementalReaction = ElementalReaction {
    status: on_defender(StatusType::Shock, 2, percent(4)),
    ..reaction(ReactionKind::ElectroCharged, &[E::Water, E::Thunder], 150)
};
static BLOOM: ElementalReaction = ElementalReaction {
    area_radius: Some(1),
    ..reaction(ReactionKind::Bloom, &[E::Water, E::Nature], 150)
};
static SUPERCONDUCT: ElementalReaction = ElementalReaction {
    status: on_defender(StatusType::DefDown, 3, percent(25)),
    ..reaction(ReactionKind::Superconduct, &[E::Ice, E::Thunder], 150)
};
static QUICKEN: ElementalReaction = ElementalReaction {
    status: on_defender(StatusType::SpdDown, 2, percent(20)),
    ..reaction(ReactionKind::Quicken, &[E::Thunder, E::Nature], 150)
};
static ECLIPSE: ElementalReaction = ElementalReaction {
    status: on_defender(StatusType::Silence, 2, 0),
    ..reaction(ReactionKind::Eclipse, &[E::Light, E::Dark], 250)
};
static SWIRL: ElementalReaction = ElementalReaction {
    area_radius: Some(2),
    ..reaction(ReactionKind::Swirl, &[E::Wind], 160)
};
static CRYSTALLIZE: ElementalReaction = ElementalReaction {
    status: Some(ReactionStatus {
        status: StatusType::Shield,
        duration: 2,
        value: percent(15),
        target: StatusTarget::Attacker,
    }),
    ..reaction(ReactionKind::Crystallize, &[E::Earth], 130)
};
static ANNIHILATE: ElementalReaction = ElementalReaction {
    true_damage: true,
    ..reaction(ReactionKind::Annihilate, &[E::Void], 140)
};
static TEMPEST: ElementalReaction = ElementalReaction {
    status: on_defender(StatusType::Shock, 2, percent(5)),
    area_radius: Some(3),
    ..reaction(ReactionKind::Tempest, &TEMPEST_TRIGGERS, 300)
};

impl ReactionKind {
    /// Every reaction, for iteration in tests and tooling.
    pub const ALL: [ReactionKind; 15] = [
        ReactionKind::Resonance,
        ReactionKind::Vaporize,
        ReactionKind::Melt,
        ReactionKind::Overload,
        ReactionKind::Burning,
        ReactionKind::Frozen,
        ReactionKind::ElectroCharged,
        ReactionKind::Bloom,
        ReactionKind::Superconduct,
        ReactionKind::Quicken,
        ReactionKind::Eclipse,
        ReactionKind::Swirl,
        ReactionKind::Crystallize,
        ReactionKind::Annihilate,
        ReactionKind::Tempest,
    ];

    /// Static descriptor.
    pub fn descriptor(self) -> &'static ElementalReaction {
        match self {
            ReactionKind::Resonance => &RESONANCE,
            ReactionKind::Vaporize => &VAPORIZE,
            ReactionKind::Melt => &MELT,
            ReactionKind::Overload => &OVERLOAD,
            ReactionKind::Burning => &BURNING,
            ReactionKind::Frozen => &FROZEN,
            ReactionKind::ElectroCharged => &ELECTRO_CHARGED,
            ReactionKind::Bloom => &BLOOM,
            ReactionKind::Superconduct => &SUPERCONDUCT,
            ReactionKind::Quicken => &QUICKEN,
            ReactionKind::Eclipse => &ECLIPSE,
            ReactionKind::Swirl => &SWIRL,
            ReactionKind::Crystallize => &CRYSTALLIZE,
            ReactionKind::Annihilate => &ANNIHILATE,
            ReactionKind::Tempest => &TEMPEST,
        }
    }

    /// Stable hash id.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Two-element lookup. Symmetric in its arguments.
pub fn find_reaction(a: Element, b: Element) -> Option<&'static ElementalReaction> {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };

    let kind = if lo == hi {
        ReactionKind::Resonance
    } else if hi == Element::Void {
        ReactionKind::Annihilate
    } else {
        match (lo, hi) {
            (E::Fire, E::Water) => ReactionKind::Vaporize,
            (E::Fire, E::Ice) => ReactionKind::Melt,
            (E::Fire, E::Thunder) => ReactionKind::Overload,
            (E::Fire, E::Nature) => ReactionKind::Burning,
            (E::Water, E::Ice) => ReactionKind::Frozen,
            (E::Water, E::Thunder) => ReactionKind::ElectroCharged,
            (E::Water, E::Nature) => ReactionKind::Bloom,
            (E::Ice, E::Thunder) => ReactionKind::Superconduct,
            (E::Thunder, E::Nature) => ReactionKind::Quicken,
            (E::Light, E::Dark) => ReactionKind::Eclipse,
            (x, E::Wind) if UNIVERSAL_PARTNERS.contains(&x) => ReactionKind::Swirl,
            (x, E::Earth) if UNIVERSAL_PARTNERS.contains(&x) => ReactionKind::Crystallize,
            _ => return None,
        }
    };

    Some(kind.descriptor())
}

/// Where the partner element of a reaction came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartnerSource {
    /// The defender's aura or innate element
    Defender,
    /// Residue on the field
    Field,
}

/// A reaction that fired during one hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionHit {
    /// Which reaction
    pub kind: ReactionKind,
    /// Participating elements, sorted and deduplicated
    pub elements: Vec<Element>,
    /// Where the partner element came from
    pub source: PartnerSource,
}

impl ReactionHit {
    /// Static descriptor for this hit.
    pub fn descriptor(&self) -> &'static ElementalReaction {
        self.kind.descriptor()
    }
}

fn sorted(mut elements: Vec<Element>) -> Vec<Element> {
    elements.sort_unstable();
    elements.dedup();
    elements
}

/// Resolve the reaction for an elemental hit.
///
/// - `attacker`: element of the skill (`None` = physical, never reacts)
/// - `defender`: the defender's aura, or innate element when no aura is set
/// - `field`: residue elements in range of the defender
///
/// Tempest wins whenever all three of its triggers are present among the
/// attacker, the defender and the field. Otherwise the attacker is
/// paired with the defender and with each field element, and the highest
/// multiplier wins (the defender wins ties).
pub fn resolve(
    attacker: Option<Element>,
    defender: Option<Element>,
    field: &[Element],
) -> Option<ReactionHit> {
    let attacker = attacker?;

    let present = |e: Element| e == attacker || defender == Some(e) || field.contains(&e);
    if TEMPEST_TRIGGERS.iter().all(|&e| present(e)) {
        let source = if defender.map_or(false, |d| TEMPEST_TRIGGERS.contains(&d) && d != attacker) {
            PartnerSource::Defender
        } else {
            PartnerSource::Field
        };
        return Some(ReactionHit {
            kind: ReactionKind::Tempest,
            elements: sorted(TEMPEST_TRIGGERS.to_vec()),
            source,
        });
    }

    let mut best: Option<(&'static ElementalReaction, Element, PartnerSource)> = None;
    let candidates = defender
        .map(|d| (d, PartnerSource::Defender))
        .into_iter()
        .chain(field.iter().map(|&f| (f, PartnerSource::Field)));

    for (partner, source) in candidates {
        if let Some(found) = find_reaction(attacker, partner) {
            let better = best.map_or(true, |(current, _, _)| found.multiplier > current.multiplier);
            if better {
                best = Some((found, partner, source));
            }
        }
    }

    best.map(|(found, partner, source)| ReactionHit {
        kind: found.kind,
        elements: sorted(vec![attacker, partner]),
        source,
    })
}

// =============================================================================
// TESTS
// =============================================================================

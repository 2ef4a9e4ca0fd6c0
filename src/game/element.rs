//! Elements and Elemental Affinity
//!
//! Ten elements. A skill with no element is physical: it never triggers
//! a reaction and always deals neutral affinity damage.
//!
//! ```text
//!   fire ──▶ ice, nature        thunder ──▶ water, wind
//!   water ─▶ fire, earth        earth ───▶ thunder, fire
//!   ice ───▶ wind               wind ────▶ nature
//!   nature ▶ water, earth       light ◀──▶ dark
//!   void: no advantage either way
//! ```

use serde::{Deserialize, Serialize};

use crate::core::fixed::{percent, Fixed, FIXED_ONE};

/// Elemental type of a combatant, skill or field residue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Element {
    /// Fire
    Fire,
    /// Water
    Water,
    /// Ice
    Ice,
    /// Thunder
    Thunder,
    /// Wind (reacts with fire/water/ice/thunder via swirl)
    Wind,
    /// Earth (reacts with fire/water/ice/thunder via crystallize)
    Earth,
    /// Nature
    Nature,
    /// Light
    Light,
    /// Dark
    Dark,
    /// Void (reacts with everything via annihilate)
    Void,
}

impl Element {
    /// All elements, in declaration order.
    pub const ALL: [Element; 10] = [
        Element::Fire,
        Element::Water,
        Element::Ice,
        Element::Thunder,
        Element::Wind,
        Element::Earth,
        Element::Nature,
        Element::Light,
        Element::Dark,
        Element::Void,
    ];

    /// Stable wire/hash id.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Elements this one deals bonus damage to.
    pub fn strong_against(self) -> &'static [Element] {
        use Element::*;
        match self {
            Fire => &[Ice, Nature],
            Water => &[Fire, Earth],
            Ice => &[Wind],
            Thunder => &[Water, Wind],
            Wind => &[Nature],
            Earth => &[Thunder, Fire],
            Nature => &[Water, Earth],
            Light => &[Dark],
            Dark => &[Light],
            Void => &[],
        }
    }

    /// Whether `self` attacking `defender` is advantaged.
    pub fn beats(self, defender: Element) -> bool {
        self.strong_against().contains(&defender)
    }
}

/// How an attacking element relates to the defender's element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Affinity {
    /// Same element
    Resisted,
    /// Attacker beats defender
    Advantaged,
    /// Defender beats attacker
    Disadvantaged,
    /// Unrelated or physical
    Neutral,
}

impl Affinity {
    /// Classify an attack. `None` on either side is neutral.
    pub fn of(attacker: Option<Element>, defender: Option<Element>) -> Self {
        let (Some(a), Some(d)) = (attacker, defender) else {
            return Affinity::Neutral;
        };
        if a == d {
            Affinity::Resisted
        } else if a.beats(d) {
            // Light/dark beat each other; attacker wins the tie.
            Affinity::Advantaged
        } else if d.beats(a) {
            Affinity::Disadvantaged
        } else {
            Affinity::Neutral
        }
    }

    /// Damage multiplier for this affinity.
    pub fn multiplier(self) -> Fixed {
        match self {
            Affinity::Resisted => percent(50),
            Affinity::Advantaged => percent(150),
            Affinity::Disadvantaged => percent(75),
            Affinity::Neutral => FIXED_ONE,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

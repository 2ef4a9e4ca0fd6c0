//! Battle Events
//!
//! Everything that happens in a battle is recorded as an event. The log is
//! append-only and doubles as the source for outgoing client messages
//! (damage numbers, reaction popups, rhythm prompts).

use serde::{Serialize, Deserialize};

use super::combatant::{CombatantId, PlayerId};
use super::damage::HitResult;
use super::element::{Affinity, Element};
use super::reaction::ReactionKind;
use super::rhythm::{Judgement, RhythmSequence};
use super::skill::SkillId;
use super::status::{ActionBlock, StatusType};
use super::battle::BattleOutcome;

/// Why a turn passed without an action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Stunned or frozen
    Blocked(ActionBlock),
    /// AI found no valid target
    NoTargets,
}

/// Battle event data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BattleEventData {
    /// A combatant's turn began
    TurnStarted {
        actor: CombatantId,
        round: u32,
    },

    /// A player was asked for rhythm input
    RhythmPrompt {
        actor: CombatantId,
        player: PlayerId,
        skill: SkillId,
        sequence: RhythmSequence,
    },

    /// Rhythm input was judged
    RhythmJudged {
        actor: CombatantId,
        judgement: Judgement,
    },

    /// A skill was used
    ActionUsed {
        actor: CombatantId,
        skill: SkillId,
        targets: Vec<CombatantId>,
    },

    /// Damage landed
    Damage {
        attacker: CombatantId,
        target: CombatantId,
        amount: i32,
        absorbed: i32,
        result: HitResult,
        affinity: Affinity,
        counter: bool,
    },

    /// Attack dodged
    Evaded {
        attacker: CombatantId,
        target: CombatantId,
    },

    /// Elemental reaction fired
    Reaction {
        attacker: CombatantId,
        target: CombatantId,
        kind: ReactionKind,
        elements: Vec<Element>,
        damage: i32,
        slot: u8,
    },

    /// Area reaction spilled onto a neighbour
    Splash {
        target: CombatantId,
        kind: ReactionKind,
        damage: i32,
    },

    /// HP restored by a skill
    Healed {
        healer: CombatantId,
        target: CombatantId,
        amount: i32,
    },

    /// Status effect applied or stacked
    StatusApplied {
        target: CombatantId,
        status: StatusType,
        stacks: u8,
    },

    /// Periodic effects resolved
    StatusTick {
        target: CombatantId,
        damage: i32,
        healing: i32,
    },

    /// Status effect ran out
    StatusExpired {
        target: CombatantId,
        status: StatusType,
    },

    /// Turn passed without an action
    TurnSkipped {
        actor: CombatantId,
        reason: SkipReason,
    },

    /// Control handed to the autopilot
    Autopilot {
        actor: CombatantId,
    },

    /// Combatant reached 0 HP
    Defeated {
        id: CombatantId,
    },

    /// A new wave entered (endless dungeon)
    WaveStarted {
        wave: u32,
    },

    /// Battle reached a terminal phase
    BattleEnded {
        outcome: BattleOutcome,
    },
}

/// A battle event stamped with the turn it happened on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattleEvent {
    /// Turn counter when the event occurred
    pub turn: u32,

    /// Event data
    pub data: BattleEventData,
}

impl BattleEvent {
    /// Create a new event.
    pub fn new(turn: u32, data: BattleEventData) -> Self {
        Self { turn, data }
    }

    /// Combatant that caused the event, if any.
    pub fn actor(&self) -> Option<CombatantId> {
        match &self.data {
            BattleEventData::TurnStarted { actor, .. }
            | BattleEventData::RhythmPrompt { actor, .. }
            | BattleEventData::RhythmJudged { actor, .. }
            | BattleEventData::ActionUsed { actor, .. }
            | BattleEventData::TurnSkipped { actor, .. }
            | BattleEventData::Autopilot { actor } => Some(*actor),
            BattleEventData::Damage { attacker, .. }
            | BattleEventData::Evaded { attacker, .. }
            | BattleEventData::Reaction { attacker, .. } => Some(*attacker),
            BattleEventData::Healed { healer, .. } => Some(*healer),
            _ => None,
        }
    }

    /// Whether this event ends the battle.
    pub fn is_terminal(&self) -> bool {
        matches!(self.data, BattleEventData::BattleEnded { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_actor() {
        let hit = BattleEvent::new(
            3,
            BattleEventData::Damage {
                attacker: CombatantId(1),
                target: CombatantId(2),
                amount: 40,
                absorbed: 0,
                result: HitResult::Hit,
                affinity: Affinity::Neutral,
                counter: false,
            },
        );
        assert_eq!(hit.actor(), Some(CombatantId(1)));
        assert!(!hit.is_terminal());

        let tick = BattleEvent::new(3, BattleEventData::StatusTick { target: CombatantId(2), damage: 5, healing: 0 });
        assert_eq!(tick.actor(), None);

        let end = BattleEvent::new(4, BattleEventData::BattleEnded { outcome: BattleOutcome::Victory });
        assert!(end.is_terminal());
    }
}

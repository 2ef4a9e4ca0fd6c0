//! Battle State Machine
//!
//! One room's combat instance. Owns every combatant for the duration of the
//! battle, the turn order, the combo chain and the field residue.
//!
//! ## Turn flow
//!
//! ```text
//! ┌────────────┐   player   ┌──────────────┐   ┌───────────────┐
//! │ initiative │──────────▶│ rhythm_input │──▶│ action_select │
//! └────────────┘            └──────────────┘   └───────┬───────┘
//!       ▲   │ ai / blocked                             ▼
//!       │   │                                  ┌───────────────┐
//!       │   └─────────────────────────────────▶│ target_select │
//!       │                                      └───────┬───────┘
//!       │                                              ▼
//!  ┌──────────┐  ┌──────────────┐  ┌────────────────┐  ┌───────────┐
//!  │ end_turn │◀─│ counter_phase│◀─│ reaction_check │◀─│ execution │
//!  └────┬─────┘  └──────────────┘  └────────────────┘  └───────────┘
//!       │ terminal
//!       ▼
//!  victory / defeat / draw
//! ```
//!
//! Turn order is sorted by effective speed (random tie-break) and only
//! recomputed when the actor pointer wraps, i.e. once per round.
//!
//! Every roll draws from the battle's own [`DeterministicRng`], so a battle
//! created from the same seed and fed the same inputs produces the same
//! [`BattleState::compute_hash`].

use std::collections::BTreeMap;

use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::core::fixed::{fixed_mul, percent, scale_int, Fixed, FIXED_ONE};
use crate::core::hash::{compute_state_hash, short_hex, StateHash};
use crate::core::rng::DeterministicRng;
use super::ai::{self, ActionTarget, AiArchetype, AiDecision};
use super::combatant::{Combatant, CombatantId, Controller, PlayerId, Side, Template};
use super::combo::ComboChain;
use super::content::{EnemyKind, Environment};
use super::damage::{self, AttackContext};
use super::element::Element;
use super::events::{BattleEvent, BattleEventData, SkipReason};
use super::reaction::ReactionKind;
use super::rewards::{self, CombatantStats, Rewards};
use super::rhythm::{Judgement, RhythmResult, RhythmSequence};
use super::skill::{SkillDefinition, SkillId, SkillKind, TargetKind};
use super::status::{ActionBlock, StatusEffect};

/// Damage scale for skills matching the environment's element.
pub const ENVIRONMENT_BOOST: Fixed = percent(110);

/// Power of a counter strike.
pub const COUNTER_POWER: Fixed = percent(50);

/// Share of reaction damage splashed onto neighbours.
pub const SPLASH_SHARE: Fixed = percent(50);

/// Turns an area reaction's residue stays on the field.
pub const FIELD_RESIDUE_TURNS: u8 = 2;

const BASE_RHYTHM_NOTES: usize = 4;

// =============================================================================
// PHASES & OUTCOMES
// =============================================================================

/// Battle phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BattlePhase {
    /// Picking the next actor
    Initiative,
    /// Waiting for a player's rhythm input
    RhythmInput,
    /// Waiting for an action
    ActionSelect,
    /// Validating the chosen target
    TargetSelect,
    /// Resolving the action
    Execution,
    /// Resolving area reactions
    ReactionCheck,
    /// Counter strikes
    CounterPhase,
    /// Ticking effects and checking for a winner
    EndTurn,
    /// Party won
    Victory,
    /// Party lost
    Defeat,
    /// Both sides fell
    Draw,
}

impl BattlePhase {
    /// Whether the battle is over.
    pub fn is_terminal(self) -> bool {
        self.outcome().is_some()
    }

    /// Outcome for terminal phases.
    pub fn outcome(self) -> Option<BattleOutcome> {
        match self {
            BattlePhase::Victory => Some(BattleOutcome::Victory),
            BattlePhase::Defeat => Some(BattleOutcome::Defeat),
            BattlePhase::Draw => Some(BattleOutcome::Draw),
            _ => None,
        }
    }
}

/// Final result, from the party's point of view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BattleOutcome {
    /// Every enemy fell
    Victory,
    /// Every party member fell
    Defeat,
    /// Everybody fell
    Draw,
}

impl BattleOutcome {
    /// Outcome as seen by `side`.
    pub fn for_side(self, side: Side) -> Self {
        match (self, side) {
            (BattleOutcome::Victory, Side::Enemies) => BattleOutcome::Defeat,
            (BattleOutcome::Defeat, Side::Enemies) => BattleOutcome::Victory,
            (outcome, _) => outcome,
        }
    }

    fn phase(self) -> BattlePhase {
        match self {
            BattleOutcome::Victory => BattlePhase::Victory,
            BattleOutcome::Defeat => BattlePhase::Defeat,
            BattleOutcome::Draw => BattlePhase::Draw,
        }
    }
}

// =============================================================================
// SUPPORTING STATE
// =============================================================================

/// Element residue left by an area reaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldElement {
    /// Residue element
    pub element: Element,
    /// Side of the field it sits on
    pub side: Side,
    /// Formation slot at the centre
    pub slot: u8,
    /// Reach in slots
    pub radius: u8,
    /// Turns left
    pub turns_remaining: u8,
}

impl FieldElement {
    /// Whether the residue is in range of a slot.
    pub fn reaches(&self, side: Side, slot: u8) -> bool {
        self.side == side && self.slot.abs_diff(slot) <= self.radius
    }
}

/// Rhythm sequence sent to the acting player.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRhythm {
    /// Acting combatant
    pub actor: CombatantId,
    /// Controlling player
    pub player: PlayerId,
    /// Skill the prompt is for
    pub skill: SkillId,
    /// Notes to hit
    pub sequence: RhythmSequence,
}

/// Everything needed to start a battle.
#[derive(Clone, Debug)]
pub struct BattleSetup {
    /// RNG seed
    pub seed: u64,
    /// Party (team A)
    pub party: Vec<Combatant>,
    /// Enemies (team B)
    pub enemies: Vec<Combatant>,
    /// Backdrop
    pub environment: Environment,
    /// Boss fight
    pub is_boss_encounter: bool,
    /// Players must submit rhythm input before acting
    pub rhythm_required: bool,
}

/// Rejected action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ActionError {
    /// Battle already ended
    #[error("battle is over")]
    BattleOver,

    /// Someone else is acting
    #[error("not this combatant's turn")]
    NotYourTurn,

    /// Actor has 0 HP
    #[error("actor is defeated")]
    ActorDefeated,

    /// Stunned or frozen
    #[error("actor cannot act: {0:?}")]
    Incapacitated(ActionBlock),

    /// Skill not in the actor's kit
    #[error("skill {0:?} is not available")]
    UnknownSkill(SkillId),

    /// Silenced actors may only use the basic skill
    #[error("silenced: only the basic skill is usable")]
    Silenced,

    /// No living target matches
    #[error("invalid target")]
    InvalidTarget,

    /// Rhythm input must come first
    #[error("rhythm input required before acting")]
    AwaitingRhythm,

    /// Not accepted in the current phase
    #[error("not allowed during {0:?}")]
    WrongPhase(BattlePhase),

    /// Tally does not fit the sequence
    #[error("rhythm result does not match the sequence")]
    InvalidRhythm,
}

struct Splash {
    origin: CombatantId,
    target: CombatantId,
    kind: ReactionKind,
    element: Element,
    side: Side,
    slot: u8,
    radius: u8,
    damage: i32,
}

// =============================================================================
// BATTLE STATE
// =============================================================================

/// A single room's combat instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattleState {
    /// Seed the battle RNG was created from
    pub seed: u64,

    rng: DeterministicRng,

    /// Turn counter (1-based, every actor's turn counts)
    pub turn: u32,

    /// Round counter (1-based)
    pub round: u32,

    /// Wave number (endless dungeon)
    pub wave: u32,

    /// Actor order for the current round
    pub turn_order: Vec<CombatantId>,

    /// Index into `turn_order`
    pub current_actor_index: usize,

    /// Current phase
    pub phase: BattlePhase,

    /// Party (team A)
    pub party: Vec<Combatant>,

    /// Enemies (team B)
    pub enemies: Vec<Combatant>,

    /// Residue from area reactions
    pub field: Vec<FieldElement>,

    /// Combo chain
    pub combo: ComboChain,

    /// Outstanding rhythm prompt
    pub pending_rhythm: Option<PendingRhythm>,

    /// Judgement for the current turn
    pub judgement: Option<Judgement>,

    /// Append-only battle log
    pub log: Vec<BattleEvent>,

    /// Backdrop
    pub environment: Environment,

    /// Boss fight
    pub is_boss_encounter: bool,

    /// Players must submit rhythm input before acting
    pub rhythm_required: bool,

    /// Enemies knocked out so far, with levels
    pub defeated: Vec<(EnemyKind, u8)>,

    /// Per-combatant statistics
    pub stats: BTreeMap<CombatantId, CombatantStats>,

    log_cursor: usize,
}

impl BattleState {
    /// Build a battle and open the first turn.
    pub fn new(setup: BattleSetup) -> Self {
        let mut party = setup.party;
        let mut enemies = setup.enemies;
        arrange(&mut party, Side::Party);
        arrange(&mut enemies, Side::Enemies);

        let stats = party
            .iter()
            .chain(enemies.iter())
            .map(|c| (c.id, CombatantStats::default()))
            .collect();

        let mut battle = Self {
            seed: setup.seed,
            rng: DeterministicRng::new(setup.seed),
            turn: 1,
            round: 1,
            wave: 1,
            turn_order: Vec::new(),
            current_actor_index: 0,
            phase: BattlePhase::Initiative,
            party,
            enemies,
            field: Vec::new(),
            combo: ComboChain::new(),
            pending_rhythm: None,
            judgement: None,
            log: Vec::new(),
            environment: setup.environment,
            is_boss_encounter: setup.is_boss_encounter,
            rhythm_required: setup.rhythm_required,
            defeated: Vec::new(),
            stats,
            log_cursor: 0,
        };

        battle.turn_order = battle.compute_turn_order();
        info!(
            seed = %hex::encode(battle.seed.to_be_bytes()),
            party = battle.party.len(),
            enemies = battle.enemies.len(),
            environment = ?battle.environment,
            "Battle created"
        );

        match battle.terminal_outcome() {
            Some(outcome) => battle.finish(outcome),
            None => battle.begin_turn(),
        }
        battle
    }

    // -------------------------------------------------------------------------
    // Lookups
    // -------------------------------------------------------------------------

    /// Combatant by id.
    pub fn combatant(&self, id: CombatantId) -> Option<&Combatant> {
        self.party.iter().chain(self.enemies.iter()).find(|c| c.id == id)
    }

    fn combatant_mut(&mut self, id: CombatantId) -> Option<&mut Combatant> {
        self.party.iter_mut().chain(self.enemies.iter_mut()).find(|c| c.id == id)
    }

    /// Every combatant on a side, dead or alive.
    pub fn side(&self, side: Side) -> &[Combatant] {
        match side {
            Side::Party => &self.party,
            Side::Enemies => &self.enemies,
        }
    }

    /// Living combatants on a side.
    pub fn living(&self, side: Side) -> impl Iterator<Item = &Combatant> {
        self.side(side).iter().filter(|c| c.alive)
    }

    /// Every combatant controlled by `player`.
    pub fn controlled_by<'a>(&'a self, player: &'a PlayerId) -> impl Iterator<Item = &'a Combatant> {
        self.party
            .iter()
            .chain(self.enemies.iter())
            .filter(move |c| c.player_id() == Some(player))
    }

    /// Combatant whose turn it is.
    pub fn current_actor(&self) -> Option<&Combatant> {
        self.turn_order
            .get(self.current_actor_index)
            .and_then(|id| self.combatant(*id))
    }

    /// Id of the acting combatant.
    pub fn current_actor_id(&self) -> Option<CombatantId> {
        self.current_actor().map(|c| c.id)
    }

    /// Outcome once the battle is over.
    pub fn outcome(&self) -> Option<BattleOutcome> {
        self.phase.outcome()
    }

    /// Next unused combatant id.
    pub fn next_combatant_id(&self) -> CombatantId {
        let max = self.party.iter().chain(self.enemies.iter()).map(|c| c.id.0).max().unwrap_or(0);
        CombatantId(max.saturating_add(1))
    }

    fn is_alive(&self, id: CombatantId) -> bool {
        self.combatant(id).map_or(false, |c| c.alive)
    }

    fn environment_scale(&self, element: Option<Element>) -> Fixed {
        if element.is_some() && element == self.environment.element() {
            ENVIRONMENT_BOOST
        } else {
            FIXED_ONE
        }
    }

    // -------------------------------------------------------------------------
    // Events
    // -------------------------------------------------------------------------

    fn push(&mut self, data: BattleEventData) {
        self.log.push(BattleEvent::new(self.turn, data));
    }

    /// Events appended since the last call.
    pub fn take_events(&mut self) -> Vec<BattleEvent> {
        let fresh = self.log.get(self.log_cursor..).map(<[BattleEvent]>::to_vec).unwrap_or_default();
        self.log_cursor = self.log.len();
        fresh
    }

    // -------------------------------------------------------------------------
    // Initiative
    // -------------------------------------------------------------------------

    /// Living combatants sorted by effective speed, fastest first.
    ///
    /// Ties are broken uniformly at random. Consumes one RNG value per
    /// living combatant.
    pub fn compute_turn_order(&mut self) -> Vec<CombatantId> {
        let mut keyed: Vec<(i32, u32, CombatantId)> = self
            .party
            .iter()
            .chain(self.enemies.iter())
            .filter(|c| c.alive)
            .map(|c| (c.effective_stats().speed, 0, c.id))
            .collect();
        for entry in &mut keyed {
            entry.1 = self.rng.next_u32();
        }
        keyed.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));
        keyed.into_iter().map(|(_, _, id)| id).collect()
    }

    fn begin_turn(&mut self) {
        self.phase = BattlePhase::Initiative;
        self.judgement = None;
        self.pending_rhythm = None;

        let Some(actor) = self.current_actor() else {
            return;
        };
        let id = actor.id;
        let player = actor.player_id().cloned();
        let can_act = actor.status.can_act().is_ok();
        let skill = prompt_skill(actor);
        let round = self.round;
        self.push(BattleEventData::TurnStarted { actor: id, round });

        match player {
            Some(player) if can_act => {
                let sequence = RhythmSequence::generate(rhythm_note_count(skill.definition()), &mut self.rng);
                self.push(BattleEventData::RhythmPrompt {
                    actor: id,
                    player: player.clone(),
                    skill,
                    sequence: sequence.clone(),
                });
                self.pending_rhythm = Some(PendingRhythm { actor: id, player, skill, sequence });
                self.phase = BattlePhase::RhythmInput;
            }
            _ => self.phase = BattlePhase::ActionSelect,
        }
    }

    // -------------------------------------------------------------------------
    // Player input
    // -------------------------------------------------------------------------

    /// Record a player's rhythm tally for the open prompt.
    pub fn submit_rhythm(&mut self, player: &PlayerId, result: &RhythmResult) -> Result<Judgement, ActionError> {
        if self.phase.is_terminal() {
            return Err(ActionError::BattleOver);
        }
        let Some(pending) = &self.pending_rhythm else {
            return Err(ActionError::WrongPhase(self.phase));
        };
        if self.phase != BattlePhase::RhythmInput {
            return Err(ActionError::WrongPhase(self.phase));
        }
        if &pending.player != player {
            return Err(ActionError::NotYourTurn);
        }
        let judgement = result.judge(&pending.sequence).ok_or(ActionError::InvalidRhythm)?;
        let actor = pending.actor;

        if judgement == Judgement::Miss {
            self.combo.reset();
        }
        self.judgement = Some(judgement);
        self.phase = BattlePhase::ActionSelect;
        self.push(BattleEventData::RhythmJudged { actor, judgement });
        Ok(judgement)
    }

    /// Act on behalf of the player controlling the current actor.
    pub fn process_player_action(
        &mut self,
        player: &PlayerId,
        skill: SkillId,
        target: ActionTarget,
    ) -> Result<(), ActionError> {
        if self.phase.is_terminal() {
            return Err(ActionError::BattleOver);
        }
        let actor = self.current_actor().ok_or(ActionError::NotYourTurn)?;
        if actor.player_id() != Some(player) {
            return Err(ActionError::NotYourTurn);
        }
        let id = actor.id;
        self.process_action(id, skill, target)
    }

    // -------------------------------------------------------------------------
    // Action execution
    // -------------------------------------------------------------------------

    /// Execute one action and run the rest of the turn.
    ///
    /// On success the battle has moved on to the next actor's turn, or into
    /// a terminal phase.
    pub fn process_action(
        &mut self,
        actor_id: CombatantId,
        skill: SkillId,
        target: ActionTarget,
    ) -> Result<(), ActionError> {
        if self.phase.is_terminal() {
            return Err(ActionError::BattleOver);
        }
        let actor = self.current_actor().ok_or(ActionError::NotYourTurn)?;
        if actor.id != actor_id {
            return Err(ActionError::NotYourTurn);
        }
        if !actor.alive {
            return Err(ActionError::ActorDefeated);
        }
        actor.status.can_act().map_err(ActionError::Incapacitated)?;
        match self.phase {
            BattlePhase::RhythmInput if self.rhythm_required => return Err(ActionError::AwaitingRhythm),
            BattlePhase::RhythmInput | BattlePhase::ActionSelect => {}
            other => return Err(ActionError::WrongPhase(other)),
        }
        if !actor.skills.contains(&skill) {
            return Err(ActionError::UnknownSkill(skill));
        }
        let def = skill.definition();
        if !def.basic && !actor.status.can_use_skills() {
            return Err(ActionError::Silenced);
        }

        let actor_side = actor.side;

        // A rejected target hands the turn back in the phase it was in
        let resume = self.phase;
        self.phase = BattlePhase::TargetSelect;
        let targets = match self.resolve_targets(actor_id, actor_side, def, target) {
            Ok(targets) => targets,
            Err(err) => {
                self.phase = resume;
                return Err(err);
            }
        };

        self.phase = BattlePhase::Execution;
        self.pending_rhythm = None;
        let judgement = self.judgement.take();
        self.push(BattleEventData::ActionUsed { actor: actor_id, skill, targets: targets.clone() });
        self.stats.entry(actor_id).or_default().turns_taken += 1;

        let mut splashes = Vec::new();
        for &target_id in &targets {
            match def.kind {
                SkillKind::Attack => {
                    if let Some(splash) = self.execute_attack(actor_id, target_id, def, judgement, FIXED_ONE, false) {
                        splashes.push(splash);
                    }
                }
                SkillKind::Heal => self.execute_heal(actor_id, target_id, def, judgement),
                SkillKind::Support => self.apply_skill_effects(actor_id, target_id, def, false),
            }
        }
        if def.kind != SkillKind::Attack {
            self.apply_skill_effects(actor_id, actor_id, def, true);
        }

        self.phase = BattlePhase::ReactionCheck;
        for splash in splashes {
            self.apply_splash(splash);
        }

        let opponents_standing = self.living(actor_side.opposite()).next().is_some();
        if def.kind == SkillKind::Attack && opponents_standing {
            self.phase = BattlePhase::CounterPhase;
            self.counter_phase(actor_id, &targets);
        }

        self.process_end_of_turn();
        Ok(())
    }

    fn resolve_targets(
        &self,
        actor_id: CombatantId,
        actor_side: Side,
        def: &SkillDefinition,
        target: ActionTarget,
    ) -> Result<Vec<CombatantId>, ActionError> {
        let living_ids = |side: Side| self.living(side).map(|c| c.id).collect::<Vec<_>>();
        let pick = |side: Side, id: CombatantId| {
            if self.living(side).any(|c| c.id == id) {
                vec![id]
            } else {
                Vec::new()
            }
        };

        let ids = match (def.target, target) {
            (TargetKind::AllEnemies, _) => living_ids(actor_side.opposite()),
            (TargetKind::AllAllies, _) => living_ids(actor_side),
            (TargetKind::SelfOnly, _) => vec![actor_id],
            (TargetKind::SingleEnemy, ActionTarget::Single(id)) => pick(actor_side.opposite(), id),
            (TargetKind::SingleAlly, ActionTarget::Single(id)) => pick(actor_side, id),
            (TargetKind::SingleAlly, ActionTarget::SelfTarget) => vec![actor_id],
            _ => Vec::new(),
        };

        if ids.is_empty() {
            Err(ActionError::InvalidTarget)
        } else {
            Ok(ids)
        }
    }

    fn execute_attack(
        &mut self,
        attacker_id: CombatantId,
        target_id: CombatantId,
        def: &'static SkillDefinition,
        judgement: Option<Judgement>,
        scale: Fixed,
        counter: bool,
    ) -> Option<Splash> {
        let attacker = self.combatant(attacker_id)?;
        let attacker_stats = attacker.effective_stats();
        let attacker_side = attacker.side;
        let defender = self.combatant(target_id).filter(|d| d.alive)?;
        let defender_stats = defender.effective_stats();
        let defender_element = defender.element;
        let defender_aura = defender.reaction_partner();
        let defender_side = defender.side;
        let defender_slot = defender.slot;

        let field: Vec<Element> = self
            .field
            .iter()
            .filter(|f| f.reaches(defender_side, defender_slot))
            .map(|f| f.element)
            .collect();
        let combo_count = if counter { 0 } else { self.combo.count_for(attacker_side) };

        let ctx = AttackContext {
            attacker: &attacker_stats,
            defender: &defender_stats,
            skill: def,
            judgement,
            combo_count,
            attacker_element: def.element,
            defender_element,
            defender_aura,
            field_elements: &field,
            power_scale: fixed_mul(scale, self.environment_scale(def.element)),
        };
        let outcome = damage::resolve_attack(&ctx, &mut self.rng);

        if !outcome.landed() {
            self.combo.reset();
            self.push(BattleEventData::Evaded { attacker: attacker_id, target: target_id });
            return None;
        }

        let (dealt, absorbed, killed) = self.deal_damage(target_id, outcome.damage);
        self.push(BattleEventData::Damage {
            attacker: attacker_id,
            target: target_id,
            amount: dealt,
            absorbed,
            result: outcome.result,
            affinity: outcome.affinity,
            counter,
        });

        self.combo.register_hit(attacker_id, attacker_side, def.element, dealt);
        let chain = self.combo.hits;
        let stat = self.stats.entry(attacker_id).or_default();
        stat.damage_dealt += dealt as i64;
        stat.max_combo = stat.max_combo.max(chain);
        if killed {
            stat.knockouts += 1;
        }
        if outcome.reaction.is_some() {
            stat.reactions_triggered += 1;
        }

        for effect in &outcome.target_effects {
            self.apply_status(target_id, effect.with_source(attacker_id));
        }
        for effect in &outcome.self_effects {
            self.apply_status(attacker_id, effect.with_source(attacker_id));
        }

        let Some(hit) = &outcome.reaction else {
            // Unreacted elemental hits leave their element as an aura
            if let (Some(element), Some(target)) = (def.element, self.combatant_mut(target_id)) {
                if target.alive {
                    target.current_element = Some(element);
                }
            }
            return None;
        };

        self.push(BattleEventData::Reaction {
            attacker: attacker_id,
            target: target_id,
            kind: hit.kind,
            elements: hit.elements.clone(),
            damage: outcome.reaction_damage,
            slot: defender_slot,
        });
        if let Some(target) = self.combatant_mut(target_id) {
            target.current_element = None;
        }

        let radius = hit.descriptor().area_radius?;
        let residue = hit
            .elements
            .iter()
            .copied()
            .find(|e| Some(*e) != def.element)
            .or(def.element)?;
        Some(Splash {
            origin: attacker_id,
            target: target_id,
            kind: hit.kind,
            element: residue,
            side: defender_side,
            slot: defender_slot,
            radius,
            damage: scale_int(outcome.reaction_damage, SPLASH_SHARE),
        })
    }

    fn execute_heal(
        &mut self,
        healer_id: CombatantId,
        target_id: CombatantId,
        def: &'static SkillDefinition,
        judgement: Option<Judgement>,
    ) {
        let Some(healer) = self.combatant(healer_id) else {
            return;
        };
        let amount = damage::heal_amount(
            &healer.effective_stats(),
            def,
            judgement,
            self.environment_scale(def.element),
        );
        let restored = match self.combatant_mut(target_id) {
            Some(target) => target.heal(amount),
            None => return,
        };
        self.stats.entry(healer_id).or_default().healing_done += restored as i64;
        self.push(BattleEventData::Healed { healer: healer_id, target: target_id, amount: restored });
        self.apply_skill_effects(healer_id, target_id, def, false);
    }

    /// Roll a skill's effects for one recipient. `on_self` selects which
    /// half of the effect list applies.
    fn apply_skill_effects(&mut self, user: CombatantId, recipient: CombatantId, def: &SkillDefinition, on_self: bool) {
        for proc in def.effects.iter().filter(|e| e.on_self == on_self) {
            if self.rng.next_bool(proc.chance) {
                self.apply_status(recipient, proc.to_effect().with_source(user));
            }
        }
    }

    fn apply_status(&mut self, target_id: CombatantId, effect: StatusEffect) {
        let Some(target) = self.combatant_mut(target_id).filter(|t| t.alive) else {
            return;
        };
        target.status.apply(effect);
        let stacks = target.status.get(effect.kind).map_or(0, |e| e.stacks);
        self.push(BattleEventData::StatusApplied { target: target_id, status: effect.kind, stacks });
    }

    /// Shield first, then HP. Returns (dealt, absorbed, killed).
    fn deal_damage(&mut self, target_id: CombatantId, amount: i32) -> (i32, i32, bool) {
        let Some(target) = self.combatant_mut(target_id) else {
            return (0, 0, false);
        };
        let remaining = target.status.absorb_with_shield(target.stats.max_hp, amount);
        let dealt = target.apply_damage(remaining);
        let killed = dealt > 0 && !target.alive;
        let template = target.template;
        let level = target.level;

        if killed {
            self.record_defeat(target_id, template, level);
        }
        (dealt, amount - remaining, killed)
    }

    fn record_defeat(&mut self, id: CombatantId, template: Template, level: u8) {
        if let Template::Enemy(kind) = template {
            if self.enemies.iter().any(|c| c.id == id) {
                self.defeated.push((kind, level));
            }
        }
        debug!(combatant = %id, turn = self.turn, "Combatant defeated");
        self.push(BattleEventData::Defeated { id });
    }

    fn apply_splash(&mut self, splash: Splash) {
        self.field.push(FieldElement {
            element: splash.element,
            side: splash.side,
            slot: splash.slot,
            radius: splash.radius,
            turns_remaining: FIELD_RESIDUE_TURNS,
        });
        if splash.damage <= 0 {
            return;
        }

        let neighbours: Vec<CombatantId> = self
            .living(splash.side)
            .filter(|c| c.id != splash.target && c.slot.abs_diff(splash.slot) <= splash.radius)
            .map(|c| c.id)
            .collect();
        for id in neighbours {
            let (dealt, _, killed) = self.deal_damage(id, splash.damage);
            self.push(BattleEventData::Splash { target: id, kind: splash.kind, damage: dealt });
            let stat = self.stats.entry(splash.origin).or_default();
            stat.damage_dealt += dealt as i64;
            if killed {
                stat.knockouts += 1;
            }
        }
    }

    fn counter_phase(&mut self, attacker_id: CombatantId, struck: &[CombatantId]) {
        for &target_id in struck {
            if !self.is_alive(attacker_id) {
                break;
            }
            let basic = match self.combatant_mut(target_id) {
                Some(t) if t.alive => {
                    if !t.status.take_counter() {
                        continue;
                    }
                    t.basic_skill()
                }
                _ => continue,
            };
            debug!(counter = %target_id, target = %attacker_id, "Counter strike");
            if let Some(splash) = self.execute_attack(target_id, attacker_id, basic.definition(), None, COUNTER_POWER, true) {
                self.apply_splash(splash);
            }
        }
    }

    // -------------------------------------------------------------------------
    // End of turn
    // -------------------------------------------------------------------------

    /// Pass the current actor's turn without acting.
    pub fn skip_turn(&mut self, reason: SkipReason) -> Option<BattleOutcome> {
        if self.phase.is_terminal() {
            return self.outcome();
        }
        if let Some(actor) = self.current_actor_id() {
            self.push(BattleEventData::TurnSkipped { actor, reason });
        }
        self.process_end_of_turn()
    }

    /// Tick every living combatant's effects, decay the field and check for
    /// a winner. Opens the next turn when the battle goes on.
    ///
    /// Turn-bound effects (stun, freeze, silence) only decay on their
    /// bearer's own turn.
    pub fn process_end_of_turn(&mut self) -> Option<BattleOutcome> {
        if self.phase.is_terminal() {
            return self.outcome();
        }
        self.phase = BattlePhase::EndTurn;
        let turn = self.turn;
        let actor = self.current_actor_id();

        let living: Vec<CombatantId> = self
            .party
            .iter()
            .chain(self.enemies.iter())
            .filter(|c| c.alive)
            .map(|c| c.id)
            .collect();
        for id in living {
            let Some(c) = self.combatant_mut(id) else {
                continue;
            };
            let tick = c.status.tick(c.stats.max_hp, turn, Some(id) == actor);
            let dealt = c.apply_damage(tick.damage);
            let healed = c.heal(tick.healing);
            let died = !c.alive;
            let template = c.template;
            let level = c.level;

            if dealt > 0 || healed > 0 {
                self.push(BattleEventData::StatusTick { target: id, damage: dealt, healing: healed });
            }
            for status in tick.expired {
                self.push(BattleEventData::StatusExpired { target: id, status });
            }
            if died {
                self.record_defeat(id, template, level);
            }
        }

        for residue in &mut self.field {
            residue.turns_remaining = residue.turns_remaining.saturating_sub(1);
        }
        self.field.retain(|f| f.turns_remaining > 0);

        if let Some(outcome) = self.terminal_outcome() {
            self.finish(outcome);
            return Some(outcome);
        }

        self.advance();
        None
    }

    fn terminal_outcome(&self) -> Option<BattleOutcome> {
        let party_standing = self.living(Side::Party).next().is_some();
        let enemies_standing = self.living(Side::Enemies).next().is_some();
        match (party_standing, enemies_standing) {
            (false, false) => Some(BattleOutcome::Draw),
            (false, true) => Some(BattleOutcome::Defeat),
            (true, false) => Some(BattleOutcome::Victory),
            (true, true) => None,
        }
    }

    fn finish(&mut self, outcome: BattleOutcome) {
        self.phase = outcome.phase();
        self.pending_rhythm = None;
        self.judgement = None;
        self.push(BattleEventData::BattleEnded { outcome });
        info!(
            outcome = ?outcome,
            turn = self.turn,
            round = self.round,
            wave = self.wave,
            hash = %short_hex(&self.compute_hash()),
            "Battle ended"
        );
    }

    fn advance(&mut self) {
        self.turn = self.turn.saturating_add(1);

        let mut next = self.current_actor_index + 1;
        while self.turn_order.get(next).map_or(false, |id| !self.is_alive(*id)) {
            next += 1;
        }
        if next >= self.turn_order.len() {
            self.round = self.round.saturating_add(1);
            self.turn_order = self.compute_turn_order();
            next = 0;
        }

        self.current_actor_index = next;
        self.begin_turn();
    }

    // -------------------------------------------------------------------------
    // Automation
    // -------------------------------------------------------------------------

    /// Drive one non-player turn. Returns false when waiting on a player.
    ///
    /// Stunned or frozen actors (players included) lose their turn here.
    pub fn auto_step(&mut self) -> bool {
        if self.phase.is_terminal() {
            return false;
        }
        let Some(actor) = self.current_actor() else {
            return false;
        };
        if let Err(block) = actor.status.can_act() {
            self.skip_turn(SkipReason::Blocked(block));
            return true;
        }
        let Controller::Ai(archetype) = actor.controller.clone() else {
            return false;
        };

        let actor = actor.clone();
        let opponents: Vec<Combatant> = self.side(actor.side.opposite()).to_vec();
        let allies: Vec<Combatant> = self.side(actor.side).to_vec();
        let opponent_refs: Vec<&Combatant> = opponents.iter().collect();
        let ally_refs: Vec<&Combatant> = allies.iter().collect();
        let decision = ai::choose_action(archetype, &actor, &opponent_refs, &ally_refs, &mut self.rng);

        match decision {
            AiDecision::Wait => {
                self.skip_turn(SkipReason::NoTargets);
            }
            AiDecision::Act { skill, target } => {
                if archetype == AiArchetype::BossPattern {
                    if let Some(c) = self.combatant_mut(actor.id) {
                        c.ai_cursor = c.ai_cursor.wrapping_add(1);
                    }
                }
                if let Err(err) = self.process_action(actor.id, skill, target) {
                    debug!(actor = %actor.id, ?skill, error = %err, "AI action rejected");
                    self.skip_turn(SkipReason::NoTargets);
                }
            }
        }
        true
    }

    /// Hand a player's combatants to the autopilot (on disconnect).
    pub fn set_autopilot(&mut self, player: &PlayerId) -> bool {
        let mut switched = Vec::new();
        for c in self.party.iter_mut().chain(self.enemies.iter_mut()) {
            if c.player_id() == Some(player) {
                c.set_autopilot();
                switched.push(c.id);
            }
        }
        for &actor in &switched {
            self.push(BattleEventData::Autopilot { actor });
        }

        if self.pending_rhythm.as_ref().map_or(false, |p| &p.player == player) {
            self.pending_rhythm = None;
            if self.phase == BattlePhase::RhythmInput {
                self.phase = BattlePhase::ActionSelect;
            }
        }
        !switched.is_empty()
    }

    /// Replace the enemy side with a fresh wave and open a new round.
    pub fn next_wave(&mut self, mut enemies: Vec<Combatant>) {
        arrange(&mut enemies, Side::Enemies);
        for e in &enemies {
            self.stats.entry(e.id).or_default();
        }
        self.enemies = enemies;
        self.wave = self.wave.saturating_add(1);
        self.field.clear();
        self.combo.reset();
        self.turn = self.turn.saturating_add(1);
        self.round = self.round.saturating_add(1);
        self.turn_order = self.compute_turn_order();
        self.current_actor_index = 0;

        let wave = self.wave;
        self.push(BattleEventData::WaveStarted { wave });
        info!(wave, enemies = self.enemies.len(), "Wave started");
        self.begin_turn();
    }

    /// Roll rewards for the battle so far.
    pub fn roll_rewards(&mut self, endless: bool) -> Rewards {
        let outcome = self.outcome().unwrap_or(BattleOutcome::Draw);
        rewards::compute_rewards(outcome, &self.defeated, endless, &mut self.rng)
    }

    /// Stats for every combatant a player controls, merged.
    pub fn player_stats(&self, player: &PlayerId) -> CombatantStats {
        let mut total = CombatantStats::default();
        for c in self.controlled_by(player) {
            if let Some(s) = self.stats.get(&c.id) {
                total.merge(s);
            }
        }
        total
    }

    // -------------------------------------------------------------------------
    // Verification
    // -------------------------------------------------------------------------

    /// Compute hash of current state for replay verification.
    pub fn compute_hash(&self) -> StateHash {
        compute_state_hash(self.turn, self.seed, |hasher| {
            hasher.update_u32(self.round);
            hasher.update_u32(self.wave);
            hasher.update_u8(self.phase as u8);
            hasher.update_u64(self.current_actor_index as u64);
            for id in &self.turn_order {
                hasher.update_u16(id.0);
            }

            for c in self.party.iter().chain(self.enemies.iter()) {
                hasher.update_u16(c.id.0);
                hasher.update_i32(c.stats.hp);
                hasher.update_bool(c.alive);
                hasher.update_u8(c.current_element.map_or(u8::MAX, Element::as_u8));
                hasher.update_u8(c.ai_cursor);
                for effect in c.status.iter() {
                    hasher.update_u8(effect.kind.as_u8());
                    hasher.update_u8(effect.stacks);
                    hasher.update_u8(effect.duration);
                    hasher.update_fixed(effect.value);
                }
            }

            for residue in &self.field {
                hasher.update_u8(residue.element.as_u8());
                hasher.update_u8(residue.slot);
                hasher.update_u8(residue.turns_remaining);
            }

            hasher.update_u32(self.combo.hits);
            let [s0, s1] = self.rng.state();
            hasher.update_u64(s0);
            hasher.update_u64(s1);
        })
    }

    /// Binary checkpoint.
    pub fn snapshot(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Restore from a checkpoint.
    pub fn restore(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

fn arrange(members: &mut [Combatant], side: Side) {
    for (slot, c) in members.iter_mut().enumerate() {
        c.side = side;
        c.slot = slot.min(u8::MAX as usize) as u8;
    }
}

/// Skill offered in a rhythm prompt: the signature skill unless silenced.
fn prompt_skill(actor: &Combatant) -> SkillId {
    if !actor.status.can_use_skills() {
        return actor.basic_skill();
    }
    match actor.template {
        Template::Character(character) if actor.skills.contains(&character.signature_skill()) => {
            character.signature_skill()
        }
        _ => actor.skills.get(1).copied().unwrap_or_else(|| actor.basic_skill()),
    }
}

/// Stronger skills get longer sequences.
fn rhythm_note_count(def: &SkillDefinition) -> usize {
    BASE_RHYTHM_NOTES + (def.power / percent(50)).max(0) as usize
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::combatant::tests::{dummy, stats};
    use crate::game::content::{spawn_character, spawn_enemy, CharacterId};
    use crate::game::status::StatusType;
    use proptest::prelude::*;

    fn player(id: u16, name: &str, speed: i32) -> Combatant {
        Combatant::new(
            CombatantId(id),
            name,
            Template::Character(CharacterId::Ember),
            10,
            Side::Party,
            Controller::Player(PlayerId::new(name)),
            stats(1000, 100, 0, speed),
            None,
            vec![SkillId::Strike, SkillId::FlameLash],
        )
    }

    fn enemy(id: u16, hp: i32, speed: i32) -> Combatant {
        let mut e = dummy(id, Side::Enemies, None);
        e.stats = stats(hp, 100, 0, speed);
        e.controller = Controller::Ai(AiArchetype::Aggressive);
        e
    }

    fn battle(party: Vec<Combatant>, enemies: Vec<Combatant>) -> BattleState {
        BattleState::new(BattleSetup {
            seed: 7,
            party,
            enemies,
            environment: Environment::Arena,
            is_boss_encounter: false,
            rhythm_required: false,
        })
    }

    #[test]
    fn test_turn_order_by_speed() {
        let b = battle(vec![player(1, "a", 100), player(2, "b", 300)], vec![enemy(10, 500, 200)]);
        assert_eq!(b.turn_order, vec![CombatantId(2), CombatantId(10), CombatantId(1)]);
        assert_eq!(b.current_actor_id(), Some(CombatantId(2)));
    }

    #[test]
    fn test_player_turn_opens_rhythm_prompt() {
        let mut b = battle(vec![player(1, "alice", 300)], vec![enemy(10, 500, 100)]);
        assert_eq!(b.phase, BattlePhase::RhythmInput);
        let pending = b.pending_rhythm.clone();
        assert_eq!(pending.as_ref().map(|p| p.skill), Some(SkillId::FlameLash));

        let events = b.take_events();
        assert!(events.iter().any(|e| matches!(e.data, BattleEventData::RhythmPrompt { .. })));
        assert!(b.take_events().is_empty());
    }

    #[test]
    fn test_not_your_turn() {
        let mut b = battle(vec![player(1, "alice", 300)], vec![enemy(10, 500, 100)]);
        let err = b.process_action(CombatantId(10), SkillId::Strike, ActionTarget::Single(CombatantId(1)));
        assert_eq!(err, Err(ActionError::NotYourTurn));

        let err = b.process_player_action(&PlayerId::new("mallory"), SkillId::Strike, ActionTarget::Single(CombatantId(10)));
        assert_eq!(err, Err(ActionError::NotYourTurn));
    }

    #[test]
    fn test_invalid_skill_and_target() {
        let mut b = battle(vec![player(1, "alice", 300)], vec![enemy(10, 500, 100)]);
        let alice = PlayerId::new("alice");
        assert_eq!(
            b.process_player_action(&alice, SkillId::Cataclysm, ActionTarget::Single(CombatantId(10))),
            Err(ActionError::UnknownSkill(SkillId::Cataclysm))
        );
        assert_eq!(
            b.process_player_action(&alice, SkillId::Strike, ActionTarget::Single(CombatantId(99))),
            Err(ActionError::InvalidTarget)
        );
        assert_eq!(b.phase, BattlePhase::RhythmInput);
        assert_eq!(b.turn, 1);
    }

    #[test]
    fn test_last_enemy_defeated_is_victory() {
        let mut b = battle(vec![player(1, "alice", 300)], vec![enemy(10, 10, 100)]);
        let alice = PlayerId::new("alice");
        b.process_player_action(&alice, SkillId::Strike, ActionTarget::Single(CombatantId(10)))
            .unwrap_or_else(|e| panic!("action rejected: {e}"));

        assert_eq!(b.phase, BattlePhase::Victory);
        assert_eq!(b.outcome(), Some(BattleOutcome::Victory));
        assert_eq!(b.living(Side::Enemies).count(), 0);
        assert_eq!(b.defeated, vec![(EnemyKind::TrainingDummy, 1)]);
        assert_eq!(b.stats[&CombatantId(1)].knockouts, 1);
        assert_eq!(
            b.process_player_action(&alice, SkillId::Strike, ActionTarget::Single(CombatantId(10))),
            Err(ActionError::BattleOver)
        );
    }

    #[test]
    fn test_rhythm_required_blocks_direct_action() {
        let mut b = BattleState::new(BattleSetup {
            seed: 3,
            party: vec![player(1, "alice", 300)],
            enemies: vec![enemy(10, 5000, 100)],
            environment: Environment::Arena,
            is_boss_encounter: true,
            rhythm_required: true,
        });
        let alice = PlayerId::new("alice");
        assert_eq!(
            b.process_player_action(&alice, SkillId::Strike, ActionTarget::Single(CombatantId(10))),
            Err(ActionError::AwaitingRhythm)
        );

        let notes = b.pending_rhythm.as_ref().map_or(0, |p| p.sequence.len()) as u16;
        let judgement = b.submit_rhythm(&alice, &RhythmResult { perfect: notes, ..Default::default() });
        assert_eq!(judgement, Ok(Judgement::Perfect));
        assert_eq!(b.phase, BattlePhase::ActionSelect);

        b.process_player_action(&alice, SkillId::Strike, ActionTarget::Single(CombatantId(10)))
            .unwrap_or_else(|e| panic!("action rejected: {e}"));
        // Strike at 150% timing
        assert_eq!(b.enemies[0].stats.hp, 5000 - 150);
    }

    #[test]
    fn test_overcounted_rhythm_rejected() {
        let mut b = battle(vec![player(1, "alice", 300)], vec![enemy(10, 500, 100)]);
        let result = RhythmResult { perfect: 500, ..Default::default() };
        assert_eq!(b.submit_rhythm(&PlayerId::new("alice"), &result), Err(ActionError::InvalidRhythm));
        assert_eq!(b.phase, BattlePhase::RhythmInput);
    }

    #[test]
    fn test_miss_judgement_breaks_combo() {
        let mut b = battle(vec![player(1, "alice", 300)], vec![enemy(10, 5000, 100)]);
        b.combo.register_hit(CombatantId(1), Side::Party, None, 10);
        b.combo.register_hit(CombatantId(1), Side::Party, None, 10);

        let notes = b.pending_rhythm.as_ref().map_or(0, |p| p.sequence.len()) as u16;
        let judgement = b.submit_rhythm(&PlayerId::new("alice"), &RhythmResult { miss: notes, ..Default::default() });
        assert_eq!(judgement, Ok(Judgement::Miss));
        assert_eq!(b.combo.hits, 0);
        assert!(!b.combo.active);
    }

    #[test]
    fn test_silenced_player_limited_to_basic() {
        let mut p = player(1, "alice", 300);
        p.status.apply(StatusEffect::new(StatusType::Silence, 3, 0));
        let mut b = battle(vec![p], vec![enemy(10, 5000, 100)]);
        let alice = PlayerId::new("alice");

        assert_eq!(b.pending_rhythm.as_ref().map(|r| r.skill), Some(SkillId::Strike));
        assert_eq!(
            b.process_player_action(&alice, SkillId::FlameLash, ActionTarget::Single(CombatantId(10))),
            Err(ActionError::Silenced)
        );
        assert!(b
            .process_player_action(&alice, SkillId::Strike, ActionTarget::Single(CombatantId(10)))
            .is_ok());
    }

    #[test]
    fn test_stunned_actor_skipped_by_auto_step() {
        let mut p = player(1, "alice", 300);
        p.status.apply(StatusEffect::new(StatusType::Stun, 1, 0));
        let mut b = battle(vec![p], vec![enemy(10, 5000, 100)]);

        assert_eq!(b.phase, BattlePhase::ActionSelect);
        assert!(b.pending_rhythm.is_none());
        assert!(b.auto_step());
        assert_eq!(b.current_actor_id(), Some(CombatantId(10)));
        assert!(b.log.iter().any(|e| matches!(
            e.data,
            BattleEventData::TurnSkipped { reason: SkipReason::Blocked(ActionBlock::Stunned), .. }
        )));
        // Stun expired on the end-of-turn tick
        assert!(!b.party[0].status.has(StatusType::Stun));
    }

    #[test]
    fn test_overload_stun_costs_next_turn() {
        let mut e = enemy(10, 5000, 100);
        e.element = Some(Element::Thunder);
        let mut b = battle(vec![player(1, "alice", 300)], vec![e]);

        b.process_player_action(&PlayerId::new("alice"), SkillId::FlameLash, ActionTarget::Single(CombatantId(10)))
            .unwrap_or_else(|e| panic!("action rejected: {e}"));
        assert!(b.log.iter().any(|e| matches!(
            e.data,
            BattleEventData::Reaction { kind: ReactionKind::Overload, .. }
        )));
        // Still stunned when its turn comes around
        assert_eq!(b.current_actor_id(), Some(CombatantId(10)));
        assert!(b.enemies[0].status.has(StatusType::Stun));

        assert!(b.auto_step());
        assert!(b.log.iter().any(|e| matches!(
            e.data,
            BattleEventData::TurnSkipped {
                actor: CombatantId(10),
                reason: SkipReason::Blocked(ActionBlock::Stunned),
            }
        )));
        assert!(!b.enemies[0].status.has(StatusType::Stun));
        assert_eq!(b.current_actor_id(), Some(CombatantId(1)));
    }

    #[test]
    fn test_rejected_target_keeps_judgement() {
        let mut b = battle(vec![player(1, "alice", 300)], vec![enemy(10, 5000, 100)]);
        let alice = PlayerId::new("alice");
        let notes = b.pending_rhythm.as_ref().map_or(0, |p| p.sequence.len()) as u16;
        let judgement = b.submit_rhythm(&alice, &RhythmResult { perfect: notes, ..Default::default() });
        assert_eq!(judgement, Ok(Judgement::Perfect));
        assert_eq!(b.phase, BattlePhase::ActionSelect);

        assert_eq!(
            b.process_player_action(&alice, SkillId::Strike, ActionTarget::Single(CombatantId(1))),
            Err(ActionError::InvalidTarget)
        );
        assert_eq!(b.phase, BattlePhase::ActionSelect);
        assert_eq!(b.judgement, Some(Judgement::Perfect));

        b.process_player_action(&alice, SkillId::Strike, ActionTarget::Single(CombatantId(10)))
            .unwrap_or_else(|e| panic!("action rejected: {e}"));
        assert!(b.enemies[0].stats.hp < 5000);
        assert_eq!(b.current_actor_id(), Some(CombatantId(10)));
    }

    #[test]
    fn test_auto_step_waits_for_players() {
        let mut b = battle(vec![player(1, "alice", 300)], vec![enemy(10, 500, 100)]);
        assert!(!b.auto_step());
        assert_eq!(b.turn, 1);
    }

    #[test]
    fn test_counter_strikes_back() {
        let mut e = enemy(10, 1000, 100);
        e.status.apply(StatusEffect::new(StatusType::Counter, 2, 0));
        let mut b = battle(vec![player(1, "alice", 300)], vec![e]);

        b.process_player_action(&PlayerId::new("alice"), SkillId::Strike, ActionTarget::Single(CombatantId(10)))
            .unwrap_or_else(|e| panic!("action rejected: {e}"));
        assert_eq!(b.enemies[0].stats.hp, 900);
        assert_eq!(b.party[0].stats.hp, 950);
        assert!(!b.enemies[0].status.has(StatusType::Counter));
    }

    #[test]
    fn test_elemental_hit_leaves_aura() {
        let mut b = battle(vec![player(1, "alice", 300)], vec![enemy(10, 5000, 100)]);
        b.process_player_action(&PlayerId::new("alice"), SkillId::FlameLash, ActionTarget::Single(CombatantId(10)))
            .unwrap_or_else(|e| panic!("action rejected: {e}"));
        assert_eq!(b.enemies[0].current_element, Some(Element::Fire));
    }

    #[test]
    fn test_draw_when_both_sides_fall() {
        let mut p = player(1, "alice", 300);
        p.stats = stats(5, 100, 0, 300);
        p.status.apply(StatusEffect::new(StatusType::Burn, 3, FIXED_ONE));
        let mut e = enemy(10, 5, 100);
        e.status.apply(StatusEffect::new(StatusType::Burn, 3, FIXED_ONE));
        let mut b = battle(vec![p], vec![e]);

        assert_eq!(b.skip_turn(SkipReason::NoTargets), Some(BattleOutcome::Draw));
        assert_eq!(b.phase, BattlePhase::Draw);
    }

    #[test]
    fn test_autopilot_takes_over() {
        let mut b = battle(vec![player(1, "alice", 300)], vec![enemy(10, 5000, 100)]);
        assert!(b.set_autopilot(&PlayerId::new("alice")));
        assert_eq!(b.phase, BattlePhase::ActionSelect);
        assert!(b.pending_rhythm.is_none());
        assert!(b.auto_step());
        assert!(b.enemies[0].stats.hp < 5000);
    }

    #[test]
    fn test_outcome_for_side() {
        assert_eq!(BattleOutcome::Victory.for_side(Side::Enemies), BattleOutcome::Defeat);
        assert_eq!(BattleOutcome::Defeat.for_side(Side::Enemies), BattleOutcome::Victory);
        assert_eq!(BattleOutcome::Draw.for_side(Side::Enemies), BattleOutcome::Draw);
        assert_eq!(BattleOutcome::Victory.for_side(Side::Party), BattleOutcome::Victory);
    }

    fn ai_battle(seed: u64) -> BattleState {
        let mut party = Vec::new();
        for (i, character) in [CharacterId::Ember, CharacterId::Tide, CharacterId::Volt].into_iter().enumerate() {
            let mut c = spawn_character(CombatantId(i as u16 + 1), character, 10, Side::Party, PlayerId::new("p"), "");
            c.set_autopilot();
            party.push(c);
        }
        let enemies = vec![
            spawn_enemy(CombatantId(101), EnemyKind::Drake, 10, Side::Enemies),
            spawn_enemy(CombatantId(102), EnemyKind::Shaman, 8, Side::Enemies),
        ];
        let mut b = BattleState::new(BattleSetup {
            seed,
            party,
            enemies,
            environment: Environment::Volcano,
            is_boss_encounter: true,
            rhythm_required: false,
        });
        for _ in 0..5_000 {
            if !b.auto_step() {
                break;
            }
        }
        b
    }

    #[test]
    fn test_ai_battle_is_deterministic() {
        let a = ai_battle(42);
        let b = ai_battle(42);
        assert!(a.phase.is_terminal());
        assert_eq!(a.compute_hash(), b.compute_hash());
        assert_eq!(a.log, b.log);
    }

    #[test]
    fn test_random_seeds_replay_identically() {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        for _ in 0..8 {
            let seed: u64 = rng.gen();
            assert_eq!(ai_battle(seed).compute_hash(), ai_battle(seed).compute_hash(), "seed {seed}");
        }
    }

    #[test]
    fn test_snapshot_restore() {
        let mut b = battle(vec![player(1, "alice", 300)], vec![enemy(10, 5000, 100)]);
        b.process_player_action(&PlayerId::new("alice"), SkillId::Strike, ActionTarget::Single(CombatantId(10)))
            .unwrap_or_else(|e| panic!("action rejected: {e}"));

        let bytes = b.snapshot().unwrap_or_default();
        let restored = BattleState::restore(&bytes).unwrap_or_else(|e| panic!("restore failed: {e}"));
        assert_eq!(restored.compute_hash(), b.compute_hash());
        assert_eq!(restored, b);
    }

    #[test]
    fn test_next_wave_resets_enemies() {
        let mut b = battle(vec![player(1, "alice", 300)], vec![enemy(10, 10, 100)]);
        b.process_player_action(&PlayerId::new("alice"), SkillId::Strike, ActionTarget::Single(CombatantId(10)))
            .unwrap_or_else(|e| panic!("action rejected: {e}"));
        assert_eq!(b.phase, BattlePhase::Victory);

        let id = b.next_combatant_id();
        assert_eq!(id, CombatantId(11));
        b.next_wave(vec![enemy(id.0, 500, 100)]);
        assert_eq!(b.wave, 2);
        assert!(!b.phase.is_terminal());
        assert_eq!(b.turn_order.len(), 2);
        assert_eq!(b.defeated.len(), 1);
    }

    proptest! {
        #[test]
        fn test_turn_order_contains_living_once(
            seed in any::<u64>(),
            speeds in prop::collection::vec(1i32..200, 2..10),
            dead in prop::collection::vec(any::<bool>(), 10),
        ) {
            let mut enemies = Vec::new();
            for (i, &speed) in speeds.iter().enumerate() {
                enemies.push(enemy(10 + i as u16, 100, speed));
            }
            let mut b = BattleState::new(BattleSetup {
                seed,
                party: vec![player(1, "alice", 100)],
                enemies,
                environment: Environment::Arena,
                is_boss_encounter: false,
                rhythm_required: false,
            });
            for (c, &kill) in b.enemies.iter_mut().zip(dead.iter()) {
                if kill {
                    c.apply_damage(i32::MAX);
                }
            }

            let order = b.compute_turn_order();
            let mut sorted = order.clone();
            sorted.sort();
            let mut living: Vec<CombatantId> = b.party.iter().chain(b.enemies.iter())
                .filter(|c| c.alive).map(|c| c.id).collect();
            living.sort();
            prop_assert_eq!(sorted, living);

            let order_speeds: Vec<i32> = order.iter()
                .filter_map(|id| b.combatant(*id)).map(|c| c.effective_stats().speed).collect();
            prop_assert!(order_speeds.windows(2).all(|w| w[0] >= w[1]));
        }
    }
}

//! Combat Logic Module
//!
//! All battle simulation code. 100% deterministic given a seed.
//!
//! ## Module Structure
//!
//! - `element`: Elements and affinity
//! - `reaction`: Elemental reaction resolver
//! - `status`: Status effect ledger
//! - `combatant`: Combatants, stats and ids
//! - `skill`: Skill definitions
//! - `content`: Characters, enemies, encounters
//! - `rhythm`: Rhythm sequences and judgements
//! - `damage`: Damage pipeline
//! - `combo`: Combo chain
//! - `ai`: Enemy AI archetypes
//! - `battle`: Turn-based battle state machine
//! - `royale`: Free-for-all battle royale
//! - `rewards`: Gold, XP, loot and battle statistics
//! - `events`: Battle events for clients and replay

pub mod element;
pub mod reaction;
pub mod status;
pub mod combatant;
pub mod skill;
pub mod content;
pub mod rhythm;
pub mod damage;
pub mod combo;
pub mod ai;
pub mod battle;
pub mod royale;
pub mod rewards;
pub mod events;

// Re-export key types
pub use element::Element;
pub use combatant::{Combatant, CombatantId, PlayerId, Side};
pub use skill::SkillId;
pub use content::{CharacterId, EnemyKind, Environment};
pub use ai::{ActionTarget, AiArchetype};
pub use battle::{ActionError, BattleOutcome, BattlePhase, BattleSetup, BattleState};
pub use royale::BattleRoyaleState;
pub use events::{BattleEvent, BattleEventData};

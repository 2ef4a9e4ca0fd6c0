//! # Chroma Clash Game Server
//!
//! Authoritative session orchestrator and turn-based combat engine for
//! Chroma Clash.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   CHROMA CLASH SERVER                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── fixed.rs    - Q16.16 fixed-point arithmetic             │
//! │  ├── rng.rs      - Deterministic Xorshift128+ PRNG           │
//! │  └── hash.rs     - State hashing for verification            │
//! │                                                              │
//! │  game/           - Combat logic (deterministic)              │
//! │  ├── element.rs  - Elements, affinity, reactions             │
//! │  ├── damage.rs   - Damage pipeline                           │
//! │  ├── battle.rs   - Turn-based battle state machine           │
//! │  ├── royale.rs   - Free-for-all battle royale                │
//! │  └── ...         - Skills, status, AI, rhythm, rewards       │
//! │                                                              │
//! │  session/        - Rooms, lobbies, matchmaking (sync)        │
//! │  ├── room.rs     - Room codes, modes, members                │
//! │  ├── modes.rs    - Per-mode battle initializers              │
//! │  └── manager.rs  - Single mutation entry point               │
//! │                                                              │
//! │  network/        - Runtime (non-deterministic)               │
//! │  ├── protocol.rs - JSON message types                        │
//! │  ├── transport.rs- Outbound delivery                         │
//! │  └── server.rs   - Async timers and cleanup                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism Guarantee
//!
//! The `core/` and `game/` modules are deterministic:
//! - No floating-point arithmetic in combat resolution
//! - No HashMap (uses BTreeMap for sorted iteration)
//! - No system time dependencies
//! - All randomness from a seeded Xorshift128+
//!
//! Given the same seed and the same player inputs, a battle replays to
//! the same state hash.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod session;
pub mod network;

// Re-export commonly used types
pub use crate::core::fixed::{Fixed, FIXED_ONE, FIXED_HALF, FIXED_SCALE};
pub use crate::core::rng::DeterministicRng;
pub use game::battle::{BattleSetup, BattleState, BattleOutcome};
pub use game::combatant::{Combatant, CombatantId, PlayerId, Side};
pub use session::{GameMode, RoomCode, SessionManager};
pub use network::{ClientMessage, GameServer, ServerConfig, ServerMessage};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

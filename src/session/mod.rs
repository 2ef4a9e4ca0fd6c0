//! Session Orchestration
//!
//! Rooms, lobbies, matchmaking and the mode initializers. Everything here
//! is synchronous; the async runtime lives in `network::server`.
//!
//! ## Module Structure
//!
//! - `room`: Room codes, game modes, rooms and members
//! - `matchmaker`: Per-mode waiting queues
//! - `modes`: Mode initializers and mode state
//! - `timers`: Timer requests handed to the runtime
//! - `manager`: Session manager (single mutation entry point)

pub mod room;
pub mod matchmaker;
pub mod modes;
pub mod timers;
pub mod manager;

pub use room::{GameMode, Room, RoomCode, RoomMember, RoomState};
pub use matchmaker::{Matchmaker, QueueStatus};
pub use modes::{MobaState, ModeState};
pub use timers::{CountdownStep, TimerCommand};
pub use manager::{SessionConfig, SessionError, SessionManager};

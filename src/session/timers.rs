//! Timer commands
//!
//! The session manager never spawns anything. It queues commands that the
//! server drains after every event and turns into per-room tokio tasks.

use super::room::RoomCode;

/// What the runtime should do with a room's timers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerCommand {
    /// Start the 1 Hz pre-game countdown
    StartCountdown(RoomCode),
    /// Start the battle tick (replaces the countdown)
    StartBattle(RoomCode),
    /// Launch a matched room after the client grace delay
    ScheduleLaunch(RoomCode),
    /// Stop the battle tick
    StopBattle(RoomCode),
    /// Abort every task of a destroyed room
    Cancel(RoomCode),
}

impl TimerCommand {
    /// Room the command targets.
    pub fn room(&self) -> &RoomCode {
        match self {
            TimerCommand::StartCountdown(code)
            | TimerCommand::StartBattle(code)
            | TimerCommand::ScheduleLaunch(code)
            | TimerCommand::StopBattle(code)
            | TimerCommand::Cancel(code) => code,
        }
    }
}

/// Result of one countdown tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownStep {
    /// Seconds left after this tick
    Tick(u8),
    /// Countdown done, game launched
    Launched,
    /// Room gone or no longer loading
    Aborted,
}

impl CountdownStep {
    /// Whether the countdown task should stop.
    pub fn is_final(self) -> bool {
        !matches!(self, CountdownStep::Tick(_))
    }
}

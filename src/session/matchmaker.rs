//! Matchmaker
//!
//! One FIFO queue per game mode. Enqueueing checks for a match right away:
//! once a queue holds the mode's minimum, up to the mode's maximum players
//! are taken off the front. A player sits in at most one queue.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::game::combatant::PlayerId;
use super::room::GameMode;

/// Estimated wait per missing player, in seconds.
pub const WAIT_PER_MISSING_PLAYER_SECS: u32 = 15;

/// A queued player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    /// Player
    pub player: PlayerId,
    /// Enqueue time
    pub joined_at: DateTime<Utc>,
}

/// Where a player stands in a queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    /// 1-based position
    pub position: u32,
    /// Seconds until a match is expected
    pub estimated_wait: u32,
    /// Queue mode
    pub mode: GameMode,
}

/// Result of enqueueing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueOutcome {
    /// Still waiting
    Waiting(QueueStatus),
    /// Match formed; the first player hosts
    Matched(Vec<PlayerId>),
}

/// Per-mode waiting lists.
#[derive(Debug, Default)]
pub struct Matchmaker {
    queues: BTreeMap<GameMode, VecDeque<QueueEntry>>,
}

impl Matchmaker {
    /// Empty matchmaker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a player and try to form a match.
    ///
    /// The player leaves any other queue first. Re-queueing for the same
    /// mode keeps the original position.
    pub fn enqueue(&mut self, player: PlayerId, mode: GameMode, now: DateTime<Utc>) -> QueueOutcome {
        for (other, queue) in self.queues.iter_mut() {
            if *other != mode {
                queue.retain(|e| e.player != player);
            }
        }

        let queue = self.queues.entry(mode).or_default();
        if !queue.iter().any(|e| e.player == player) {
            queue.push_back(QueueEntry { player: player.clone(), joined_at: now });
        }

        let (min, max) = mode.queue_bounds();
        if queue.len() >= min {
            let take = queue.len().min(max);
            let matched: Vec<PlayerId> = queue.drain(..take).map(|e| e.player).collect();
            info!(mode = ?mode, players = matched.len(), "Match formed");
            return QueueOutcome::Matched(matched);
        }

        debug!(player = %player, mode = ?mode, queued = queue.len(), "Player queued");
        match self.status(&player) {
            Some(status) => QueueOutcome::Waiting(status),
            None => QueueOutcome::Waiting(QueueStatus { position: 1, estimated_wait: 0, mode }),
        }
    }

    /// Remove a player from every queue. Returns whether anything changed.
    pub fn dequeue(&mut self, player: &PlayerId) -> bool {
        let mut removed = false;
        for queue in self.queues.values_mut() {
            let before = queue.len();
            queue.retain(|e| &e.player != player);
            removed |= queue.len() != before;
        }
        removed
    }

    /// Current status of a queued player.
    pub fn status(&self, player: &PlayerId) -> Option<QueueStatus> {
        self.queues.iter().find_map(|(mode, queue)| {
            let index = queue.iter().position(|e| &e.player == player)?;
            let (min, _) = mode.queue_bounds();
            let missing = min.saturating_sub(queue.len()) as u32;
            Some(QueueStatus {
                position: index as u32 + 1,
                estimated_wait: missing * WAIT_PER_MISSING_PLAYER_SECS,
                mode: *mode,
            })
        })
    }

    /// Players waiting for `mode`.
    pub fn len(&self, mode: GameMode) -> usize {
        self.queues.get(&mode).map_or(0, VecDeque::len)
    }

    /// Nobody is queued anywhere.
    pub fn is_empty(&self) -> bool {
        self.queues.values().all(VecDeque::is_empty)
    }
}

// =============================================================================
// TESTS
// =============================================================================

//! Rhythm Input Layer
//!
//! Before a player acts, the server sends a short note sequence. The client
//! reports how many notes landed in each timing window; the tally becomes a
//! [`Judgement`], and the judgement becomes the damage engine's timing
//! multiplier.

use serde::{Deserialize, Serialize};

use crate::core::fixed::{percent, Fixed, FIXED_ONE};
use crate::core::rng::DeterministicRng;

/// Number of input lanes.
pub const LANES: u8 = 4;

/// Quality of a rhythm input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Judgement {
    /// Missed the window entirely
    Miss,
    /// Late or early
    Bad,
    /// Acceptable
    Good,
    /// Close
    Great,
    /// On the beat
    Perfect,
}

impl Judgement {
    /// Damage multiplier for this judgement.
    pub fn multiplier(self) -> Fixed {
        match self {
            Judgement::Perfect => percent(150),
            Judgement::Great => percent(125),
            Judgement::Good => FIXED_ONE,
            Judgement::Bad => percent(75),
            Judgement::Miss => percent(50),
        }
    }

    /// Stable hash id.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Multiplier when a turn had no rhythm phase.
pub fn timing_multiplier(judgement: Option<Judgement>) -> Fixed {
    judgement.map_or(FIXED_ONE, Judgement::multiplier)
}

/// One note to hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    /// Lane index
    pub lane: u8,
    /// Milliseconds from sequence start
    pub offset_ms: u32,
}

/// Note sequence sent to the acting player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RhythmSequence {
    /// Notes in time order
    pub notes: Vec<Note>,
    /// Tempo
    pub bpm: u16,
    /// Half-width of the hit window
    pub window_ms: u16,
}

impl RhythmSequence {
    /// Generate a sequence. Harder skills get more notes.
    pub fn generate(note_count: usize, rng: &mut DeterministicRng) -> Self {
        let bpm = 90 + rng.next_int(7) as u16 * 10;
        let beat_ms = 60_000 / bpm as u32;
        let mut offset = beat_ms;
        let mut notes = Vec::with_capacity(note_count);
        for _ in 0..note_count {
            notes.push(Note { lane: rng.next_int(LANES as u32) as u8, offset_ms: offset });
            // Whole or half beats
            offset += if rng.next_bool(percent(30)) { beat_ms / 2 } else { beat_ms };
        }
        Self { notes, bpm, window_ms: 120 }
    }

    /// Number of notes.
    pub fn len(&self) -> usize {
        self.notes.len()
    }

    /// True for an empty sequence.
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }
}

/// Client-reported hit tally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RhythmResult {
    /// Perfect hits
    pub perfect: u16,
    /// Great hits
    pub great: u16,
    /// Good hits
    pub good: u16,
    /// Bad hits
    pub bad: u16,
    /// Misses
    pub miss: u16,
}

impl RhythmResult {
    /// Total notes reported.
    pub fn total(&self) -> u32 {
        [self.perfect, self.great, self.good, self.bad, self.miss]
            .iter()
            .map(|&n| n as u32)
            .sum()
    }

    /// Weighted accuracy in percent (0-100).
    pub fn accuracy(&self) -> u32 {
        let total = self.total();
        if total == 0 {
            return 0;
        }
        let weighted = self.perfect as u32 * 100
            + self.great as u32 * 80
            + self.good as u32 * 60
            + self.bad as u32 * 30;
        weighted / total
    }

    /// Judge against the sequence that was sent.
    ///
    /// Returns `None` when the tally does not fit the sequence. Unreported
    /// notes count as misses.
    pub fn judge(&self, sequence: &RhythmSequence) -> Option<Judgement> {
        let total = self.total();
        let expected = sequence.len() as u32;
        if total > expected {
            return None;
        }
        let padded = RhythmResult {
            miss: self.miss.saturating_add((expected - total) as u16),
            ..*self
        };
        let accuracy = padded.accuracy();
        Some(match accuracy {
            95.. => Judgement::Perfect,
            80..=94 => Judgement::Great,
            60..=79 => Judgement::Good,
            30..=59 => Judgement::Bad,
            _ => Judgement::Miss,
        })
    }
}

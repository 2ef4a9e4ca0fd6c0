//! State Hashing for Verification
//!
//! Provides deterministic hashing of battle state for:
//! - Integrity checks between client and server (`state_hash` in snapshots)
//! - Replay validation (same seed + same intents = same hash)

use sha2::{Sha256, Digest};
use super::fixed::Fixed;

/// Hash output type (256 bits / 32 bytes)
pub type StateHash = [u8; 32];

/// Deterministic hasher for battle state.
///
/// Wraps SHA-256 with helpers for the primitive types combat state is
/// built from. Order of updates is critical for determinism.
pub struct StateHasher {
    hasher: Sha256,
}

impl StateHasher {
    /// Create a new hasher with domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Create hasher for battle state.
    pub fn for_battle_state() -> Self {
        Self::new(b"CHROMA_CLASH_BATTLE_V1")
    }

    /// Update with a length-prefixed string.
    #[inline]
    pub fn update_str(&mut self, value: &str) {
        self.update_u32(value.len() as u32);
        self.hasher.update(value.as_bytes());
    }

    /// Update with a u8 value.
    #[inline]
    pub fn update_u8(&mut self, value: u8) {
        self.hasher.update([value]);
    }

    /// Update with a u16 value (little-endian).
    #[inline]
    pub fn update_u16(&mut self, value: u16) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a u32 value (little-endian).
    #[inline]
    pub fn update_u32(&mut self, value: u32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a u64 value (little-endian).
    #[inline]
    pub fn update_u64(&mut self, value: u64) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with an i32 value (little-endian).
    #[inline]
    pub fn update_i32(&mut self, value: i32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a Fixed value.
    #[inline]
    pub fn update_fixed(&mut self, value: Fixed) {
        self.update_i32(value);
    }

    /// Update with a boolean.
    #[inline]
    pub fn update_bool(&mut self, value: bool) {
        self.update_u8(value as u8);
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> StateHash {
        self.hasher.finalize().into()
    }
}

/// Compute state hash for battle verification.
///
/// Called by `BattleState::compute_hash()`. The closure adds
/// battle-specific data after the turn counter and seed.
pub fn compute_state_hash<F>(turn: u32, rng_seed: u64, add_state: F) -> StateHash
where
    F: FnOnce(&mut StateHasher),
{
    let mut hasher = StateHasher::for_battle_state();

    // Always hash turn and seed first
    hasher.update_u32(turn);
    hasher.update_u64(rng_seed);

    add_state(&mut hasher);

    hasher.finalize()
}

/// Short hex prefix of a hash for log lines.
pub fn short_hex(hash: &StateHash) -> String {
    hex::encode(&hash[..6])
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixed::to_fixed;

    #[test]
    fn test_state_hasher_determinism() {
        let make_hash = || {
            let mut hasher = StateHasher::for_battle_state();
            hasher.update_u32(100);
            hasher.update_u64(12345);
            hasher.update_fixed(to_fixed(5.5));
            hasher.update_str("ember");
            hasher.update_bool(true);
            hasher.finalize()
        };

        assert_eq!(make_hash(), make_hash());
    }

    #[test]
    fn test_hash_order_matters() {
        let hash1 = {
            let mut h = StateHasher::new(b"test");
            h.update_u32(1);
            h.update_u32(2);
            h.finalize()
        };

        let hash2 = {
            let mut h = StateHasher::new(b"test");
            h.update_u32(2);
            h.update_u32(1);
            h.finalize()
        };

        assert_ne!(hash1, hash2);
    }

    #[test]
    fn test_string_prefix_prevents_ambiguity() {
        let hash1 = {
            let mut h = StateHasher::new(b"test");
            h.update_str("ab");
            h.update_str("c");
            h.finalize()
        };
        let hash2 = {
            let mut h = StateHasher::new(b"test");
            h.update_str("a");
            h.update_str("bc");
            h.finalize()
        };
        assert_ne!(hash1, hash2);
    }

    #[test]
    fn test_domain_separation() {
        let hash = |domain: &[u8]| {
            let mut h = StateHasher::new(domain);
            h.update_u32(7);
            h.finalize()
        };
        assert_ne!(hash(b"DOMAIN_A"), hash(b"DOMAIN_B"));
    }

    #[test]
    fn test_compute_state_hash() {
        let hash = compute_state_hash(100, 12345, |hasher| {
            hasher.update_fixed(to_fixed(5.0));
            hasher.update_bool(true);
        });
        let hash2 = compute_state_hash(100, 12345, |hasher| {
            hasher.update_fixed(to_fixed(5.0));
            hasher.update_bool(true);
        });
        assert_eq!(hash, hash2);

        let hash3 = compute_state_hash(101, 12345, |hasher| {
            hasher.update_fixed(to_fixed(5.0));
            hasher.update_bool(true);
        });
        assert_ne!(hash, hash3);
        assert_eq!(short_hex(&hash).len(), 12);
    }
}

//! Snapshot Hashing
//!
//! Deterministic hashing of match snapshots for:
//! - Suppressing redundant writes to the shared store
//! - Comparing replicas in tests and logs

use sha2::{Sha256, Digest};
use super::fixed::Fixed;

/// Hash output type (256 bits / 32 bytes)
pub type StateHash = [u8; 32];

/// Deterministic hasher for match snapshots.
///
/// Wraps SHA-256 with helpers for the field types a snapshot carries.
/// Order of updates is critical for determinism.
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

    /// Create hasher for match snapshots.
    pub fn for_match_state() -> Self {
        Self::new(b"TUG_OF_WAR_STATE_V1")
    }

    /// Update with a u8 value.
    #[inline]
    pub fn update_u8(&mut self, value: u8) {
        self.hasher.update([value]);
    }

    /// Update with a u32 value (little-endian).
    #[inline]
    pub fn update_u32(&mut self, value: u32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a Fixed value.
    #[inline]
    pub fn update_fixed(&mut self, value: Fixed) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a boolean.
    #[inline]
    pub fn update_bool(&mut self, value: bool) {
        self.update_u8(value as u8);
    }

    /// Update with a length-prefixed string.
    #[inline]
    pub fn update_str(&mut self, value: &str) {
        self.update_u32(value.len() as u32);
        self.hasher.update(value.as_bytes());
    }

    /// Update with an optional byte (presence flag first).
    #[inline]
    pub fn update_opt_u8(&mut self, value: Option<u8>) {
        match value {
            Some(v) => {
                self.update_bool(true);
                self.update_u8(v);
            }
            None => self.update_bool(false),
        }
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> StateHash {
        self.hasher.finalize().into()
    }
}

/// Compute snapshot hash for a room.
///
/// Called by `MatchState::compute_hash()`; the closure adds the
/// state-specific fields after the room identifier.
pub fn compute_state_hash<F>(room_id: &str, add_state: F) -> StateHash
where
    F: FnOnce(&mut StateHasher),
{
    let mut hasher = StateHasher::for_match_state();
    hasher.update_str(room_id);
    add_state(&mut hasher);
    hasher.finalize()
}

/// Short hex prefix of a hash for log lines.
pub fn short_hex(hash: &StateHash) -> String {
    hex::encode(&hash[..4])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic() {
        let h1 = compute_state_hash("room", |h| {
            h.update_fixed(42);
            h.update_bool(true);
        });
        let h2 = compute_state_hash("room", |h| {
            h.update_fixed(42);
            h.update_bool(true);
        });
        assert_eq!(h1, h2);
    }

    #[test]
    fn test_hash_separates_rooms() {
        let h1 = compute_state_hash("room-a", |h| h.update_fixed(1));
        let h2 = compute_state_hash("room-b", |h| h.update_fixed(1));
        assert_ne!(h1, h2);
    }

    #[test]
    fn test_length_prefix_prevents_concatenation_collisions() {
        let h1 = compute_state_hash("r", |h| {
            h.update_str("ab");
            h.update_str("c");
        });
        let h2 = compute_state_hash("r", |h| {
            h.update_str("a");
            h.update_str("bc");
        });
        assert_ne!(h1, h2);
    }

    #[test]
    fn test_optional_encoding() {
        let none = compute_state_hash("r", |h| h.update_opt_u8(None));
        let zero = compute_state_hash("r", |h| h.update_opt_u8(Some(0)));
        assert_ne!(none, zero);
        assert_eq!(short_hex(&none).len(), 8);
    }
}

//! Core deterministic primitives.
//!
//! Fixed-point rope units and snapshot hashing. Everything here is pure
//! and platform independent.

pub mod fixed;
pub mod hash;

// Re-export core types
pub use fixed::{Fixed, FIXED_ONE, FIXED_HALF, CENTER, MAX_DISTANCE, WIN_THRESHOLD, PULL_FORCE};
pub use hash::{StateHash, compute_state_hash};

//! Q16.16 Fixed-Point Rope Units
//!
//! The rope position is simulated in fixed-point so that every participant
//! resolving the same pull sequence lands on the exact same value.
//! Floats are only produced for rendering.
//!
//! ## Format: Q16.16
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Bit Layout: Q16.16 (32-bit signed integer)                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  [S][IIIIIIIIIIIIIIII][FFFFFFFFFFFFFFFF]                    │
//! │   │  └──── 16 bits ────┘└──── 16 bits ────┘                 │
//! │   └─ Sign bit                                               │
//! │                                                             │
//! │  Range: -32768.0 to +32767.99998 (approx)                   │
//! │  Rope track: 250.0 ..= 950.0, comfortably inside the range  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The win threshold (0.85 × 350 = 297.5) is exactly representable,
//! so threshold comparisons never depend on float rounding.

/// Q16.16 fixed-point number stored as i32.
pub type Fixed = i32;

/// Number of fractional bits (16)
pub const FIXED_SCALE: i32 = 16;

/// 1.0 in fixed-point (65536)
pub const FIXED_ONE: Fixed = 1 << FIXED_SCALE;

/// 0.5 in fixed-point (32768)
pub const FIXED_HALF: Fixed = FIXED_ONE >> 1;

// =============================================================================
// ROPE CONSTANTS (integer literals only)
// =============================================================================

/// Rope center: 600.0. Fixed, independent of the renderer's viewport.
pub const CENTER: Fixed = 600 * FIXED_ONE;

/// Maximum rope travel from center: 350.0
pub const MAX_DISTANCE: Fixed = 350 * FIXED_ONE;

/// Win threshold: 0.85 × 350.0 = 297.5
pub const WIN_THRESHOLD: Fixed = 297 * FIXED_ONE + FIXED_HALF;

/// Distance moved by one resolved pull: 10.0
pub const PULL_FORCE: Fixed = 10 * FIXED_ONE;

/// Lowest reachable rope position (player1's end).
pub const ROPE_MIN: Fixed = CENTER - MAX_DISTANCE;

/// Highest reachable rope position (player2's end).
pub const ROPE_MAX: Fixed = CENTER + MAX_DISTANCE;

// =============================================================================
// OPERATIONS
// =============================================================================

/// Convert a whole number of rope units to fixed-point.
#[inline]
pub const fn from_int(units: i32) -> Fixed {
    units << FIXED_SCALE
}

/// Convert a float to fixed-point.
///
/// # Warning
/// Only use for configuration. NEVER in the resolution loop.
///
/// # Example
/// ```
/// use tug_of_war::core::fixed::{to_fixed, WIN_THRESHOLD};
/// assert_eq!(to_fixed(297.5), WIN_THRESHOLD);
/// ```
#[inline]
pub fn to_fixed(f: f64) -> Fixed {
    (f * (FIXED_ONE as f64)) as Fixed
}

/// Convert fixed-point to float for display/rendering.
///
/// # Warning
/// Only use for visual output. NEVER use result in game logic.
#[inline]
pub fn to_float(f: Fixed) -> f32 {
    f as f32 / FIXED_ONE as f32
}

/// Absolute value.
#[inline]
pub fn fixed_abs(x: Fixed) -> Fixed {
    x.wrapping_abs()
}

/// Clamp value to range.
#[inline]
pub fn fixed_clamp(value: Fixed, min: Fixed, max: Fixed) -> Fixed {
    value.max(min).min(max)
}

/// Signed distance of a rope position from center.
///
/// Negative values lean toward player1, positive toward player2.
#[inline]
pub fn offset_from_center(position: Fixed) -> Fixed {
    position.wrapping_sub(CENTER)
}

/// Normalized rope lean in `[-1.0, 1.0]` for renderers.
pub fn lean_ratio(position: Fixed) -> f32 {
    to_float(offset_from_center(position)) / to_float(MAX_DISTANCE)
}

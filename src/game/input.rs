//! Renderer Input Boundary
//!
//! The renderer is only ever allowed to raise its own pulling flag. This
//! module holds the types that enforce that:
//!
//! - [`PressLatch`]: one pull per key press, ignoring auto-repeat while held
//! - [`StatePatch`]: the partial update a renderer may request
//! - [`PullFrame`]: per-tick pull flags, used for replays

use serde::{Serialize, Deserialize};
use crate::game::state::{MatchState, Role};

// =============================================================================
// PRESS LATCH
// =============================================================================

/// Edge detector for the pull key.
///
/// Holding the key produces a single pull; the next pull needs a release.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PressLatch {
    held: bool,
}

impl PressLatch {
    /// Create a released latch.
    pub const fn new() -> Self {
        Self { held: false }
    }

    /// Key went down (or auto-repeated). Returns true if this is a new press.
    pub fn press(&mut self) -> bool {
        if self.held {
            return false;
        }
        self.held = true;
        true
    }

    /// Key went up.
    pub fn release(&mut self) {
        self.held = false;
    }

    /// Is the key currently held?
    pub fn is_held(&self) -> bool {
        self.held
    }
}

// =============================================================================
// STATE PATCH
// =============================================================================

/// Partial match-state update requested by a renderer.
///
/// Only the pulling flags are representable; any other field in the JSON
/// (`ropePosition`, `winner`, ...) fails deserialization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StatePatch {
    /// Raise player1's flag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player1_pulling: Option<bool>,

    /// Raise player2's flag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player2_pulling: Option<bool>,
}

impl StatePatch {
    /// Patch raising one role's pulling flag.
    pub fn pull(role: Role) -> Self {
        match role {
            Role::Player1 => Self { player1_pulling: Some(true), player2_pulling: None },
            Role::Player2 => Self { player1_pulling: None, player2_pulling: Some(true) },
        }
    }

    /// Parse a patch from renderer JSON.
    pub fn from_json(json: &str) -> Result<Self, PatchError> {
        serde_json::from_str(json).map_err(|e| PatchError::Malformed(e.to_string()))
    }

    /// Check the patch only raises `local`'s own flag.
    pub fn validate_for(&self, local: Role) -> Result<(), PatchError> {
        let mut raised = false;

        for role in Role::ALL {
            let value = match role {
                Role::Player1 => self.player1_pulling,
                Role::Player2 => self.player2_pulling,
            };
            match value {
                None => {}
                Some(false) => return Err(PatchError::ClearsFlag(role)),
                Some(true) if role != local => return Err(PatchError::ForeignRole(role)),
                Some(true) => raised = true,
            }
        }

        if raised {
            Ok(())
        } else {
            Err(PatchError::Empty)
        }
    }
}

/// Renderer patch errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatchError {
    /// Patch JSON did not parse or touched a field other than a pulling flag.
    #[error("malformed state patch: {0}")]
    Malformed(String),

    /// Renderers never lower a flag; the resolution loop does.
    #[error("renderer may not clear the {0} pulling flag")]
    ClearsFlag(Role),

    /// Renderer tried to pull for the other side.
    #[error("renderer may not pull for {0}")]
    ForeignRole(Role),

    /// Patch requested nothing.
    #[error("state patch is empty")]
    Empty,
}

// =============================================================================
// PULL FRAME
// =============================================================================

/// Pull flags raised during one resolution tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullFrame {
    /// player1 pressed
    pub player1: bool,
    /// player2 pressed
    pub player2: bool,
}

impl PullFrame {
    /// Nobody pulled.
    pub const NONE: Self = Self { player1: false, player2: false };
    /// Only player1 pulled.
    pub const PLAYER1: Self = Self { player1: true, player2: false };
    /// Only player2 pulled.
    pub const PLAYER2: Self = Self { player1: false, player2: true };
    /// Both pulled in the same tick.
    pub const BOTH: Self = Self { player1: true, player2: true };

    /// Raise this frame's flags on a snapshot (never lowers one).
    pub fn raise_on(&self, state: &mut MatchState) {
        if self.player1 {
            state.player1_pulling = true;
        }
        if self.player2 {
            state.player2_pulling = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::RoomId;

    #[test]
    fn test_press_latch_ignores_repeat() {
        let mut latch = PressLatch::new();
        assert!(latch.press());
        assert!(!latch.press());
        assert!(!latch.press());
        assert!(latch.is_held());

        latch.release();
        assert!(latch.press());
    }

    #[test]
    fn test_patch_accepts_own_flag() {
        let patch = StatePatch::from_json(r#"{"player2Pulling": true}"#).unwrap();
        assert_eq!(patch, StatePatch::pull(Role::Player2));
        assert_eq!(patch.validate_for(Role::Player2), Ok(()));
    }

    #[test]
    fn test_patch_rejects_position_writes() {
        let err = StatePatch::from_json(r#"{"player1Pulling": true, "ropePosition": 0}"#);
        assert!(matches!(err, Err(PatchError::Malformed(_))));
    }

    #[test]
    fn test_patch_rejects_clearing_and_foreign_flags() {
        let clear = StatePatch { player1_pulling: Some(false), player2_pulling: None };
        assert_eq!(clear.validate_for(Role::Player1), Err(PatchError::ClearsFlag(Role::Player1)));

        let foreign = StatePatch::pull(Role::Player1);
        assert_eq!(foreign.validate_for(Role::Player2), Err(PatchError::ForeignRole(Role::Player1)));

        assert_eq!(StatePatch::default().validate_for(Role::Player1), Err(PatchError::Empty));
    }

    #[test]
    fn test_patch_serializes_sparse() {
        let json = serde_json::to_string(&StatePatch::pull(Role::Player1)).unwrap();
        assert_eq!(json, r#"{"player1Pulling":true}"#);
    }

    #[test]
    fn test_frame_only_raises() {
        let mut state = MatchState::new(RoomId::new("frames"));
        state.player2_pulling = true;
        PullFrame::PLAYER1.raise_on(&mut state);
        assert!(state.player1_pulling);
        assert!(state.player2_pulling);

        PullFrame::NONE.raise_on(&mut state);
        assert!(state.player1_pulling && state.player2_pulling);
        assert_eq!(PullFrame::BOTH, PullFrame { player1: true, player2: true });
    }
}

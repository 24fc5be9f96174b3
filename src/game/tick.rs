//! Rope Resolution Tick
//!
//! One fixed-interval evaluation of pulling intents into a rope position
//! update. Pure function of the latest snapshot: the same snapshot always
//! resolves to the same result, so stale or repeated evaluations converge.

use crate::core::fixed::{
    Fixed, fixed_clamp,
    CENTER, MAX_DISTANCE, WIN_THRESHOLD, PULL_FORCE,
};
use crate::game::events::{GameEvent, GameEventData, EndReason};
use crate::game::input::PullFrame;
use crate::game::state::{MatchState, Phase, Role};

/// Rope geometry used by the resolution tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolutionConfig {
    /// Rope center
    pub center: Fixed,
    /// Maximum travel from center in either direction
    pub max_distance: Fixed,
    /// Distance from center that wins the match
    pub win_threshold: Fixed,
    /// Distance moved by one resolved pull
    pub pull_force: Fixed,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            center: CENTER,
            max_distance: MAX_DISTANCE,
            win_threshold: WIN_THRESHOLD,
            pull_force: PULL_FORCE,
        }
    }
}

impl ResolutionConfig {
    /// Lowest reachable position.
    #[inline]
    pub fn min_position(&self) -> Fixed {
        self.center - self.max_distance
    }

    /// Highest reachable position.
    #[inline]
    pub fn max_position(&self) -> Fixed {
        self.center + self.max_distance
    }
}

/// Result of a resolution tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickResult {
    /// Events generated this tick
    pub events: Vec<GameEvent>,
    /// Role whose pull moved the rope
    pub moved_by: Option<Role>,
    /// At least one pulling flag was consumed
    pub consumed: bool,
    /// Winner decided this tick
    pub winner: Option<Role>,
}

impl TickResult {
    /// Whether the tick changed the snapshot (and so needs a write).
    pub fn changed(&self) -> bool {
        self.consumed || self.moved_by.is_some() || self.winner.is_some()
    }
}

/// Move the rope one pull toward `role`'s side, clamped to the track.
#[inline]
pub fn step_rope(position: Fixed, role: Role, config: &ResolutionConfig) -> Fixed {
    let target = position.saturating_add(config.pull_force * role.pull_sign());
    fixed_clamp(target, config.min_position(), config.max_position())
}

/// Check whether a rope position has crossed a win threshold.
pub fn evaluate_win(position: Fixed, config: &ResolutionConfig) -> Option<Role> {
    if position <= config.center - config.win_threshold {
        Some(Role::Player1)
    } else if position >= config.center + config.win_threshold {
        Some(Role::Player2)
    } else {
        None
    }
}

/// Run one resolution tick.
///
/// Outside `Playing` the snapshot is left untouched. Otherwise:
/// 1. exactly one pulling flag set moves the rope one step toward that side;
///    both or neither set leaves it where it is
/// 2. a crossed threshold sets the winner and stops play
/// 3. both pulling flags are cleared, whether or not the rope moved
pub fn resolve_tick(state: &mut MatchState, tick: u32, config: &ResolutionConfig) -> TickResult {
    let mut result = TickResult::default();

    if state.phase() != Phase::Playing {
        return result;
    }

    let p1 = state.player1_pulling;
    let p2 = state.player2_pulling;

    // 1. Apply at most one pull
    let puller = match (p1, p2) {
        (true, false) => Some(Role::Player1),
        (false, true) => Some(Role::Player2),
        (true, true) => {
            result.events.push(GameEvent::new(tick, GameEventData::PullsCancelled));
            None
        }
        (false, false) => None,
    };

    if let Some(role) = puller {
        let from = state.rope_position;
        let to = step_rope(from, role, config);
        state.rope_position = to;

        if to != from {
            result.moved_by = Some(role);
            result.events.push(GameEvent::rope_moved(tick, role, from, to));
        }
    }

    // 2. Check win
    if let Some(winner) = evaluate_win(state.rope_position, config) {
        state.winner = Some(winner);
        state.is_started = false;
        result.winner = Some(winner);
        result.events.push(GameEvent::match_ended(tick, winner, EndReason::Threshold));
    }

    // 3. Consume pulls
    if p1 || p2 {
        state.player1_pulling = false;
        state.player2_pulling = false;
        result.consumed = true;
    }

    result
}

/// Replay a recorded pull sequence from a snapshot.
///
/// Each frame's flags are raised (never lowered) before its tick resolves,
/// the same way renderers feed the live loop. Stops at the first winner.
pub fn replay_pulls(
    initial_state: MatchState,
    frames: &[PullFrame],
    config: &ResolutionConfig,
) -> (MatchState, Vec<GameEvent>) {
    let mut state = initial_state;
    let mut all_events = Vec::new();

    for (t, frame) in frames.iter().enumerate() {
        frame.raise_on(&mut state);

        let result = resolve_tick(&mut state, t as u32 + 1, config);
        all_events.extend(result.events);

        if result.winner.is_some() {
            break;
        }
    }

    (state, all_events)
}

//! Match State Machine
//!
//! Lobby → Staking → ReadyWait → Countdown → Playing → Finished.
//!
//! Every transition is a function of the latest snapshot: it validates
//! against what the snapshot says right now and mutates it in place. No
//! transition accumulates deltas, so applying one to a stale or repeated
//! snapshot converges instead of drifting.

use crate::core::fixed::Fixed;
use crate::game::events::{GameEvent, GameEventData};
use crate::game::state::{Address, MatchState, Phase, Player, Role};
use crate::game::tick::ResolutionConfig;

/// Countdown length in seconds.
pub const COUNTDOWN_FROM: u8 = 3;

/// State machine errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatchError {
    /// Both roles are held by other wallets.
    #[error("Room is full")]
    RoomFull,

    /// Address has no seat in this room.
    #[error("Not in room")]
    NotInRoom,

    /// Only the room creator may do this.
    #[error("Only player1 may do this")]
    NotAuthority,

    /// Second seat is still empty.
    #[error("Waiting for opponent")]
    WaitingForOpponent,

    /// At least one stake is unconfirmed.
    #[error("Players not ready")]
    PlayersNotReady,

    /// Transition not allowed from the current phase.
    #[error("Invalid phase: expected {expected:?}, found {actual:?}")]
    InvalidPhase {
        /// Phase the transition requires.
        expected: Phase,
        /// Phase the snapshot is in.
        actual: Phase,
    },

    /// Rope is not live.
    #[error("Match not in progress")]
    NotPlaying,

    /// Pulling player has not staked.
    #[error("Player has not staked")]
    PlayerNotReady,
}

// =============================================================================
// JOIN
// =============================================================================

/// Result of a join request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Took a new seat.
    Joined(Role),
    /// Address was already seated; nothing changed.
    AlreadyPresent(Role),
}

impl JoinOutcome {
    /// Seat held after the request.
    pub fn role(self) -> Role {
        match self {
            JoinOutcome::Joined(role) | JoinOutcome::AlreadyPresent(role) => role,
        }
    }

    /// Event for a seat change (none for a rejoin).
    pub fn event(self, address: &Address) -> Option<GameEvent> {
        match self {
            JoinOutcome::Joined(role) => Some(GameEvent::player_joined(address.clone(), role)),
            JoinOutcome::AlreadyPresent(_) => None,
        }
    }
}

/// Seat a wallet in the room.
///
/// First arrival becomes player1, second player2. Rejoining with a seated
/// address leaves the snapshot untouched. A third wallet is rejected.
pub fn join(state: &mut MatchState, address: &Address) -> Result<JoinOutcome, MatchError> {
    if let Some(role) = state.role_of(address) {
        return Ok(JoinOutcome::AlreadyPresent(role));
    }

    if state.players.len() >= 2 {
        return Err(MatchError::RoomFull);
    }

    let role = match (
        state.player_by_role(Role::Player1).is_some(),
        state.player_by_role(Role::Player2).is_some(),
    ) {
        (false, false) => Role::Player1,
        (true, false) => Role::Player2,
        // Only reachable from a snapshot that lost player1; fill the free seat
        (false, true) => Role::Player1,
        (true, true) => return Err(MatchError::RoomFull),
    };

    state.players.insert(address.clone(), Player::new(address.clone(), role));
    Ok(JoinOutcome::Joined(role))
}

// =============================================================================
// STAKING
// =============================================================================

/// Mark a player ready after their stake is confirmed.
///
/// Returns whether the flag changed.
pub fn confirm_stake(state: &mut MatchState, address: &Address) -> Result<bool, MatchError> {
    let player = state.player_mut(address).ok_or(MatchError::NotInRoom)?;
    if player.is_ready {
        return Ok(false);
    }
    player.is_ready = true;
    Ok(true)
}

/// Show or hide the start control, as seen from `local`'s client.
///
/// Only player1's client ever writes the flag. Returns whether it changed.
pub fn refresh_start_control(state: &mut MatchState, local: &Address) -> bool {
    if state.role_of(local) != Some(Role::Player1) {
        return false;
    }

    let show = state.phase() == Phase::ReadyWait;
    if state.show_start_button == show {
        return false;
    }
    state.show_start_button = show;
    true
}

// =============================================================================
// COUNTDOWN
// =============================================================================

/// Start the countdown. Only player1, only with both players ready.
pub fn start_countdown(state: &mut MatchState, caller: &Address, from: u8) -> Result<(), MatchError> {
    match state.role_of(caller) {
        None => return Err(MatchError::NotInRoom),
        Some(Role::Player2) => return Err(MatchError::NotAuthority),
        Some(Role::Player1) => {}
    }

    if !state.has_all_players() {
        return Err(MatchError::WaitingForOpponent);
    }
    if !state.all_ready() {
        return Err(MatchError::PlayersNotReady);
    }

    let actual = state.phase();
    if actual != Phase::ReadyWait {
        return Err(MatchError::InvalidPhase {
            expected: Phase::ReadyWait,
            actual,
        });
    }

    state.countdown = Some(from.max(1));
    state.is_counting_down = true;
    state.is_started = false;
    state.show_start_button = false;
    Ok(())
}

/// Result of one countdown step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownStep {
    /// No countdown running.
    Idle,
    /// Seconds left after this step.
    Remaining(u8),
    /// Countdown reached zero and the rope is live.
    Started,
}

impl CountdownStep {
    /// Event for this step.
    pub fn event(self) -> Option<GameEvent> {
        match self {
            CountdownStep::Idle => None,
            CountdownStep::Remaining(remaining) => {
                Some(GameEvent::new(0, GameEventData::CountdownTick { remaining }))
            }
            CountdownStep::Started => Some(GameEvent::new(0, GameEventData::MatchStarted)),
        }
    }
}

/// Advance the countdown by one second.
///
/// Reaching zero starts play from a clean rope.
pub fn countdown_tick(state: &mut MatchState, config: &ResolutionConfig) -> CountdownStep {
    if !state.is_counting_down {
        return CountdownStep::Idle;
    }

    let remaining = state.countdown.unwrap_or(0).saturating_sub(1);
    if remaining > 0 {
        state.countdown = Some(remaining);
        return CountdownStep::Remaining(remaining);
    }

    state.countdown = None;
    state.is_counting_down = false;
    state.is_started = true;
    state.rope_position = config.center;
    state.player1_pulling = false;
    state.player2_pulling = false;
    state.winner = None;
    CountdownStep::Started
}

// =============================================================================
// PULL INTENT
// =============================================================================

/// Result of a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    /// Flag raised; the next resolution tick consumes it.
    Accepted(Role),
    /// Previous pull still unresolved; this one is dropped.
    Dropped(Role),
}

impl PullOutcome {
    /// Event for this outcome.
    pub fn event(self, tick: u32) -> GameEvent {
        match self {
            PullOutcome::Accepted(role) => GameEvent::new(tick, GameEventData::PullAccepted { role }),
            PullOutcome::Dropped(role) => GameEvent::new(tick, GameEventData::PullDropped { role }),
        }
    }
}

/// Record a pull intent for `role`.
///
/// At most one pull per role is outstanding at a time.
pub fn request_pull(state: &mut MatchState, role: Role) -> Result<PullOutcome, MatchError> {
    let ready = state
        .player_by_role(role)
        .map(|p| p.is_ready)
        .ok_or(MatchError::NotInRoom)?;

    if state.phase() != Phase::Playing {
        return Err(MatchError::NotPlaying);
    }
    if !ready {
        return Err(MatchError::PlayerNotReady);
    }

    if state.is_pulling(role) {
        return Ok(PullOutcome::Dropped(role));
    }
    state.set_pulling(role, true);
    Ok(PullOutcome::Accepted(role))
}

// =============================================================================
// TIMEOUT
// =============================================================================

/// Winner when the clock runs out: the side the rope leans toward.
///
/// A rope exactly at center goes to player1.
pub fn winner_on_timeout(position: Fixed, center: Fixed) -> Role {
    let distance = position.saturating_sub(center);
    if distance <= 0 {
        Role::Player1
    } else {
        Role::Player2
    }
}

/// End play on game-clock expiry. Returns the winner if this call decided it.
pub fn expire(state: &mut MatchState, config: &ResolutionConfig) -> Option<Role> {
    if state.phase() != Phase::Playing {
        return None;
    }

    let winner = winner_on_timeout(state.rope_position, config.center);
    state.winner = Some(winner);
    state.is_started = false;
    state.player1_pulling = false;
    state.player2_pulling = false;
    Some(winner)
}

// =============================================================================
// TESTS
// =============================================================================

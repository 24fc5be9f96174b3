//! Game Events
//!
//! Records produced by state transitions and resolution ticks, for logging,
//! replay and renderer notifications.

use serde::{Serialize, Deserialize};
use crate::core::fixed::Fixed;
use crate::game::state::{Address, Role};

/// Why a match ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Rope crossed a win threshold.
    Threshold,
    /// Game clock ran out.
    Timeout,
}

/// Game event data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEventData {
    /// A wallet took a seat.
    PlayerJoined {
        /// Seated wallet
        address: Address,
        /// Seat taken
        role: Role,
    },

    /// A stake was confirmed and the player is ready.
    StakeConfirmed {
        /// Staked wallet
        address: Address,
    },

    /// player1 started the countdown.
    CountdownStarted {
        /// Starting second
        from: u8,
    },

    /// Countdown advanced.
    CountdownTick {
        /// Seconds left
        remaining: u8,
    },

    /// Rope went live.
    MatchStarted,

    /// A pull intent was recorded.
    PullAccepted {
        /// Pulling side
        role: Role,
    },

    /// A pull intent arrived while the previous one was unresolved.
    PullDropped {
        /// Pulling side
        role: Role,
    },

    /// Both sides pulled in the same tick.
    PullsCancelled,

    /// Rope moved by a resolved pull.
    RopeMoved {
        /// Side that moved it
        role: Role,
        /// Position before
        from: Fixed,
        /// Position after
        to: Fixed,
    },

    /// Winner decided.
    MatchEnded {
        /// Winning side
        winner: Role,
        /// Threshold or timeout
        reason: EndReason,
    },
}

/// A game event tagged with the resolution tick it happened on.
///
/// Lobby events carry tick 0.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameEvent {
    /// Resolution tick when event occurred
    pub tick: u32,

    /// Event data
    pub data: GameEventData,
}

impl GameEvent {
    /// Create a new event.
    pub fn new(tick: u32, data: GameEventData) -> Self {
        Self { tick, data }
    }

    /// Create player joined event.
    pub fn player_joined(address: Address, role: Role) -> Self {
        Self::new(0, GameEventData::PlayerJoined { address, role })
    }

    /// Create stake confirmed event.
    pub fn stake_confirmed(address: Address) -> Self {
        Self::new(0, GameEventData::StakeConfirmed { address })
    }

    /// Create rope moved event.
    pub fn rope_moved(tick: u32, role: Role, from: Fixed, to: Fixed) -> Self {
        Self::new(tick, GameEventData::RopeMoved { role, from, to })
    }

    /// Create match ended event.
    pub fn match_ended(tick: u32, winner: Role, reason: EndReason) -> Self {
        Self::new(tick, GameEventData::MatchEnded { winner, reason })
    }

    /// Winner carried by this event, if it ends the match.
    pub fn winner(&self) -> Option<Role> {
        match self.data {
            GameEventData::MatchEnded { winner, .. } => Some(winner),
            _ => None,
        }
    }
}

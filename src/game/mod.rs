//! Game Logic Module
//!
//! Everything that decides a match. Pure functions over [`MatchState`],
//! no I/O and no clocks, so any participant can evaluate them.
//!
//! ## Module Structure
//!
//! - `state`: Match snapshot, players, roles, derived phase
//! - `machine`: Lobby/staking/countdown/timeout transitions
//! - `tick`: Rope resolution tick and replay
//! - `input`: Renderer input boundary (press latch, state patches)
//! - `events`: Game events for logging and renderers

pub mod state;
pub mod machine;
pub mod tick;
pub mod input;
pub mod events;

// Re-export key types
pub use state::{Address, AddressError, MatchState, Phase, Player, Role, RoomId};
pub use machine::{CountdownStep, JoinOutcome, MatchError, PullOutcome};
pub use tick::{ResolutionConfig, TickResult};
pub use input::{PatchError, PressLatch, PullFrame, StatePatch};
pub use events::{EndReason, GameEvent, GameEventData};

//! # Tug of War
//!
//! Match state machine and rope resolution loop for a staked, two-player
//! real-time tug-of-war, with exactly-once on-chain settlement.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        TUG OF WAR                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── fixed.rs    - Q16.16 rope units and constants           │
//! │  └── hash.rs     - Snapshot hashing                          │
//! │                                                              │
//! │  game/           - Game rules (deterministic)                │
//! │  ├── state.rs    - Match snapshot, players, roles            │
//! │  ├── machine.rs  - Lobby → countdown → play → finished       │
//! │  ├── tick.rs     - Rope resolution tick                      │
//! │  ├── input.rs    - Renderer input boundary                   │
//! │  └── events.rs   - Game events                               │
//! │                                                              │
//! │  network/        - Replication and timers (non-deterministic)│
//! │  ├── protocol.rs - Snapshot envelope, room keys, notices     │
//! │  ├── store.rs    - Shared last-write-wins store              │
//! │  ├── runner.rs   - Countdown ticker and resolution loop      │
//! │  └── session.rs  - Per-participant match client              │
//! │                                                              │
//! │  settlement/     - Escrow and payout                         │
//! │  ├── client.rs   - Contract-facing trait                     │
//! │  ├── ledger.rs   - In-memory escrow                          │
//! │  └── trigger.rs  - Exactly-once payout                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Convergence
//!
//! The shared store is last-write-wins with no transactions. Every rule in
//! `game/` is a pure function of the latest snapshot, so any participant
//! evaluating a stale or repeated snapshot converges on the same result:
//! - Rope position in fixed-point, no floats in game logic
//! - BTreeMap for players (sorted iteration and hashing)
//! - Pulling flags cleared unconditionally each tick
//! - Only `player1` drives timers and settles

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;
pub mod settlement;
pub mod config;

// Re-export commonly used types
pub use core::fixed::{Fixed, FIXED_ONE, FIXED_HALF, FIXED_SCALE};
pub use game::state::{Address, MatchState, Phase, Role, RoomId};
pub use network::session::{ClientError, MatchClient};
pub use config::ClientConfig;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Rope resolution tick (ms)
pub const RESOLUTION_TICK_MS: u64 = 50;

/// Game clock (seconds)
pub const GAME_DURATION_SECS: u64 = 60;

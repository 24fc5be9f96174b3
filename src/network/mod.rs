//! Network Layer
//!
//! Replicated store access, match timers and the per-participant client.
//! This layer is **non-deterministic** (clocks, async calls); every rule it
//! applies comes from `game/`.

pub mod protocol;
pub mod store;
pub mod runner;
pub mod session;

pub use protocol::{room_key, ClientNotice, RoomKey, SnapshotEnvelope};
pub use store::{MemoryStore, SharedStore, StoreError};
pub use runner::{drive_match, run_countdown, LoopExit, ResolutionLoop};
pub use session::{ClientError, MatchClient};

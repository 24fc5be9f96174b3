//! Store Protocol
//!
//! What travels through the replicated store and what reaches the UI.
//! Snapshots are JSON so any participant (or a human with a debugger) can
//! read them.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::core::hash::StateHash;
use crate::game::state::{MatchState, Role, RoomId};

// =============================================================================
// ROOM KEY
// =============================================================================

/// Store key prefix for match snapshots.
pub const ROOM_KEY_PREFIX: &str = "tug-of-war";

/// Key a room's snapshot lives under in the replicated store.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomKey(String);

impl RoomKey {
    /// Key as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the store key for a room.
pub fn room_key(room: &RoomId) -> RoomKey {
    RoomKey(format!("{}:{}", ROOM_KEY_PREFIX, room))
}

// =============================================================================
// SNAPSHOT ENVELOPE
// =============================================================================

/// A published snapshot with its store revision and hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotEnvelope {
    /// Store revision, bumped on every accepted write
    pub revision: u64,
    /// Hex SHA-256 of the snapshot
    pub state_hash: String,
    /// The snapshot
    pub state: MatchState,
}

impl SnapshotEnvelope {
    /// Wrap a snapshot.
    pub fn new(revision: u64, state: MatchState) -> Self {
        let state_hash = hex::encode(state.compute_hash());
        Self { revision, state_hash, state }
    }

    /// Hash carried by the envelope matches the snapshot.
    pub fn verify(&self) -> bool {
        hex::encode(self.state.compute_hash()) == self.state_hash
    }

    /// Decoded hash, if well-formed.
    pub fn hash(&self) -> Option<StateHash> {
        let bytes = hex::decode(&self.state_hash).ok()?;
        bytes.try_into().ok()
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

// =============================================================================
// CLIENT NOTICES
// =============================================================================

/// Inline message for the local user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientNotice {
    /// Room is full; the UI redirects away after the delay.
    JoinRejected {
        /// Room that rejected the join
        room_id: RoomId,
        /// Redirect delay in milliseconds
        redirect_after_ms: u64,
        /// When the rejection happened
        at: DateTime<Utc>,
    },

    /// Stake did not go through. Re-invoking stake may succeed.
    StakeFailed {
        /// Error text
        reason: String,
        /// Whether a retry can help
        retryable: bool,
        /// When it failed
        at: DateTime<Utc>,
    },

    /// Prize payout failed. Game over stands; retry is manual.
    SettlementFailed {
        /// Error text
        reason: String,
        /// When it failed
        at: DateTime<Utc>,
    },

    /// Match decided.
    GameOver {
        /// Winning side
        winner: Role,
        /// Whether the local wallet won
        local_won: bool,
    },
}

impl ClientNotice {
    /// Join rejection with a redirect delay.
    pub fn join_rejected(room_id: RoomId, redirect_after: Duration) -> Self {
        ClientNotice::JoinRejected {
            room_id,
            redirect_after_ms: redirect_after.as_millis() as u64,
            at: Utc::now(),
        }
    }

    /// Stake failure.
    pub fn stake_failed(reason: impl Into<String>, retryable: bool) -> Self {
        ClientNotice::StakeFailed {
            reason: reason.into(),
            retryable,
            at: Utc::now(),
        }
    }

    /// Settlement failure.
    pub fn settlement_failed(reason: impl Into<String>) -> Self {
        ClientNotice::SettlementFailed {
            reason: reason.into(),
            at: Utc::now(),
        }
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

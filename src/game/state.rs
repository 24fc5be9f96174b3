//! Match State Definitions
//!
//! The shared aggregate replicated between room participants, plus the
//! identifier types it is keyed by. Uses BTreeMap for deterministic
//! iteration and hashing.

use std::collections::BTreeMap;
use std::fmt;
use serde::{Serialize, Deserialize};

use crate::core::fixed::{Fixed, CENTER, to_float};
use crate::core::hash::{StateHash, compute_state_hash};

// =============================================================================
// ADDRESS
// =============================================================================

/// Lower-case normalized wallet identifier.
///
/// Two spellings of the same wallet (`0xAbC…` / `0xabc…`) compare equal,
/// which is what makes joins idempotent per wallet.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Parse and normalize a wallet identifier.
    pub fn parse(raw: &str) -> Result<Self, AddressError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AddressError::Empty);
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(AddressError::Malformed(trimmed.to_string()));
        }

        let normalized = trimmed.to_lowercase();
        if let Some(digits) = normalized.strip_prefix("0x") {
            if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(AddressError::Malformed(trimmed.to_string()));
            }
        }

        Ok(Self(normalized))
    }

    /// Normalized string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log lines.
    pub fn short(&self) -> &str {
        self.0.get(..10).unwrap_or(&self.0)
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Wallet identifier errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    /// Identifier was empty or whitespace.
    #[error("wallet address is empty")]
    Empty,

    /// Identifier contained whitespace or non-hex digits after `0x`.
    #[error("malformed wallet address: {0}")]
    Malformed(String),
}

// =============================================================================
// ROOM ID
// =============================================================================

/// Opaque room identifier, generated client-side at creation.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Wrap an existing identifier (e.g. from an invite link).
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh, globally unique identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log lines.
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// ROLE
// =============================================================================

/// Side of the rope, assigned permanently by arrival order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Role {
    /// First joiner: room creator and settlement authority. Pulls toward lower positions.
    Player1 = 1,
    /// Second joiner. Pulls toward higher positions.
    Player2 = 2,
}

impl Role {
    /// Both roles in arrival order.
    pub const ALL: [Role; 2] = [Role::Player1, Role::Player2];

    /// The other side of the rope.
    pub fn opponent(self) -> Role {
        match self {
            Role::Player1 => Role::Player2,
            Role::Player2 => Role::Player1,
        }
    }

    /// Direction a pull by this role moves the rope.
    #[inline]
    pub fn pull_sign(self) -> i32 {
        match self {
            Role::Player1 => -1,
            Role::Player2 => 1,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Player1 => f.write_str("player1"),
            Role::Player2 => f.write_str("player2"),
        }
    }
}

// =============================================================================
// PLAYER
// =============================================================================

/// A participant holding a role in a room.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    /// Normalized wallet identifier
    pub address: Address,

    /// Permanent side of the rope
    pub role: Role,

    /// True once the stake is confirmed
    pub is_ready: bool,
}

impl Player {
    /// Create an unready player.
    pub fn new(address: Address, role: Role) -> Self {
        Self {
            address,
            role,
            is_ready: false,
        }
    }
}

// =============================================================================
// PHASE
// =============================================================================

/// Lifecycle phase of a room.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[derive(Default)]
pub enum Phase {
    /// No participants yet.
    #[default]
    Lobby,
    /// A join request is in flight (client-local, never derived from a snapshot).
    Joining,
    /// Players present, at least one stake unconfirmed or opponent missing.
    Staking,
    /// Both players staked, waiting for player1 to start.
    ReadyWait,
    /// Counting down to play.
    Countdown,
    /// Rope is live.
    Playing,
    /// Winner decided.
    Finished,
}

// =============================================================================
// MATCH STATE
// =============================================================================

/// The single shared aggregate per room.
///
/// Field names serialize in camelCase, the shape the replicated store holds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchState {
    /// Room identifier
    pub room_id: RoomId,

    /// Players keyed by address (at most 2)
    pub players: BTreeMap<Address, Player>,

    /// Rope position in Q16.16, within `CENTER ± MAX_DISTANCE`
    pub rope_position: Fixed,

    /// Unresolved pull from player1
    pub player1_pulling: bool,

    /// Unresolved pull from player2
    pub player2_pulling: bool,

    /// Decided winner
    pub winner: Option<Role>,

    /// Seconds left on the start countdown
    pub countdown: Option<u8>,

    /// Countdown is running
    pub is_counting_down: bool,

    /// Rope is live
    pub is_started: bool,

    /// Start control visible on player1's client
    pub show_start_button: bool,

    /// On-chain settlement has been confirmed
    #[serde(default)]
    pub settlement_completed: bool,
}

impl MatchState {
    /// Create the initial snapshot for a room.
    pub fn new(room_id: RoomId) -> Self {
        Self {
            room_id,
            players: BTreeMap::new(),
            rope_position: CENTER,
            player1_pulling: false,
            player2_pulling: false,
            winner: None,
            countdown: None,
            is_counting_down: false,
            is_started: false,
            show_start_button: false,
            settlement_completed: false,
        }
    }

    /// Get a player by address.
    pub fn player(&self, address: &Address) -> Option<&Player> {
        self.players.get(address)
    }

    /// Get a player mutably by address.
    pub fn player_mut(&mut self, address: &Address) -> Option<&mut Player> {
        self.players.get_mut(address)
    }

    /// Get the player holding a role.
    pub fn player_by_role(&self, role: Role) -> Option<&Player> {
        self.players.values().find(|p| p.role == role)
    }

    /// Resolve a role to its wallet address.
    pub fn address_for(&self, role: Role) -> Option<&Address> {
        self.player_by_role(role).map(|p| &p.address)
    }

    /// Role held by an address, if present.
    pub fn role_of(&self, address: &Address) -> Option<Role> {
        self.players.get(address).map(|p| p.role)
    }

    /// Both seats are taken.
    pub fn has_all_players(&self) -> bool {
        self.players.len() == 2
    }

    /// Every present player has a confirmed stake.
    pub fn all_ready(&self) -> bool {
        self.players.values().all(|p| p.is_ready)
    }

    /// Derive the room phase from the snapshot.
    pub fn phase(&self) -> Phase {
        if self.winner.is_some() {
            Phase::Finished
        } else if self.is_started {
            Phase::Playing
        } else if self.is_counting_down {
            Phase::Countdown
        } else if self.players.is_empty() {
            Phase::Lobby
        } else if self.has_all_players() && self.all_ready() {
            Phase::ReadyWait
        } else {
            Phase::Staking
        }
    }

    /// Check a role's pulling flag.
    #[inline]
    pub fn is_pulling(&self, role: Role) -> bool {
        match role {
            Role::Player1 => self.player1_pulling,
            Role::Player2 => self.player2_pulling,
        }
    }

    /// Set a role's pulling flag.
    #[inline]
    pub fn set_pulling(&mut self, role: Role, pulling: bool) {
        match role {
            Role::Player1 => self.player1_pulling = pulling,
            Role::Player2 => self.player2_pulling = pulling,
        }
    }

    /// Rope position as a float, for rendering only.
    pub fn rope_position_units(&self) -> f32 {
        to_float(self.rope_position)
    }

    /// Compute hash of the snapshot.
    pub fn compute_hash(&self) -> StateHash {
        compute_state_hash(self.room_id.as_str(), |hasher| {
            // BTreeMap iterates in address order
            for player in self.players.values() {
                hasher.update_str(player.address.as_str());
                hasher.update_u8(player.role as u8);
                hasher.update_bool(player.is_ready);
            }

            hasher.update_fixed(self.rope_position);
            hasher.update_bool(self.player1_pulling);
            hasher.update_bool(self.player2_pulling);
            hasher.update_opt_u8(self.winner.map(|r| r as u8));
            hasher.update_opt_u8(self.countdown);
            hasher.update_bool(self.is_counting_down);
            hasher.update_bool(self.is_started);
            hasher.update_bool(self.show_start_button);
            hasher.update_bool(self.settlement_completed);
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================

//! Settlement Client Interface
//!
//! The contract-facing calls the match depends on. Every call is async and
//! may fail; `finish_game` is not idempotent on chain, so callers guard it
//! (see [`crate::settlement::trigger`]).

use std::future::Future;

use crate::game::state::{Address, RoomId};

/// Token quantity in base units (18 decimals).
pub type TokenAmount = u128;

/// Stake each player escrows per match: 0.01 token.
pub const STAKE_AMOUNT: TokenAmount = 10_000_000_000_000_000;

/// Settlement call errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettlementError {
    /// Caller cannot cover the stake.
    #[error("Insufficient balance: need {needed}, have {available}")]
    InsufficientBalance {
        /// Stake amount
        needed: TokenAmount,
        /// Caller balance
        available: TokenAmount,
    },

    /// Offered stake differs from the room's stake.
    #[error("Stake mismatch: room takes {expected}, offered {offered}")]
    StakeMismatch {
        /// Stake the escrow accepts
        expected: TokenAmount,
        /// Stake the caller sent
        offered: TokenAmount,
    },

    /// Caller already staked in this room.
    #[error("Already staked")]
    AlreadyStaked,

    /// Room has no open escrow.
    #[error("Room inactive")]
    RoomInactive,

    /// Prize was already paid out.
    #[error("Game already finished")]
    AlreadyFinished,

    /// Winner did not stake in this room.
    #[error("Invalid winner: {0}")]
    InvalidWinner(Address),

    /// Caller has no stake in this room.
    #[error("Caller has not staked")]
    NotStaked,

    /// Transport or wallet failure.
    #[error("Network error: {0}")]
    Network(String),
}

impl SettlementError {
    /// Whether re-invoking the same call can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SettlementError::Network(_) | SettlementError::InsufficientBalance { .. })
    }
}

/// Contract-facing client, bound to the caller's wallet.
pub trait SettlementClient: Send + Sync + 'static {
    /// Escrow `amount` from the caller into the room. The escrow rejects any
    /// amount other than its stake.
    fn stake(
        &self,
        room: &RoomId,
        amount: TokenAmount,
    ) -> impl Future<Output = Result<(), SettlementError>> + Send;

    /// Pay the escrowed stakes to `winner`. At most once per room.
    fn finish_game(
        &self,
        room: &RoomId,
        winner: &Address,
    ) -> impl Future<Output = Result<(), SettlementError>> + Send;

    /// Whether `address` has staked in the room.
    fn has_staked(
        &self,
        room: &RoomId,
        address: &Address,
    ) -> impl Future<Output = Result<bool, SettlementError>> + Send;

    /// Token balance of `address`.
    fn balance(&self, address: &Address) -> impl Future<Output = Result<TokenAmount, SettlementError>> + Send;
}

//! Settlement Trigger
//!
//! Invokes `finish_game` at most once per room, and only from the room
//! creator's process.
//!
//! Two guards stack:
//! 1. `settlementCompleted` in the shared snapshot stops late observers
//! 2. a process-local latch stops re-entrant snapshots that arrive before
//!    that flag has propagated
//!
//! A failed call leaves the latch set. Only [`SettlementTrigger::retry`]
//! calls again.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, error, info, warn};

use crate::game::state::{Address, MatchState, Role, RoomId};
use crate::settlement::client::{SettlementClient, SettlementError};

/// Log target for authority decisions.
pub const AUDIT_TARGET: &str = "tug_of_war::audit";

// =============================================================================
// AUTHORITY
// =============================================================================

/// Proof that the local wallet holds `player1` in a room.
///
/// Only obtainable through [`AuthorityCapability::check`], which writes an
/// audit record either way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityCapability {
    room: RoomId,
    holder: Address,
}

impl AuthorityCapability {
    /// Grant the capability if `local` is the room's `player1`.
    pub fn check(state: &MatchState, local: &Address) -> Option<Self> {
        match state.role_of(local) {
            Some(Role::Player1) => {
                info!(
                    target: AUDIT_TARGET,
                    room = %state.room_id.short(),
                    holder = %local.short(),
                    "settlement authority granted"
                );
                Some(Self {
                    room: state.room_id.clone(),
                    holder: local.clone(),
                })
            }
            role => {
                debug!(
                    target: AUDIT_TARGET,
                    room = %state.room_id.short(),
                    caller = %local.short(),
                    ?role,
                    "settlement authority denied"
                );
                None
            }
        }
    }

    /// Room the capability is scoped to.
    pub fn room(&self) -> &RoomId {
        &self.room
    }

    /// Wallet holding the capability.
    pub fn holder(&self) -> &Address {
        &self.holder
    }
}

// =============================================================================
// TRIGGER
// =============================================================================

/// What a settlement attempt did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// No winner yet.
    NotFinished,
    /// Local wallet is not `player1`.
    NotAuthority,
    /// Already settled or already attempted from this process.
    AlreadySettled,
    /// Another call is in flight.
    InFlight,
    /// Winner role has no address in the snapshot; skipped.
    Inconsistent(Role),
    /// Payout confirmed.
    Settled {
        /// Paid wallet
        winner: Address,
    },
    /// Call failed; the latch stays set.
    Failed(SettlementError),
}

/// Exactly-once `finish_game` guard for one room.
#[derive(Debug)]
pub struct SettlementTrigger<C: SettlementClient> {
    client: Arc<C>,
    local: Address,
    latch: AtomicBool,
    in_flight: AtomicBool,
}

impl<C: SettlementClient> SettlementTrigger<C> {
    /// Create a trigger for the local wallet.
    pub fn new(client: Arc<C>, local: Address) -> Self {
        Self {
            client,
            local,
            latch: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Whether this process has attempted settlement.
    pub fn attempted(&self) -> bool {
        self.latch.load(Ordering::SeqCst)
    }

    /// React to a snapshot: settle if it carries an unsettled winner and we
    /// hold the authority.
    pub async fn on_state(&self, state: &MatchState) -> SettlementOutcome {
        let (capability, winner) = match self.prepare(state) {
            Ok(ready) => ready,
            Err(outcome) => return outcome,
        };

        if self
            .latch
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return SettlementOutcome::AlreadySettled;
        }

        self.invoke(&capability, &winner).await
    }

    /// Manual retry after a failed attempt. Never called automatically.
    pub async fn retry(&self, state: &MatchState) -> SettlementOutcome {
        let (capability, winner) = match self.prepare(state) {
            Ok(ready) => ready,
            Err(outcome) => return outcome,
        };

        self.latch.store(true, Ordering::SeqCst);
        info!(
            target: AUDIT_TARGET,
            room = %capability.room().short(),
            "manual settlement retry"
        );
        self.invoke(&capability, &winner).await
    }

    fn prepare(&self, state: &MatchState) -> Result<(AuthorityCapability, Address), SettlementOutcome> {
        let role = state.winner.ok_or(SettlementOutcome::NotFinished)?;
        if state.settlement_completed {
            return Err(SettlementOutcome::AlreadySettled);
        }

        let capability =
            AuthorityCapability::check(state, &self.local).ok_or(SettlementOutcome::NotAuthority)?;

        match state.address_for(role) {
            Some(address) => Ok((capability, address.clone())),
            None => {
                error!(
                    room = %state.room_id.short(),
                    winner = %role,
                    "Winner has no address in snapshot, skipping settlement"
                );
                Err(SettlementOutcome::Inconsistent(role))
            }
        }
    }

    async fn invoke(&self, capability: &AuthorityCapability, winner: &Address) -> SettlementOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return SettlementOutcome::InFlight;
        }

        info!(
            target: AUDIT_TARGET,
            room = %capability.room().short(),
            holder = %capability.holder().short(),
            winner = %winner.short(),
            "finish_game invoked"
        );

        let result = self.client.finish_game(capability.room(), winner).await;
        self.in_flight.store(false, Ordering::SeqCst);

        match result {
            Ok(()) => {
                info!(
                    target: AUDIT_TARGET,
                    room = %capability.room().short(),
                    winner = %winner.short(),
                    "finish_game completed"
                );
                SettlementOutcome::Settled { winner: winner.clone() }
            }
            Err(e) => {
                warn!(
                    target: AUDIT_TARGET,
                    room = %capability.room().short(),
                    error = %e,
                    "finish_game failed"
                );
                SettlementOutcome::Failed(e)
            }
        }
    }
}

//! In-Memory Escrow Ledger
//!
//! A process-local stand-in for the staking contract. Each room gets an
//! escrow holding at most two stakes; `finish_game` pays both to a
//! depositor and closes the escrow for good.
//!
//! ```text
//! stake(A) ──┐
//!            ├──► Escrow { deposits, finished: None } ──finish_game(B)──► B += 2 × stake
//! stake(B) ──┘                                                           finished: Some(B)
//! ```
//!
//! Fault injection (`fail_next_finish`, latency) and a call counter make it
//! usable as a test double for exactly-once settlement.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::game::state::{Address, RoomId};
use crate::settlement::client::{SettlementClient, SettlementError, TokenAmount, STAKE_AMOUNT};

/// Record of a completed payout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payout {
    /// Wallet that received the prize
    pub winner: Address,
    /// Total paid
    pub amount: TokenAmount,
    /// Wallet that invoked the payout
    pub settled_by: Address,
    /// When it happened
    pub settled_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Escrow {
    deposits: BTreeMap<Address, TokenAmount>,
    payout: Option<Payout>,
}

#[derive(Debug, Default)]
struct LedgerState {
    balances: HashMap<Address, TokenAmount>,
    escrows: HashMap<RoomId, Escrow>,
}

/// Shared escrow ledger.
#[derive(Debug)]
pub struct InMemoryLedger {
    state: RwLock<LedgerState>,
    stake_amount: TokenAmount,
    latency: Option<Duration>,
    fail_next_finish: AtomicBool,
    finish_calls: AtomicUsize,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new(STAKE_AMOUNT)
    }
}

impl InMemoryLedger {
    /// Create an empty ledger with the given per-player stake.
    pub fn new(stake_amount: TokenAmount) -> Self {
        Self {
            state: RwLock::new(LedgerState::default()),
            stake_amount,
            latency: None,
            fail_next_finish: AtomicBool::new(false),
            finish_calls: AtomicUsize::new(0),
        }
    }

    /// Delay every call by `latency`, like a wallet confirmation would.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Bind a client to `caller`'s wallet.
    pub fn handle(self: &Arc<Self>, caller: Address) -> LedgerHandle {
        LedgerHandle {
            ledger: Arc::clone(self),
            caller,
        }
    }

    /// Credit tokens to a wallet.
    pub async fn fund(&self, address: &Address, amount: TokenAmount) {
        let mut state = self.state.write().await;
        let balance = state.balances.entry(address.clone()).or_default();
        *balance = balance.saturating_add(amount);
    }

    /// Make the next `finish_game` fail with a network error.
    pub fn fail_next_finish(&self) {
        self.fail_next_finish.store(true, Ordering::SeqCst);
    }

    /// Number of `finish_game` invocations, successful or not.
    pub fn finish_calls(&self) -> usize {
        self.finish_calls.load(Ordering::SeqCst)
    }

    /// Payout recorded for a room.
    pub async fn payout(&self, room: &RoomId) -> Option<Payout> {
        let state = self.state.read().await;
        state.escrows.get(room).and_then(|e| e.payout.clone())
    }

    /// Tokens currently held in a room's escrow.
    pub async fn escrowed(&self, room: &RoomId) -> TokenAmount {
        let state = self.state.read().await;
        match state.escrows.get(room) {
            Some(escrow) if escrow.payout.is_none() => escrow.deposits.values().sum(),
            _ => 0,
        }
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    async fn stake(&self, caller: &Address, room: &RoomId, amount: TokenAmount) -> Result<(), SettlementError> {
        self.simulate_latency().await;
        if amount != self.stake_amount {
            return Err(SettlementError::StakeMismatch {
                expected: self.stake_amount,
                offered: amount,
            });
        }

        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let escrow = state.escrows.entry(room.clone()).or_default();
        if escrow.payout.is_some() {
            return Err(SettlementError::RoomInactive);
        }
        if escrow.deposits.contains_key(caller) {
            return Err(SettlementError::AlreadyStaked);
        }
        if escrow.deposits.len() >= 2 {
            return Err(SettlementError::RoomInactive);
        }

        let balance = state.balances.entry(caller.clone()).or_default();
        if *balance < self.stake_amount {
            return Err(SettlementError::InsufficientBalance {
                needed: self.stake_amount,
                available: *balance,
            });
        }

        *balance -= self.stake_amount;
        escrow.deposits.insert(caller.clone(), self.stake_amount);
        debug!(room = %room.short(), caller = %caller.short(), "Stake escrowed");
        Ok(())
    }

    async fn finish_game(
        &self,
        caller: &Address,
        room: &RoomId,
        winner: &Address,
    ) -> Result<(), SettlementError> {
        self.finish_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        if self.fail_next_finish.swap(false, Ordering::SeqCst) {
            return Err(SettlementError::Network("injected failure".into()));
        }

        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let escrow = state.escrows.get_mut(room).ok_or(SettlementError::RoomInactive)?;
        if escrow.payout.is_some() {
            return Err(SettlementError::AlreadyFinished);
        }
        if !escrow.deposits.contains_key(caller) {
            return Err(SettlementError::NotStaked);
        }
        if !escrow.deposits.contains_key(winner) {
            return Err(SettlementError::InvalidWinner(winner.clone()));
        }

        let amount: TokenAmount = escrow.deposits.values().sum();
        escrow.payout = Some(Payout {
            winner: winner.clone(),
            amount,
            settled_by: caller.clone(),
            settled_at: Utc::now(),
        });

        let balance = state.balances.entry(winner.clone()).or_default();
        *balance = balance.saturating_add(amount);

        info!(room = %room.short(), winner = %winner.short(), amount, "Escrow paid out");
        Ok(())
    }

    async fn has_staked(&self, room: &RoomId, address: &Address) -> bool {
        self.simulate_latency().await;
        let state = self.state.read().await;
        state
            .escrows
            .get(room)
            .is_some_and(|e| e.deposits.contains_key(address))
    }

    async fn balance(&self, address: &Address) -> TokenAmount {
        self.simulate_latency().await;
        let state = self.state.read().await;
        state.balances.get(address).copied().unwrap_or(0)
    }
}

/// A wallet's view of the shared ledger.
#[derive(Debug, Clone)]
pub struct LedgerHandle {
    ledger: Arc<InMemoryLedger>,
    caller: Address,
}

impl LedgerHandle {
    /// Wallet this handle signs for.
    pub fn caller(&self) -> &Address {
        &self.caller
    }
}

impl SettlementClient for LedgerHandle {
    async fn stake(&self, room: &RoomId, amount: TokenAmount) -> Result<(), SettlementError> {
        self.ledger.stake(&self.caller, room, amount).await
    }

    async fn finish_game(&self, room: &RoomId, winner: &Address) -> Result<(), SettlementError> {
        self.ledger.finish_game(&self.caller, room, winner).await
    }

    async fn has_staked(&self, room: &RoomId, address: &Address) -> Result<bool, SettlementError> {
        Ok(self.ledger.has_staked(room, address).await)
    }

    async fn balance(&self, address: &Address) -> Result<TokenAmount, SettlementError> {
        Ok(self.ledger.balance(address).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Address {
        Address::parse(s).unwrap()
    }

    async fn funded_pair() -> (Arc<InMemoryLedger>, LedgerHandle, LedgerHandle) {
        let ledger = Arc::new(InMemoryLedger::default());
        let a = addr("0xa1");
        let b = addr("0xb2");
        ledger.fund(&a, STAKE_AMOUNT * 3).await;
        ledger.fund(&b, STAKE_AMOUNT * 3).await;
        (ledger.clone(), ledger.handle(a), ledger.handle(b))
    }

    #[tokio::test]
    async fn test_stake_and_payout() {
        let (ledger, a, b) = funded_pair().await;
        let room = RoomId::new("escrow");

        a.stake(&room, STAKE_AMOUNT).await.unwrap();
        b.stake(&room, STAKE_AMOUNT).await.unwrap();
        assert_eq!(ledger.escrowed(&room).await, STAKE_AMOUNT * 2);
        assert!(a.has_staked(&room, b.caller()).await.unwrap());

        a.finish_game(&room, b.caller()).await.unwrap();

        assert_eq!(a.balance(a.caller()).await.unwrap(), STAKE_AMOUNT * 2);
        assert_eq!(b.balance(b.caller()).await.unwrap(), STAKE_AMOUNT * 4);
        assert_eq!(ledger.escrowed(&room).await, 0);

        let payout = ledger.payout(&room).await.unwrap();
        assert_eq!(&payout.winner, b.caller());
        assert_eq!(&payout.settled_by, a.caller());
        assert_eq!(payout.amount, STAKE_AMOUNT * 2);
    }

    #[tokio::test]
    async fn test_stake_rejections() {
        let (ledger, a, _) = funded_pair().await;
        let room = RoomId::new("escrow");

        a.stake(&room, STAKE_AMOUNT).await.unwrap();
        assert_eq!(a.stake(&room, STAKE_AMOUNT).await, Err(SettlementError::AlreadyStaked));

        let broke = ledger.handle(addr("0xc3"));
        assert_eq!(
            broke.stake(&room, STAKE_AMOUNT).await,
            Err(SettlementError::InsufficientBalance { needed: STAKE_AMOUNT, available: 0 })
        );
    }

    #[tokio::test]
    async fn test_stake_amount_must_match() {
        let (ledger, a, _) = funded_pair().await;
        let room = RoomId::new("escrow");

        assert_eq!(
            a.stake(&room, STAKE_AMOUNT / 2).await,
            Err(SettlementError::StakeMismatch { expected: STAKE_AMOUNT, offered: STAKE_AMOUNT / 2 })
        );
        assert_eq!(ledger.escrowed(&room).await, 0);
        assert_eq!(a.balance(a.caller()).await.unwrap(), STAKE_AMOUNT * 3);
    }

    #[tokio::test]
    async fn test_finish_is_single_shot() {
        let (ledger, a, b) = funded_pair().await;
        let room = RoomId::new("escrow");
        a.stake(&room, STAKE_AMOUNT).await.unwrap();
        b.stake(&room, STAKE_AMOUNT).await.unwrap();

        a.finish_game(&room, a.caller()).await.unwrap();
        assert_eq!(a.finish_game(&room, a.caller()).await, Err(SettlementError::AlreadyFinished));
        assert_eq!(b.stake(&room, STAKE_AMOUNT).await, Err(SettlementError::RoomInactive));
        assert_eq!(ledger.finish_calls(), 2);
    }

    #[tokio::test]
    async fn test_finish_validation() {
        let (ledger, a, b) = funded_pair().await;
        let room = RoomId::new("escrow");

        assert_eq!(a.finish_game(&room, a.caller()).await, Err(SettlementError::RoomInactive));

        a.stake(&room, STAKE_AMOUNT).await.unwrap();
        assert_eq!(b.finish_game(&room, a.caller()).await, Err(SettlementError::NotStaked));
        assert_eq!(
            a.finish_game(&room, b.caller()).await,
            Err(SettlementError::InvalidWinner(b.caller().clone()))
        );

        ledger.fail_next_finish();
        assert!(matches!(a.finish_game(&room, a.caller()).await, Err(SettlementError::Network(_))));
        assert_eq!(a.finish_game(&room, a.caller()).await, Ok(()));
    }
}

//! Settlement Layer
//!
//! Staking and prize payout against the escrow contract.
//!
//! - `client`: contract-facing trait and errors
//! - `ledger`: in-process escrow implementing the trait
//! - `trigger`: exactly-once payout guarded by the `player1` authority

pub mod client;
pub mod ledger;
pub mod trigger;

pub use client::{SettlementClient, SettlementError, TokenAmount, STAKE_AMOUNT};
pub use ledger::{InMemoryLedger, LedgerHandle, Payout};
pub use trigger::{AuthorityCapability, SettlementOutcome, SettlementTrigger, AUDIT_TARGET};

//! Match Client
//!
//! One participant's process for one room. Owns the local wallet identity,
//! talks to the replicated store and the settlement client, and hands state
//! and notices to the renderer.
//!
//! ```text
//!  renderer ──pull / patch──► MatchClient ──update──► SharedStore ──broadcast──┐
//!     ▲                          │   ▲                                         │
//!     └──── notices / events ────┘   └────────── observer task ◄───────────────┘
//!                                │
//!                                ├── match driver task (player1 only)
//!                                └── SettlementTrigger (player1 only)
//! ```
//!
//! Every reaction to a snapshot is re-derived from that snapshot alone, so
//! a snapshot overwritten by a concurrent writer is simply superseded by
//! the next one.

use std::sync::{Arc, OnceLock, Weak};
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::future::join_all;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{ClientConfig, ConfigError};
use crate::game::events::{GameEvent, GameEventData};
use crate::game::input::{PatchError, PressLatch, StatePatch};
use crate::game::machine::{self, MatchError, PullOutcome};
use crate::game::state::{Address, AddressError, MatchState, Phase, Role, RoomId};
use crate::network::protocol::{room_key, ClientNotice, RoomKey};
use crate::network::runner::drive_match;
use crate::network::store::{SharedStore, StoreError};
use crate::settlement::client::{SettlementClient, SettlementError, TokenAmount};
use crate::settlement::trigger::{SettlementOutcome, SettlementTrigger};

/// Notices buffered per UI subscriber.
pub const NOTICE_CAPACITY: usize = 32;

/// Game events buffered per renderer subscriber.
pub const EVENT_CAPACITY: usize = 256;

/// Match client errors.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// State machine rejected the request.
    #[error(transparent)]
    Match(#[from] MatchError),

    /// Store call failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Renderer patch rejected.
    #[error(transparent)]
    Patch(#[from] PatchError),

    /// Bad wallet identifier.
    #[error(transparent)]
    Address(#[from] AddressError),

    /// Bad configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Stake did not go through; re-invoke to retry.
    #[error("stake failed: {0}")]
    StakeFailed(SettlementError),

    /// Other settlement call failed.
    #[error(transparent)]
    Settlement(#[from] SettlementError),

    /// Local wallet holds no seat in the room.
    #[error("not joined")]
    NotJoined,
}

/// One participant in one room.
pub struct MatchClient<S: SharedStore, C: SettlementClient> {
    store: Arc<S>,
    settlement: Arc<C>,
    config: ClientConfig,
    local: Address,
    room: RoomId,
    key: RoomKey,
    role: OnceLock<Role>,
    joining: AtomicBool,
    driving: AtomicBool,
    game_over_seen: AtomicBool,
    latest: RwLock<Option<MatchState>>,
    press: Mutex<PressLatch>,
    trigger: SettlementTrigger<C>,
    notices: broadcast::Sender<ClientNotice>,
    events: broadcast::Sender<GameEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<S: SharedStore, C: SettlementClient> MatchClient<S, C> {
    // =========================================================================
    // CONSTRUCTION
    // =========================================================================

    /// Create a fresh room and join it as `player1`.
    #[instrument(skip_all, fields(local = %local.short()))]
    pub async fn create_room(
        store: Arc<S>,
        settlement: Arc<C>,
        config: ClientConfig,
        local: Address,
    ) -> Result<Arc<Self>, ClientError> {
        config.validate()?;

        let room = RoomId::generate();
        store.write(&room_key(&room), MatchState::new(room.clone())).await?;
        info!(room = %room.short(), "Room created");

        let client = Self::connect(store, settlement, config, local, room).await?;
        client.join().await?;
        Ok(client)
    }

    /// Attach to an existing room and start observing it.
    ///
    /// Does not join; spectators stay unseated.
    #[instrument(skip_all, fields(local = %local.short(), room = %room.short()))]
    pub async fn connect(
        store: Arc<S>,
        settlement: Arc<C>,
        config: ClientConfig,
        local: Address,
        room: RoomId,
    ) -> Result<Arc<Self>, ClientError> {
        config.validate()?;

        let key = room_key(&room);
        let snapshot = store.read(&key).await?;
        let rx = store.subscribe(&key).await?;

        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let trigger = SettlementTrigger::new(Arc::clone(&settlement), local.clone());

        let client = Arc::new(Self {
            store,
            settlement,
            config,
            local,
            room,
            key,
            role: OnceLock::new(),
            joining: AtomicBool::new(false),
            driving: AtomicBool::new(false),
            game_over_seen: AtomicBool::new(false),
            latest: RwLock::new(None),
            press: Mutex::new(PressLatch::new()),
            trigger,
            notices,
            events,
            tasks: Mutex::new(Vec::new()),
        });

        let observer = spawn_observer(Arc::downgrade(&client), rx);
        client.tasks.lock().await.push(observer);

        client.on_state_change(snapshot).await;
        debug!("Connected");
        Ok(client)
    }

    /// Abandon this room and start a fresh one with the same services.
    pub async fn new_room(&self) -> Result<Arc<Self>, ClientError> {
        self.shutdown().await;
        Self::create_room(
            Arc::clone(&self.store),
            Arc::clone(&self.settlement),
            self.config.clone(),
            self.local.clone(),
        )
        .await
    }

    /// Cancel the observer and any timers this client drives.
    pub async fn shutdown(&self) {
        let handles: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for handle in &handles {
            handle.abort();
        }
        let count = handles.len();
        join_all(handles).await;
        debug!(room = %self.room.short(), tasks = count, "Client shut down");
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Local wallet.
    pub fn local(&self) -> &Address {
        &self.local
    }

    /// Room this client is attached to.
    pub fn room(&self) -> &RoomId {
        &self.room
    }

    /// Local seat, once joined.
    pub fn role(&self) -> Option<Role> {
        self.role.get().copied()
    }

    /// Last snapshot observed.
    pub async fn latest_state(&self) -> Option<MatchState> {
        self.latest.read().await.clone()
    }

    /// Phase as seen from this client. `Joining` while a join is in flight.
    pub async fn phase(&self) -> Phase {
        if self.joining.load(Ordering::SeqCst) {
            return Phase::Joining;
        }
        self.latest
            .read()
            .await
            .as_ref()
            .map_or(Phase::Lobby, MatchState::phase)
    }

    /// Subscribe to inline UI notices.
    pub fn notices(&self) -> broadcast::Receiver<ClientNotice> {
        self.notices.subscribe()
    }

    /// Subscribe to game events (for animation and sound).
    pub fn events(&self) -> broadcast::Receiver<GameEvent> {
        self.events.subscribe()
    }

    fn require_role(&self) -> Result<Role, ClientError> {
        self.role().ok_or(ClientError::NotJoined)
    }

    fn notify(&self, notice: ClientNotice) {
        let _ = self.notices.send(notice);
    }

    fn emit(&self, event: GameEvent) {
        let _ = self.events.send(event);
    }

    // =========================================================================
    // LOBBY
    // =========================================================================

    /// Take a seat. Rejoining with a seated wallet is a no-op.
    #[instrument(skip(self), fields(local = %self.local.short(), room = %self.room.short()))]
    pub async fn join(&self) -> Result<Role, ClientError> {
        self.joining.store(true, Ordering::SeqCst);
        let result = self
            .store
            .update(&self.key, |state| machine::join(state, &self.local))
            .await;
        self.joining.store(false, Ordering::SeqCst);

        match result? {
            Ok(outcome) => {
                let role = outcome.role();
                let _ = self.role.set(role);
                if let Some(event) = outcome.event(&self.local) {
                    info!(%role, "Joined room");
                    self.emit(event);
                }
                self.reconcile().await?;
                Ok(role)
            }
            Err(MatchError::RoomFull) => {
                warn!("Join rejected: room full");
                self.notify(ClientNotice::join_rejected(
                    self.room.clone(),
                    self.config.join_redirect_delay,
                ));
                Err(MatchError::RoomFull.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Stake into the room's escrow and mark the local player ready.
    #[instrument(skip(self), fields(local = %self.local.short(), room = %self.room.short()))]
    pub async fn stake(&self) -> Result<(), ClientError> {
        self.require_role()?;

        let snapshot = self.store.read(&self.key).await?;
        if snapshot.player(&self.local).is_some_and(|p| p.is_ready) {
            return Ok(());
        }

        let amount = self.config.stake_amount;
        match self.settlement.stake(&self.room, amount).await {
            Ok(()) => info!(amount, "Stake confirmed"),
            Err(SettlementError::AlreadyStaked) => debug!("Stake already on chain"),
            Err(e) => {
                warn!(error = %e, "Stake failed");
                self.notify(ClientNotice::stake_failed(e.to_string(), e.is_retryable()));
                return Err(ClientError::StakeFailed(e));
            }
        }

        self.mark_ready().await
    }

    /// Mark the local player ready if the chain already holds their stake.
    pub async fn sync_stake_status(&self) -> Result<bool, ClientError> {
        self.require_role()?;

        if !self.settlement.has_staked(&self.room, &self.local).await? {
            return Ok(false);
        }
        self.mark_ready().await?;
        Ok(true)
    }

    async fn mark_ready(&self) -> Result<(), ClientError> {
        let changed = self
            .store
            .update(&self.key, |state| machine::confirm_stake(state, &self.local))
            .await??;
        if changed {
            self.emit(GameEvent::stake_confirmed(self.local.clone()));
        }
        Ok(())
    }

    /// Wallet balance for display.
    pub async fn balance(&self) -> Result<TokenAmount, ClientError> {
        Ok(self.settlement.balance(&self.local).await?)
    }

    /// Start the countdown. Only `player1`, only with both players ready.
    #[instrument(skip(self), fields(local = %self.local.short(), room = %self.room.short()))]
    pub async fn start(&self) -> Result<(), ClientError> {
        let from = self.config.countdown_from;
        self.store
            .update(&self.key, |state| machine::start_countdown(state, &self.local, from))
            .await??;

        info!(from, "Countdown started");
        self.emit(GameEvent::new(0, GameEventData::CountdownStarted { from }));
        self.ensure_driving().await;
        Ok(())
    }

    // =========================================================================
    // RENDERER BOUNDARY
    // =========================================================================

    /// Record a pull for the local player.
    pub async fn on_pull(&self) -> Result<PullOutcome, ClientError> {
        let role = self.require_role()?;
        let outcome = self
            .store
            .update(&self.key, |state| machine::request_pull(state, role))
            .await??;
        self.emit(outcome.event(0));
        Ok(outcome)
    }

    /// Pull key went down. Auto-repeat while held is ignored.
    pub async fn key_down(&self) -> Result<Option<PullOutcome>, ClientError> {
        if !self.press.lock().await.press() {
            return Ok(None);
        }
        self.on_pull().await.map(Some)
    }

    /// Pull key went up.
    pub async fn key_up(&self) {
        self.press.lock().await.release();
    }

    /// Apply a renderer patch. Only raising the local pulling flag is allowed.
    pub async fn request_state_update(&self, patch: &StatePatch) -> Result<PullOutcome, ClientError> {
        let role = self.require_role()?;
        patch.validate_for(role)?;
        self.on_pull().await
    }

    /// Apply a renderer patch given as JSON.
    pub async fn request_state_update_json(&self, json: &str) -> Result<PullOutcome, ClientError> {
        let patch = StatePatch::from_json(json)?;
        self.request_state_update(&patch).await
    }

    // =========================================================================
    // RECONCILIATION
    // =========================================================================

    /// React to a snapshot from the store.
    pub async fn on_state_change(&self, state: MatchState) {
        *self.latest.write().await = Some(state.clone());

        let local_role = state.role_of(&self.local);
        if let Some(role) = local_role {
            let _ = self.role.set(role);
        }

        if local_role == Some(Role::Player1) {
            let show = state.phase() == Phase::ReadyWait;
            if state.show_start_button != show {
                let refreshed = self
                    .store
                    .update(&self.key, |s| machine::refresh_start_control(s, &self.local))
                    .await;
                if let Err(e) = refreshed {
                    warn!(error = %e, "Start control refresh failed");
                }
            }

            // Picks the timers back up after a reconnect
            if matches!(state.phase(), Phase::Countdown | Phase::Playing) {
                self.ensure_driving().await;
            }
        }

        if let Some(winner) = state.winner {
            if !self.game_over_seen.swap(true, Ordering::SeqCst) {
                self.notify(ClientNotice::GameOver {
                    winner,
                    local_won: local_role == Some(winner),
                });
            }
            self.settle(&state).await;
        }
    }

    /// Re-read the store and reconcile against it.
    pub async fn reconcile(&self) -> Result<(), ClientError> {
        let state = self.store.read(&self.key).await?;
        self.on_state_change(state).await;
        Ok(())
    }

    async fn ensure_driving(&self) {
        if self
            .driving
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let store = Arc::clone(&self.store);
        let key = self.key.clone();
        let config = self.config.clone();
        let events = self.events.clone();

        let handle = tokio::spawn(async move {
            match drive_match(store, key, config, events).await {
                Ok(exit) => debug!(?exit, "Match driver finished"),
                Err(e) => error!(error = %e, "Match driver stopped"),
            }
        });
        self.tasks.lock().await.push(handle);
    }

    // =========================================================================
    // SETTLEMENT
    // =========================================================================

    async fn settle(&self, state: &MatchState) -> SettlementOutcome {
        let outcome = self.trigger.on_state(state).await;
        self.publish_settlement(&outcome).await;
        outcome
    }

    /// Manually retry a failed settlement. Never called automatically.
    pub async fn retry_settlement(&self) -> Result<SettlementOutcome, ClientError> {
        let state = self.store.read(&self.key).await?;
        let outcome = self.trigger.retry(&state).await;
        self.publish_settlement(&outcome).await;
        Ok(outcome)
    }

    async fn publish_settlement(&self, outcome: &SettlementOutcome) {
        match outcome {
            SettlementOutcome::Settled { .. } => {
                let published = self
                    .store
                    .update(&self.key, |s| s.settlement_completed = true)
                    .await;
                if let Err(e) = published {
                    warn!(error = %e, "Could not publish settlement completion");
                }
            }
            SettlementOutcome::Failed(e) => {
                error!(room = %self.room.short(), error = %e, "Settlement failed; game over stands");
                self.notify(ClientNotice::settlement_failed(e.to_string()));
            }
            _ => {}
        }
    }
}

impl<S: SharedStore, C: SettlementClient> Drop for MatchClient<S, C> {
    fn drop(&mut self) {
        for handle in self.tasks.get_mut().drain(..) {
            handle.abort();
        }
    }
}

fn spawn_observer<S: SharedStore, C: SettlementClient>(
    client: Weak<MatchClient<S, C>>,
    mut rx: broadcast::Receiver<MatchState>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(state) => {
                    let Some(client) = client.upgrade() else { break };
                    client.on_state_change(state).await;
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Observer lagged; newer snapshots supersede");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use rand::Rng;
    use crate::core::fixed::{from_int, CENTER};
    use crate::game::state::Player;
    use crate::network::store::{DelayedStore, MemoryStore};
    use crate::settlement::client::STAKE_AMOUNT;
    use crate::settlement::ledger::{InMemoryLedger, LedgerHandle};

    type Client = MatchClient<MemoryStore, LedgerHandle>;

    struct Table {
        store: Arc<MemoryStore>,
        ledger: Arc<InMemoryLedger>,
        host: Arc<Client>,
        guest: Arc<Client>,
    }

    fn addr(s: &str) -> Address {
        Address::parse(s).unwrap()
    }

    async fn client_for(
        store: &Arc<MemoryStore>,
        ledger: &Arc<InMemoryLedger>,
        config: &ClientConfig,
        address: Address,
        room: &RoomId,
    ) -> Arc<Client> {
        MatchClient::connect(
            store.clone(),
            Arc::new(ledger.handle(address.clone())),
            config.clone(),
            address,
            room.clone(),
        )
        .await
        .unwrap()
    }

    async fn seated_table(config: ClientConfig) -> Table {
        seated_table_on(config, InMemoryLedger::default()).await
    }

    async fn seated_table_on(config: ClientConfig, ledger: InMemoryLedger) -> Table {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(ledger);
        let a = addr("0xa1");
        let b = addr("0xb2");
        ledger.fund(&a, STAKE_AMOUNT * 2).await;
        ledger.fund(&b, STAKE_AMOUNT * 2).await;

        let host = MatchClient::create_room(
            store.clone(),
            Arc::new(ledger.handle(a.clone())),
            config.clone(),
            a,
        )
        .await
        .unwrap();

        let guest = client_for(&store, &ledger, &config, b, host.room()).await;
        guest.join().await.unwrap();

        Table { store, ledger, host, guest }
    }

    async fn staked_table(config: ClientConfig) -> Table {
        staked_table_on(config, InMemoryLedger::default()).await
    }

    async fn staked_table_on(config: ClientConfig, ledger: InMemoryLedger) -> Table {
        let table = seated_table_on(config, ledger).await;
        table.host.stake().await.unwrap();
        table.guest.stake().await.unwrap();
        table
    }

    async fn wait_for(table: &Table, what: impl Fn(&MatchState) -> bool) -> MatchState {
        let key = room_key(table.host.room());
        for _ in 0..20_000 {
            let state = table.store.read(&key).await.unwrap();
            if what(&state) {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition never reached");
    }

    async fn next_matching(
        rx: &mut broadcast::Receiver<ClientNotice>,
        what: impl Fn(&ClientNotice) -> bool,
    ) -> ClientNotice {
        loop {
            let notice = tokio::time::timeout(Duration::from_secs(300), rx.recv())
                .await
                .expect("notice timed out")
                .expect("notice channel closed");
            if what(&notice) {
                return notice;
            }
        }
    }

    fn short_game() -> ClientConfig {
        ClientConfig {
            game_duration: Duration::from_secs(1),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_match_to_threshold() {
        let table = staked_table(ClientConfig::default()).await;
        let mut host_notices = table.host.notices();

        assert_eq!(table.host.role(), Some(Role::Player1));
        assert_eq!(table.guest.role(), Some(Role::Player2));

        let ready = wait_for(&table, |s| s.show_start_button).await;
        assert_eq!(ready.phase(), Phase::ReadyWait);

        assert!(matches!(
            table.guest.start().await,
            Err(ClientError::Match(MatchError::NotAuthority))
        ));
        table.host.start().await.unwrap();

        let live = wait_for(&table, |s| s.is_started).await;
        assert_eq!(live.rope_position, CENTER);
        assert!(!live.show_start_button);

        for _ in 0..30 {
            assert_eq!(table.host.on_pull().await.unwrap(), PullOutcome::Accepted(Role::Player1));
            wait_for(&table, |s| !s.player1_pulling).await;
        }

        let done = wait_for(&table, |s| s.settlement_completed).await;
        assert_eq!(done.winner, Some(Role::Player1));
        assert_eq!(done.rope_position, from_int(300));

        assert_eq!(table.ledger.finish_calls(), 1);
        assert_eq!(table.host.balance().await.unwrap(), STAKE_AMOUNT * 3);
        assert_eq!(table.guest.balance().await.unwrap(), STAKE_AMOUNT);

        let over = next_matching(&mut host_notices, |n| matches!(n, ClientNotice::GameOver { .. })).await;
        assert_eq!(over, ClientNotice::GameOver { winner: Role::Player1, local_won: true });

        table.host.shutdown().await;
        table.guest.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_third_wallet_rejected() {
        let table = seated_table(ClientConfig::default()).await;
        let key = room_key(table.host.room());
        let before = table.store.read(&key).await.unwrap();

        let stranger = client_for(&table.store, &table.ledger, &ClientConfig::default(), addr("0xc3"), table.host.room()).await;
        let mut notices = stranger.notices();

        assert!(matches!(stranger.join().await, Err(ClientError::Match(MatchError::RoomFull))));
        assert_eq!(table.store.read(&key).await.unwrap(), before);
        assert_eq!(stranger.role(), None);

        match notices.try_recv().unwrap() {
            ClientNotice::JoinRejected { redirect_after_ms, .. } => assert_eq!(redirect_after_ms, 3000),
            other => panic!("unexpected notice {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejoin_is_noop() {
        let table = seated_table(ClientConfig::default()).await;
        let key = room_key(table.host.room());
        let revision = table.store.revision(&key).await;

        assert_eq!(table.host.join().await.unwrap(), Role::Player1);
        assert_eq!(table.guest.join().await.unwrap(), Role::Player2);
        assert_eq!(table.store.revision(&key).await, revision);
    }

    #[tokio::test(start_paused = true)]
    async fn test_press_latch_and_patches() {
        let table = staked_table(ClientConfig::default()).await;
        wait_for(&table, |s| s.show_start_button).await;
        table.host.start().await.unwrap();
        wait_for(&table, |s| s.is_started).await;

        assert!(table.guest.key_down().await.unwrap().is_some());
        assert_eq!(table.guest.key_down().await.unwrap(), None);
        table.guest.key_up().await;

        assert!(matches!(
            table.guest.request_state_update_json(r#"{"player1Pulling":true}"#).await,
            Err(ClientError::Patch(PatchError::ForeignRole(Role::Player1)))
        ));
        assert!(matches!(
            table.guest.request_state_update_json(r#"{"ropePosition":0}"#).await,
            Err(ClientError::Patch(PatchError::Malformed(_)))
        ));

        let moved = wait_for(&table, |s| s.rope_position == from_int(610)).await;
        assert!(!moved.player2_pulling);

        table.host.shutdown().await;
        table.guest.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_settles_once_across_observers() {
        let config = short_game();
        // Slow payout: winner snapshots keep arriving while it is pending
        let ledger = InMemoryLedger::default().with_latency(Duration::from_millis(500));
        let table = staked_table_on(config.clone(), ledger).await;

        let mut rng = rand::thread_rng();
        let spectator_count = rng.gen_range(3..8);
        let mut spectators = Vec::new();
        for _ in 0..spectator_count {
            let address = addr(&format!("0x{:016x}", rng.gen::<u64>() | 0x100));
            spectators.push(client_for(&table.store, &table.ledger, &config, address, table.host.room()).await);
        }

        wait_for(&table, |s| s.show_start_button).await;
        table.host.start().await.unwrap();

        let decided = wait_for(&table, |s| s.winner.is_some()).await;
        assert!(!decided.settlement_completed);
        let replays = join_all((0..6).map(|_| table.host.reconcile())).await;
        assert!(replays.iter().all(Result::is_ok));

        let done = wait_for(&table, |s| s.settlement_completed).await;
        assert_eq!(done.winner, Some(Role::Player1));

        // Let every observer see the final snapshots
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(table.ledger.finish_calls(), 1);

        for spectator in &spectators {
            assert_eq!(spectator.phase().await, Phase::Finished);
            spectator.shutdown().await;
        }
        table.host.shutdown().await;
        table.guest.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_settlement_keeps_game_over() {
        let table = staked_table(short_game()).await;
        let mut notices = table.host.notices();
        table.ledger.fail_next_finish();

        wait_for(&table, |s| s.show_start_button).await;
        table.host.start().await.unwrap();

        next_matching(&mut notices, |n| matches!(n, ClientNotice::SettlementFailed { .. })).await;

        tokio::time::sleep(Duration::from_secs(2)).await;
        let state = wait_for(&table, |s| s.winner.is_some()).await;
        assert!(!state.settlement_completed);
        assert_eq!(table.ledger.finish_calls(), 1);

        let outcome = table.host.retry_settlement().await.unwrap();
        assert!(matches!(outcome, SettlementOutcome::Settled { .. }));
        wait_for(&table, |s| s.settlement_completed).await;
        assert_eq!(table.ledger.finish_calls(), 2);

        table.host.shutdown().await;
        table.guest.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_inconsistent_winner_not_settled() {
        let table = seated_table(ClientConfig::default()).await;
        let key = room_key(table.host.room());
        let guest = table.guest.local().clone();

        table
            .store
            .update(&key, |s| {
                s.players.remove(&guest);
                s.winner = Some(Role::Player2);
            })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(table.ledger.finish_calls(), 0);
        assert!(!table.store.read(&key).await.unwrap().settlement_completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stake_failure_and_sync() {
        let table = seated_table(ClientConfig::default()).await;
        let key = room_key(table.host.room());

        // Unfunded wallet joins an empty room
        let broke_room = MatchClient::create_room(
            table.store.clone(),
            Arc::new(table.ledger.handle(addr("0xdead"))),
            ClientConfig::default(),
            addr("0xdead"),
        )
        .await
        .unwrap();
        let mut notices = broke_room.notices();
        assert!(matches!(
            broke_room.stake().await,
            Err(ClientError::StakeFailed(SettlementError::InsufficientBalance { .. }))
        ));
        assert!(matches!(notices.try_recv(), Ok(ClientNotice::StakeFailed { retryable: true, .. })));

        // Guest staked in an earlier session
        table
            .ledger
            .handle(table.guest.local().clone())
            .stake(table.guest.room(), STAKE_AMOUNT)
            .await
            .unwrap();
        assert!(table.guest.sync_stake_status().await.unwrap());
        assert!(!table.host.sync_stake_status().await.unwrap());

        let state = table.store.read(&key).await.unwrap();
        assert!(state.player(table.guest.local()).unwrap().is_ready);

        // Staking again is a no-op, not a second escrow
        table.guest.stake().await.unwrap();
        assert_eq!(table.guest.balance().await.unwrap(), STAKE_AMOUNT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_configured_stake_reaches_escrow() {
        let half = ClientConfig { stake_amount: STAKE_AMOUNT / 2, ..Default::default() };

        // Escrow expects the full stake
        let table = seated_table(half.clone()).await;
        let mut notices = table.host.notices();
        assert!(matches!(
            table.host.stake().await,
            Err(ClientError::StakeFailed(SettlementError::StakeMismatch { .. }))
        ));
        assert!(matches!(notices.try_recv(), Ok(ClientNotice::StakeFailed { retryable: false, .. })));
        assert_eq!(table.ledger.escrowed(table.host.room()).await, 0);

        let table = seated_table_on(half, InMemoryLedger::new(STAKE_AMOUNT / 2)).await;
        table.host.stake().await.unwrap();
        assert_eq!(table.ledger.escrowed(table.host.room()).await, STAKE_AMOUNT / 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnected_host_drives_countdown_to_finish() {
        let config = short_game();
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(InMemoryLedger::default());
        let a = addr("0xa1");
        let b = addr("0xb2");
        let room = RoomId::new("resume-room");
        let key = room_key(&room);

        // Host dropped mid-countdown: both staked, nobody ticking
        let mut state = MatchState::new(room.clone());
        for (address, role) in [(&a, Role::Player1), (&b, Role::Player2)] {
            ledger.fund(address, STAKE_AMOUNT).await;
            ledger.handle(address.clone()).stake(&room, STAKE_AMOUNT).await.unwrap();
            let mut player = Player::new(address.clone(), role);
            player.is_ready = true;
            state.players.insert(address.clone(), player);
        }
        state.countdown = Some(2);
        state.is_counting_down = true;
        store.write(&key, state).await.unwrap();

        let host = client_for(&store, &ledger, &config, a, &room).await;
        assert_eq!(host.role(), Some(Role::Player1));
        assert_eq!(host.phase().await, Phase::Countdown);

        let mut done = store.read(&key).await.unwrap();
        for _ in 0..2_000 {
            if done.settlement_completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            done = store.read(&key).await.unwrap();
        }
        assert_eq!(done.phase(), Phase::Finished);
        assert_eq!(done.winner, Some(Role::Player1));
        assert!(done.settlement_completed);
        assert_eq!(ledger.finish_calls(), 1);

        host.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_phase_reports_joining_while_in_flight() {
        let store = Arc::new(DelayedStore::new(Duration::ZERO, Duration::from_millis(200)));
        let ledger = Arc::new(InMemoryLedger::default());
        let room = RoomId::new("slow-join");
        store.write(&room_key(&room), MatchState::new(room.clone())).await.unwrap();

        let a = addr("0xa1");
        let client: Arc<MatchClient<DelayedStore, LedgerHandle>> = MatchClient::connect(
            store,
            Arc::new(ledger.handle(a.clone())),
            ClientConfig::default(),
            a,
            room,
        )
        .await
        .unwrap();
        assert_eq!(client.phase().await, Phase::Lobby);

        let joining = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.join().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(client.phase().await, Phase::Joining);

        assert_eq!(joining.await.unwrap().unwrap(), Role::Player1);
        assert_eq!(client.phase().await, Phase::Staking);
        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_room_after_finish() {
        let table = staked_table(short_game()).await;
        wait_for(&table, |s| s.show_start_button).await;
        table.host.start().await.unwrap();
        wait_for(&table, |s| s.settlement_completed).await;

        let next = table.host.new_room().await.unwrap();
        assert_ne!(next.room(), table.host.room());
        assert_eq!(next.role(), Some(Role::Player1));
        assert_eq!(next.phase().await, Phase::Staking);
        assert_eq!(table.store.room_count().await, 2);

        next.shutdown().await;
        table.guest.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unjoined_client_cannot_act() {
        let table = seated_table(ClientConfig::default()).await;
        let spectator = client_for(&table.store, &table.ledger, &ClientConfig::default(), addr("0xc3"), table.host.room()).await;

        assert!(matches!(spectator.on_pull().await, Err(ClientError::NotJoined)));
        assert!(matches!(spectator.stake().await, Err(ClientError::NotJoined)));
        assert_eq!(spectator.phase().await, Phase::Staking);
    }
}

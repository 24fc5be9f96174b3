//! Tug of War Demo
//!
//! Two in-process participants play a full staked match against the
//! in-memory store and escrow ledger, then settle.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use tug_of_war::{
    VERSION, ClientError,
    core::hash::short_hex,
    config::ClientConfig,
    game::{
        input::PullFrame,
        machine::MatchError,
        state::{Address, Phase, Role},
        tick::replay_pulls,
    },
    network::{room_key, MatchClient, MemoryStore, SharedStore},
    settlement::InMemoryLedger,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")?;

    let config = ClientConfig::from_env();
    config.validate()?;

    info!("Tug of War v{}", VERSION);
    info!(
        "Resolution tick: {:?}, game clock: {:?} ({} ticks)",
        config.resolution_tick,
        config.game_duration,
        config.duration_ticks()
    );

    demo_match(config).await
}

/// Play one match between two local wallets.
async fn demo_match(config: ClientConfig) -> anyhow::Result<()> {
    info!("=== Starting Demo Match ===");

    let store = Arc::new(MemoryStore::new());
    let ledger = Arc::new(InMemoryLedger::new(config.stake_amount));

    let alice = Address::parse("0xA11CE00000000000000000000000000000000001")?;
    let bob = Address::parse("0xB0B0000000000000000000000000000000000002")?;
    ledger.fund(&alice, config.stake_amount.saturating_mul(2)).await;
    ledger.fund(&bob, config.stake_amount.saturating_mul(2)).await;

    let host = MatchClient::create_room(
        store.clone(),
        Arc::new(ledger.handle(alice.clone())),
        config.clone(),
        alice.clone(),
    )
    .await?;
    let key = room_key(host.room());
    info!("Room: {}", host.room());

    let guest = MatchClient::connect(
        store.clone(),
        Arc::new(ledger.handle(bob.clone())),
        config.clone(),
        bob.clone(),
        host.room().clone(),
    )
    .await?;
    guest.join().await?;

    host.stake().await?;
    guest.stake().await?;
    info!("Both stakes escrowed: {}", ledger.escrowed(host.room()).await);

    wait_until(&*store, &key, |s| s.phase() == Phase::ReadyWait).await?;
    host.start().await?;
    wait_until(&*store, &key, |s| s.phase() == Phase::Playing).await?;

    // Alice pulls twice for every Bob pull
    let mut pulls = 0u32;
    while store.read(&key).await?.winner.is_none() {
        pulls += 1;
        let puller = if pulls % 3 == 0 { &guest } else { &host };
        match puller.key_down().await {
            Ok(_) => puller.key_up().await,
            // Winner landed between the read and the press
            Err(ClientError::Match(MatchError::NotPlaying)) => break,
            Err(e) => return Err(e.into()),
        }
        tokio::time::sleep(config.resolution_tick).await;
    }

    let state = wait_until(&*store, &key, |s| s.settlement_completed).await?;
    let winner = state.winner.unwrap_or(Role::Player1);

    info!("=== Match Results ===");
    info!("Winner: {} after {} presses", winner, pulls);
    info!("Rope: {:.1}", state.rope_position_units());
    info!("Final State Hash: {}", short_hex(&state.compute_hash()));
    info!("Alice balance: {}", host.balance().await?);
    info!("Bob balance: {}", guest.balance().await?);
    if let Some(payout) = ledger.payout(host.room()).await {
        info!("Paid {} to {} at {}", payout.amount, payout.winner.short(), payout.settled_at);
    }

    // Same alternating pattern, replayed offline
    info!("=== Verifying Determinism ===");
    let frames: Vec<PullFrame> = (1..=400)
        .map(|n| if n % 3 == 0 { PullFrame::PLAYER2 } else { PullFrame::PLAYER1 })
        .collect();
    let mut started = state.clone();
    started.winner = None;
    started.is_started = true;
    started.settlement_completed = false;
    started.rope_position = config.resolution.center;
    let (first, _) = replay_pulls(started.clone(), &frames, &config.resolution);
    let (second, _) = replay_pulls(started, &frames, &config.resolution);
    if first.compute_hash() != second.compute_hash() {
        bail!("Replay diverged");
    }
    info!("Replay winner: {:?}, hashes match ✓", first.winner);

    host.shutdown().await;
    guest.shutdown().await;
    Ok(())
}

/// Poll the store until `done` holds.
async fn wait_until<S: SharedStore>(
    store: &S,
    key: &tug_of_war::network::RoomKey,
    done: impl Fn(&tug_of_war::MatchState) -> bool,
) -> anyhow::Result<tug_of_war::MatchState> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(120);
    loop {
        let state = store.read(key).await?;
        if done(&state) {
            return Ok(state);
        }
        if tokio::time::Instant::now() >= deadline {
            bail!("Timed out waiting for room {}", key);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

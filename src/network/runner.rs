//! Match Timers
//!
//! The two wall-clock drivers of a room, both run by the room creator's
//! client:
//!
//! ```text
//!   start ──► countdown ticker (1 s) ──► resolution loop (50 ms) ──► winner
//!              3 → 2 → 1 → isStarted        read → resolve → write
//! ```
//!
//! Neither keeps game state of its own. Every step re-reads the latest
//! snapshot and applies a pure transition from `game/`, so a stale or
//! overwritten write is corrected by the next tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::config::ClientConfig;
use crate::game::events::{EndReason, GameEvent, GameEventData};
use crate::game::machine::{self, CountdownStep};
use crate::game::state::{MatchState, Phase, Role};
use crate::game::tick::{resolve_tick, ResolutionConfig, TickResult};
use crate::network::protocol::RoomKey;
use crate::network::store::{SharedStore, StoreError};

// =============================================================================
// COUNTDOWN
// =============================================================================

/// Tick the countdown down to play. Returns whether play started.
#[instrument(skip_all, fields(room = %key))]
pub async fn run_countdown<S: SharedStore>(
    store: Arc<S>,
    key: RoomKey,
    interval: Duration,
    resolution: ResolutionConfig,
    events: broadcast::Sender<GameEvent>,
) -> Result<bool, StoreError> {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // First tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let step = store
            .update(&key, |state| machine::countdown_tick(state, &resolution))
            .await?;

        if let Some(event) = step.event() {
            let _ = events.send(event);
        }

        match step {
            CountdownStep::Remaining(remaining) => debug!(remaining, "Countdown"),
            CountdownStep::Started => {
                info!("Rope is live");
                return Ok(true);
            }
            CountdownStep::Idle => {
                debug!("Countdown no longer running");
                return Ok(false);
            }
        }
    }
}

// =============================================================================
// RESOLUTION LOOP
// =============================================================================

/// Why the resolution loop exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// This loop decided the winner.
    Finished {
        /// Winning side
        winner: Role,
        /// Threshold or timeout
        reason: EndReason,
    },
    /// Play ended without this loop deciding it.
    Stopped,
}

/// Fixed-tick rope resolution for one room.
#[derive(Debug, Clone)]
pub struct ResolutionLoop {
    config: ResolutionConfig,
    tick_period: Duration,
    debounce: Duration,
    game_duration: Duration,
    ticks_elapsed: u32,
    last_write: Option<Instant>,
}

impl ResolutionLoop {
    /// Create a loop from client configuration.
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            config: config.resolution,
            tick_period: config.resolution_tick,
            debounce: config.write_debounce,
            game_duration: config.game_duration,
            ticks_elapsed: 0,
            last_write: None,
        }
    }

    /// Resolve tick `tick` on a snapshot, expiring the match if the game
    /// clock has run out. `tick` only stamps events.
    pub fn advance(&self, state: &mut MatchState, tick: u32, timed_out: bool) -> TickResult {
        let mut result = resolve_tick(state, tick, &self.config);

        if result.winner.is_none() && timed_out {
            if let Some(winner) = machine::expire(state, &self.config) {
                result.winner = Some(winner);
                result
                    .events
                    .push(GameEvent::match_ended(tick, winner, EndReason::Timeout));
            }
        }

        result
    }

    /// Whether enough time passed since the last write.
    pub fn may_write(&self, now: Instant) -> bool {
        self.last_write
            .map_or(true, |last| now.duration_since(last) >= self.debounce)
    }

    /// Run until a winner is decided or play stops.
    #[instrument(skip_all, fields(room = %key))]
    pub async fn run<S: SharedStore>(
        mut self,
        store: Arc<S>,
        key: RoomKey,
        events: broadcast::Sender<GameEvent>,
    ) -> Result<LoopExit, StoreError> {
        let mut ticker = time::interval(self.tick_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        // Wall-clock deadline; skipped ticks still count toward it
        let deadline = Instant::now() + self.game_duration;
        info!(game_duration = ?self.game_duration, "Resolution loop started");

        loop {
            let scheduled = ticker.tick().await;
            self.ticks_elapsed = self.ticks_elapsed.saturating_add(1);
            let tick = self.ticks_elapsed;
            let timed_out = scheduled >= deadline;

            let snapshot = match store.read(&key).await {
                Ok(snapshot) => snapshot,
                Err(StoreError::Codec(e)) => {
                    warn!(tick, error = %e, "Unreadable snapshot, skipping tick");
                    continue;
                }
                Err(e) => return Err(e),
            };

            if snapshot.phase() != Phase::Playing {
                debug!(tick, phase = ?snapshot.phase(), "Play ended elsewhere");
                return Ok(LoopExit::Stopped);
            }

            // Dry run: a tick that changes nothing writes nothing
            let mut preview = snapshot;
            if !self.advance(&mut preview, tick, timed_out).changed() {
                continue;
            }

            if !self.may_write(scheduled) {
                debug!(tick, "Write debounced");
                continue;
            }

            // Resolve again against the latest snapshot
            let this = &self;
            let result = store.update(&key, |state| this.advance(state, tick, timed_out)).await?;
            self.last_write = Some(scheduled);

            #[cfg(feature = "debug-tracing")]
            tracing::trace!(tick, moved_by = ?result.moved_by, "Resolution write");

            for event in &result.events {
                let _ = events.send(event.clone());
            }

            if let Some(winner) = result.winner {
                let reason = result
                    .events
                    .iter()
                    .find_map(|e| match e.data {
                        GameEventData::MatchEnded { reason, .. } => Some(reason),
                        _ => None,
                    })
                    .unwrap_or(EndReason::Threshold);
                info!(tick, %winner, ?reason, "Match decided");
                return Ok(LoopExit::Finished { winner, reason });
            }
        }
    }
}

// =============================================================================
// DRIVER
// =============================================================================

/// Drive a room from wherever it is (countdown or play) to the end.
///
/// Returns `None` if there was nothing to drive.
pub async fn drive_match<S: SharedStore>(
    store: Arc<S>,
    key: RoomKey,
    config: ClientConfig,
    events: broadcast::Sender<GameEvent>,
) -> Result<Option<LoopExit>, StoreError> {
    match store.read(&key).await?.phase() {
        Phase::Countdown => {
            let started = run_countdown(
                Arc::clone(&store),
                key.clone(),
                config.countdown_interval,
                config.resolution,
                events.clone(),
            )
            .await?;
            if !started {
                return Ok(None);
            }
        }
        Phase::Playing => {}
        _ => return Ok(None),
    }

    ResolutionLoop::new(&config).run(store, key, events).await.map(Some)
}

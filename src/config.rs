//! Client Configuration
//!
//! Timing and staking parameters for a match client. Defaults match the
//! production game; `from_env` overrides individual values.

use std::time::Duration;

use tracing::warn;

use crate::game::machine::COUNTDOWN_FROM;
use crate::game::tick::ResolutionConfig;
use crate::settlement::client::{TokenAmount, STAKE_AMOUNT};

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A duration that must be positive was zero.
    #[error("{0} must be non-zero")]
    ZeroDuration(&'static str),

    /// Countdown must run at least one second.
    #[error("countdown must start at 1 or more")]
    ZeroCountdown,

    /// Game would end before the first resolution tick.
    #[error("game duration {duration:?} is shorter than one resolution tick {tick:?}")]
    DurationTooShort {
        /// Configured game duration
        duration: Duration,
        /// Configured resolution tick
        tick: Duration,
    },

    /// Rope geometry cannot produce a winner or a move.
    #[error("invalid rope geometry: {0}")]
    Geometry(&'static str),
}

/// Match client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Countdown length in seconds.
    pub countdown_from: u8,
    /// Countdown step.
    pub countdown_interval: Duration,
    /// Rope resolution tick.
    pub resolution_tick: Duration,
    /// Minimum spacing between resolution writes.
    pub write_debounce: Duration,
    /// Game clock.
    pub game_duration: Duration,
    /// Delay before a rejected joiner is redirected.
    pub join_redirect_delay: Duration,
    /// Per-player stake.
    pub stake_amount: TokenAmount,
    /// Rope geometry.
    pub resolution: ResolutionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            countdown_from: COUNTDOWN_FROM,
            countdown_interval: Duration::from_secs(1),
            resolution_tick: Duration::from_millis(crate::RESOLUTION_TICK_MS),
            write_debounce: Duration::from_millis(50),
            game_duration: Duration::from_secs(crate::GAME_DURATION_SECS),
            join_redirect_delay: Duration::from_secs(3),
            stake_amount: STAKE_AMOUNT,
            resolution: ResolutionConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(secs) = parse_var::<u8>(&lookup, "TUG_COUNTDOWN_SECS") {
            config.countdown_from = secs;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "TUG_RESOLUTION_TICK_MS") {
            config.resolution_tick = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "TUG_WRITE_DEBOUNCE_MS") {
            config.write_debounce = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "TUG_GAME_DURATION_SECS") {
            config.game_duration = Duration::from_secs(secs);
        }
        if let Some(amount) = parse_var::<TokenAmount>(&lookup, "TUG_STAKE_AMOUNT") {
            config.stake_amount = amount;
        }

        config
    }

    /// Check the configuration is playable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.countdown_from == 0 {
            return Err(ConfigError::ZeroCountdown);
        }
        if self.countdown_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("countdown_interval"));
        }
        if self.resolution_tick.is_zero() {
            return Err(ConfigError::ZeroDuration("resolution_tick"));
        }
        if self.game_duration < self.resolution_tick {
            return Err(ConfigError::DurationTooShort {
                duration: self.game_duration,
                tick: self.resolution_tick,
            });
        }

        let rope = &self.resolution;
        if rope.pull_force <= 0 {
            return Err(ConfigError::Geometry("pull force must be positive"));
        }
        if rope.max_distance <= 0 || rope.win_threshold <= 0 {
            return Err(ConfigError::Geometry("distances must be positive"));
        }
        if rope.win_threshold > rope.max_distance {
            return Err(ConfigError::Geometry("win threshold beyond rope travel"));
        }

        Ok(())
    }

    /// Resolution ticks in one game (1200 by default).
    pub fn duration_ticks(&self) -> u32 {
        let tick = self.resolution_tick.as_millis().max(1);
        (self.game_duration.as_millis() / tick).min(u32::MAX as u128) as u32
    }
}

fn parse_var<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(var = name, value = %raw, "Ignoring invalid config value");
            None
        }
    }
}

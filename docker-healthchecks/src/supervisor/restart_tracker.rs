//! Crash backoff for heartbeat loops.
//!
//! # Backoff Algorithm
//!
//! - Crashes are counted within a sliding failure window
//! - Below the threshold: immediate restart
//! - From the threshold on: backoff = base * 2^(crashes - threshold), capped at max_backoff
//! - More than `max_restarts` crashes within the window: give up

use std::time::Duration;

use tokio::time::Instant;

/// Default base backoff duration (1 second).
pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_secs(1);

/// Default maximum backoff duration (1 minute).
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Default failure window (60 seconds).
pub const DEFAULT_FAILURE_WINDOW: Duration = Duration::from_secs(60);

/// Default number of crashes restarted without delay.
pub const DEFAULT_FAILURE_THRESHOLD: usize = 3;

/// Default number of restarts allowed within the failure window.
pub const DEFAULT_MAX_RESTARTS: usize = 5;

/// Maximum exponent to prevent overflow.
const MAX_EXPONENT: u32 = 10;

/// Configuration for the restart tracker.
#[derive(Debug, Clone)]
pub struct RestartTrackerConfig {
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Window for counting crashes.
    pub failure_window: Duration,
    /// Crashes restarted immediately before backoff applies.
    pub failure_threshold: usize,
    /// Restarts allowed within the window.
    pub max_restarts: usize,
}

impl Default for RestartTrackerConfig {
    fn default() -> Self {
        Self {
            base_backoff: DEFAULT_BASE_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            failure_window: DEFAULT_FAILURE_WINDOW,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            max_restarts: DEFAULT_MAX_RESTARTS,
        }
    }
}

/// What to do after a crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Restart after the given delay.
    Restart(Duration),
    /// Too many crashes within the window.
    GiveUp,
}

/// Tracks crashes of one container's heartbeat loop.
#[derive(Debug)]
pub struct RestartTracker {
    failures: Vec<Instant>,
    config: RestartTrackerConfig,
}

impl RestartTracker {
    pub fn new(config: RestartTrackerConfig) -> Self {
        Self {
            failures: Vec::new(),
            config,
        }
    }

    /// Record a crash and decide how to restart.
    pub fn record_failure(&mut self) -> RestartDecision {
        let now = Instant::now();
        let window = self.config.failure_window;
        self.failures.retain(|&t| now.duration_since(t) < window);
        self.failures.push(now);

        let failures = self.failures.len();
        if failures > self.config.max_restarts {
            return RestartDecision::GiveUp;
        }
        RestartDecision::Restart(self.calculate_backoff(failures))
    }

    /// Number of crashes within the window.
    pub fn recent_failures(&self) -> usize {
        let now = Instant::now();
        self.failures
            .iter()
            .filter(|&&t| now.duration_since(t) < self.config.failure_window)
            .count()
    }

    /// Formula: base * 2^(failures - threshold) for failures >= threshold
    fn calculate_backoff(&self, failures: usize) -> Duration {
        if failures < self.config.failure_threshold {
            return Duration::ZERO;
        }

        let exponent =
            (failures - self.config.failure_threshold).min(MAX_EXPONENT as usize) as u32;
        let multiplier = 2u32.saturating_pow(exponent);
        self.config
            .base_backoff
            .saturating_mul(multiplier)
            .min(self.config.max_backoff)
    }
}

impl Default for RestartTracker {
    fn default() -> Self {
        Self::new(RestartTrackerConfig::default())
    }
}

//! Failed-credential lockout.
//!
//! Consecutive credential failures are counted until the configured
//! threshold, at which point submissions are blocked for a cooldown. The
//! count stays at the threshold for the whole block and reads 0 from the
//! instant the block elapses.

use crate::config::LockoutConfig;
use std::time::Duration;
use tokio::time::Instant;

/// Snapshot of the guard
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockoutState {
    pub failure_count: u32,
    pub blocked_until: Option<Instant>,
}

/// Converts pass/fail signals from the credentials step into a block decision
#[derive(Clone, Debug)]
pub struct LockoutGuard {
    threshold: u32,
    cooldown: Duration,
    state: LockoutState,
}

impl LockoutGuard {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            state: LockoutState {
                failure_count: 0,
                blocked_until: None,
            },
        }
    }

    pub fn from_config(config: &LockoutConfig) -> Self {
        Self::new(config.threshold, config.cooldown())
    }

    /// Record a failed credential attempt at `now`.
    ///
    /// Ignored while a block is active, so a block is never extended.
    pub fn record_failure(&mut self, now: Instant) {
        self.settle(now);
        if self.is_blocked(now) {
            tracing::debug!("Ignoring credential failure during active lockout");
            return;
        }

        self.state.failure_count += 1;
        if self.state.failure_count >= self.threshold {
            self.state.blocked_until = Some(now + self.cooldown);
            tracing::warn!(
                failures = self.state.failure_count,
                cooldown_secs = self.cooldown.as_secs(),
                "Credential submission locked out"
            );
        } else {
            tracing::info!(
                failures = self.state.failure_count,
                threshold = self.threshold,
                "Credential attempt rejected"
            );
        }
    }

    /// Record a successful credential attempt
    pub fn record_success(&mut self, now: Instant) {
        self.settle(now);
        if !self.is_blocked(now) {
            self.state.failure_count = 0;
        }
    }

    /// Whether credential submission is blocked at `now`
    pub fn is_blocked(&self, now: Instant) -> bool {
        matches!(self.state.blocked_until, Some(until) if now < until)
    }

    /// Time left on the current block, for a countdown display
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.state
            .blocked_until
            .filter(|until| now < *until)
            .map(|until| until - now)
    }

    /// Failure count as observed at `now`
    pub fn failure_count(&self, now: Instant) -> u32 {
        match self.state.blocked_until {
            Some(until) if now >= until => 0,
            _ => self.state.failure_count,
        }
    }

    /// Snapshot as observed at `now`; an elapsed block reads as no block and no failures
    pub fn state(&self, now: Instant) -> LockoutState {
        match self.state.blocked_until {
            Some(until) if now >= until => LockoutState {
                failure_count: 0,
                blocked_until: None,
            },
            _ => self.state,
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Clear an elapsed block together with its failure count
    fn settle(&mut self, now: Instant) {
        if let Some(until) = self.state.blocked_until {
            if now >= until {
                tracing::info!("Lockout elapsed");
                self.state = LockoutState {
                    failure_count: 0,
                    blocked_until: None,
                };
            }
        }
    }
}

impl Default for LockoutGuard {
    fn default() -> Self {
        Self::from_config(&LockoutConfig::default())
    }
}

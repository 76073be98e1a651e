//! Reconnect backoff for streaming connections.

use std::time::Duration;

use rand::Rng;

use crate::error::ErrorKind;

/// Reconnect behaviour of one logical connection.
#[derive(Clone, Debug)]
pub struct ReconnectConfig {
    /// Reconnect automatically after an unexpected close.
    pub enabled: bool,
    /// Attempts before giving up (`None` = retry forever).
    pub max_attempts: Option<u32>,
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Growth factor applied per attempt.
    pub multiplier: f64,
    /// Fraction of each delay that is randomized, in `0.0..=1.0`.
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: Some(10),
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl ReconnectConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Never reconnect; an unexpected close moves straight to `Closed`.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    #[must_use]
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    #[must_use]
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.initial_delay.is_zero() {
            return Err("Initial reconnect delay must be > 0".to_string());
        }
        if self.max_delay < self.initial_delay {
            return Err("Max reconnect delay must be >= initial reconnect delay".to_string());
        }
        if self.multiplier < 1.0 || !self.multiplier.is_finite() {
            return Err("Backoff multiplier must be >= 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err("Jitter must be between 0.0 and 1.0".to_string());
        }
        if self.max_attempts == Some(0) {
            return Err("Max reconnect attempts must be > 0 when set".to_string());
        }
        Ok(())
    }
}

/// Exponential backoff capped at `max_delay`.
///
/// `attempt` is 1-based: attempt 1 waits `initial_delay`. Jitter pulls the
/// delay down by up to `jitter * delay`, so the cap always holds.
pub fn compute_delay(
    attempt: u32,
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: f64,
) -> Duration {
    let initial = initial_delay.as_secs_f64();
    let max = max_delay.as_secs_f64();
    let exponent = multiplier.powi(attempt.saturating_sub(1).min(i32::MAX as u32) as i32);
    let base = (initial * exponent).min(max);

    if jitter <= 0.0 || base <= 0.0 {
        return Duration::from_secs_f64(base);
    }

    let randomized = rand::rng().random_range(0.0..=base);
    let blended = base * (1.0 - jitter) + randomized * jitter;
    Duration::from_secs_f64(blended.min(max))
}

/// One scheduled reconnect.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectAttempt {
    /// 1-based attempt number since the last successful connect.
    pub attempt: u32,
    pub delay: Duration,
    /// Why the previous connection (or attempt) ended.
    pub cause: ErrorKind,
}

/// Per-connection attempt counter and delay source.
#[derive(Debug)]
pub struct ReconnectionScheduler {
    config: ReconnectConfig,
    attempts: u32,
}

impl ReconnectionScheduler {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Schedule the next attempt, or `None` when reconnecting is disabled or
    /// every allowed attempt has been used.
    pub fn next_attempt(&mut self, cause: ErrorKind) -> Option<ReconnectAttempt> {
        if !self.config.enabled || self.is_exhausted() {
            return None;
        }
        self.attempts += 1;
        Some(ReconnectAttempt {
            attempt: self.attempts,
            delay: compute_delay(
                self.attempts,
                self.config.initial_delay,
                self.config.max_delay,
                self.config.multiplier,
                self.config.jitter,
            ),
            cause,
        })
    }

    /// Called on every successful connect.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn is_exhausted(&self) -> bool {
        self.config
            .max_attempts
            .is_some_and(|max| self.attempts >= max)
    }
}

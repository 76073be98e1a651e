//! Retry decisions for request/response calls.

use std::time::Duration;

use crate::{
    error::{ErrorKind, ErrorRecord},
    reconnect::compute_delay,
};

/// Retry configuration shared by every call of one executor.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound on any single delay, Retry-After included.
    pub max_delay: Duration,
    /// Growth factor applied per failed attempt.
    pub multiplier: f64,
    /// Fraction of each delay that is randomized, in `0.0..=1.0`.
    pub jitter: f64,
    /// Wait at least as long as a venue's `Retry-After` on `RateLimited`.
    pub respect_retry_after: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.1,
            respect_retry_after: true,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// A single attempt, never retried.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
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

    #[must_use]
    pub fn respect_retry_after(mut self, respect: bool) -> Self {
        self.respect_retry_after = respect;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("Max retry attempts must be > 0".to_string());
        }
        if self.max_delay < self.initial_delay {
            return Err("Max retry delay must be >= initial retry delay".to_string());
        }
        if self.multiplier < 1.0 || !self.multiplier.is_finite() {
            return Err("Retry multiplier must be >= 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err("Retry jitter must be between 0.0 and 1.0".to_string());
        }
        Ok(())
    }
}

/// Per-call retry state. Created fresh for every logical request.
#[derive(Clone, Debug)]
pub struct RetryContext {
    /// Attempts made so far (1 after the first failure).
    pub attempt: u32,
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub last_error: Option<ErrorRecord>,
}

impl RetryContext {
    /// Record a failed attempt.
    pub fn record_failure(&mut self, error: ErrorRecord) {
        self.attempt = (self.attempt + 1).min(self.max_attempts);
        self.last_error = Some(error);
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Outcome of [`RetryPolicy::should_retry`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryDecision {
    pub retry: bool,
    pub delay: Duration,
}

impl RetryDecision {
    pub const STOP: Self = Self {
        retry: false,
        delay: Duration::ZERO,
    };

    pub fn after(delay: Duration) -> Self {
        Self { retry: true, delay }
    }
}

/// Decides whether and when a failed attempt is retried.
///
/// Pure apart from jitter: no I/O, no shared state.
#[derive(Clone, Debug, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// A fresh context for one logical request.
    pub fn context(&self) -> RetryContext {
        RetryContext {
            attempt: 0,
            max_attempts: self.config.max_attempts.max(1),
            base_delay: self.config.initial_delay,
            max_delay: self.config.max_delay,
            multiplier: self.config.multiplier,
            last_error: None,
        }
    }

    pub fn should_retry(&self, ctx: &RetryContext) -> RetryDecision {
        let Some(error) = &ctx.last_error else {
            return RetryDecision::STOP;
        };
        if !error.kind().is_retryable() || ctx.is_exhausted() {
            return RetryDecision::STOP;
        }

        let backoff = compute_delay(
            ctx.attempt.max(1),
            ctx.base_delay,
            ctx.max_delay,
            ctx.multiplier,
            self.config.jitter,
        );

        let delay = match error.retry_after() {
            Some(retry_after)
                if self.config.respect_retry_after && error.kind() == ErrorKind::RateLimited =>
            {
                backoff.max(retry_after).min(ctx.max_delay)
            }
            _ => backoff,
        };

        RetryDecision::after(delay)
    }
}

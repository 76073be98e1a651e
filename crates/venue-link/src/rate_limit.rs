//! Token bucket admission control for venue APIs.
//!
//! A [`RateLimiter`] holds any number of buckets. Global buckets apply to
//! every request; endpoint-scoped buckets apply to requests whose target
//! starts with the bucket's prefix. A request is admitted only when every
//! applicable bucket has enough tokens, and then all of them are debited
//! together under one lock, so partial acquisition is never left behind.

use std::{collections::HashMap, time::Duration};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::Instant;

/// Which requests a bucket applies to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BucketScope {
    /// Every request.
    Global,
    /// Requests whose endpoint starts with this prefix.
    Endpoint(String),
}

impl BucketScope {
    fn applies_to(&self, endpoint: &str) -> bool {
        match self {
            Self::Global => true,
            Self::Endpoint(prefix) => endpoint.starts_with(prefix.as_str()),
        }
    }
}

/// One configured tier.
#[derive(Clone, Debug)]
pub struct BucketConfig {
    /// Name used in logs and by [`RateLimiter::available_tokens`].
    pub name: String,
    /// Maximum tokens the bucket can hold; also the largest admissible weight.
    pub capacity: u32,
    /// Tokens added per millisecond.
    pub refill_rate_per_ms: f64,
    /// Which requests draw from this bucket.
    pub scope: BucketScope,
}

impl BucketConfig {
    pub fn global(name: impl Into<String>, capacity: u32, refill_rate_per_ms: f64) -> Self {
        Self {
            name: name.into(),
            capacity,
            refill_rate_per_ms,
            scope: BucketScope::Global,
        }
    }

    pub fn endpoint(
        name: impl Into<String>,
        prefix: impl Into<String>,
        capacity: u32,
        refill_rate_per_ms: f64,
    ) -> Self {
        Self {
            name: name.into(),
            capacity,
            refill_rate_per_ms,
            scope: BucketScope::Endpoint(prefix.into()),
        }
    }

    fn validate(&self) -> Result<(), String> {
        if self.capacity == 0 {
            return Err(format!("Bucket '{}' capacity must be > 0", self.name));
        }
        if !(self.refill_rate_per_ms > 0.0) || !self.refill_rate_per_ms.is_finite() {
            return Err(format!("Bucket '{}' refill rate must be > 0", self.name));
        }
        if let BucketScope::Endpoint(prefix) = &self.scope
            && prefix.is_empty()
        {
            return Err(format!("Bucket '{}' endpoint prefix must not be empty", self.name));
        }
        Ok(())
    }
}

/// Rate limiter configuration.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    /// Buckets checked on every admission.
    pub buckets: Vec<BucketConfig>,
    /// Weight charged per endpoint when a request does not set one.
    pub endpoint_weights: HashMap<String, u32>,
    /// Weight of endpoints missing from `endpoint_weights`.
    pub default_weight: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            buckets: Vec::new(),
            endpoint_weights: HashMap::new(),
            default_weight: 1,
        }
    }
}

impl RateLimitConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a bucket.
    #[must_use]
    pub fn bucket(mut self, bucket: BucketConfig) -> Self {
        self.buckets.push(bucket);
        self
    }

    /// Set the weight of one endpoint.
    #[must_use]
    pub fn endpoint_weight(mut self, endpoint: impl Into<String>, weight: u32) -> Self {
        self.endpoint_weights.insert(endpoint.into(), weight);
        self
    }

    #[must_use]
    pub fn default_weight(mut self, weight: u32) -> Self {
        self.default_weight = weight;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.default_weight == 0 {
            return Err("Default weight must be > 0".to_string());
        }
        for bucket in &self.buckets {
            bucket.validate()?;
        }
        Ok(())
    }
}

/// A weight that can never be admitted because it exceeds a bucket's capacity.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("weight {weight} exceeds capacity {capacity} of rate limit bucket '{bucket}'")]
pub struct CapacityExceeded {
    pub bucket: String,
    pub weight: u32,
    pub capacity: u32,
}

#[derive(Debug)]
struct TokenBucket {
    name: String,
    capacity: f64,
    tokens: f64,
    refill_rate_per_ms: f64,
    last_refill: Instant,
    scope: BucketScope,
}

impl TokenBucket {
    fn new(config: &BucketConfig, now: Instant) -> Self {
        Self {
            name: config.name.clone(),
            capacity: f64::from(config.capacity),
            tokens: f64::from(config.capacity),
            refill_rate_per_ms: config.refill_rate_per_ms,
            last_refill: now,
            scope: config.scope.clone(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed_ms = now.duration_since(self.last_refill).as_secs_f64() * 1000.0;
        self.tokens = (self.tokens + elapsed_ms * self.refill_rate_per_ms).min(self.capacity);
        self.last_refill = now;
    }

    fn wait_for(&self, weight: f64) -> Duration {
        if self.tokens >= weight {
            return Duration::ZERO;
        }
        let needed_ms = (weight - self.tokens) / self.refill_rate_per_ms;
        Duration::from_secs_f64(needed_ms / 1000.0)
    }
}

enum Admission {
    Granted,
    Wait(Duration),
}

/// A multi-bucket token bucket rate limiter.
///
/// Safe to share between tasks; every check and debit happens under a single
/// mutex.
#[derive(Debug)]
pub struct RateLimiter {
    buckets: Mutex<Vec<TokenBucket>>,
    endpoint_weights: HashMap<String, u32>,
    default_weight: u32,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    /// Create a limiter with no buckets. Everything is admitted.
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(Vec::new()),
            endpoint_weights: HashMap::new(),
            default_weight: 1,
        }
    }

    /// Build a limiter from validated configuration.
    pub fn from_config(config: &RateLimitConfig) -> Result<Self, String> {
        config.validate()?;
        let now = Instant::now();
        Ok(Self {
            buckets: Mutex::new(
                config
                    .buckets
                    .iter()
                    .map(|bucket| TokenBucket::new(bucket, now))
                    .collect(),
            ),
            endpoint_weights: config.endpoint_weights.clone(),
            default_weight: config.default_weight,
        })
    }

    /// Add a global bucket.
    ///
    /// # Arguments
    /// * `name` - Name of the bucket (e.g., "ip", "orders")
    /// * `capacity` - Maximum tokens in the bucket
    /// * `refill_rate_per_ms` - Tokens added per millisecond
    pub fn add_limit(&self, name: impl Into<String>, capacity: u32, refill_rate_per_ms: f64) {
        self.add_bucket(&BucketConfig::global(name, capacity, refill_rate_per_ms));
    }

    pub fn add_bucket(&self, config: &BucketConfig) {
        self.buckets.lock().push(TokenBucket::new(config, Instant::now()));
    }

    /// Weight for a request to `endpoint` that did not set one explicitly.
    pub fn weight_for(&self, endpoint: &str) -> u32 {
        self.endpoint_weights
            .get(endpoint)
            .copied()
            .unwrap_or(self.default_weight)
    }

    /// Try to take `weight` tokens from every global bucket without waiting.
    pub fn try_acquire(&self, weight: u32) -> bool {
        self.try_acquire_for("", weight)
    }

    /// Try to take `weight` tokens from every bucket that applies to
    /// `endpoint` without waiting.
    pub fn try_acquire_for(&self, endpoint: &str, weight: u32) -> bool {
        matches!(self.admit(endpoint, weight), Ok(Admission::Granted))
    }

    /// Take `weight` tokens from every global bucket, waiting as needed.
    pub async fn acquire(&self, weight: u32) -> Result<(), CapacityExceeded> {
        self.acquire_for("", weight).await
    }

    /// Take `weight` tokens from every bucket that applies to `endpoint`,
    /// waiting as needed.
    ///
    /// Fails immediately if the weight can never fit in an applicable bucket.
    pub async fn acquire_for(&self, endpoint: &str, weight: u32) -> Result<(), CapacityExceeded> {
        loop {
            match self.admit(endpoint, weight)? {
                Admission::Granted => return Ok(()),
                Admission::Wait(wait) => {
                    tracing::trace!(
                        endpoint,
                        weight,
                        wait_ms = wait.as_millis() as u64,
                        "Rate limited, waiting for tokens"
                    );
                    // Float rounding can leave a sliver short; never spin.
                    tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
                }
            }
        }
    }

    /// Time until `weight` tokens are available for `endpoint`.
    pub fn time_until_available(&self, endpoint: &str, weight: u32) -> Duration {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        buckets
            .iter_mut()
            .filter(|bucket| bucket.scope.applies_to(endpoint))
            .map(|bucket| {
                bucket.refill(now);
                bucket.wait_for(f64::from(weight))
            })
            .max()
            .unwrap_or(Duration::ZERO)
    }

    /// Current tokens in a bucket.
    pub fn available_tokens(&self, name: &str) -> Option<f64> {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        buckets.iter_mut().find(|bucket| bucket.name == name).map(|bucket| {
            bucket.refill(now);
            bucket.tokens
        })
    }

    fn admit(&self, endpoint: &str, weight: u32) -> Result<Admission, CapacityExceeded> {
        let requested = f64::from(weight);
        let now = Instant::now();
        let mut buckets = self.buckets.lock();

        let mut wait = Duration::ZERO;
        for bucket in buckets
            .iter_mut()
            .filter(|bucket| bucket.scope.applies_to(endpoint))
        {
            if requested > bucket.capacity {
                return Err(CapacityExceeded {
                    bucket: bucket.name.clone(),
                    weight,
                    capacity: bucket.capacity as u32,
                });
            }
            bucket.refill(now);
            wait = wait.max(bucket.wait_for(requested));
        }

        if !wait.is_zero() {
            return Ok(Admission::Wait(wait));
        }

        for bucket in buckets
            .iter_mut()
            .filter(|bucket| bucket.scope.applies_to(endpoint))
        {
            bucket.tokens = (bucket.tokens - requested).max(0.0);
        }
        Ok(Admission::Granted)
    }
}

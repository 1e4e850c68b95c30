//! Per-model token-bucket rate limiter.
//!
//! Each model key owns a bucket holding at most `rpm` tokens, refilled
//! continuously at `rpm / 60` tokens per second. Buckets start full, are
//! created lazily on first use and live until the limiter is dropped.
//!
//! Time comes from `tokio::time::Instant`, so tests can drive refill with a
//! paused clock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{AdmissionError, LimiterKind};

/// Lower bound on a computed wait, so float rounding can't spin the loop.
const MIN_WAIT: Duration = Duration::from_millis(1);

/// A single bucket. Invariant: `0 <= tokens <= capacity` after every call.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// A full bucket for `rpm` requests per minute. `rpm` must be non-zero.
    pub fn new(rpm: u32, now: Instant) -> Self {
        let capacity = f64::from(rpm.max(1));
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec: capacity / 60.0,
            last_refill: now,
        }
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    /// Add tokens for the time elapsed since the last refill, clamped to
    /// capacity. A `now` earlier than the last refill adds nothing.
    pub fn refill(&mut self, now: Instant) {
        if now <= self.last_refill {
            return;
        }
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Take one token, or return how long until one is available.
    pub fn try_take(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Ok(());
        }
        let deficit = 1.0 - self.tokens;
        let wait = Duration::from_secs_f64(deficit / self.refill_per_sec);
        Err(wait.max(MIN_WAIT))
    }
}

/// Keyed collection of token buckets.
#[derive(Debug)]
pub struct RateLimiter {
    default_rpm: u32,
    overrides: HashMap<String, u32>,
    buckets: Mutex<HashMap<String, Arc<Mutex<TokenBucket>>>>,
}

impl RateLimiter {
    /// `default_rpm` applies to every key without an override. Zero disables
    /// rate limiting for those keys.
    pub fn new(default_rpm: u32) -> Self {
        Self {
            default_rpm,
            overrides: HashMap::new(),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Set the requests-per-minute limit for one key.
    pub fn with_limit(mut self, key: impl Into<String>, rpm: u32) -> Self {
        self.overrides.insert(key.into(), rpm);
        self
    }

    pub fn limit_for(&self, key: &str) -> u32 {
        self.overrides.get(key).copied().unwrap_or(self.default_rpm)
    }

    fn bucket(&self, key: &str) -> Option<Arc<Mutex<TokenBucket>>> {
        let rpm = self.limit_for(key);
        if rpm == 0 {
            return None;
        }
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(TokenBucket::new(rpm, Instant::now()))));
        Some(Arc::clone(bucket))
    }

    /// Wait until one token is available for `key` or `cancel` fires.
    ///
    /// Returns the time spent waiting.
    pub async fn acquire(
        &self,
        cancel: &CancellationToken,
        key: &str,
    ) -> Result<Duration, AdmissionError> {
        let started = Instant::now();
        let Some(bucket) = self.bucket(key) else {
            return Ok(Duration::ZERO);
        };

        loop {
            if cancel.is_cancelled() {
                return Err(AdmissionError::Cancelled(LimiterKind::RateLimit));
            }

            let wait = {
                let mut bucket = bucket.lock().unwrap_or_else(PoisonError::into_inner);
                match bucket.try_take(Instant::now()) {
                    Ok(()) => return Ok(started.elapsed()),
                    Err(wait) => wait,
                }
            };

            debug!(key, wait_ms = wait.as_millis() as u64, "rate limit bucket empty, waiting");

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(AdmissionError::Cancelled(LimiterKind::RateLimit));
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Tokens currently available for `key`, after refill. `None` when the
    /// key is unlimited.
    pub fn available(&self, key: &str) -> Option<f64> {
        let bucket = self.bucket(key)?;
        let mut bucket = bucket.lock().unwrap_or_else(PoisonError::into_inner);
        bucket.refill(Instant::now());
        Some(bucket.tokens())
    }
}

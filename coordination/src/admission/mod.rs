//! Dual-layer admission control.
//!
//! ```text
//! job ──► ConcurrencyLimiter::acquire ──► RateLimiter::acquire(model) ──► call
//!              (global, capacity C)          (per model, rpm bucket)
//! ```
//!
//! The global limiter is always acquired first and the per-model bucket
//! second, never the reverse. A job holding a ticket waits only on its own
//! model's bucket, and buckets are independent, so there is no circular wait.
//! When the bucket acquisition fails the ticket is released before the error
//! is returned.

pub mod concurrency;
pub mod rate_limit;

use thiserror::Error;

pub use concurrency::{ConcurrencyLimiter, LimiterStats, Ticket};
pub use rate_limit::{RateLimiter, TokenBucket};

/// Failure to obtain capacity from either limiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdmissionError {
    /// The run's cancellation signal fired while waiting.
    #[error("cancelled while waiting for {0} admission")]
    Cancelled(LimiterKind),

    /// A limiter was configured with a capacity of zero.
    #[error("{0} limiter capacity must be at least 1")]
    ZeroCapacity(LimiterKind),

    /// The underlying semaphore was closed.
    #[error("{0} limiter closed")]
    Closed(LimiterKind),
}

/// Which admission layer produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimiterKind {
    Concurrency,
    RateLimit,
}

impl std::fmt::Display for LimiterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Concurrency => write!(f, "concurrency"),
            Self::RateLimit => write!(f, "rate-limit"),
        }
    }
}

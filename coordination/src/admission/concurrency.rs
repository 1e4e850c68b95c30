//! Global bounded-parallelism limiter.
//!
//! A counting semaphore that hands out [`Ticket`]s. A ticket is released
//! exactly once: either explicitly through [`Ticket::release`] (which
//! consumes it) or implicitly when it is dropped on any other exit path,
//! including unwinding. Double release is unrepresentable.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use super::{AdmissionError, LimiterKind};

#[derive(Debug, Default)]
struct Counters {
    outstanding: AtomicUsize,
    peak: AtomicUsize,
    acquires: AtomicU64,
    releases: AtomicU64,
}

/// Snapshot of limiter accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterStats {
    pub capacity: usize,
    pub outstanding: usize,
    pub peak: usize,
    pub total_acquires: u64,
    pub total_releases: u64,
}

/// Counting semaphore with fixed capacity for the lifetime of a run.
#[derive(Debug)]
pub struct ConcurrencyLimiter {
    capacity: usize,
    semaphore: Arc<Semaphore>,
    counters: Arc<Counters>,
}

impl ConcurrencyLimiter {
    pub fn new(capacity: usize) -> Result<Self, AdmissionError> {
        if capacity == 0 {
            return Err(AdmissionError::ZeroCapacity(LimiterKind::Concurrency));
        }
        Ok(Self {
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity)),
            counters: Arc::new(Counters::default()),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Wait for a free slot or for `cancel` to fire.
    ///
    /// On cancellation nothing is acquired.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<Ticket, AdmissionError> {
        if cancel.is_cancelled() {
            return Err(AdmissionError::Cancelled(LimiterKind::Concurrency));
        }

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(AdmissionError::Cancelled(LimiterKind::Concurrency));
            }
            permit = Arc::clone(&self.semaphore).acquire_owned() => {
                permit.map_err(|_| AdmissionError::Closed(LimiterKind::Concurrency))?
            }
        };

        let now = self.counters.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak.fetch_max(now, Ordering::SeqCst);
        self.counters.acquires.fetch_add(1, Ordering::SeqCst);

        Ok(Ticket {
            permit: Some(permit),
            counters: Arc::clone(&self.counters),
        })
    }

    /// Tickets currently held.
    pub fn outstanding(&self) -> usize {
        self.counters.outstanding.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> LimiterStats {
        LimiterStats {
            capacity: self.capacity,
            outstanding: self.counters.outstanding.load(Ordering::SeqCst),
            peak: self.counters.peak.load(Ordering::SeqCst),
            total_acquires: self.counters.acquires.load(Ordering::SeqCst),
            total_releases: self.counters.releases.load(Ordering::SeqCst),
        }
    }
}

/// Proof of one acquired concurrency slot.
#[derive(Debug)]
#[must_use = "dropping a ticket releases its slot immediately"]
pub struct Ticket {
    permit: Option<OwnedSemaphorePermit>,
    counters: Arc<Counters>,
}

impl Ticket {
    /// Release the slot now.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(permit) = self.permit.take() {
            // Counters first: a waiter woken by the permit must never observe
            // outstanding > capacity.
            self.counters.outstanding.fetch_sub(1, Ordering::SeqCst);
            self.counters.releases.fetch_add(1, Ordering::SeqCst);
            drop(permit);
        }
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        self.release_inner();
    }
}

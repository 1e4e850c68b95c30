//! Fan-out dispatcher.
//!
//! ```text
//! dispatch_all(jobs)
//!   JoinSet::spawn(run_job(job_i)) × N     — one task per model
//!     ├─ ConcurrencyLimiter::acquire      — global slot (ticket)
//!     ├─ RateLimiter::acquire(model)      — per-model token
//!     ├─ ModelCaller::call                — raced against cancellation
//!     ├─ ticket released                  — on every path
//!     └─ classify → ModelOutcome
//!   join all N → sort by job index
//! ```
//!
//! Jobs never wait on each other directly. The dispatcher does not retry;
//! that belongs to the `ModelCaller` implementation.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::admission::{AdmissionError, ConcurrencyLimiter, LimiterKind, RateLimiter};
use crate::audit::{AuditEvent, AuditLogger, AuditRecord};
use crate::caller::{CallContext, ModelCaller};
use crate::classify::{ClassifiedError, ErrorCategory};
use crate::errors::ModelError;
use crate::job::{ModelJob, ModelOutcome};

/// Runs model jobs under dual-layer admission control.
///
/// Cheap to clone: every field is shared.
#[derive(Clone)]
pub struct Dispatcher {
    run_id: Uuid,
    concurrency: Arc<ConcurrencyLimiter>,
    rate_limiter: Arc<RateLimiter>,
    caller: Arc<dyn ModelCaller>,
    audit: Arc<dyn AuditLogger>,
    deadline: Option<Instant>,
}

impl Dispatcher {
    pub fn new(
        run_id: Uuid,
        concurrency: Arc<ConcurrencyLimiter>,
        rate_limiter: Arc<RateLimiter>,
        caller: Arc<dyn ModelCaller>,
        audit: Arc<dyn AuditLogger>,
    ) -> Self {
        Self {
            run_id,
            concurrency,
            rate_limiter,
            caller,
            audit,
            deadline: None,
        }
    }

    /// Attach the run deadline so callers can see it in their context.
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn concurrency(&self) -> &ConcurrencyLimiter {
        &self.concurrency
    }

    /// Run every job concurrently and wait for all of them.
    ///
    /// Always returns exactly one outcome per job, ordered by job index.
    pub async fn dispatch_all(
        &self,
        jobs: Vec<ModelJob>,
        cancel: &CancellationToken,
    ) -> Vec<ModelOutcome> {
        let started = Instant::now();
        let total = jobs.len();
        let mut join_set: JoinSet<ModelOutcome> = JoinSet::new();

        for job in jobs.iter().cloned() {
            let dispatcher = self.clone();
            let cancel = cancel.child_token();
            join_set.spawn(async move { dispatcher.run_job(job, cancel).await });
        }

        let mut outcomes = Vec::with_capacity(total);
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(outcome) => {
                    debug!(
                        model = %outcome.job.name,
                        ok = outcome.is_success(),
                        elapsed_ms = outcome.duration.as_millis() as u64,
                        "model job joined"
                    );
                    outcomes.push(outcome);
                }
                Err(e) => {
                    // The outcome is rebuilt below from the missing index.
                    warn!(error = %e, "model job task failed");
                }
            }
        }

        // Any job without an outcome lost its task; record it rather than
        // leaving a hole in the report.
        let seen: HashSet<usize> = outcomes.iter().map(|o| o.job.index).collect();
        for job in jobs.into_iter().filter(|j| !seen.contains(&j.index)) {
            let outcome = if cancel.is_cancelled() {
                ModelOutcome::cancelled(job, started.elapsed())
            } else {
                let error =
                    ClassifiedError::new(ErrorCategory::Unknown, "model task terminated unexpectedly");
                ModelOutcome::failure(job, error, started.elapsed())
            };
            outcomes.push(outcome);
        }

        outcomes.sort_by_key(|o| o.job.index);

        info!(
            total,
            succeeded = outcomes.iter().filter(|o| o.is_success()).count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "all model jobs joined"
        );
        outcomes
    }

    /// Run a single job through the same admission path.
    pub async fn dispatch_one(&self, job: ModelJob, cancel: &CancellationToken) -> ModelOutcome {
        self.run_job(job, cancel.child_token()).await
    }

    async fn run_job(&self, job: ModelJob, cancel: CancellationToken) -> ModelOutcome {
        let started = Instant::now();

        let ticket = match self.concurrency.acquire(&cancel).await {
            Ok(ticket) => ticket,
            Err(e) => return self.denied(job, e, LimiterKind::Concurrency, started),
        };
        self.audit(AuditEvent::AdmissionGranted {
            model: job.name.clone(),
            limiter: LimiterKind::Concurrency,
            waited_ms: started.elapsed().as_millis() as u64,
        });

        let waited = match self.rate_limiter.acquire(&cancel, &job.name).await {
            Ok(waited) => waited,
            Err(e) => {
                ticket.release();
                return self.denied(job, e, LimiterKind::RateLimit, started);
            }
        };
        self.audit(AuditEvent::AdmissionGranted {
            model: job.name.clone(),
            limiter: LimiterKind::RateLimit,
            waited_ms: waited.as_millis() as u64,
        });

        self.audit(AuditEvent::CallStarted {
            model: job.name.clone(),
            index: job.index,
            prompt_chars: job.prompt.chars().count(),
        });
        debug!(model = %job.name, index = job.index, "calling model");

        let ctx = CallContext::new(cancel.clone(), self.deadline);
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ModelError::cancelled()),
            result = self.caller.call(&ctx, &job.name, &job.prompt) => result,
        };
        ticket.release();

        let duration = started.elapsed();
        let outcome = match result {
            Ok(text) => ModelOutcome::success(job, text, duration),
            Err(err) => {
                let classified = ClassifiedError::from_model_error(&err);
                warn!(
                    model = %job.name,
                    category = %classified.category,
                    error = %err,
                    "model call failed"
                );
                ModelOutcome::failure(job, classified, duration)
            }
        };

        self.audit(AuditEvent::CallFinished {
            model: outcome.job.name.clone(),
            index: outcome.job.index,
            duration_ms: duration.as_millis() as u64,
            category: outcome.category(),
        });
        outcome
    }

    fn denied(
        &self,
        job: ModelJob,
        err: AdmissionError,
        limiter: LimiterKind,
        started: Instant,
    ) -> ModelOutcome {
        debug!(model = %job.name, %limiter, error = %err, "admission denied");
        self.audit(AuditEvent::AdmissionDenied {
            model: job.name.clone(),
            limiter,
            reason: err.to_string(),
        });
        let category = match err {
            AdmissionError::Cancelled(_) => ErrorCategory::Cancelled,
            AdmissionError::ZeroCapacity(_) | AdmissionError::Closed(_) => ErrorCategory::Unknown,
        };
        let outcome =
            ModelOutcome::failure(job, ClassifiedError::new(category, err.to_string()), started.elapsed());
        self.audit(AuditEvent::CallFinished {
            model: outcome.job.name.clone(),
            index: outcome.job.index,
            duration_ms: outcome.duration.as_millis() as u64,
            category: outcome.category(),
        });
        outcome
    }

    fn audit(&self, event: AuditEvent) {
        self.audit.record(AuditRecord::new(self.run_id, event));
    }
}

//! Run orchestrator.
//!
//! ```text
//! Setup ─► GatheringContext ─┬─► DryRun
//!                            └─► BuildingPrompt ─► ProcessingModels
//!   ProcessingModels ─┬─► SavingOutputs ─┬─► Synthesizing ─► DisplayingSummary ─► Completed
//!                     │                  └─────────────────► DisplayingSummary
//!                     └─► Failed (all failed)
//! ```
//!
//! Limiters are built per run in `Setup` and dropped with the run; nothing
//! is shared between runs. The run deadline is a single cancellation token
//! handed to every job.

pub mod config;
pub mod report;
pub mod state_machine;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::admission::{ConcurrencyLimiter, RateLimiter};
use crate::aggregate;
use crate::audit::{AuditEvent, AuditLogger, AuditRecord, NoopAuditLogger};
use crate::caller::ModelCaller;
use crate::context::ContextGatherer;
use crate::dispatch::Dispatcher;
use crate::errors::RunError;
use crate::job::{ModelJob, ModelOutcome};
use crate::output::OutputWriter;
use crate::prompt::build_prompt;
use crate::synthesis::{self, SynthesisPlan};

pub use config::RunConfig;
pub use report::{RunReport, SavedOutput, SilentReporter, SummaryReporter, SynthesisReport};
pub use state_machine::{IllegalTransition, RunState, StateMachine, TransitionRecord};

/// Drives one run through the state machine.
pub struct Orchestrator {
    config: RunConfig,
    run_id: Uuid,
    caller: Arc<dyn ModelCaller>,
    gatherer: Arc<dyn ContextGatherer>,
    writer: Arc<dyn OutputWriter>,
    audit: Arc<dyn AuditLogger>,
    reporter: Arc<dyn SummaryReporter>,
}

/// Cancels the run token when the deadline passes. Dropping it stops the
/// timer, so it never outlives the run.
struct DeadlineWatch(Option<JoinHandle<()>>);

impl DeadlineWatch {
    fn start(deadline: Option<Instant>, token: CancellationToken) -> Self {
        Self(deadline.map(|at| {
            tokio::spawn(async move {
                tokio::time::sleep_until(at).await;
                warn!("run deadline reached, cancelling outstanding work");
                token.cancel();
            })
        }))
    }
}

impl Drop for DeadlineWatch {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }
}

struct Limiters {
    concurrency: Arc<ConcurrencyLimiter>,
    rate: Arc<RateLimiter>,
}

impl Orchestrator {
    pub fn new(
        config: RunConfig,
        caller: Arc<dyn ModelCaller>,
        gatherer: Arc<dyn ContextGatherer>,
        writer: Arc<dyn OutputWriter>,
    ) -> Self {
        Self {
            config,
            run_id: Uuid::new_v4(),
            caller,
            gatherer,
            writer,
            audit: Arc::new(NoopAuditLogger),
            reporter: Arc::new(SilentReporter),
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditLogger>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn SummaryReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Execute the run to a terminal state.
    ///
    /// Run-level failures (bad config, gathering errors, every model
    /// failing) are reported through the returned `RunReport`; `Err` is
    /// reserved for broken state-machine edges.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunReport, RunError> {
        let started = Instant::now();
        let mut sm = StateMachine::new();
        let mut report = RunReport::new(self.run_id);

        info!(
            run_id = %self.run_id,
            models = self.config.models.len(),
            max_concurrent = self.config.max_concurrent,
            dry_run = self.config.dry_run,
            "run started"
        );
        self.audit(AuditEvent::RunStarted {
            models: self.config.models.clone(),
            max_concurrent: self.config.max_concurrent,
        });

        // ── Setup ──────────────────────────────────────────────────────────
        let deadline = self.config.timeout.map(|t| started + t);
        let limiters = match self.setup() {
            Ok(limiters) => limiters,
            Err(e) => return self.fail_setup(sm, report, e),
        };

        // ── GatheringContext ───────────────────────────────────────────────
        self.advance(&mut sm, RunState::GatheringContext, None)?;
        let context = match self.gatherer.gather(&self.config.context_paths).await {
            Ok(context) => context,
            Err(e) => return self.fail_setup(sm, report, e.into()),
        };
        report.context = context.stats;
        report.files = context.paths().map(|p| p.to_path_buf()).collect();
        info!(
            files = context.stats.files_processed,
            skipped = context.stats.files_skipped,
            estimated_tokens = context.stats.estimated_tokens,
            "context gathered"
        );

        if self.config.dry_run {
            self.advance(&mut sm, RunState::DryRun, Some("dry run requested"))?;
            return Ok(self.finish(sm, report));
        }

        // ── BuildingPrompt ─────────────────────────────────────────────────
        self.advance(&mut sm, RunState::BuildingPrompt, None)?;
        let prompt = build_prompt(&self.config.instructions, &context);
        debug!(prompt_chars = prompt.chars().count(), "prompt built");

        // ── ProcessingModels ───────────────────────────────────────────────
        self.advance(&mut sm, RunState::ProcessingModels, None)?;
        let run_cancel = cancel.child_token();
        let _watch = DeadlineWatch::start(deadline, run_cancel.clone());
        let dispatcher = Dispatcher::new(
            self.run_id,
            limiters.concurrency.clone(),
            limiters.rate.clone(),
            self.caller.clone(),
            self.audit.clone(),
        )
        .with_deadline(deadline);

        let jobs = ModelJob::fan_out(&self.config.models, &prompt);
        let outcomes = dispatcher.dispatch_all(jobs, &run_cancel).await;
        let status = aggregate::aggregate(&outcomes, self.config.allow_partial);
        report.outcomes = outcomes;
        report.status = Some(status);
        info!(
            %status,
            failures = ?aggregate::tally(&report.outcomes),
            "models processed"
        );

        if !status.is_acceptable() {
            let reason = if report.succeeded().next().is_some() {
                "mixed outcomes and partial success not accepted"
            } else {
                "all models failed"
            };
            return self.fail(sm, report, reason);
        }

        // ── SavingOutputs ──────────────────────────────────────────────────
        self.advance(&mut sm, RunState::SavingOutputs, Some(status.to_string().as_str()))?;
        for outcome in &report.outcomes {
            if let Some(saved) = self.save_outcome(outcome).await {
                report.saved.push(saved);
            }
        }

        // ── Synthesizing ───────────────────────────────────────────────────
        let plan = synthesis::plan(
            &self.config.synthesis,
            &self.config.instructions,
            &report.outcomes,
            self.config.models.len(),
        );
        match plan {
            SynthesisPlan::Skip(reason) => {
                debug!(?reason, "synthesis skipped");
                report.synthesis = Some(SynthesisReport::Skipped { reason });
            }
            SynthesisPlan::Dispatch(job) => {
                self.advance(&mut sm, RunState::Synthesizing, Some(job.name.as_str()))?;
                info!(model = %job.name, "synthesizing outputs");
                let outcome = dispatcher.dispatch_one(job, &run_cancel).await;
                if outcome.is_success() {
                    let stem = format!("{}-synthesis", outcome.job.name);
                    if let Some(saved) = self.save(&stem, &stem, &outcome.output).await {
                        report.saved.push(saved);
                    }
                } else if let Some(err) = &outcome.error {
                    warn!(model = %outcome.job.name, error = %err, "synthesis failed");
                }
                report.synthesis = Some(SynthesisReport::Ran { outcome });
            }
        }

        debug!(stats = ?limiters.concurrency.stats(), "concurrency limiter at run end");

        // ── DisplayingSummary ──────────────────────────────────────────────
        self.advance(&mut sm, RunState::DisplayingSummary, None)?;
        self.advance(&mut sm, RunState::Completed, None)?;
        info!(
            run_id = %self.run_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "{}",
            sm.summary()
        );
        Ok(self.finish(sm, report))
    }

    fn setup(&self) -> Result<Limiters, RunError> {
        self.config.validate()?;
        let concurrency = ConcurrencyLimiter::new(self.config.max_concurrent)?;
        let mut rate = RateLimiter::new(self.config.default_rpm);
        for (model, rpm) in &self.config.rate_limits {
            rate = rate.with_limit(model.clone(), *rpm);
        }
        Ok(Limiters {
            concurrency: Arc::new(concurrency),
            rate: Arc::new(rate),
        })
    }

    async fn save_outcome(&self, outcome: &ModelOutcome) -> Option<SavedOutput> {
        let model = outcome.model();
        match &outcome.error {
            None => self.save(model, model, &outcome.output).await,
            Some(_) if !self.config.write_failures => None,
            Some(err) => {
                let content = format!(
                    "# {model} failed\n\n- category: {}\n- suggestion: {}\n\n```text\n{}\n```\n",
                    err.category,
                    err.suggestion(),
                    err.message
                );
                self.save(model, &format!("{model}.error"), &content).await
            }
        }
    }

    async fn save(&self, model: &str, stem: &str, content: &str) -> Option<SavedOutput> {
        match self.writer.write(stem, content).await {
            Ok(path) => {
                debug!(model, path = %path.display(), "output saved");
                self.audit(AuditEvent::OutputSaved {
                    model: model.to_string(),
                    path: path.display().to_string(),
                });
                Some(SavedOutput {
                    model: model.to_string(),
                    path: Some(path),
                    error: None,
                })
            }
            Err(e) => {
                warn!(model, error = %e, "failed to save output");
                Some(SavedOutput {
                    model: model.to_string(),
                    path: None,
                    error: Some(e.to_string()),
                })
            }
        }
    }

    fn advance(
        &self,
        sm: &mut StateMachine,
        to: RunState,
        reason: Option<&str>,
    ) -> Result<(), RunError> {
        let from = sm.current();
        sm.advance(to, reason)?;
        self.audit(AuditEvent::StateTransition {
            from,
            to,
            reason: reason.map(String::from),
        });
        Ok(())
    }

    fn fail_setup(
        &self,
        sm: StateMachine,
        mut report: RunReport,
        err: RunError,
    ) -> Result<RunReport, RunError> {
        let reason = err.to_string();
        report.setup_error = Some(reason.clone());
        self.fail(sm, report, &reason)
    }

    fn fail(
        &self,
        mut sm: StateMachine,
        report: RunReport,
        reason: &str,
    ) -> Result<RunReport, RunError> {
        warn!(state = %sm.current(), reason, "run failed");
        self.advance(&mut sm, RunState::Failed, Some(reason))?;
        Ok(self.finish(sm, report))
    }

    fn finish(&self, sm: StateMachine, mut report: RunReport) -> RunReport {
        report.final_state = sm.current();
        report.transitions = sm.transitions().to_vec();
        self.reporter.report(&report);
        self.audit(AuditEvent::RunFinished {
            status: report.status,
            exit_code: report.exit_code(),
        });
        report
    }

    fn audit(&self, event: AuditEvent) {
        self.audit.record(AuditRecord::new(self.run_id, event));
    }
}

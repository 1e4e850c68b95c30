//! End-to-end runs through the orchestrator with scripted backends.
//!
//! Timing-sensitive cases use tokio's paused clock, so "seconds" here are
//! virtual and the tests finish instantly.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use coordination::orchestrator::SynthesisReport;
use coordination::{
    AuditEvent, CallContext, ContextGatherer, ErrorCategory, GatherError, GatheredContext,
    MemoryAuditLogger, ModelCaller, ModelError, Orchestrator, OutputWriter, RunConfig, RunState,
    RunStatus, WriteError,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Backend that sleeps per model, optionally fails, and tracks overlap.
#[derive(Default)]
struct ScriptedCaller {
    latency: Duration,
    failures: HashMap<String, ModelError>,
    fail_synthesis: bool,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: Mutex<Vec<String>>,
}

impl ScriptedCaller {
    fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    fn failing(mut self, model: &str, err: ModelError) -> Self {
        self.failures.insert(model.to_string(), err);
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelCaller for ScriptedCaller {
    async fn call(&self, _ctx: &CallContext, model: &str, prompt: &str) -> Result<String, ModelError> {
        self.calls.lock().unwrap().push(model.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.latency).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let synthesis = prompt.contains("<model_output");
        if synthesis && self.fail_synthesis {
            return Err(ModelError::http(500, "synthesis backend down"));
        }
        match self.failures.get(model) {
            Some(err) => Err(err.clone()),
            None if synthesis => Ok("combined".to_string()),
            None => Ok(format!("answer from {model}")),
        }
    }
}

struct EmptyGatherer;

#[async_trait]
impl ContextGatherer for EmptyGatherer {
    async fn gather(&self, _paths: &[PathBuf]) -> Result<GatheredContext, GatherError> {
        Ok(GatheredContext::default())
    }
}

#[derive(Default)]
struct MemoryWriter {
    written: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl OutputWriter for MemoryWriter {
    async fn write(&self, name: &str, content: &str) -> Result<PathBuf, WriteError> {
        self.written
            .lock()
            .unwrap()
            .push((name.to_string(), content.to_string()));
        Ok(PathBuf::from(format!("{name}.md")))
    }
}

fn models(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("model-{i}")).collect()
}

fn orchestrator(config: RunConfig, caller: Arc<ScriptedCaller>) -> Orchestrator {
    Orchestrator::new(
        config,
        caller,
        Arc::new(EmptyGatherer),
        Arc::new(MemoryWriter::default()),
    )
}

/// 3 models, capacity 2, all succeed.
#[tokio::test(start_paused = true)]
async fn test_all_models_succeed() {
    let caller = Arc::new(ScriptedCaller::with_latency(Duration::from_millis(300)));
    let mut config = RunConfig::new(models(3), "Summarize");
    config.max_concurrent = 2;

    let report = orchestrator(config, caller.clone())
        .run(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, Some(RunStatus::Success));
    assert_eq!(report.final_state, RunState::Completed);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.outcomes.len(), 3);
    assert!(report.outcomes.iter().all(|o| o.error.is_none()));
    assert!(caller.peak.load(Ordering::SeqCst) <= 2);
}

/// One model rate limited: accepted with the toggle, rejected without.
#[tokio::test]
async fn test_rate_limited_model_and_partial_toggle() {
    for (allow_partial, expected, exit_zero) in [
        (true, RunStatus::PartialSuccess, true),
        (false, RunStatus::AllFailed, false),
    ] {
        let caller = Arc::new(
            ScriptedCaller::default()
                .failing("model-1", ModelError::http(429, "Too Many Requests")),
        );
        let mut config = RunConfig::new(models(3), "Summarize");
        config.allow_partial = allow_partial;

        let report = orchestrator(config, caller)
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.status, Some(expected));
        assert_eq!(
            report.outcomes[1].category(),
            Some(ErrorCategory::RateLimit)
        );
        assert_eq!(report.exit_code() == 0, exit_zero);
    }
}

/// Capacity 1 with 5 models: strictly serial, no deadlock.
#[tokio::test(start_paused = true)]
async fn test_capacity_one_serializes_calls() {
    let caller = Arc::new(ScriptedCaller::with_latency(Duration::from_secs(1)));
    let mut config = RunConfig::new(models(5), "Summarize");
    config.max_concurrent = 1;

    let started = Instant::now();
    let report = orchestrator(config, caller.clone())
        .run(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, Some(RunStatus::Success));
    assert_eq!(caller.peak.load(Ordering::SeqCst), 1);
    assert_eq!(caller.calls().len(), 5);
    assert!(started.elapsed() >= Duration::from_secs(5));
}

/// Heavy over-subscription still drains within the deadline.
#[tokio::test(start_paused = true)]
async fn test_twenty_jobs_against_capacity_one() {
    let caller = Arc::new(ScriptedCaller::with_latency(Duration::from_millis(100)));
    let mut config = RunConfig::new(models(20), "Summarize");
    config.max_concurrent = 1;
    config.timeout = Some(Duration::from_secs(60));

    let report = orchestrator(config, caller.clone())
        .run(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, Some(RunStatus::Success));
    assert_eq!(report.outcomes.len(), 20);
    assert_eq!(caller.peak.load(Ordering::SeqCst), 1);
    let indices: Vec<usize> = report.outcomes.iter().map(|o| o.job.index).collect();
    assert_eq!(indices, (0..20).collect::<Vec<_>>());
}

/// Deadline fires with two jobs still in flight.
#[tokio::test(start_paused = true)]
async fn test_deadline_cancels_pending_jobs() {
    let caller = Arc::new(ScriptedCaller::with_latency(Duration::from_secs(1)));
    let mut config = RunConfig::new(models(5), "Summarize");
    config.max_concurrent = 3;
    config.allow_partial = true;
    config.timeout = Some(Duration::from_millis(1500));

    let started = Instant::now();
    let report = orchestrator(config, caller)
        .run(&CancellationToken::new())
        .await
        .unwrap();

    let cancelled: Vec<usize> = report
        .outcomes
        .iter()
        .filter(|o| o.category() == Some(ErrorCategory::Cancelled))
        .map(|o| o.job.index)
        .collect();
    assert_eq!(cancelled.len(), 2);
    assert_eq!(report.succeeded().count(), 3);
    assert_eq!(report.status, Some(RunStatus::PartialSuccess));
    assert_eq!(report.final_state, RunState::Completed);
    assert!(started.elapsed() < Duration::from_secs(2));
}

/// External cancellation before any slot frees up.
#[tokio::test(start_paused = true)]
async fn test_external_cancel_records_every_job() {
    let caller = Arc::new(ScriptedCaller::with_latency(Duration::from_secs(30)));
    let mut config = RunConfig::new(models(4), "Summarize");
    config.max_concurrent = 2;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let report = orchestrator(config, caller).run(&cancel).await.unwrap();

    assert_eq!(report.outcomes.len(), 4);
    assert!(report
        .outcomes
        .iter()
        .all(|o| o.category() == Some(ErrorCategory::Cancelled)));
    assert_eq!(report.status, Some(RunStatus::AllFailed));
    assert_eq!(report.exit_code(), ErrorCategory::Cancelled.exit_code());
}

/// Two successes plus a failing synthesis: one extra call, status unchanged.
#[tokio::test]
async fn test_synthesis_failure_does_not_change_status() {
    let caller = Arc::new(ScriptedCaller {
        fail_synthesis: true,
        ..ScriptedCaller::default()
    });
    let mut config = RunConfig::new(models(2), "Summarize");
    config.synthesis.requested = true;
    config.synthesis.model = "judge".into();

    let report = orchestrator(config, caller.clone())
        .run(&CancellationToken::new())
        .await
        .unwrap();

    let calls = caller.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls.last().map(String::as_str), Some("judge"));
    assert_eq!(report.status, Some(RunStatus::Success));
    assert_eq!(report.exit_code(), 0);
    match &report.synthesis {
        Some(SynthesisReport::Ran { outcome }) => {
            assert_eq!(outcome.category(), Some(ErrorCategory::Server));
        }
        other => panic!("expected synthesis to run, got {other:?}"),
    }
}

/// Synthesis is admitted through the same rate limiter as primary calls.
#[tokio::test(start_paused = true)]
async fn test_synthesis_waits_for_rate_limit_token() {
    let caller = Arc::new(ScriptedCaller::default());
    let mut config = RunConfig::new(models(2), "Summarize");
    config.timeout = None;
    config.rate_limits.insert("model-0".into(), 1);
    config.synthesis.requested = true;
    config.synthesis.model = "model-0".into();

    let started = Instant::now();
    let report = orchestrator(config, caller)
        .run(&CancellationToken::new())
        .await
        .unwrap();

    let synthesis = report.synthesis_outcome().unwrap();
    assert!(synthesis.is_success());
    assert_eq!(synthesis.output, "combined");
    // 1 rpm: the second token for model-0 arrives a minute after the first.
    assert!(started.elapsed() >= Duration::from_secs(60));
}

#[tokio::test]
async fn test_audit_trail_covers_run() {
    let caller = Arc::new(ScriptedCaller::default());
    let audit = Arc::new(MemoryAuditLogger::new());
    let report = orchestrator(RunConfig::new(models(2), "Summarize"), caller)
        .with_audit(audit.clone())
        .run(&CancellationToken::new())
        .await
        .unwrap();

    let records = audit.records();
    assert!(records.iter().all(|r| r.run_id == report.run_id));

    let events: Vec<AuditEvent> = records.into_iter().map(|r| r.event).collect();
    let count = |pred: fn(&AuditEvent) -> bool| events.iter().filter(|e| pred(e)).count();
    assert_eq!(count(|e| matches!(e, AuditEvent::CallStarted { .. })), 2);
    assert_eq!(count(|e| matches!(e, AuditEvent::CallFinished { .. })), 2);
    assert_eq!(count(|e| matches!(e, AuditEvent::AdmissionGranted { .. })), 4);
    assert_eq!(count(|e| matches!(e, AuditEvent::OutputSaved { .. })), 2);
    assert_eq!(
        count(|e| matches!(e, AuditEvent::StateTransition { .. })),
        report.transitions.len()
    );
}

//! The run report and the summary-reporting seam.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state_machine::{RunState, TransitionRecord};
use crate::aggregate::{self, RunStatus};
use crate::context::ContextStats;
use crate::job::ModelOutcome;
use crate::synthesis::SkipReason;

/// Where an outcome ended up on disk, or why it did not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedOutput {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What happened with synthesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SynthesisReport {
    Skipped { reason: SkipReason },
    Ran { outcome: ModelOutcome },
}

/// Everything known about a run once it reached a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub final_state: RunState,
    /// `None` when the run ended before aggregation (setup failure, dry run).
    pub status: Option<RunStatus>,
    pub context: ContextStats,
    /// Context file paths, in gather order.
    pub files: Vec<PathBuf>,
    /// One per requested model, in job-index order.
    pub outcomes: Vec<ModelOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesis: Option<SynthesisReport>,
    pub saved: Vec<SavedOutput>,
    /// Set when the run failed before dispatch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_error: Option<String>,
    pub transitions: Vec<TransitionRecord>,
}

impl RunReport {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            final_state: RunState::Setup,
            status: None,
            context: ContextStats::default(),
            files: Vec::new(),
            outcomes: Vec::new(),
            synthesis: None,
            saved: Vec::new(),
            setup_error: None,
            transitions: Vec::new(),
        }
    }

    /// Whether the primary calls were accepted.
    pub fn accepted(&self) -> bool {
        self.status.is_some_and(RunStatus::is_acceptable)
    }

    pub fn is_dry_run(&self) -> bool {
        self.final_state == RunState::DryRun
    }

    /// Process exit code derived from the final state and status.
    pub fn exit_code(&self) -> i32 {
        match (self.final_state, self.status) {
            (RunState::DryRun | RunState::Completed, _) => 0,
            (_, Some(status)) => aggregate::exit_code(status, &self.outcomes),
            (_, None) => 1,
        }
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &ModelOutcome> {
        self.outcomes.iter().filter(|o| o.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &ModelOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    pub fn synthesis_outcome(&self) -> Option<&ModelOutcome> {
        match &self.synthesis {
            Some(SynthesisReport::Ran { outcome }) => Some(outcome),
            _ => None,
        }
    }

    pub fn saved_path(&self, model: &str) -> Option<&PathBuf> {
        self.saved
            .iter()
            .find(|s| s.model == model)
            .and_then(|s| s.path.as_ref())
    }
}

/// Receives the finished report for display. Invoked exactly once per run.
#[cfg_attr(test, mockall::automock)]
pub trait SummaryReporter: Send + Sync {
    fn report(&self, report: &RunReport);
}

/// Reporter that displays nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl SummaryReporter for SilentReporter {
    fn report(&self, _report: &RunReport) {}
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::classify::{ClassifiedError, ErrorCategory};
    use crate::job::ModelJob;

    fn failed(index: usize, category: ErrorCategory) -> ModelOutcome {
        ModelOutcome::failure(
            ModelJob::new(format!("m{index}"), index, "p"),
            ClassifiedError::new(category, "x"),
            Duration::ZERO,
        )
    }

    #[test]
    fn exit_codes_by_final_state() {
        let mut report = RunReport::new(Uuid::nil());
        report.final_state = RunState::DryRun;
        assert_eq!(report.exit_code(), 0);

        report.final_state = RunState::Failed;
        assert_eq!(report.exit_code(), 1, "setup failure");

        report.status = Some(RunStatus::AllFailed);
        report.outcomes = vec![
            failed(0, ErrorCategory::RateLimit),
            failed(1, ErrorCategory::RateLimit),
        ];
        assert_eq!(report.exit_code(), 3);

        report.final_state = RunState::Completed;
        report.status = Some(RunStatus::PartialSuccess);
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn saved_path_lookup() {
        let mut report = RunReport::new(Uuid::nil());
        report.saved.push(SavedOutput {
            model: "a".into(),
            path: Some("out/a.md".into()),
            error: None,
        });
        assert_eq!(report.saved_path("a"), Some(&PathBuf::from("out/a.md")));
        assert_eq!(report.saved_path("b"), None);
    }
}

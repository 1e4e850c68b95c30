//! Synthesis trigger: combine successful outputs with one extra call.
//!
//! ```text
//! outcomes ──► plan() ──► Skip(reason)
//!                   └──► Dispatch(ModelJob) ──► Dispatcher::dispatch_one
//! ```
//!
//! The synthesis job goes through the same admission path as the primary
//! jobs. Its outcome is reported on its own and never feeds back into the
//! run status.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::job::{ModelJob, ModelOutcome};

/// When synthesis should happen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesisPolicy {
    /// Synthesis explicitly requested.
    pub requested: bool,
    /// Model that performs the synthesis.
    pub model: String,
    /// Auto-trigger once total successful output reaches this many bytes.
    /// `None` disables the automatic trigger.
    pub auto_threshold_bytes: Option<usize>,
}

impl SynthesisPolicy {
    pub fn disabled(model: impl Into<String>) -> Self {
        Self {
            requested: false,
            model: model.into(),
            auto_threshold_bytes: None,
        }
    }
}

/// Why synthesis did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Not requested and under the size threshold.
    NotRequested,
    /// Fewer than two successful outputs.
    InsufficientOutputs,
}

/// Decision made after aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisPlan {
    Skip(SkipReason),
    Dispatch(ModelJob),
}

/// Decide whether to synthesize and build the job when so.
///
/// `index` is the job index given to the synthesis job; callers pass the
/// primary job count so it sorts after every primary outcome.
pub fn plan(
    policy: &SynthesisPolicy,
    instructions: &str,
    outcomes: &[ModelOutcome],
    index: usize,
) -> SynthesisPlan {
    let successes: Vec<&ModelOutcome> = outcomes.iter().filter(|o| o.is_success()).collect();

    let total_bytes: usize = successes.iter().map(|o| o.output.len()).sum();
    let auto = policy
        .auto_threshold_bytes
        .is_some_and(|threshold| total_bytes >= threshold);

    if !policy.requested && !auto {
        return SynthesisPlan::Skip(SkipReason::NotRequested);
    }
    if successes.len() < 2 {
        return SynthesisPlan::Skip(SkipReason::InsufficientOutputs);
    }

    let prompt = build_synthesis_prompt(instructions, &successes);
    SynthesisPlan::Dispatch(ModelJob::new(policy.model.clone(), index, prompt))
}

/// Render the combine prompt. Outputs appear in job-index order.
pub fn build_synthesis_prompt(instructions: &str, successes: &[&ModelOutcome]) -> String {
    let mut ordered = successes.to_vec();
    ordered.sort_by_key(|o| o.job.index);

    let mut prompt = String::new();
    let _ = writeln!(
        prompt,
        "You are given {} independent answers to the same task. \
         Combine them into one consolidated answer: keep points they agree on, \
         resolve disagreements explicitly, and drop anything unsupported.\n",
        ordered.len()
    );
    let _ = writeln!(prompt, "<instructions>\n{}\n</instructions>\n", instructions.trim());
    for outcome in ordered {
        let _ = writeln!(
            prompt,
            "<model_output model=\"{}\">\n{}\n</model_output>\n",
            outcome.job.name,
            outcome.output.trim_end()
        );
    }
    prompt.push_str("Respond with the consolidated answer only.\n");
    prompt
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::classify::{ClassifiedError, ErrorCategory};

    fn ok(name: &str, index: usize, output: &str) -> ModelOutcome {
        ModelOutcome::success(ModelJob::new(name, index, "p"), output.into(), Duration::ZERO)
    }

    fn failed(name: &str, index: usize) -> ModelOutcome {
        ModelOutcome::failure(
            ModelJob::new(name, index, "p"),
            ClassifiedError::new(ErrorCategory::Server, "down"),
            Duration::ZERO,
        )
    }

    fn requested() -> SynthesisPolicy {
        SynthesisPolicy {
            requested: true,
            model: "judge".into(),
            auto_threshold_bytes: None,
        }
    }

    #[test]
    fn dispatches_one_job_when_two_succeed() {
        let outcomes = vec![ok("a", 0, "alpha"), ok("b", 1, "beta")];
        match plan(&requested(), "task", &outcomes, 2) {
            SynthesisPlan::Dispatch(job) => {
                assert_eq!(job.name, "judge");
                assert_eq!(job.index, 2);
                assert!(job.prompt.contains("<model_output model=\"a\">\nalpha"));
                assert!(job.prompt.contains("<model_output model=\"b\">\nbeta"));
            }
            other => panic!("expected dispatch, got {other:?}"),
        }
    }

    #[test]
    fn skips_with_fewer_than_two_successes() {
        let outcomes = vec![ok("a", 0, "alpha"), failed("b", 1)];
        assert_eq!(
            plan(&requested(), "task", &outcomes, 2),
            SynthesisPlan::Skip(SkipReason::InsufficientOutputs)
        );
        assert_eq!(
            plan(&requested(), "task", &[], 0),
            SynthesisPlan::Skip(SkipReason::InsufficientOutputs)
        );
    }

    #[test]
    fn skips_when_not_requested_and_under_threshold() {
        let outcomes = vec![ok("a", 0, "alpha"), ok("b", 1, "beta")];
        let policy = SynthesisPolicy {
            auto_threshold_bytes: Some(1_000),
            ..SynthesisPolicy::disabled("judge")
        };
        assert_eq!(
            plan(&policy, "task", &outcomes, 2),
            SynthesisPlan::Skip(SkipReason::NotRequested)
        );
    }

    #[test]
    fn auto_triggers_at_threshold() {
        let outcomes = vec![ok("a", 0, "12345"), ok("b", 1, "67890")];
        let policy = SynthesisPolicy {
            auto_threshold_bytes: Some(10),
            ..SynthesisPolicy::disabled("judge")
        };
        assert!(matches!(
            plan(&policy, "task", &outcomes, 2),
            SynthesisPlan::Dispatch(_)
        ));
    }

    #[test]
    fn failed_outputs_are_not_embedded() {
        let outcomes = vec![ok("a", 0, "alpha"), failed("x", 1), ok("b", 2, "beta")];
        let SynthesisPlan::Dispatch(job) = plan(&requested(), "task", &outcomes, 3) else {
            panic!("expected dispatch");
        };
        assert!(!job.prompt.contains("model=\"x\""));
    }

    #[test]
    fn prompt_orders_by_index() {
        let b = ok("b", 1, "beta");
        let a = ok("a", 0, "alpha");
        let prompt = build_synthesis_prompt("task", &[&b, &a]);
        assert!(prompt.find("model=\"a\"").unwrap() < prompt.find("model=\"b\"").unwrap());
        assert!(prompt.contains("<instructions>\ntask\n</instructions>"));
    }
}

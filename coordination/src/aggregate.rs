//! Result aggregation and the partial-success policy.
//!
//! | outcomes   | `allow_partial` | status           |
//! |------------|-----------------|------------------|
//! | all ok     | either          | `Success`        |
//! | all failed | either          | `AllFailed`      |
//! | mixed      | true            | `PartialSuccess` |
//! | mixed      | false           | `AllFailed`      |
//!
//! Aggregation never mutates outcomes. An empty outcome set counts as
//! `AllFailed`: nothing was produced.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::classify::ErrorCategory;
use crate::job::ModelOutcome;

/// Overall result of a run's primary model calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    PartialSuccess,
    AllFailed,
}

impl RunStatus {
    /// Whether the run continues to output persistence.
    pub fn is_acceptable(self) -> bool {
        !matches!(self, Self::AllFailed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::PartialSuccess => write!(f, "partial success"),
            Self::AllFailed => write!(f, "all failed"),
        }
    }
}

/// Apply the partial-success policy to a complete outcome list.
pub fn aggregate(outcomes: &[ModelOutcome], allow_partial: bool) -> RunStatus {
    let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
    match succeeded {
        0 => RunStatus::AllFailed,
        n if n == outcomes.len() => RunStatus::Success,
        _ if allow_partial => RunStatus::PartialSuccess,
        _ => RunStatus::AllFailed,
    }
}

/// Count of failed outcomes per category, in a stable order.
pub fn tally(outcomes: &[ModelOutcome]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for category in outcomes.iter().filter_map(ModelOutcome::category) {
        *counts.entry(category.to_string()).or_insert(0) += 1;
    }
    counts
}

/// The single category shared by every failed outcome, if there is one.
pub fn dominant_category(outcomes: &[ModelOutcome]) -> Option<ErrorCategory> {
    let mut categories = outcomes.iter().filter_map(ModelOutcome::category);
    let first = categories.next()?;
    categories.all(|c| c == first).then_some(first)
}

/// Process exit code for a run with the given status.
///
/// Acceptable runs exit 0. Failed runs exit with the shared category's code
/// when every failure agrees, otherwise 1.
pub fn exit_code(status: RunStatus, outcomes: &[ModelOutcome]) -> i32 {
    if status.is_acceptable() {
        return 0;
    }
    dominant_category(outcomes).map_or(1, ErrorCategory::exit_code)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::classify::ClassifiedError;
    use crate::job::ModelJob;

    fn ok(index: usize) -> ModelOutcome {
        ModelOutcome::success(
            ModelJob::new(format!("m{index}"), index, "p"),
            "out".into(),
            Duration::ZERO,
        )
    }

    fn err(index: usize, category: ErrorCategory) -> ModelOutcome {
        ModelOutcome::failure(
            ModelJob::new(format!("m{index}"), index, "p"),
            ClassifiedError::new(category, "boom"),
            Duration::ZERO,
        )
    }

    #[test]
    fn all_success_is_success_regardless_of_toggle() {
        let outcomes = vec![ok(0), ok(1), ok(2)];
        assert_eq!(aggregate(&outcomes, true), RunStatus::Success);
        assert_eq!(aggregate(&outcomes, false), RunStatus::Success);
    }

    #[test]
    fn all_error_is_all_failed_regardless_of_toggle() {
        let outcomes = vec![err(0, ErrorCategory::Auth), err(1, ErrorCategory::Server)];
        assert_eq!(aggregate(&outcomes, true), RunStatus::AllFailed);
        assert_eq!(aggregate(&outcomes, false), RunStatus::AllFailed);
    }

    #[test]
    fn mixed_depends_on_toggle() {
        let outcomes = vec![ok(0), err(1, ErrorCategory::RateLimit), ok(2)];
        assert_eq!(aggregate(&outcomes, true), RunStatus::PartialSuccess);
        assert_eq!(aggregate(&outcomes, false), RunStatus::AllFailed);
    }

    #[test]
    fn empty_is_all_failed() {
        assert_eq!(aggregate(&[], true), RunStatus::AllFailed);
    }

    #[test]
    fn aggregate_does_not_reorder_or_mutate() {
        let outcomes = vec![err(1, ErrorCategory::Network), ok(0)];
        let before = outcomes.clone();
        let _ = aggregate(&outcomes, true);
        assert_eq!(outcomes, before);
    }

    #[test]
    fn exit_codes() {
        let partial = vec![ok(0), err(1, ErrorCategory::RateLimit)];
        assert_eq!(exit_code(aggregate(&partial, true), &partial), 0);
        assert_eq!(exit_code(aggregate(&partial, false), &partial), 3);

        let auth = vec![err(0, ErrorCategory::Auth), err(1, ErrorCategory::Auth)];
        assert_eq!(exit_code(RunStatus::AllFailed, &auth), 2);

        let mixed = vec![err(0, ErrorCategory::Auth), err(1, ErrorCategory::Server)];
        assert_eq!(exit_code(RunStatus::AllFailed, &mixed), 1);

        assert_eq!(exit_code(RunStatus::AllFailed, &[]), 1);
    }

    #[test]
    fn tally_counts_categories() {
        let outcomes = vec![
            ok(0),
            err(1, ErrorCategory::RateLimit),
            err(2, ErrorCategory::RateLimit),
            err(3, ErrorCategory::Auth),
        ];
        let counts = tally(&outcomes);
        assert_eq!(counts.get("rate_limit"), Some(&2));
        assert_eq!(counts.get("auth"), Some(&1));
        assert_eq!(counts.len(), 2);
    }
}

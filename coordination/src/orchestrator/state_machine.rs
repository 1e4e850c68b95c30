//! Run state machine: explicit states and legal transition guards.
//!
//! Every run starts at `Setup` and ends at `DryRun`, `Completed` or
//! `Failed`. The orchestrator calls `advance()` to move between states; each
//! call validates the edge and appends it to the transition log, which is
//! also mirrored into the audit trail.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

/// The set of run states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Validating configuration and constructing limiters.
    Setup,
    /// Asking the context gatherer for the file set.
    GatheringContext,
    /// Statistics only, no dispatch. Terminal success.
    DryRun,
    /// Rendering the shared prompt.
    BuildingPrompt,
    /// Fan-out through admission control; every job yields an outcome here.
    ProcessingModels,
    /// Handing outcomes to the output writer.
    SavingOutputs,
    /// One extra call combining successful outputs.
    Synthesizing,
    /// Handing the report to the summary reporter.
    DisplayingSummary,
    /// Terminal success.
    Completed,
    /// Terminal failure.
    Failed,
}

impl RunState {
    /// Whether this is a terminal state (no further transitions allowed).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::DryRun | Self::Completed | Self::Failed)
    }

    /// Terminal states that count as a successful run.
    pub fn is_success(self) -> bool {
        matches!(self, Self::DryRun | Self::Completed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Setup => write!(f, "Setup"),
            Self::GatheringContext => write!(f, "GatheringContext"),
            Self::DryRun => write!(f, "DryRun"),
            Self::BuildingPrompt => write!(f, "BuildingPrompt"),
            Self::ProcessingModels => write!(f, "ProcessingModels"),
            Self::SavingOutputs => write!(f, "SavingOutputs"),
            Self::Synthesizing => write!(f, "Synthesizing"),
            Self::DisplayingSummary => write!(f, "DisplayingSummary"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Legal transitions between run states.
///
/// ```text
/// Setup → GatheringContext | Failed
/// GatheringContext → DryRun | BuildingPrompt | Failed
/// BuildingPrompt → ProcessingModels | Failed
/// ProcessingModels → SavingOutputs | Failed
/// SavingOutputs → Synthesizing | DisplayingSummary | Failed
/// Synthesizing → DisplayingSummary | Failed
/// DisplayingSummary → Completed | Failed
/// ```
///
/// The graph is acyclic: no state is ever re-entered.
fn is_legal_transition(from: RunState, to: RunState) -> bool {
    use RunState::*;

    if to == Failed && !from.is_terminal() {
        return true;
    }

    matches!(
        (from, to),
        (Setup, GatheringContext)
            | (GatheringContext, DryRun)
            | (GatheringContext, BuildingPrompt)
            | (BuildingPrompt, ProcessingModels)
            | (ProcessingModels, SavingOutputs)
            | (SavingOutputs, Synthesizing)
            | (SavingOutputs, DisplayingSummary)
            | (Synthesizing, DisplayingSummary)
            | (DisplayingSummary, Completed)
    )
}

/// A single recorded state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: RunState,
    pub to: RunState,
    /// Milliseconds since the state machine was created.
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Returned when an edge outside the state graph is attempted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Illegal state transition: {from} → {to}")]
pub struct IllegalTransition {
    pub from: RunState,
    pub to: RunState,
}

/// Tracks the current state and the full transition log for one run.
#[derive(Debug)]
pub struct StateMachine {
    current: RunState,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// Create a new state machine starting at `Setup`.
    pub fn new() -> Self {
        Self {
            current: RunState::Setup,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> RunState {
        self.current
    }

    /// Attempt to advance to the next state.
    pub fn advance(&mut self, to: RunState, reason: Option<&str>) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        let record = TransitionRecord {
            from: self.current,
            to,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        };

        tracing::debug!(from = %self.current, to = %to, "State transition");

        self.transitions.push(record);
        self.current = to;
        Ok(())
    }

    /// Transition to `Failed`; always legal from non-terminal states.
    pub fn fail(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(RunState::Failed, Some(reason))
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    /// The most recent transition, if any.
    pub fn last_transition(&self) -> Option<&TransitionRecord> {
        self.transitions.last()
    }

    /// One-line history, e.g. `Setup → Completed (12ms, 7 transitions) [...]`.
    pub fn summary(&self) -> String {
        let states: Vec<String> = self.transitions.iter().map(|t| t.to.to_string()).collect();
        let mut out = format!(
            "{} → {} ({}ms, {} transitions)",
            RunState::Setup,
            self.current,
            self.created_at.elapsed().as_millis(),
            self.transitions.len(),
        );
        if !states.is_empty() {
            out.push_str(&format!(" [{}]", states.join(" → ")));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drive(sm: &mut StateMachine, path: &[RunState]) {
        for &state in path {
            sm.advance(state, None).unwrap();
        }
    }

    #[test]
    fn test_happy_path_with_synthesis() {
        let mut sm = StateMachine::new();
        drive(
            &mut sm,
            &[
                RunState::GatheringContext,
                RunState::BuildingPrompt,
                RunState::ProcessingModels,
                RunState::SavingOutputs,
                RunState::Synthesizing,
                RunState::DisplayingSummary,
                RunState::Completed,
            ],
        );
        assert!(sm.is_terminal());
        assert!(sm.current().is_success());
        assert_eq!(sm.transitions().len(), 7);
    }

    #[test]
    fn test_happy_path_without_synthesis() {
        let mut sm = StateMachine::new();
        drive(
            &mut sm,
            &[
                RunState::GatheringContext,
                RunState::BuildingPrompt,
                RunState::ProcessingModels,
                RunState::SavingOutputs,
                RunState::DisplayingSummary,
                RunState::Completed,
            ],
        );
        assert_eq!(sm.current(), RunState::Completed);
    }

    #[test]
    fn test_dry_run_short_circuits() {
        let mut sm = StateMachine::new();
        drive(&mut sm, &[RunState::GatheringContext, RunState::DryRun]);
        assert!(sm.is_terminal());
        assert!(sm.current().is_success());
        assert!(sm.advance(RunState::BuildingPrompt, None).is_err());
    }

    #[test]
    fn test_setup_failure_skips_processing() {
        let mut sm = StateMachine::new();
        sm.fail("no models requested").unwrap();
        assert_eq!(sm.current(), RunState::Failed);
        assert!(!sm
            .transitions()
            .iter()
            .any(|t| t.to == RunState::ProcessingModels));
        assert_eq!(
            sm.last_transition().and_then(|t| t.reason.as_deref()),
            Some("no models requested")
        );
    }

    #[test]
    fn test_all_failed_goes_to_failed() {
        let mut sm = StateMachine::new();
        drive(
            &mut sm,
            &[
                RunState::GatheringContext,
                RunState::BuildingPrompt,
                RunState::ProcessingModels,
            ],
        );
        sm.fail("all models failed").unwrap();
        assert!(sm.is_terminal());
        assert!(!sm.current().is_success());
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let mut sm = StateMachine::new();
        let err = sm.advance(RunState::ProcessingModels, None).unwrap_err();
        assert_eq!(err.from, RunState::Setup);
        assert_eq!(err.to, RunState::ProcessingModels);
        assert_eq!(sm.current(), RunState::Setup);

        drive(&mut sm, &[RunState::GatheringContext, RunState::BuildingPrompt]);
        // No backwards edges.
        assert!(sm.advance(RunState::GatheringContext, None).is_err());
        // Synthesis only after saving.
        assert!(sm.advance(RunState::Synthesizing, None).is_err());
    }

    #[test]
    fn test_no_transition_out_of_terminal_states() {
        for terminal in [RunState::DryRun, RunState::Completed, RunState::Failed] {
            assert!(!is_legal_transition(terminal, RunState::Failed));
            assert!(!is_legal_transition(terminal, RunState::Setup));
        }
    }

    #[test]
    fn test_graph_is_acyclic() {
        use RunState::*;
        let all = [
            Setup,
            GatheringContext,
            DryRun,
            BuildingPrompt,
            ProcessingModels,
            SavingOutputs,
            Synthesizing,
            DisplayingSummary,
            Completed,
            Failed,
        ];
        for &a in &all {
            assert!(!is_legal_transition(a, a), "{a} must not loop");
            for &b in &all {
                assert!(
                    !(is_legal_transition(a, b) && is_legal_transition(b, a)),
                    "{a} ↔ {b} forms a cycle"
                );
            }
        }
    }

    #[test]
    fn test_illegal_transition_display() {
        let err = IllegalTransition {
            from: RunState::Completed,
            to: RunState::Setup,
        };
        assert_eq!(
            err.to_string(),
            "Illegal state transition: Completed → Setup"
        );
    }

    #[test]
    fn test_summary_lists_states() {
        let mut sm = StateMachine::new();
        drive(&mut sm, &[RunState::GatheringContext, RunState::DryRun]);
        let summary = sm.summary();
        assert!(summary.contains("Setup → DryRun"));
        assert!(summary.contains("[GatheringContext → DryRun]"));
    }

    #[test]
    fn test_state_serializes_snake_case() {
        let json = serde_json::to_string(&RunState::ProcessingModels).unwrap();
        assert_eq!(json, "\"processing_models\"");
    }
}

//! Console summary.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use coordination::{ModelOutcome, RunReport, RunState, SummaryReporter, SynthesisReport};

/// Prints the run summary to stdout.
#[derive(Debug, Clone, Default)]
pub struct ConsoleReporter {
    output_dir: Option<PathBuf>,
}

impl ConsoleReporter {
    pub fn new(output_dir: Option<PathBuf>) -> Self {
        Self { output_dir }
    }
}

impl SummaryReporter for ConsoleReporter {
    fn report(&self, report: &RunReport) {
        print!("{}", render(report, self.output_dir.as_deref()));
    }
}

fn format_duration(d: Duration) -> String {
    if d.as_secs() >= 60 {
        format!("{}m{:02}s", d.as_secs() / 60, d.as_secs() % 60)
    } else {
        format!("{:.1}s", d.as_secs_f64())
    }
}

fn outcome_line(
    out: &mut String,
    report: &RunReport,
    outcome: &ModelOutcome,
    saved_as: &str,
    width: usize,
) {
    let name = &outcome.job.name;
    let took = format_duration(outcome.duration);
    match &outcome.error {
        None => {
            let saved = report
                .saved_path(saved_as)
                .map(|p| format!("  → {}", p.display()))
                .unwrap_or_default();
            let _ = writeln!(out, "  ✓ {name:<width$}  ok        {took:>7}{saved}");
        }
        Some(err) => {
            let category = err.category.to_string();
            let _ = writeln!(out, "  ✗ {name:<width$}  {category:<9} {took:>7}  {}", err.message);
            let _ = writeln!(out, "    {:<width$}  hint: {}", "", err.suggestion());
        }
    }
}

/// Render the summary text for a finished run.
pub fn render(report: &RunReport, output_dir: Option<&std::path::Path>) -> String {
    let mut out = String::new();

    if report.is_dry_run() {
        let stats = &report.context;
        let _ = writeln!(out, "Dry run: no models were called.");
        let _ = writeln!(
            out,
            "Context: {} files ({} skipped), {} lines, {} chars, ~{} tokens",
            stats.files_processed,
            stats.files_skipped,
            stats.lines,
            stats.chars,
            stats.estimated_tokens
        );
        for path in &report.files {
            let _ = writeln!(out, "  {}", path.display());
        }
        return out;
    }

    if let Some(err) = &report.setup_error {
        let _ = writeln!(out, "Run failed during setup: {err}");
        return out;
    }

    let status = match (report.final_state, report.status) {
        (RunState::Completed, Some(status)) => status.to_string(),
        (_, Some(status)) => format!("failed ({status})"),
        (state, None) => format!("failed in {state}"),
    };
    let _ = writeln!(
        out,
        "Run {}: {} ({} of {} models succeeded)",
        report.run_id,
        status,
        report.succeeded().count(),
        report.outcomes.len()
    );

    let width = report
        .outcomes
        .iter()
        .map(|o| o.job.name.len())
        .chain(report.synthesis_outcome().map(|o| o.job.name.len()))
        .max()
        .unwrap_or(0);
    for outcome in &report.outcomes {
        outcome_line(&mut out, report, outcome, &outcome.job.name, width);
    }

    match &report.synthesis {
        Some(SynthesisReport::Ran { outcome }) => {
            let _ = writeln!(out, "Synthesis:");
            let saved_as = format!("{}-synthesis", outcome.job.name);
            outcome_line(&mut out, report, outcome, &saved_as, width);
        }
        Some(SynthesisReport::Skipped { .. }) | None => {}
    }

    let failed_writes: Vec<_> = report.saved.iter().filter(|s| s.error.is_some()).collect();
    for saved in failed_writes {
        let _ = writeln!(
            out,
            "  ! could not save output for {}: {}",
            saved.model,
            saved.error.as_deref().unwrap_or_default()
        );
    }

    if let Some(dir) = output_dir.filter(|_| !report.saved.is_empty()) {
        let _ = writeln!(out, "Outputs: {}", dir.display());
    }
    out
}

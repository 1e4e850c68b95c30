//! Command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// Send one task to several LLM backends concurrently, save every answer
/// and optionally synthesize them into one.
#[derive(Parser, Debug, Clone, Default, PartialEq, Eq)]
#[command(name = "chorus", author, version, about, long_about = None)]
pub struct Cli {
    /// Files or directories to include as context
    pub paths: Vec<PathBuf>,

    /// File holding the task instructions
    #[arg(short, long)]
    pub instructions: Option<PathBuf>,

    /// Model to query (repeatable; order decides output order)
    #[arg(short, long = "model", value_name = "MODEL")]
    pub models: Vec<String>,

    /// Directory for output files (default: chorus-output-<timestamp>)
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Maximum number of model calls in flight (overrides CHORUS_MAX_CONCURRENT)
    #[arg(long)]
    pub max_concurrent: Option<usize>,

    /// Requests per minute for providers without their own limit
    #[arg(long, value_name = "RPM")]
    pub rate_limit: Option<u32>,

    /// Requests per minute for OpenAI models
    #[arg(long, value_name = "RPM")]
    pub openai_rate_limit: Option<u32>,

    /// Requests per minute for Anthropic models
    #[arg(long, value_name = "RPM")]
    pub anthropic_rate_limit: Option<u32>,

    /// Requests per minute for Gemini models
    #[arg(long, value_name = "RPM")]
    pub gemini_rate_limit: Option<u32>,

    /// Requests per minute for OpenRouter models
    #[arg(long, value_name = "RPM")]
    pub openrouter_rate_limit: Option<u32>,

    /// Treat a run where only some models succeed as a success
    #[arg(long, default_value_t = false)]
    pub partial_success_ok: bool,

    /// Synthesize the successful answers into one
    #[arg(long, default_value_t = false)]
    pub synthesis: bool,

    /// Model performing the synthesis (default: the first --model)
    #[arg(long)]
    pub synthesis_model: Option<String>,

    /// Synthesize automatically once successful output reaches this many bytes
    #[arg(long, value_name = "BYTES")]
    pub synthesis_threshold: Option<usize>,

    /// Gather context and print statistics without calling any model
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    /// Run deadline in seconds (overrides CHORUS_TIMEOUT_SECS)
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Append a JSONL audit trail to this file
    #[arg(long)]
    pub audit_log: Option<PathBuf>,

    /// Only include files with these extensions
    #[arg(long, value_delimiter = ',')]
    pub include: Vec<String>,

    /// Skip files with these extensions
    #[arg(long, value_delimiter = ',')]
    pub exclude: Vec<String>,

    /// Skip files and directories with these names
    #[arg(long, value_delimiter = ',')]
    pub exclude_names: Vec<String>,

    /// Also write an .error.md file for each failed model
    #[arg(long, default_value_t = false)]
    pub write_failures: bool,

    /// Retries per model call for transient failures
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Debug logging
    #[arg(short, long, default_value_t = false, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, default_value_t = false)]
    pub quiet: bool,

    /// TOML config file (default: ./chorus.toml when present)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Log filter used when `RUST_LOG` is not set.
    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "warn"
        } else {
            "info"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_repeated_models_and_paths() {
        let cli = Cli::try_parse_from([
            "chorus",
            "-i",
            "task.md",
            "-m",
            "gpt-4o",
            "--model",
            "claude-sonnet-4",
            "src",
            "README.md",
        ])
        .unwrap();
        assert_eq!(cli.instructions, Some(PathBuf::from("task.md")));
        assert_eq!(cli.models, vec!["gpt-4o", "claude-sonnet-4"]);
        assert_eq!(cli.paths, vec![PathBuf::from("src"), PathBuf::from("README.md")]);
        assert_eq!(cli.log_filter(), "info");
    }

    #[test]
    fn comma_separated_filters() {
        let cli = Cli::try_parse_from([
            "chorus",
            "--include",
            "rs,toml",
            "--exclude-names",
            "target",
            "--exclude-names",
            "node_modules",
        ])
        .unwrap();
        assert_eq!(cli.include, vec!["rs", "toml"]);
        assert_eq!(cli.exclude_names, vec!["target", "node_modules"]);
    }

    #[test]
    fn verbose_and_quiet_conflict() {
        assert!(Cli::try_parse_from(["chorus", "-v", "-q"]).is_err());
        let cli = Cli::try_parse_from(["chorus", "--quiet"]).unwrap();
        assert_eq!(cli.log_filter(), "warn");
    }

    #[test]
    fn numeric_flags() {
        let cli = Cli::try_parse_from([
            "chorus",
            "--max-concurrent",
            "3",
            "--anthropic-rate-limit",
            "10",
            "--timeout",
            "90",
            "--synthesis-threshold",
            "4096",
        ])
        .unwrap();
        assert_eq!(cli.max_concurrent, Some(3));
        assert_eq!(cli.anthropic_rate_limit, Some(10));
        assert_eq!(cli.timeout, Some(90));
        assert_eq!(cli.synthesis_threshold, Some(4096));
        assert!(Cli::try_parse_from(["chorus", "--max-concurrent", "many"]).is_err());
    }
}

//! Per-run configuration consumed by the orchestrator.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::RunError;
use crate::synthesis::SynthesisPolicy;

pub const DEFAULT_MAX_CONCURRENT: usize = 5;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// Everything one run needs, already resolved from flags, env and files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Models in request order; job indices follow this order.
    pub models: Vec<String>,
    pub instructions: String,
    pub context_paths: Vec<PathBuf>,
    /// Global concurrency capacity.
    pub max_concurrent: usize,
    /// Requests per minute for models without an entry in `rate_limits`.
    /// Zero disables rate limiting.
    pub default_rpm: u32,
    /// Per-model requests per minute.
    #[serde(default)]
    pub rate_limits: BTreeMap<String, u32>,
    /// Accept mixed outcomes as `PartialSuccess`.
    pub allow_partial: bool,
    pub synthesis: SynthesisPolicy,
    pub dry_run: bool,
    /// Run-level deadline measured from the start of the run.
    pub timeout: Option<Duration>,
    /// Also persist failed outcomes.
    pub write_failures: bool,
}

impl RunConfig {
    /// A minimal config for `models`; remaining fields take defaults.
    pub fn new(models: Vec<String>, instructions: impl Into<String>) -> Self {
        let synthesis_model = models.first().cloned().unwrap_or_default();
        Self {
            models,
            instructions: instructions.into(),
            context_paths: Vec::new(),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            default_rpm: 0,
            rate_limits: BTreeMap::new(),
            allow_partial: false,
            synthesis: SynthesisPolicy::disabled(synthesis_model),
            dry_run: false,
            timeout: Some(DEFAULT_TIMEOUT),
            write_failures: false,
        }
    }

    /// Check the config before any limiter is built.
    pub fn validate(&self) -> Result<(), RunError> {
        if self.models.is_empty() {
            return Err(RunError::config("at least one model is required"));
        }
        let mut seen = HashSet::new();
        for model in &self.models {
            if model.trim().is_empty() {
                return Err(RunError::config("model names must not be empty"));
            }
            if !seen.insert(model.as_str()) {
                return Err(RunError::config(format!("model `{model}` requested twice")));
            }
        }
        if self.instructions.trim().is_empty() {
            return Err(RunError::config("instructions are empty"));
        }
        if self.max_concurrent == 0 {
            return Err(RunError::config("max_concurrent must be at least 1"));
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(RunError::config("timeout must be greater than zero"));
        }
        let synthesis_possible =
            self.synthesis.requested || self.synthesis.auto_threshold_bytes.is_some();
        if synthesis_possible && self.synthesis.model.trim().is_empty() {
            return Err(RunError::config("synthesis model must not be empty"));
        }
        Ok(())
    }

    pub fn rpm_for(&self, model: &str) -> u32 {
        self.rate_limits
            .get(model)
            .copied()
            .unwrap_or(self.default_rpm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RunConfig {
        RunConfig::new(vec!["gpt-4o".into(), "claude-sonnet-4".into()], "Review")
    }

    #[test]
    fn defaults_validate() {
        let cfg = config();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.max_concurrent, 5);
        assert_eq!(cfg.synthesis.model, "gpt-4o");
    }

    #[test]
    fn rejects_invalid_configs() {
        let cases: Vec<(&str, Box<dyn Fn(&mut RunConfig)>)> = vec![
            ("no models", Box::new(|c| c.models.clear())),
            ("duplicate", Box::new(|c| c.models.push("gpt-4o".into()))),
            ("blank model", Box::new(|c| c.models.push("  ".into()))),
            ("instructions", Box::new(|c| c.instructions = " \n".into())),
            ("capacity", Box::new(|c| c.max_concurrent = 0)),
            ("timeout", Box::new(|c| c.timeout = Some(Duration::ZERO))),
            (
                "synthesis model",
                Box::new(|c| {
                    c.synthesis.requested = true;
                    c.synthesis.model.clear();
                }),
            ),
        ];
        for (name, mutate) in cases {
            let mut cfg = config();
            mutate(&mut cfg);
            assert!(
                matches!(cfg.validate(), Err(RunError::Configuration(_))),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn no_timeout_is_allowed() {
        let mut cfg = config();
        cfg.timeout = None;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rpm_override_and_fallback() {
        let mut cfg = config();
        cfg.default_rpm = 60;
        cfg.rate_limits.insert("claude-sonnet-4".into(), 50);
        assert_eq!(cfg.rpm_for("claude-sonnet-4"), 50);
        assert_eq!(cfg.rpm_for("gpt-4o"), 60);
    }
}

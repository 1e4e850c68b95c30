//! Settings resolution.
//!
//! Precedence, highest first: CLI flags, environment, the TOML file,
//! built-in defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use coordination::orchestrator::config::{DEFAULT_MAX_CONCURRENT, DEFAULT_TIMEOUT};
use coordination::{RunConfig, SynthesisPolicy};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::cli::Cli;
use crate::gather::GatherFilters;
use crate::providers::retry::DEFAULT_MAX_RETRIES;
use crate::providers::{ProviderEndpoint, ProviderKind};
use crate::writer::default_output_dir;

/// Config file picked up from the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "chorus.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("no instructions given; pass --instructions <file> or set `instructions` in the config file")]
    MissingInstructions,

    #[error("{var} must be a non-negative integer, got `{value}`")]
    InvalidEnv { var: &'static str, value: String },
}

/// Per-provider requests-per-minute overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderLimits {
    pub openai: Option<u32>,
    pub anthropic: Option<u32>,
    pub gemini: Option<u32>,
    pub openrouter: Option<u32>,
}

impl ProviderLimits {
    pub fn get(&self, kind: ProviderKind) -> Option<u32> {
        match kind {
            ProviderKind::OpenAi => self.openai,
            ProviderKind::Anthropic => self.anthropic,
            ProviderKind::Gemini => self.gemini,
            ProviderKind::OpenRouter => self.openrouter,
        }
    }

    fn from_cli(cli: &Cli) -> Self {
        Self {
            openai: cli.openai_rate_limit,
            anthropic: cli.anthropic_rate_limit,
            gemini: cli.gemini_rate_limit,
            openrouter: cli.openrouter_rate_limit,
        }
    }
}

/// Contents of `chorus.toml`. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub models: Vec<String>,
    pub instructions: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub max_concurrent: Option<usize>,
    pub rate_limit: Option<u32>,
    pub rate_limits: ProviderLimits,
    pub partial_success_ok: Option<bool>,
    pub synthesis: Option<bool>,
    pub synthesis_model: Option<String>,
    pub synthesis_threshold: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub audit_log: Option<PathBuf>,
    pub max_retries: Option<u32>,
    pub write_failures: Option<bool>,
    pub filters: GatherFilters,
}

impl FileConfig {
    pub fn parse(text: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    /// Load `explicit` if given (it must exist), otherwise `chorus.toml`
    /// when present, otherwise an empty config.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::load(path),
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.is_file() {
                    debug!(path = %path.display(), "loading config file");
                    Self::load(path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }
}

/// Everything the binary needs, fully resolved.
#[derive(Debug, Clone)]
pub struct Settings {
    pub run: RunConfig,
    /// Providers with an API key in the environment.
    pub endpoints: Vec<ProviderEndpoint>,
    pub output_dir: PathBuf,
    pub audit_log: Option<PathBuf>,
    pub filters: GatherFilters,
    pub max_retries: u32,
}

impl Settings {
    /// Layer `cli` over `env` over `file`. `env` returns the value of an
    /// environment variable; empty values count as unset.
    pub fn resolve(
        cli: &Cli,
        file: FileConfig,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let env = |var: &str| env(var).filter(|v| !v.trim().is_empty());

        let instructions_path = cli
            .instructions
            .clone()
            .or(file.instructions.clone())
            .ok_or(ConfigError::MissingInstructions)?;
        let instructions =
            std::fs::read_to_string(&instructions_path).map_err(|source| ConfigError::Read {
                path: instructions_path.clone(),
                source,
            })?;

        let models = if cli.models.is_empty() {
            file.models.clone()
        } else {
            cli.models.clone()
        };

        let mut run = RunConfig::new(models, instructions);
        run.context_paths = cli.paths.clone();

        run.max_concurrent = match cli.max_concurrent {
            Some(n) => n,
            None => match parse_env(&env, "CHORUS_MAX_CONCURRENT")? {
                Some(n) => n as usize,
                None => file.max_concurrent.unwrap_or(DEFAULT_MAX_CONCURRENT),
            },
        };

        let timeout_secs = match cli.timeout {
            Some(secs) => Some(secs),
            None => parse_env(&env, "CHORUS_TIMEOUT_SECS")?.or(file.timeout_secs),
        };
        run.timeout = Some(timeout_secs.map_or(DEFAULT_TIMEOUT, Duration::from_secs));

        run.allow_partial = cli.partial_success_ok || file.partial_success_ok.unwrap_or(false);
        run.dry_run = cli.dry_run;
        run.write_failures = cli.write_failures || file.write_failures.unwrap_or(false);

        let synthesis_model = cli
            .synthesis_model
            .clone()
            .or(file.synthesis_model.clone())
            .or_else(|| run.models.first().cloned())
            .unwrap_or_default();
        run.synthesis = SynthesisPolicy {
            requested: cli.synthesis || file.synthesis.unwrap_or(false),
            model: synthesis_model,
            auto_threshold_bytes: cli.synthesis_threshold.or(file.synthesis_threshold),
        };

        let cli_limits = ProviderLimits::from_cli(cli);
        let default_rpm = cli.rate_limit.or(file.rate_limit);
        run.default_rpm = default_rpm.unwrap_or(0);
        run.rate_limits = per_model_limits(
            routed_models(&run),
            &cli_limits,
            &file.rate_limits,
            default_rpm,
        );

        let filters = GatherFilters {
            include: pick(&cli.include, file.filters.include),
            exclude: pick(&cli.exclude, file.filters.exclude),
            exclude_names: pick(&cli.exclude_names, file.filters.exclude_names),
        };

        let endpoints = ProviderKind::ALL
            .into_iter()
            .filter_map(|kind| {
                let key = env(kind.key_var())?;
                let endpoint = ProviderEndpoint::new(kind, key);
                Some(match env(kind.base_url_var()) {
                    Some(url) => endpoint.with_base_url(url),
                    None => endpoint,
                })
            })
            .collect();

        Ok(Self {
            run,
            endpoints,
            output_dir: cli
                .output_dir
                .clone()
                .or(file.output_dir)
                .unwrap_or_else(|| default_output_dir(Utc::now())),
            audit_log: cli.audit_log.clone().or(file.audit_log),
            filters,
            max_retries: cli
                .max_retries
                .or(file.max_retries)
                .unwrap_or(DEFAULT_MAX_RETRIES),
        })
    }
}

impl Settings {
    /// Every model the run may call: the requested models, then the
    /// synthesis model when synthesis can trigger.
    pub fn routed_models(&self) -> Vec<&str> {
        routed_models(&self.run)
    }
}

fn routed_models(run: &RunConfig) -> Vec<&str> {
    let mut models: Vec<&str> = run.models.iter().map(String::as_str).collect();
    let synthesis = &run.synthesis;
    let may_synthesize = synthesis.requested || synthesis.auto_threshold_bytes.is_some();
    let model = synthesis.model.as_str();
    if may_synthesize && !model.is_empty() && !models.contains(&model) {
        models.push(model);
    }
    models
}

fn parse_env(
    env: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<u64>, ConfigError> {
    env(var)
        .map(|value| {
            value
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidEnv { var, value })
        })
        .transpose()
}

fn pick(cli: &[String], file: Vec<String>) -> Vec<String> {
    if cli.is_empty() {
        file
    } else {
        cli.to_vec()
    }
}

/// Rate per model: the provider's explicit limit, then the general
/// `rate_limit`, then the provider default. Unknown models are left to the
/// router to reject.
fn per_model_limits<'a>(
    models: impl IntoIterator<Item = &'a str>,
    cli: &ProviderLimits,
    file: &ProviderLimits,
    default_rpm: Option<u32>,
) -> BTreeMap<String, u32> {
    models
        .into_iter()
        .filter_map(|model| {
            let kind = ProviderKind::from_model(model)?;
            let rpm = cli
                .get(kind)
                .or(file.get(kind))
                .or(default_rpm)
                .unwrap_or(kind.default_rpm());
            Some((model.to_string(), rpm))
        })
        .collect()
}

//! `chorus` binary.
//!
//! ```bash
//! OPENAI_API_KEY=... ANTHROPIC_API_KEY=... \
//!   chorus -i task.md -m gpt-4o -m claude-sonnet-4 --synthesis src/
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use chorus::audit::JsonlAuditLogger;
use chorus::cli::Cli;
use chorus::config::{FileConfig, Settings};
use chorus::gather::FsContextGatherer;
use chorus::providers::{ProviderRouter, RetryingCaller};
use chorus::summary::ConsoleReporter;
use chorus::writer::FsOutputWriter;
use clap::Parser;
use coordination::{AuditLogger, NoopAuditLogger, Orchestrator};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| cli.log_filter().into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let file = FileConfig::discover(cli.config.as_deref())?;
    let settings = Settings::resolve(&cli, file, &|var: &str| std::env::var(var).ok())?;

    let router = ProviderRouter::from_endpoints(settings.endpoints.clone())
        .context("failed to set up provider clients")?;
    if !settings.run.dry_run {
        if let Err(e) = router.check(settings.routed_models()) {
            eprintln!("error: {e}");
            return Ok(1);
        }
    }

    let audit: Arc<dyn AuditLogger> = match &settings.audit_log {
        Some(path) => Arc::new(JsonlAuditLogger::open(path)),
        None => Arc::new(NoopAuditLogger),
    };

    let orchestrator = Orchestrator::new(
        settings.run,
        Arc::new(RetryingCaller::new(router, settings.max_retries)),
        Arc::new(FsContextGatherer::new(settings.filters)),
        Arc::new(FsOutputWriter::new(&settings.output_dir)),
    )
    .with_audit(audit)
    .with_reporter(Arc::new(ConsoleReporter::new(Some(settings.output_dir))));

    info!(
        run_id = %orchestrator.run_id(),
        models = orchestrator.config().models.len(),
        "Chorus starting"
    );

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling outstanding calls");
            on_interrupt.cancel();
        }
    });

    let report = orchestrator.run(&cancel).await.context("run aborted")?;
    Ok(report.exit_code())
}

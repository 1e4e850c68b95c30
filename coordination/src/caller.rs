//! The model-call seam.
//!
//! Backends implement [`ModelCaller`]; the dispatcher treats every
//! implementation the same way. Retries, if any, happen behind this trait.

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::errors::ModelError;

/// Per-call context derived from the run's cancellation signal.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// Child of the run token; cancelled when the run is.
    pub cancel: CancellationToken,
    /// Absolute run deadline, when one is configured.
    pub deadline: Option<Instant>,
}

impl CallContext {
    pub fn new(cancel: CancellationToken, deadline: Option<Instant>) -> Self {
        Self { cancel, deadline }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Time left before the deadline, `None` when unbounded.
    pub fn remaining(&self) -> Option<std::time::Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }
}

/// One implementation per backend family.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModelCaller: Send + Sync {
    /// Send `prompt` to `model` and return the generated text.
    async fn call(&self, ctx: &CallContext, model: &str, prompt: &str) -> Result<String, ModelError>;
}

//! Retry decorator for any [`ModelCaller`].
//!
//! Transient categories (rate limit, server, network) are retried with
//! exponential backoff. Everything else, and any cancellation, returns
//! immediately.

use std::time::Duration;

use async_trait::async_trait;
use coordination::{classify, CallContext, ModelCaller, ModelError};
use tracing::{debug, warn};

pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

pub struct RetryingCaller<C> {
    inner: C,
    max_retries: u32,
    base_delay: Duration,
}

impl<C: ModelCaller> RetryingCaller<C> {
    pub fn new(inner: C, max_retries: u32) -> Self {
        Self {
            inner,
            max_retries,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let multiplier = 2u32.pow(attempt.min(5));
    base.saturating_mul(multiplier)
}

#[async_trait]
impl<C: ModelCaller> ModelCaller for RetryingCaller<C> {
    async fn call(&self, ctx: &CallContext, model: &str, prompt: &str) -> Result<String, ModelError> {
        let mut attempt = 0;
        loop {
            let err = match self.inner.call(ctx, model, prompt).await {
                Ok(text) => return Ok(text),
                Err(err) => err,
            };

            let category = classify(&err);
            if !category.is_transient() || attempt >= self.max_retries || ctx.is_cancelled() {
                return Err(err);
            }

            let delay = backoff_delay(self.base_delay, attempt);
            if ctx.remaining().is_some_and(|left| left <= delay) {
                debug!(model, %category, "no time left before the run deadline, not retrying");
                return Err(err);
            }

            attempt += 1;
            warn!(
                model,
                %category,
                attempt,
                max_retries = self.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient failure, retrying"
            );

            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return Err(ModelError::cancelled()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

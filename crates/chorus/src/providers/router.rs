//! Routes each model name to its provider family's caller.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use coordination::{CallContext, ModelCaller, ModelError};
use thiserror::Error;
use tracing::debug;

use super::{AnthropicCaller, GeminiCaller, OpenAiCompatCaller, ProviderEndpoint, ProviderKind};

/// A model that cannot be served with the current configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("unknown model `{0}`: expected gpt-*, o1*/o3*/o4*, claude-*, gemini-* or a provider/model OpenRouter name")]
    UnknownModel(String),

    #[error("model `{model}` needs {var} to be set for {provider}")]
    MissingKey {
        model: String,
        provider: ProviderKind,
        var: &'static str,
    },
}

/// One [`ModelCaller`] per provider family, selected by model name.
#[derive(Clone, Default)]
pub struct ProviderRouter {
    callers: BTreeMap<ProviderKind, Arc<dyn ModelCaller>>,
}

impl ProviderRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build HTTP callers for every configured endpoint.
    pub fn from_endpoints(
        endpoints: impl IntoIterator<Item = ProviderEndpoint>,
    ) -> Result<Self, ModelError> {
        let mut router = Self::new();
        for endpoint in endpoints {
            let kind = endpoint.kind;
            let caller: Arc<dyn ModelCaller> = match kind {
                ProviderKind::OpenAi | ProviderKind::OpenRouter => {
                    Arc::new(OpenAiCompatCaller::new(endpoint)?)
                }
                ProviderKind::Anthropic => Arc::new(AnthropicCaller::new(endpoint)?),
                ProviderKind::Gemini => Arc::new(GeminiCaller::new(endpoint)?),
            };
            router = router.with_caller(kind, caller);
        }
        Ok(router)
    }

    pub fn with_caller(mut self, kind: ProviderKind, caller: Arc<dyn ModelCaller>) -> Self {
        self.callers.insert(kind, caller);
        self
    }

    pub fn providers(&self) -> impl Iterator<Item = ProviderKind> + '_ {
        self.callers.keys().copied()
    }

    /// Check that every model resolves to a configured provider.
    pub fn check<'a>(&self, models: impl IntoIterator<Item = &'a str>) -> Result<(), RouteError> {
        for model in models {
            self.route(model)?;
        }
        Ok(())
    }

    fn route(&self, model: &str) -> Result<&Arc<dyn ModelCaller>, RouteError> {
        let kind =
            ProviderKind::from_model(model).ok_or_else(|| RouteError::UnknownModel(model.to_string()))?;
        self.callers.get(&kind).ok_or_else(|| RouteError::MissingKey {
            model: model.to_string(),
            provider: kind,
            var: kind.key_var(),
        })
    }
}

#[async_trait]
impl ModelCaller for ProviderRouter {
    async fn call(&self, ctx: &CallContext, model: &str, prompt: &str) -> Result<String, ModelError> {
        match self.route(model) {
            Ok(caller) => {
                debug!(model, "routing call");
                caller.call(ctx, model, prompt).await
            }
            Err(RouteError::UnknownModel(_)) => {
                Err(ModelError::other(format!("unknown model `{model}`")))
            }
            Err(RouteError::MissingKey { provider, var, .. }) => Err(ModelError::other(format!(
                "{provider}: unauthorized, {var} is not set"
            ))),
        }
    }
}

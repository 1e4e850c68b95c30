//! OpenAI-compatible chat completions, used for OpenAI and OpenRouter.

use async_trait::async_trait;
use coordination::{CallContext, ModelCaller, ModelError};
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use serde_json::json;

use super::{
    build_client, error_from_response, map_send_error, with_deadline, ProviderEndpoint,
    ProviderKind,
};

#[derive(Debug, Clone)]
pub struct OpenAiCompatCaller {
    endpoint: ProviderEndpoint,
    client: reqwest::Client,
}

impl OpenAiCompatCaller {
    pub fn new(endpoint: ProviderEndpoint) -> Result<Self, ModelError> {
        Ok(Self {
            endpoint,
            client: build_client()?,
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.endpoint.base_url)
    }

    fn provider(&self) -> ProviderKind {
        self.endpoint.kind
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
    refusal: Option<String>,
}

#[async_trait]
impl ModelCaller for OpenAiCompatCaller {
    async fn call(&self, ctx: &CallContext, model: &str, prompt: &str) -> Result<String, ModelError> {
        let provider = self.provider();
        let body = json!({
            "model": model,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let mut request = self
            .client
            .post(self.chat_url())
            .header(AUTHORIZATION, format!("Bearer {}", self.endpoint.api_key))
            .json(&body);
        if provider == ProviderKind::OpenRouter {
            request = request.header("X-Title", "chorus");
        }

        let response = with_deadline(request, ctx)?
            .send()
            .await
            .map_err(|e| map_send_error(provider, e))?;

        if !response.status().is_success() {
            return Err(error_from_response(provider, response).await);
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| map_send_error(provider, e))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::other(format!("{provider}: response contained no choices")))?;

        let filtered = choice.finish_reason.as_deref() == Some("content_filter");
        let message = choice.message;
        if let Some(refusal) = message.as_ref().and_then(|m| m.refusal.clone()) {
            return Err(ModelError::other(format!("{provider}: model refused: {refusal}")).flagged());
        }

        match message.and_then(|m| m.content).filter(|c| !c.trim().is_empty()) {
            Some(content) => Ok(content),
            None if filtered => Err(ModelError::other(format!(
                "{provider}: response blocked by content filter"
            ))
            .flagged()),
            None => Err(ModelError::other(format!("{provider}: empty response"))),
        }
    }
}

//! Anthropic messages API.

use async_trait::async_trait;
use coordination::{CallContext, ModelCaller, ModelError};
use serde::Deserialize;
use serde_json::json;

use super::{
    build_client, error_from_response, map_send_error, with_deadline, ProviderEndpoint,
    ProviderKind,
};

const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 8192;

#[derive(Debug, Clone)]
pub struct AnthropicCaller {
    endpoint: ProviderEndpoint,
    client: reqwest::Client,
}

impl AnthropicCaller {
    pub fn new(endpoint: ProviderEndpoint) -> Result<Self, ModelError> {
        Ok(Self {
            endpoint,
            client: build_client()?,
        })
    }
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[async_trait]
impl ModelCaller for AnthropicCaller {
    async fn call(&self, ctx: &CallContext, model: &str, prompt: &str) -> Result<String, ModelError> {
        let provider = ProviderKind::Anthropic;
        let body = json!({
            "model": model,
            "max_tokens": MAX_TOKENS,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let request = self
            .client
            .post(format!("{}/v1/messages", self.endpoint.base_url))
            .header("x-api-key", &self.endpoint.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body);

        let response = with_deadline(request, ctx)?
            .send()
            .await
            .map_err(|e| map_send_error(provider, e))?;

        if !response.status().is_success() {
            return Err(error_from_response(provider, response).await);
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| map_send_error(provider, e))?;

        let text: String = parsed
            .content
            .iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        if parsed.stop_reason.as_deref() == Some("refusal") {
            return Err(ModelError::other(format!("{provider}: model refused the request")).flagged());
        }
        if text.trim().is_empty() {
            return Err(ModelError::other(format!("{provider}: empty response")));
        }
        Ok(text)
    }
}

//! Gemini generateContent API.

use async_trait::async_trait;
use coordination::{CallContext, ModelCaller, ModelError};
use serde::Deserialize;
use serde_json::json;

use super::{
    build_client, error_from_response, map_send_error, with_deadline, ProviderEndpoint,
    ProviderKind,
};

#[derive(Debug, Clone)]
pub struct GeminiCaller {
    endpoint: ProviderEndpoint,
    client: reqwest::Client,
}

impl GeminiCaller {
    pub fn new(endpoint: ProviderEndpoint) -> Result<Self, ModelError> {
        Ok(Self {
            endpoint,
            client: build_client()?,
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[async_trait]
impl ModelCaller for GeminiCaller {
    async fn call(&self, ctx: &CallContext, model: &str, prompt: &str) -> Result<String, ModelError> {
        let provider = ProviderKind::Gemini;
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        });

        let request = self
            .client
            .post(format!(
                "{}/models/{}:generateContent",
                self.endpoint.base_url, model
            ))
            .header("x-goog-api-key", &self.endpoint.api_key)
            .json(&body);

        let response = with_deadline(request, ctx)?
            .send()
            .await
            .map_err(|e| map_send_error(provider, e))?;

        if !response.status().is_success() {
            return Err(error_from_response(provider, response).await);
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| map_send_error(provider, e))?;

        if let Some(reason) = parsed.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(ModelError::other(format!("{provider}: prompt blocked ({reason})")).flagged());
        }

        let candidate = parsed
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::other(format!("{provider}: response contained no candidates")))?;

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return match candidate.finish_reason.as_deref() {
                Some("SAFETY") | Some("PROHIBITED_CONTENT") | Some("BLOCKLIST") => Err(
                    ModelError::other(format!("{provider}: response blocked by safety filter"))
                        .flagged(),
                ),
                _ => Err(ModelError::other(format!("{provider}: empty response"))),
            };
        }
        Ok(text)
    }
}

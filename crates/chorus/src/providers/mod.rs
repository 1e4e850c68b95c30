//! HTTP backends for the supported provider families.
//!
//! | Family     | Models                         | Wire protocol            |
//! |------------|--------------------------------|--------------------------|
//! | OpenAI     | `gpt-*`, `o1*`, `o3*`, `o4*`   | chat completions         |
//! | Anthropic  | `claude-*`                     | messages                 |
//! | Gemini     | `gemini-*`                     | generateContent          |
//! | OpenRouter | anything with a `/`            | chat completions         |
//!
//! Every caller maps non-2xx answers to a [`ModelError`] carrying the HTTP
//! status and the provider's own message; classification happens in the
//! dispatcher.

pub mod anthropic;
pub mod gemini;
pub mod openai;
pub mod retry;
pub mod router;

use std::fmt;
use std::time::Duration;

use coordination::{CallContext, ModelError};
use serde::{Deserialize, Serialize};

pub use anthropic::AnthropicCaller;
pub use gemini::GeminiCaller;
pub use openai::OpenAiCompatCaller;
pub use retry::RetryingCaller;
pub use router::ProviderRouter;

/// Connect timeout for every provider client. Request timeouts come from
/// the run deadline instead.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Backend family a model name routes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Gemini,
    OpenRouter,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        Self::OpenAi,
        Self::Anthropic,
        Self::Gemini,
        Self::OpenRouter,
    ];

    /// Resolve the family from a model name. `None` for unknown names.
    pub fn from_model(model: &str) -> Option<Self> {
        if model.contains('/') {
            return Some(Self::OpenRouter);
        }
        if model.starts_with("claude-") {
            Some(Self::Anthropic)
        } else if model.starts_with("gemini-") {
            Some(Self::Gemini)
        } else if model.starts_with("gpt-")
            || ["o1", "o3", "o4"].iter().any(|p| model.starts_with(p))
        {
            Some(Self::OpenAi)
        } else {
            None
        }
    }

    /// Environment variable holding the API key.
    pub fn key_var(self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::Gemini => "GEMINI_API_KEY",
            Self::OpenRouter => "OPENROUTER_API_KEY",
        }
    }

    /// Environment variable overriding the base URL.
    pub fn base_url_var(self) -> &'static str {
        match self {
            Self::OpenAi => "CHORUS_OPENAI_BASE_URL",
            Self::Anthropic => "CHORUS_ANTHROPIC_BASE_URL",
            Self::Gemini => "CHORUS_GEMINI_BASE_URL",
            Self::OpenRouter => "CHORUS_OPENROUTER_BASE_URL",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Anthropic => "https://api.anthropic.com",
            Self::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            Self::OpenRouter => "https://openrouter.ai/api/v1",
        }
    }

    /// Requests per minute used when nothing overrides it.
    pub fn default_rpm(self) -> u32 {
        match self {
            Self::OpenAi => 3000,
            Self::Anthropic => 50,
            Self::Gemini => 60,
            Self::OpenRouter => 20,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenAi => write!(f, "openai"),
            Self::Anthropic => write!(f, "anthropic"),
            Self::Gemini => write!(f, "gemini"),
            Self::OpenRouter => write!(f, "openrouter"),
        }
    }
}

/// Resolved connection details for one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoint {
    pub kind: ProviderKind,
    pub api_key: String,
    pub base_url: String,
}

impl ProviderEndpoint {
    pub fn new(kind: ProviderKind, api_key: impl Into<String>) -> Self {
        Self {
            kind,
            api_key: api_key.into(),
            base_url: kind.default_base_url().to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

pub(crate) fn build_client() -> Result<reqwest::Client, ModelError> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(|e| ModelError::other(format!("failed to create HTTP client: {e}")))
}

/// Apply the run deadline to a request, failing fast when it has passed.
pub(crate) fn with_deadline(
    request: reqwest::RequestBuilder,
    ctx: &CallContext,
) -> Result<reqwest::RequestBuilder, ModelError> {
    match ctx.remaining() {
        Some(left) if left.is_zero() => Err(ModelError::timeout("run deadline already passed")),
        Some(left) => Ok(request.timeout(left)),
        None => Ok(request),
    }
}

/// Map a transport-level reqwest failure.
pub(crate) fn map_send_error(provider: ProviderKind, err: reqwest::Error) -> ModelError {
    let message = format!("{provider}: {err}");
    if err.is_timeout() {
        ModelError::timeout(message)
    } else if err.is_connect() {
        ModelError::connect(message)
    } else if let Some(status) = err.status() {
        ModelError::http(status.as_u16(), message)
    } else {
        ModelError::other(message)
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorBody {
    Detailed {
        message: Option<String>,
        #[serde(rename = "type")]
        kind: Option<String>,
        code: Option<serde_json::Value>,
        status: Option<String>,
    },
    Plain(String),
}

/// Build a `ModelError` from a non-2xx response.
///
/// Understands the `{"error": {...}}` shapes used by all four families and
/// falls back to the raw body.
pub(crate) async fn error_from_response(
    provider: ProviderKind,
    response: reqwest::Response,
) -> ModelError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    parse_error_body(provider, status, &body)
}

pub(crate) fn parse_error_body(provider: ProviderKind, status: u16, body: &str) -> ModelError {
    let parsed = serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|e| e.error);

    let (message, markers) = match parsed {
        Some(ErrorBody::Detailed {
            message,
            kind,
            code,
            status: code_status,
        }) => {
            let markers = [
                kind.unwrap_or_default(),
                code.map(|c| c.to_string()).unwrap_or_default(),
                code_status.unwrap_or_default(),
            ]
            .join(" ");
            (message.unwrap_or_else(|| body.trim().to_string()), markers)
        }
        Some(ErrorBody::Plain(message)) => (message, String::new()),
        None if body.trim().is_empty() => (format!("HTTP {status}"), String::new()),
        None => (truncate(body.trim(), 500), String::new()),
    };

    let err = ModelError::http(status, format!("{provider}: {message}"));
    if is_moderation(&markers) || is_moderation(&message) {
        err.flagged()
    } else {
        err
    }
}

fn is_moderation(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    ["moderation", "content_filter", "content_policy", "safety", "flagged"]
        .iter()
        .any(|m| lower.contains(m))
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

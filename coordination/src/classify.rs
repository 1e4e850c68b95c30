//! Error classification for model call failures.
//!
//! Maps a raw [`ModelError`] onto one of eleven [`ErrorCategory`] values.
//! Classification runs once per failed call, inside the dispatcher; every
//! downstream consumer (aggregation, exit codes, summary text, retry
//! decisions in callers) switches on the category, never on the raw error.
//!
//! ## Precedence
//!
//! 1. HTTP status, when the backend answered.
//! 2. Transport kind (timeout / connect / cancelled), when it did not.
//! 3. The moderation flag.
//! 4. Message patterns.
//! 5. `Unknown`.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::{ModelError, TransportKind};

static NETWORK_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(timed? ?out|connection (refused|reset|closed)|broken pipe|dns|no such host|unexpected eof|network (is )?unreachable|network error)",
    )
    .unwrap()
});

static CANCELLED_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(context cancel+ed|\bcancel+ed\b|deadline exceeded|operation aborted)").unwrap()
});

static INPUT_LIMIT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(context[ _](length|window)|maximum context|too many tokens|token limit|max_tokens|prompt is too long|input (is )?too (long|large)|exceeds? the (maximum|limit))",
    )
    .unwrap()
});

static RATE_LIMIT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(rate[ _-]?limit|too many requests|resource[ _]exhausted)").unwrap());

static AUTH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(unauthori[sz]ed|invalid (api[ _-]?)?key|authentication|permission denied|forbidden)")
        .unwrap()
});

static CREDITS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(insufficient (credits|funds|balance|quota)|payment required|billing|credit balance)")
        .unwrap()
});

static MODERATION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(moderation|content[ _]?(filter|policy)|safety|flagged|blocked)").unwrap()
});

static NOT_FOUND_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(model[^.]* (not found|does not exist)|no such model|unknown model)").unwrap()
});

/// Category attached to every failed model outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Auth,
    RateLimit,
    InvalidRequest,
    NotFound,
    Server,
    Network,
    Cancelled,
    InputLimit,
    ContentFiltered,
    InsufficientCredits,
    Unknown,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 11] = [
        Self::Auth,
        Self::RateLimit,
        Self::InvalidRequest,
        Self::NotFound,
        Self::Server,
        Self::Network,
        Self::Cancelled,
        Self::InputLimit,
        Self::ContentFiltered,
        Self::InsufficientCredits,
        Self::Unknown,
    ];

    /// Whether a caller may reasonably retry after this category.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::RateLimit | Self::Server | Self::Network)
    }

    /// User-facing hint shown next to the failure in the run summary.
    pub fn suggestion(self) -> &'static str {
        match self {
            Self::Auth => "check that the API key for this provider is set and valid",
            Self::RateLimit => {
                "reduce --max-concurrent or --rate-limit (or the provider-specific rate limit), or retry later"
            }
            Self::InvalidRequest => "check the model name and request parameters",
            Self::NotFound => "check that the model name exists for this provider",
            Self::Server => "the provider reported an internal error; retry later",
            Self::Network => "check network connectivity or increase --timeout",
            Self::Cancelled => "the run deadline expired or the run was interrupted; increase --timeout",
            Self::InputLimit => {
                "reduce the context with --include/--exclude or pick a model with a larger context window"
            }
            Self::ContentFiltered => {
                "the provider's safety filter rejected the request; revise the instructions or context"
            }
            Self::InsufficientCredits => "add credits or check billing for this provider account",
            Self::Unknown => "rerun with RUST_LOG=debug for details",
        }
    }

    /// Process exit code used when a failed run is dominated by this category.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Auth => 2,
            Self::RateLimit => 3,
            Self::InvalidRequest | Self::NotFound => 4,
            Self::Server => 5,
            Self::Network => 6,
            Self::InputLimit => 7,
            Self::ContentFiltered => 8,
            Self::InsufficientCredits => 9,
            Self::Cancelled => 10,
            Self::Unknown => 1,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Auth => "auth",
            Self::RateLimit => "rate_limit",
            Self::InvalidRequest => "invalid_request",
            Self::NotFound => "not_found",
            Self::Server => "server",
            Self::Network => "network",
            Self::Cancelled => "cancelled",
            Self::InputLimit => "input_limit",
            Self::ContentFiltered => "content_filtered",
            Self::InsufficientCredits => "insufficient_credits",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// A model failure after classification. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub category: ErrorCategory,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ClassifiedError {
    pub fn from_model_error(err: &ModelError) -> Self {
        Self {
            category: classify(err),
            message: err.message.clone(),
            status: err.status,
        }
    }

    /// An error synthesized by the core itself (cancellation, lost task).
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            status: None,
        }
    }

    pub fn suggestion(&self) -> &'static str {
        self.category.suggestion()
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)
    }
}

/// Classify a model error. Pure and deterministic.
pub fn classify(err: &ModelError) -> ErrorCategory {
    if let Some(status) = err.status {
        return classify_status(status, &err.message, err.moderation_flagged);
    }

    match err.transport {
        Some(TransportKind::Cancelled) => return ErrorCategory::Cancelled,
        Some(TransportKind::Timeout) | Some(TransportKind::Connect) => {
            return ErrorCategory::Network
        }
        None => {}
    }

    if err.moderation_flagged {
        return ErrorCategory::ContentFiltered;
    }

    classify_message(&err.message)
}

/// Classify from a bare message and optional status code.
pub fn classify_raw(message: &str, status: Option<u16>) -> ErrorCategory {
    match status {
        Some(status) => classify_status(status, message, false),
        None => classify_message(message),
    }
}

fn classify_status(status: u16, message: &str, flagged: bool) -> ErrorCategory {
    let moderation = flagged || MODERATION_PATTERN.is_match(message);
    match status {
        403 if moderation => ErrorCategory::ContentFiltered,
        401 | 403 => ErrorCategory::Auth,
        402 => ErrorCategory::InsufficientCredits,
        429 => ErrorCategory::RateLimit,
        404 => ErrorCategory::NotFound,
        408 => ErrorCategory::Network,
        413 => ErrorCategory::InputLimit,
        400..=499 if INPUT_LIMIT_PATTERN.is_match(message) => ErrorCategory::InputLimit,
        400..=499 if moderation => ErrorCategory::ContentFiltered,
        400..=499 if CREDITS_PATTERN.is_match(message) => ErrorCategory::InsufficientCredits,
        400..=499 => ErrorCategory::InvalidRequest,
        500..=599 => ErrorCategory::Server,
        _ => classify_message(message),
    }
}

fn classify_message(message: &str) -> ErrorCategory {
    if NETWORK_PATTERN.is_match(message) {
        ErrorCategory::Network
    } else if CANCELLED_PATTERN.is_match(message) {
        ErrorCategory::Cancelled
    } else if INPUT_LIMIT_PATTERN.is_match(message) {
        ErrorCategory::InputLimit
    } else if RATE_LIMIT_PATTERN.is_match(message) {
        ErrorCategory::RateLimit
    } else if CREDITS_PATTERN.is_match(message) {
        ErrorCategory::InsufficientCredits
    } else if AUTH_PATTERN.is_match(message) {
        ErrorCategory::Auth
    } else if MODERATION_PATTERN.is_match(message) {
        ErrorCategory::ContentFiltered
    } else if NOT_FOUND_PATTERN.is_match(message) {
        ErrorCategory::NotFound
    } else {
        ErrorCategory::Unknown
    }
}

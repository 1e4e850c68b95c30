//! Error types shared by the run core.
//!
//! Two families live here:
//!
//! | Type         | Raised by                      | Fatal to the run? |
//! |--------------|--------------------------------|-------------------|
//! | `ModelError` | `ModelCaller` implementations  | never (per model) |
//! | `RunError`   | setup, gathering, state guards | always            |
//!
//! A `ModelError` is classified exactly once into an
//! [`ErrorCategory`](crate::classify::ErrorCategory) by the dispatcher and
//! never escapes the per-model outcome it belongs to.

use std::fmt;

use thiserror::Error;

use crate::admission::AdmissionError;
use crate::context::GatherError;
use crate::orchestrator::state_machine::IllegalTransition;

/// Low-level transport failure reported by a model caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// The request (or its response body) timed out.
    Timeout,
    /// The connection could not be established or was reset.
    Connect,
    /// The caller observed cancellation of its call context.
    Cancelled,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Connect => write!(f, "connect"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A failed call to a model backend.
///
/// Carries just enough structure for classification: the HTTP status when
/// the backend answered, the transport kind when it did not, and whether
/// the backend flagged the request for moderation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub struct ModelError {
    pub message: String,
    pub status: Option<u16>,
    pub transport: Option<TransportKind>,
    pub moderation_flagged: bool,
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.status, self.transport) {
            (Some(status), _) => write!(f, "HTTP {status}: {}", self.message),
            (None, Some(kind)) => write!(f, "{kind}: {}", self.message),
            (None, None) => write!(f, "{}", self.message),
        }
    }
}

impl ModelError {
    /// An error with no status code or transport hint.
    pub fn other(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            transport: None,
            moderation_flagged: false,
        }
    }

    /// The backend answered with a non-success HTTP status.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            ..Self::other(message)
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            transport: Some(TransportKind::Timeout),
            ..Self::other(message)
        }
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self {
            transport: Some(TransportKind::Connect),
            ..Self::other(message)
        }
    }

    pub fn cancelled() -> Self {
        Self {
            transport: Some(TransportKind::Cancelled),
            ..Self::other("call cancelled before completion")
        }
    }

    /// Mark the error as a moderation / safety rejection.
    pub fn flagged(mut self) -> Self {
        self.moderation_flagged = true;
        self
    }
}

/// Errors that abort a run before or outside per-model processing.
#[derive(Debug, Error)]
pub enum RunError {
    /// Configuration is invalid or incomplete.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The context gatherer could not produce a context set.
    #[error("Context gathering failed: {0}")]
    ContextGathering(#[from] GatherError),

    /// A limiter could not be constructed or used.
    #[error("Admission control error: {0}")]
    Admission(#[from] AdmissionError),

    /// The orchestrator attempted an edge outside the state graph.
    #[error(transparent)]
    IllegalTransition(#[from] IllegalTransition),

    /// Any other error that doesn't fit the above categories.
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl RunError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

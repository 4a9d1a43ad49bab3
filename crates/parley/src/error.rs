//! Error taxonomy.
//!
//! Tool-level failures ([`ToolFailure`]) are data: they are serialized into
//! the conversation so the model can adapt. Everything else is resolved at the
//! orchestrator boundary into a [`ChatResponse`](crate::ChatResponse), except
//! [`ValidationError`], which is the caller's fault and is returned as `Err`.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

// ── Tool failures ──────────────────────────────────────────────────

/// Classification of an expected tool failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ToolErrorKind {
    /// The model asked for a tool that is not registered.
    UnknownTool,
    /// The arguments are malformed or fail validation.
    InvalidArgument,
    /// The upstream provider throttled the request.
    RateLimited,
    /// Network failure, timeout or 5xx from the upstream provider.
    TransientUpstream,
    /// Credentials the tool needs are absent or rejected.
    NotConfigured,
}

impl ToolErrorKind {
    /// Whether the resilient invoker may try again.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::RateLimited | Self::TransientUpstream)
    }
}

impl std::fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::UnknownTool => "UnknownTool",
            Self::InvalidArgument => "InvalidArgument",
            Self::RateLimited => "RateLimited",
            Self::TransientUpstream => "TransientUpstream",
            Self::NotConfigured => "NotConfigured",
        };
        f.write_str(s)
    }
}

/// A structured tool failure: a kind plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ToolFailure {
    pub kind: ToolErrorKind,
    pub message: String,
}

impl ToolFailure {
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unknown_tool(name: &str) -> Self {
        Self::new(ToolErrorKind::UnknownTool, format!("unknown tool '{name}'"))
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::InvalidArgument, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::RateLimited, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::TransientUpstream, message)
    }

    pub fn not_configured(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::NotConfigured, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

// ── Model gateway ──────────────────────────────────────────────────

/// Why the model gateway could not produce a response.
///
/// Every variant means "model unavailable" to the orchestrator.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("model gateway is not configured: {0}")]
    NotConfigured(String),
    #[error("model credentials were rejected (HTTP {status}): {body}")]
    Unauthorized { status: u16, body: String },
    #[error("model endpoint returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("request failed: {0}")]
    Transport(String),
    #[error("malformed model response: {0}")]
    Malformed(String),
}

impl GatewayError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::Transport(_) => true,
            _ => false,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::NotConfigured(_) | Self::Unauthorized { .. })
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Http { status: 429, .. })
    }
}

// ── Orchestrator ───────────────────────────────────────────────────

/// Rejected user input. Never retried; nothing is mutated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("message must not be empty")]
    EmptyMessage,
    #[error("message is {len} characters, the limit is {max}")]
    MessageTooLong { len: usize, max: usize },
}

/// Terminal failures of a `handle` call, converted to a `success: false`
/// response at the loop boundary.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("model unavailable: {0}")]
    ModelUnavailable(#[from] GatewayError),
    #[error("iteration limit of {max_rounds} rounds exceeded")]
    IterationLimitExceeded { max_rounds: u32 },
    #[error("request deadline of {0:?} exceeded")]
    Timeout(Duration),
    #[error("tool '{0}' panicked")]
    ToolPanicked(String),
}

impl OrchestratorError {
    /// Fixed, user-facing explanation for this failure.
    pub fn user_message(&self) -> String {
        match self {
            Self::ModelUnavailable(e) if e.is_auth() => {
                "I'm having trouble with my API configuration. Please check the model credentials."
                    .into()
            }
            Self::ModelUnavailable(e) if e.is_rate_limited() => {
                "I'm currently experiencing high demand. Please try again in a moment.".into()
            }
            Self::ModelUnavailable(e) => {
                format!("I encountered an error while processing your request: {e}")
            }
            Self::IterationLimitExceeded { .. } => {
                "I wasn't able to finish within the allowed number of steps. Please try a more specific request."
                    .into()
            }
            Self::Timeout(_) => "The request took too long to complete. Please try again.".into(),
            Self::ToolPanicked(name) => {
                format!("An internal error occurred while running the '{name}' tool.")
            }
        }
    }
}

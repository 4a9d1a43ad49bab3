//! The model seam.
//!
//! The orchestrator only ever talks to a [`ModelGateway`]: hand it the
//! history and the tool definitions, get back either a final answer or a list
//! of tool calls. Provider details (HTTP, auth, response parsing) live in the
//! implementations.

use crate::error::GatewayError;
use crate::{Message, ToolCall, ToolDef};
use std::future::Future;
use std::pin::Pin;

/// What the model wants next. The two variants are exclusive.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelResponse {
    /// A plain-text answer; the round loop ends.
    FinalText(String),
    /// Tools to run before asking again. Never empty.
    ToolCalls(Vec<ToolCall>),
}

impl ModelResponse {
    /// Build a response from a provider's raw `(content, tool_calls)` pair.
    ///
    /// Tool calls win: any accompanying text is dropped so the variants stay
    /// exclusive. No content and no calls reads as an empty final answer.
    pub fn from_parts(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        if tool_calls.is_empty() {
            ModelResponse::FinalText(content.unwrap_or_default())
        } else {
            ModelResponse::ToolCalls(tool_calls)
        }
    }
}

/// Boxed future returned by [`ModelGateway::invoke`].
pub type GatewayFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ModelResponse, GatewayError>> + Send + 'a>>;

/// A language-model endpoint.
///
/// Implementations must be shareable across concurrent `handle` calls.
pub trait ModelGateway: Send + Sync {
    /// Ask the model for its next step given the full history.
    fn invoke<'a>(&'a self, messages: &'a [Message], tools: &'a [ToolDef]) -> GatewayFuture<'a>;

    /// Whether the gateway has what it needs to reach the model.
    fn is_configured(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_calls_take_precedence_over_text() {
        let call = ToolCall::new("c1", "web_search", serde_json::json!({"query": "x"}));
        let resp = ModelResponse::from_parts(Some("let me look".into()), vec![call.clone()]);
        assert_eq!(resp, ModelResponse::ToolCalls(vec![call]));
    }

    #[test]
    fn text_only_is_final() {
        let resp = ModelResponse::from_parts(Some("done".into()), vec![]);
        assert_eq!(resp, ModelResponse::FinalText("done".into()));

        let empty = ModelResponse::from_parts(None, vec![]);
        assert_eq!(empty, ModelResponse::FinalText(String::new()));
    }
}

//! Tool-calling conversation orchestrator.
//!
//! `parley` drives a multi-turn exchange between a chat-completions model and
//! a small set of external tools. The core abstraction is the
//! [`Orchestrator`](agent::orchestrator::Orchestrator): given a thread id and
//! a user message, it asks the model, runs any tools the model requested,
//! feeds the results back, and repeats until the model answers in plain text
//! or the round limit is reached.
//!
//! # Getting started
//!
//! ```ignore
//! use parley::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = Settings::from_env();
//!     let orchestrator = settings.build_orchestrator()?;
//!
//!     let reply = orchestrator.handle(None, "Search for Python tutorials").await?;
//!     println!("[{}] {}", reply.thread_id, reply.response);
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! - **Define tools:** the [`Tool`](tools::core::Tool) trait,
//!   [`ToolRegistry`](tools::core::ToolRegistry) for lookup and dispatch,
//!   [`FnTool`](tools::core::FnTool) for closure-based tools, and
//!   [`ToolSpec`](tools::spec::ToolSpec) for descriptions with
//!   `when_to_use` / `when_not_to_use` guidance.
//!
//! - **Retry flaky tools:** [`ResilientInvoker`](tools::invoker::ResilientInvoker)
//!   with a [`RetryPolicy`](api::retry::RetryPolicy).
//!
//! - **Talk to a model:** the [`ModelGateway`](api::gateway::ModelGateway)
//!   trait, [`OpenAiGateway`](api::openai::OpenAiGateway) for
//!   OpenAI-compatible endpoints, and
//!   [`ScriptedGateway`](api::scripted::ScriptedGateway) for tests.
//!
//! - **Keep conversations:** [`ThreadStore`](agent::store::ThreadStore).
//!
//! - **Observe a run:** implement [`EventHandler`](agent::events::EventHandler)
//!   or use [`LoggingHandler`](agent::events::LoggingHandler).
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`agent`] | Orchestrator state machine, config, events, thread store |
//! | [`tools`] | Tool trait, registry, resilient invoker, search and metrics tools |
//! | [`api`] | Model gateway trait and implementations, retry policy |
//! | [`error`] | Error taxonomy shared across the crate |
//! | [`settings`] | Environment-driven wiring for the binary |

pub mod agent;
pub mod api;
pub mod error;
pub mod prelude;
pub mod settings;
pub mod tools;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ToolFailure;
use crate::tools::core::ToolArgs;

// Re-export schemars for downstream crates.
pub use schemars;

// ── Constants ──────────────────────────────────────────────────────

/// Default base URL for the OpenAI-compatible chat completions endpoint.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Default model for all LLM calls.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Maximum accepted length of a user message, in characters.
pub const MAX_MESSAGE_CHARS: usize = 1000;

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` from a type that implements
/// `schemars::JsonSchema`. This is the bridge between typed tool arguments
/// and the `serde_json::Value` that the function-calling API expects.
///
/// # Example
///
/// ```
/// use parley::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct SearchArgs {
///     query: String,
///     #[serde(default)]
///     max_results: Option<u32>,
/// }
///
/// let schema = json_schema_for::<SearchArgs>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"query".into()));
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// One turn in the conversation, in the chat-completions wire shape.
///
/// `tool_calls` is only set on assistant messages that request tools;
/// `tool_call_id` is only set on tool-role messages.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant_text(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant_tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: None,
            tool_calls: Some(calls),
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
        }
    }

    /// Text content, or `""` for content-less messages.
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

// ── Tool types ─────────────────────────────────────────────────────

/// The type of a tool definition. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum ToolType {
    #[serde(rename = "function")]
    Function,
}

/// Tool definition sent to the API (OpenAI function-calling format).
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub tool_type: ToolType,
    pub function: FunctionDef,
}

impl ToolDef {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            tool_type: ToolType::Function,
            function: FunctionDef {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// The type of a tool call. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum CallType {
    #[serde(rename = "function")]
    Function,
}

/// A tool call returned by the model.
///
/// Arguments stay in their wire form (a JSON-encoded object) so the history
/// replays byte-for-byte; [`ToolCall::arguments_map`] decodes them.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: CallType,
    pub function: FunctionCallData,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FunctionCallData {
    pub name: String,
    pub arguments: String,
}

impl ToolCall {
    /// Build a call from a name and a JSON value for the arguments.
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            call_type: CallType::Function,
            function: FunctionCallData {
                name: name.into(),
                arguments: arguments.to_string(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }

    /// Decode the arguments into a parameter map.
    ///
    /// An empty string is treated as `{}`. Anything that is not a JSON object
    /// is an `InvalidArgument` failure.
    pub fn arguments_map(&self) -> Result<ToolArgs, ToolFailure> {
        let raw = self.function.arguments.trim();
        if raw.is_empty() {
            return Ok(ToolArgs::new());
        }
        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(serde_json::Value::Object(map)) => Ok(map),
            Ok(other) => Err(ToolFailure::invalid_argument(format!(
                "arguments for '{}' must be a JSON object, got {other}",
                self.function.name
            ))),
            Err(e) => Err(ToolFailure::invalid_argument(format!(
                "arguments for '{}' are not valid JSON: {e}",
                self.function.name
            ))),
        }
    }
}

// ── Orchestrator I/O ───────────────────────────────────────────────

/// Inbound request: a user message and an optional thread to continue.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

/// Outbound response. `response` is never empty, on success or failure.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub response: String,
    pub thread_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChatResponse {
    pub fn ok(thread_id: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            thread_id: thread_id.into(),
            success: true,
            error: None,
        }
    }

    pub fn failed(
        thread_id: impl Into<String>,
        response: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            response: response.into(),
            thread_id: thread_id.into(),
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Health/status snapshot for an introspection collaborator.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub available_tools: Vec<String>,
    pub model_configured: bool,
    /// Whether every tool that needs credentials has them.
    pub rule_dependent_tools_configured: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors() {
        let sys = Message::system("hello");
        assert_eq!(sys.role, MessageRole::System);
        assert_eq!(sys.content.as_deref(), Some("hello"));

        let user = Message::user("world");
        assert_eq!(user.role, MessageRole::User);

        let tool = Message::tool_result("call-1", "result");
        assert_eq!(tool.role, MessageRole::Tool);
        assert_eq!(tool.tool_call_id.as_deref(), Some("call-1"));

        let calls = Message::assistant_tool_calls(vec![ToolCall::new(
            "c1",
            "web_search",
            serde_json::json!({"query": "rust"}),
        )]);
        assert_eq!(calls.text(), "");
        assert_eq!(calls.tool_calls.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn message_serializes_in_wire_shape() {
        let json = serde_json::to_value(Message::user("hi")).unwrap();
        assert_eq!(json["role"], "user");
        assert!(json.get("tool_calls").is_none());
        assert!(json.get("tool_call_id").is_none());
    }

    #[test]
    fn tool_call_arguments_decode() {
        let call = ToolCall::new("c1", "web_search", serde_json::json!({"query": "rust"}));
        let args = call.arguments_map().unwrap();
        assert_eq!(args["query"], "rust");

        let empty = ToolCall {
            function: FunctionCallData {
                name: "x".into(),
                arguments: "  ".into(),
            },
            ..call.clone()
        };
        assert!(empty.arguments_map().unwrap().is_empty());
    }

    #[test]
    fn tool_call_rejects_non_object_arguments() {
        let mut call = ToolCall::new("c1", "web_search", serde_json::json!([1, 2]));
        let err = call.arguments_map().unwrap_err();
        assert_eq!(err.kind, crate::error::ToolErrorKind::InvalidArgument);

        call.function.arguments = "{not json".into();
        assert!(call.arguments_map().is_err());
    }

    #[test]
    fn chat_response_uses_camel_case() {
        let resp = ChatResponse::ok("t-1", "done");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["threadId"], "t-1");
        assert!(json.get("error").is_none());

        let req: ChatRequest =
            serde_json::from_str(r#"{"message": "hi", "threadId": "abc"}"#).unwrap();
        assert_eq!(req.thread_id.as_deref(), Some("abc"));
    }
}

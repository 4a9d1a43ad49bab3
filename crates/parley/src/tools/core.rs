//! Tool abstraction for the orchestrator.
//!
//! The [`Tool`] trait defines what every tool implements: a name, a
//! description for the model, a JSON Schema for its arguments, and an async
//! `invoke` that returns structured data or a typed [`ToolFailure`]. Tools are
//! collected into a [`ToolRegistry`], which handles lookup, definition export,
//! and argument validation. Retrying is the job of the
//! [`ResilientInvoker`](super::invoker::ResilientInvoker), not of the tools.

use crate::error::{ToolErrorKind, ToolFailure};
use crate::{Message, ToolDef, json_schema_for};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, info, trace};

/// Maximum size (in bytes) of a serialized tool result fed back to the model.
pub const DEFAULT_MAX_RESULT_BYTES: usize = 30_000;

/// Decoded tool-call arguments: parameter name to value.
pub type ToolArgs = serde_json::Map<String, Value>;

/// Structured success payload of a tool.
pub type ToolData = serde_json::Map<String, Value>;

/// What a single tool attempt produces.
pub type ToolOutcome = Result<ToolData, ToolFailure>;

/// Boxed future returned by [`Tool::invoke`].
pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = ToolOutcome> + Send + 'a>>;

// ── Tool trait ─────────────────────────────────────────────────────

/// A capability the model can invoke via function-calling.
///
/// `invoke` must tolerate being called repeatedly with the same arguments,
/// since retries resend them unchanged. Expected failures (bad arguments,
/// missing credentials, throttling) are returned as [`ToolFailure`] values,
/// never as panics.
///
/// # Example
///
/// ```ignore
/// struct Clock;
///
/// impl Tool for Clock {
///     fn name(&self) -> &str { "clock" }
///     fn description(&self) -> String { "Current UTC time".into() }
///     fn parameters(&self) -> serde_json::Value {
///         serde_json::json!({"type": "object", "properties": {}})
///     }
///     fn invoke<'a>(&'a self, _arguments: &'a ToolArgs) -> ToolFuture<'a> {
///         Box::pin(async move {
///             Ok(into_data(serde_json::json!({"now": chrono::Utc::now().to_rfc3339()})))
///         })
///     }
/// }
/// ```
pub trait Tool: Send + Sync {
    /// Registry key and the name the model calls.
    fn name(&self) -> &str;

    /// Selection guidance shown to the model.
    fn description(&self) -> String;

    /// JSON Schema for the arguments object.
    fn parameters(&self) -> Value;

    /// The definition sent to the model API.
    fn definition(&self) -> ToolDef {
        ToolDef::new(self.name(), self.description(), self.parameters())
    }

    /// Run the tool once.
    ///
    /// Uses a boxed future so that the trait is dyn-compatible.
    fn invoke<'a>(&'a self, arguments: &'a ToolArgs) -> ToolFuture<'a>;

    /// Whether the tool needs credentials to work at all.
    fn requires_credentials(&self) -> bool {
        false
    }

    /// Whether the tool's credentials are present.
    fn is_configured(&self) -> bool {
        true
    }

    /// Payload returned in place of a hard failure once retries run out.
    ///
    /// Override to offer a manual fallback the end user can act on.
    fn degraded_payload(&self, arguments: &ToolArgs, failure: &ToolFailure) -> ToolData {
        let _ = arguments;
        default_degraded_payload(self.name(), failure)
    }
}

// ── ToolRegistry ───────────────────────────────────────────────────

/// Tools keyed by name.
///
/// Definitions are exported in name order so that identical registries
/// produce identical model requests.
///
/// # Example
///
/// ```ignore
/// let registry = ToolRegistry::new()
///     .with(SearchTool::from_keys(tavily_key))
///     .with_if(datadog_enabled, MetricsTool::new(datadog));
///
/// let defs = registry.definitions();
/// ```
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn Tool>>,
    /// Whether to validate arguments against the tool's JSON Schema.
    validate_args: bool,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .field("validate_args", &self.validate_args)
            .finish()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    /// Create an empty registry with argument validation enabled.
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
            validate_args: true,
        }
    }

    /// Enable or disable JSON Schema argument validation.
    pub fn with_arg_validation(mut self, enabled: bool) -> Self {
        self.validate_args = enabled;
        self
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        debug!("Registering tool '{name}'");
        self.tools.insert(name, Box::new(tool));
    }

    /// Register a tool (builder pattern).
    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.register(tool);
        self
    }

    /// Conditionally register a tool (builder pattern).
    pub fn with_if(self, condition: bool, tool: impl Tool + 'static) -> Self {
        if condition { self.with(tool) } else { self }
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Look up a tool, failing with `UnknownTool`.
    pub fn lookup(&self, name: &str) -> Result<&dyn Tool, ToolFailure> {
        self.get(name).ok_or_else(|| {
            let mut failure = ToolFailure::unknown_tool(name);
            if !self.tools.is_empty() {
                failure.message = format!(
                    "{}. Available tools: {}",
                    failure.message,
                    self.names().join(", ")
                );
            }
            failure
        })
    }

    /// All tool definitions for the model API.
    pub fn definitions(&self) -> Vec<ToolDef> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Whether every credential-dependent tool has its credentials.
    ///
    /// Vacuously `true` when no registered tool needs credentials.
    pub fn all_credentials_configured(&self) -> bool {
        self.tools
            .values()
            .filter(|t| t.requires_credentials())
            .all(|t| t.is_configured())
    }

    /// Validate arguments against the tool's schema, if validation is on.
    pub fn validate_arguments(&self, tool: &dyn Tool, arguments: &ToolArgs) -> Result<(), ToolFailure> {
        if !self.validate_args {
            return Ok(());
        }
        validate_tool_arguments(tool, arguments)
    }
}

// ── ToolResult ─────────────────────────────────────────────────────

/// Outcome of executing one tool call, correlated to the call by id.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub call_id: String,
    pub tool_name: String,
    pub outcome: ToolOutcome,
    /// Attempts made, including the first. Zero when the call never reached
    /// the tool (unknown name, bad arguments).
    pub attempts: u32,
}

impl ToolResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Whether this is a success produced after retries ran out.
    pub fn is_degraded(&self) -> bool {
        matches!(&self.outcome, Ok(data) if data.get("degraded") == Some(&Value::Bool(true)))
    }

    pub fn failure_kind(&self) -> Option<ToolErrorKind> {
        self.outcome.as_ref().err().map(|f| f.kind)
    }

    /// The `{success, data?, error?}` view of this result.
    pub fn to_output(&self) -> ToolOutput {
        match &self.outcome {
            Ok(data) => ToolOutput {
                success: true,
                data: Some(data.clone()),
                error: None,
                error_kind: None,
            },
            Err(failure) => ToolOutput {
                success: false,
                data: None,
                error: Some(failure.message.clone()),
                error_kind: Some(failure.kind),
            },
        }
    }

    /// The `tool`-role message carrying this result to the model.
    pub fn to_message(&self, max_bytes: usize) -> Message {
        let body = serde_json::to_string(&self.to_output())
            .unwrap_or_else(|e| format!(r#"{{"success":false,"error":"unserializable result: {e}"}}"#));
        Message::tool_result(&self.call_id, truncate_result(body, max_bytes))
    }
}

/// Serialized tool invocation output.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ToolData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ToolErrorKind>,
}

// ── FnTool ─────────────────────────────────────────────────────────

/// Type-erased async handler for [`FnTool`].
type ErasedToolHandler = Box<dyn Fn(ToolArgs) -> ToolFuture<'static> + Send + Sync>;

/// A closure-based tool that parses typed arguments and delegates to a handler.
///
/// The parameter schema is derived from the argument type. Arguments that do
/// not deserialize into `A` produce an `InvalidArgument` failure without
/// calling the handler.
///
/// # Example
///
/// ```ignore
/// #[derive(Deserialize, JsonSchema)]
/// struct EchoArgs { text: String }
///
/// let tool = FnTool::new("echo", "Echo the input", |args: EchoArgs| async move {
///     Ok(into_data(serde_json::json!({"text": args.text})))
/// });
/// ```
pub struct FnTool {
    name: String,
    description: String,
    parameters: Value,
    handler: ErasedToolHandler,
    credentials: Option<bool>,
}

impl FnTool {
    pub fn new<A, F, Fut>(name: impl Into<String>, description: impl Into<String>, handler: F) -> Self
    where
        A: serde::de::DeserializeOwned + schemars::JsonSchema + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolOutcome> + Send + 'static,
    {
        let erased = move |raw: ToolArgs| -> ToolFuture<'static> {
            match parse_tool_args::<A>(&raw) {
                Ok(args) => Box::pin(handler(args)),
                Err(failure) => Box::pin(async move { Err(failure) }),
            }
        };

        Self {
            name: name.into(),
            description: description.into(),
            parameters: json_schema_for::<A>(),
            handler: Box::new(erased),
            credentials: None,
        }
    }

    /// Mark the tool as credential-dependent, with the given configured state.
    pub fn requiring_credentials(mut self, configured: bool) -> Self {
        self.credentials = Some(configured);
        self
    }
}

impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn parameters(&self) -> Value {
        self.parameters.clone()
    }

    fn invoke<'a>(&'a self, arguments: &'a ToolArgs) -> ToolFuture<'a> {
        (self.handler)(arguments.clone())
    }

    fn requires_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    fn is_configured(&self) -> bool {
        self.credentials.unwrap_or(true)
    }
}

impl fmt::Debug for FnTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTool").field("name", &self.name).finish()
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Validate arguments against the tool's declared JSON Schema.
pub fn validate_tool_arguments(tool: &dyn Tool, arguments: &ToolArgs) -> Result<(), ToolFailure> {
    let schema = tool.parameters();

    // A tool with a broken schema is still callable; its own parsing decides.
    let Ok(validator) = jsonschema::validator_for(&schema) else {
        return Ok(());
    };

    let instance = Value::Object(arguments.clone());
    let errors: Vec<String> = validator
        .iter_errors(&instance)
        .map(|e| format!("{}: {e}", e.instance_path()))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ToolFailure::invalid_argument(format!(
            "argument validation failed for tool '{}': {}",
            tool.name(),
            errors.join("; ")
        )))
    }
}

/// Deserialize arguments into a typed struct, failing with `InvalidArgument`.
pub fn parse_tool_args<T: serde::de::DeserializeOwned>(arguments: &ToolArgs) -> Result<T, ToolFailure> {
    serde_json::from_value(Value::Object(arguments.clone()))
        .map_err(|e| ToolFailure::invalid_argument(format!("invalid tool arguments: {e}")))
}

/// Wrap a JSON value as tool data. Non-objects land under `"value"`.
pub fn into_data(value: Value) -> ToolData {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = ToolData::new();
            map.insert("value".into(), other);
            map
        }
    }
}

/// Generic "temporarily unavailable" payload used when a tool has no
/// specific fallback to offer.
pub fn default_degraded_payload(tool_name: &str, failure: &ToolFailure) -> ToolData {
    into_data(serde_json::json!({
        "degraded": true,
        "tool": tool_name,
        "message": format!(
            "The {tool_name} tool is temporarily unavailable. Please try again in a few minutes."
        ),
        "reason": failure.message,
    }))
}

/// Log a tool call at INFO level with a truncated preview of arguments.
pub fn log_tool_call(name: &str, arguments: &ToolArgs) {
    let raw = Value::Object(arguments.clone()).to_string();
    let args_preview: String = raw.chars().take(120).collect();
    info!(
        "[tool] {}({args_preview}{})",
        name,
        if raw.chars().count() > 120 { "..." } else { "" }
    );
    debug!("[tool] {name} full args ({} bytes)", raw.len());
    trace!("[tool] {name} arguments: {raw}");
}

/// Truncate a string to at most `max` bytes on a char boundary, appending a
/// notice if trimmed.
pub fn truncate_result(mut s: String, max: usize) -> String {
    if s.len() <= max {
        return s;
    }
    let total = s.len();
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s.truncate(cut);
    format!("{s}...\n[truncated: {total} bytes total]")
}

/// Truncate to at most `max` characters, appending `...` if trimmed.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max).collect();
        format!("{head}...")
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use schemars::JsonSchema;
    use serde_json::json;

    struct EchoTool;

    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> String {
            "Echo the input".into()
        }

        fn parameters(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            })
        }

        fn invoke<'a>(&'a self, arguments: &'a ToolArgs) -> ToolFuture<'a> {
            Box::pin(async move {
                match arguments.get("text").and_then(Value::as_str) {
                    Some(text) => Ok(into_data(json!({ "text": text }))),
                    None => Err(ToolFailure::invalid_argument("no text")),
                }
            })
        }
    }

    struct KeyedTool {
        configured: bool,
    }

    impl Tool for KeyedTool {
        fn name(&self) -> &str {
            "keyed"
        }

        fn description(&self) -> String {
            "Needs a key".into()
        }

        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }

        fn invoke<'a>(&'a self, _arguments: &'a ToolArgs) -> ToolFuture<'a> {
            Box::pin(async { Err(ToolFailure::not_configured("missing key")) })
        }

        fn requires_credentials(&self) -> bool {
            true
        }

        fn is_configured(&self) -> bool {
            self.configured
        }
    }

    fn args(value: Value) -> ToolArgs {
        into_data(value)
    }

    #[test]
    fn registry_definitions_are_sorted() {
        let registry = ToolRegistry::new()
            .with(KeyedTool { configured: true })
            .with(EchoTool);
        assert_eq!(registry.len(), 2);

        let names: Vec<String> = registry
            .definitions()
            .iter()
            .map(|d| d.function.name.clone())
            .collect();
        assert_eq!(names, vec!["echo".to_string(), "keyed".to_string()]);
    }

    #[test]
    fn lookup_unknown_tool_lists_available() {
        let registry = ToolRegistry::new().with(EchoTool);
        let err = registry.lookup("nonexistent").err().unwrap();
        assert_eq!(err.kind, ToolErrorKind::UnknownTool);
        assert!(err.message.contains("echo"));
    }

    #[test]
    fn with_if_respects_condition() {
        let registry = ToolRegistry::new()
            .with_if(false, EchoTool)
            .with_if(true, KeyedTool { configured: true });
        assert_eq!(registry.names(), vec!["keyed".to_string()]);
    }

    #[test]
    fn credentials_configured_only_counts_dependent_tools() {
        assert!(ToolRegistry::new().with(EchoTool).all_credentials_configured());
        assert!(
            !ToolRegistry::new()
                .with(EchoTool)
                .with(KeyedTool { configured: false })
                .all_credentials_configured()
        );
    }

    #[test]
    fn schema_validation_rejects_missing_field() {
        let registry = ToolRegistry::new().with(EchoTool);
        let tool = registry.lookup("echo").unwrap();

        assert!(registry.validate_arguments(tool, &args(json!({"text": "hi"}))).is_ok());

        let err = registry.validate_arguments(tool, &args(json!({}))).unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::InvalidArgument);
        assert!(err.message.contains("echo"));
    }

    #[test]
    fn validation_can_be_disabled() {
        let registry = ToolRegistry::new().with_arg_validation(false).with(EchoTool);
        let tool = registry.lookup("echo").unwrap();
        assert!(registry.validate_arguments(tool, &args(json!({}))).is_ok());
    }

    #[tokio::test]
    async fn fn_tool_parses_typed_arguments() {
        #[derive(Deserialize, JsonSchema)]
        struct AddArgs {
            a: i64,
            b: i64,
        }

        let tool = FnTool::new("add", "Add two numbers", |args: AddArgs| async move {
            Ok(into_data(json!({ "sum": args.a + args.b })))
        });
        assert_eq!(tool.parameters()["type"], "object");

        let ok = tool.invoke(&args(json!({"a": 2, "b": 3}))).await.unwrap();
        assert_eq!(ok["sum"], 5);

        let err = tool.invoke(&args(json!({"a": "two"}))).await.unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::InvalidArgument);
    }

    #[test]
    fn result_output_shapes() {
        let ok = ToolResult {
            call_id: "c1".into(),
            tool_name: "echo".into(),
            outcome: Ok(args(json!({"text": "hi"}))),
            attempts: 1,
        };
        let msg = ok.to_message(DEFAULT_MAX_RESULT_BYTES);
        assert_eq!(msg.tool_call_id.as_deref(), Some("c1"));
        let output: ToolOutput = serde_json::from_str(msg.text()).unwrap();
        assert!(output.success);
        assert_eq!(output.data.unwrap()["text"], "hi");

        let failed = ToolResult {
            outcome: Err(ToolFailure::not_configured("no key")),
            ..ok
        };
        let output = failed.to_output();
        assert!(!output.success);
        assert_eq!(output.error_kind, Some(ToolErrorKind::NotConfigured));
        assert_eq!(failed.failure_kind(), Some(ToolErrorKind::NotConfigured));
    }

    #[test]
    fn degraded_detection() {
        let failure = ToolFailure::rate_limited("429");
        let result = ToolResult {
            call_id: "c1".into(),
            tool_name: "echo".into(),
            outcome: Ok(default_degraded_payload("echo", &failure)),
            attempts: 3,
        };
        assert!(result.is_success());
        assert!(result.is_degraded());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_result("short".into(), 100), "short");

        let cut = truncate_result("é".repeat(10), 5);
        assert!(cut.starts_with("éé..."));
        assert!(cut.contains("[truncated: 20 bytes total]"));

        assert_eq!(truncate_chars("abcdef", 3), "abc...");
        assert_eq!(truncate_chars("abc", 3), "abc");
    }
}

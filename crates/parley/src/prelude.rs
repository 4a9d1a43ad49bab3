//! Convenience re-exports for common `parley` types.
//!
//! ```ignore
//! use parley::prelude::*;
//! ```
//!
//! Covers building an orchestrator, defining tools and observing runs.
//! Provider internals (search providers, wire types, retry classification)
//! stay in their modules.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{
    ChatRequest, ChatResponse, Message, MessageRole, StatusSnapshot, ToolCall, ToolDef,
    json_schema_for,
};

// ── Errors ──────────────────────────────────────────────────────────
pub use crate::error::{GatewayError, OrchestratorError, ToolErrorKind, ToolFailure, ValidationError};

// ── Agent runtime ───────────────────────────────────────────────────
pub use crate::agent::{
    CompositeEventHandler, EventHandler, FnEventHandler, LoggingHandler, NoopHandler,
    Orchestrator, OrchestratorConfig, OrchestratorEvent, Thread, ThreadStore,
};

// ── Model gateways ──────────────────────────────────────────────────
pub use crate::api::{ModelGateway, ModelResponse, OpenAiGateway, RetryPolicy, ScriptedGateway};

// ── Tools ───────────────────────────────────────────────────────────
pub use crate::tools::core::{ToolArgs, ToolData, ToolFuture, into_data, parse_tool_args};
pub use crate::tools::invoker::{ResilientInvoker, RetryNotice};
pub use crate::tools::spec::ToolSpec;
pub use crate::tools::{FnTool, Tool, ToolRegistry, ToolResult};

// ── Wiring ──────────────────────────────────────────────────────────
pub use crate::settings::Settings;

//! Tools the model can call.
//!
//! Every capability is a [`Tool`] implementor collected into a
//! [`ToolRegistry`]. The orchestrator never special-cases a tool by name;
//! adding a tool means implementing one trait and registering it.
//!
//! # Defining tools
//!
//! - **[`FnTool`]**: closure-based, auto-parses typed arguments. Best for
//!   small tools and test stubs.
//! - **`impl Tool`**: full struct. Best for tools that hold clients or
//!   credentials, like [`SearchTool`](search::SearchTool) and
//!   [`MetricsTool`](metrics::MetricsTool).
//!
//! # Submodules
//!
//! - [`core`]: [`Tool`] trait, [`ToolRegistry`], [`FnTool`], [`ToolResult`].
//! - [`invoker`]: [`ResilientInvoker`](invoker::ResilientInvoker), retries with
//!   jitter and degraded fallbacks.
//! - [`search`]: `web_search` over Tavily with a DuckDuckGo fallback.
//! - [`metrics`]: `metrics_query` over the Datadog metrics API.
//! - [`spec`]: [`ToolSpec`](spec::ToolSpec) description builder.
//! - [`names`]: tool name constants.

pub mod core;
pub mod invoker;
pub mod metrics;
pub mod names;
pub mod search;
pub mod spec;

pub use self::core::{FnTool, Tool, ToolRegistry, ToolResult};

/// Percent-encode a query-string value (spaces become `+`).
pub(crate) fn urlencoded(s: &str) -> String {
    let mut out = String::with_capacity(s.len() * 3);
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char);
            }
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

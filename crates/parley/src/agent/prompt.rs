//! System instruction assembly.
//!
//! The instruction is inserted once, as the first message of every new
//! thread. Unless the caller supplies one, it is generated from the tools that
//! are actually registered so the model is never told about a capability it
//! cannot call.

use crate::tools::core::ToolRegistry;
use crate::tools::names;

const PREAMBLE: &str = "You are a helpful AI assistant.";

const CLOSING: &str = "When users ask questions that require current information or specific \
metrics, use the appropriate tools. Always provide clear, helpful responses based on the tool \
results. If a tool reports that it is unavailable, say so and offer any fallback it provides.";

/// Builder for multi-section prompts.
///
/// Sections are joined with blank lines; empty sections are skipped.
pub struct SystemPromptBuilder {
    sections: Vec<String>,
}

impl SystemPromptBuilder {
    pub fn new(preamble: impl Into<String>) -> Self {
        Self {
            sections: vec![preamble.into()],
        }
    }

    /// Append a `## heading` section. Skipped when `content` is empty.
    pub fn section(mut self, heading: &str, content: impl Into<String>) -> Self {
        let content = content.into();
        if !content.is_empty() {
            self.sections.push(format!("## {heading}\n\n{content}"));
        }
        self
    }

    /// Append a section only when `condition` holds. `content` is lazy.
    pub fn section_if(
        self,
        condition: bool,
        heading: &str,
        content: impl FnOnce() -> String,
    ) -> Self {
        if condition {
            self.section(heading, content())
        } else {
            self
        }
    }

    /// Append text without a heading.
    pub fn raw(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        if !text.is_empty() {
            self.sections.push(text);
        }
        self
    }

    pub fn build(self) -> String {
        self.sections.join("\n\n")
    }
}

/// Default instruction listing what the registered tools can do.
pub fn default_system_prompt(registry: &ToolRegistry) -> String {
    let mut capabilities = Vec::new();
    for name in registry.names() {
        let line = match name.as_str() {
            names::WEB_SEARCH => "Search the internet for current information (`web_search`).".to_string(),
            names::METRICS_QUERY => {
                "Retrieve infrastructure metrics from Datadog (`metrics_query`).".to_string()
            }
            other => format!("Call the `{other}` tool."),
        };
        capabilities.push(line);
    }

    let list = capabilities
        .iter()
        .enumerate()
        .map(|(i, line)| format!("{}. {line}", i + 1))
        .collect::<Vec<_>>()
        .join("\n");

    SystemPromptBuilder::new(PREAMBLE)
        .section_if(!capabilities.is_empty(), "Capabilities", || list)
        .raw(CLOSING)
        .build()
}

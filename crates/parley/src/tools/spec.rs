//! Structured tool descriptions with usage guidance.
//!
//! The model picks tools from their descriptions alone, so each built-in
//! tool renders its description from a [`ToolSpec`]: a purpose line, when to
//! use it, when not to, examples, and the shape of its output. Parameters are
//! not part of the spec; they come from [`Tool::parameters`](super::core::Tool::parameters).

/// Selection guidance for one tool.
#[derive(Debug, Clone, Default)]
pub struct ToolSpec {
    /// One-sentence imperative purpose.
    pub purpose: String,
    pub when_to_use: Option<String>,
    /// Prevents confusion with the other registered tools.
    pub when_not_to_use: Option<String>,
    /// (request, call) pairs.
    pub examples: Vec<(String, String)>,
    pub output_format: Option<String>,
    /// (scenario, tool to use instead) pairs.
    pub prefer_instead: Vec<(String, String)>,
}

impl ToolSpec {
    /// Start a spec with its purpose line.
    pub fn builder(purpose: impl Into<String>) -> Self {
        Self {
            purpose: purpose.into(),
            ..Default::default()
        }
    }

    pub fn when_to_use(mut self, when: impl Into<String>) -> Self {
        self.when_to_use = Some(when.into());
        self
    }

    pub fn when_not_to_use(mut self, when_not: impl Into<String>) -> Self {
        self.when_not_to_use = Some(when_not.into());
        self
    }

    pub fn example(mut self, request: impl Into<String>, call: impl Into<String>) -> Self {
        self.examples.push((request.into(), call.into()));
        self
    }

    pub fn output_format(mut self, format: impl Into<String>) -> Self {
        self.output_format = Some(format.into());
        self
    }

    pub fn prefer_instead(mut self, scenario: impl Into<String>, tool: impl Into<String>) -> Self {
        self.prefer_instead.push((scenario.into(), tool.into()));
        self
    }

    /// Render the description string sent to the model.
    pub fn to_description(&self) -> String {
        let mut lines = vec![format!("{}.", self.purpose.trim_end_matches('.'))];
        if let Some(when) = &self.when_to_use {
            lines.push(format!("When to use: {when}"));
        }
        if let Some(when_not) = &self.when_not_to_use {
            lines.push(format!("When NOT to use: {when_not}"));
        }
        if !self.examples.is_empty() {
            lines.push("Examples:".into());
            for (request, call) in &self.examples {
                lines.push(format!("  - \"{request}\" -> {call}"));
            }
        }
        if let Some(format) = &self.output_format {
            lines.push(format!("Output format: {format}"));
        }
        for (scenario, tool) in &self.prefer_instead {
            lines.push(format!("For {scenario}, use '{tool}' instead."));
        }
        lines.join("\n")
    }
}

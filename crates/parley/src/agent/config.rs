//! Configuration for the [`Orchestrator`](super::orchestrator::Orchestrator).
//!
//! Defaults match a production deployment: five rounds, a two-minute
//! deadline, parallel tool dispatch and three jittered attempts per tool.
//!
//! ```ignore
//! let config = OrchestratorConfig::new()
//!     .with_max_rounds(8)
//!     .with_deadline(Some(Duration::from_secs(30)))
//!     .with_parallel_tools(false);
//! ```

use crate::MAX_MESSAGE_CHARS;
use crate::api::retry::RetryPolicy;
use crate::tools::core::DEFAULT_MAX_RESULT_BYTES;
use crate::tools::invoker::DEFAULT_ATTEMPT_TIMEOUT;
use std::time::Duration;

/// Default cap on model calls per `handle`.
pub const DEFAULT_MAX_ROUNDS: u32 = 5;
/// Default overall deadline for one `handle` call.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Instruction inserted at the head of every new thread. `None` builds
    /// one from the registered tools.
    pub system_prompt: Option<String>,
    /// Maximum model calls per `handle`.
    pub max_rounds: u32,
    /// Overall deadline per `handle`. `None` disables it.
    pub deadline: Option<Duration>,
    /// Maximum user message length, in characters.
    pub max_message_chars: usize,
    /// Run the tool calls of one round concurrently.
    pub parallel_tools: bool,
    /// Per-attempt tool timeout. A timed-out attempt is retryable.
    pub tool_timeout: Option<Duration>,
    /// Validate tool arguments against their JSON Schema before invoking.
    pub validate_args: bool,
    /// Retry policy for tool invocations.
    pub retry: RetryPolicy,
    /// Tool results longer than this are truncated before reaching the model.
    pub max_result_bytes: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            max_rounds: DEFAULT_MAX_ROUNDS,
            deadline: Some(DEFAULT_DEADLINE),
            max_message_chars: MAX_MESSAGE_CHARS,
            parallel_tools: true,
            tool_timeout: Some(DEFAULT_ATTEMPT_TIMEOUT),
            validate_args: true,
            retry: RetryPolicy::default(),
            max_result_bytes: DEFAULT_MAX_RESULT_BYTES,
        }
    }
}

impl OrchestratorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Set the round cap. Values below 1 are raised to 1.
    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_max_message_chars(mut self, max: usize) -> Self {
        self.max_message_chars = max;
        self
    }

    pub fn with_parallel_tools(mut self, parallel: bool) -> Self {
        self.parallel_tools = parallel;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn with_arg_validation(mut self, enabled: bool) -> Self {
        self.validate_args = enabled;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_result_bytes(mut self, max: usize) -> Self {
        self.max_result_bytes = max;
        self
    }
}

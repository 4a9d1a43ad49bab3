//! The conversation loop.
//!
//! [`Orchestrator::handle`] validates the message, checks the thread out of
//! the [`ThreadStore`], and then walks a small state machine:
//!
//! ```text
//! START -> MODEL_CALL -> (TOOL_DISPATCH -> MODEL_CALL)* -> DONE | FAILED
//! ```
//!
//! Each round works on a copy of the history. The copy is committed back to
//! the store only when the round completes (final answer, or every tool
//! result appended), so a timeout or a model failure leaves the thread at its
//! last completed round.
//!
//! Failures past validation never escape as `Err`; they become a
//! `success: false` [`ChatResponse`] with a non-empty `response`.

use crate::agent::config::OrchestratorConfig;
use crate::agent::events::{EventHandler, LoggingHandler, OrchestratorEvent};
use crate::agent::prompt::default_system_prompt;
use crate::agent::store::ThreadStore;
use crate::agent::thread::Thread;
use crate::api::gateway::{ModelGateway, ModelResponse};
use crate::error::{OrchestratorError, ValidationError};
use crate::tools::core::{ToolRegistry, ToolResult};
use crate::tools::invoker::{ResilientInvoker, RetryNotice};
use crate::{ChatRequest, ChatResponse, Message, MessageRole, StatusSnapshot, ToolCall, ToolDef};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{Instrument, debug, info_span, warn};
use uuid::Uuid;

/// Returned when the model answers with empty text.
pub const EMPTY_REPLY: &str = "I apologize, but I couldn't generate a proper response.";

// ── Validation ─────────────────────────────────────────────────────

/// Reject blank messages and messages longer than `max_chars` characters.
pub fn validate_message(message: &str, max_chars: usize) -> Result<(), ValidationError> {
    if message.trim().is_empty() {
        return Err(ValidationError::EmptyMessage);
    }
    let len = message.chars().count();
    if len > max_chars {
        return Err(ValidationError::MessageTooLong { len, max: max_chars });
    }
    Ok(())
}

/// Per-call correlation id: `tr-<hex>-<counter>`.
fn generate_trace_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("tr-{:08x}-{n}", Uuid::new_v4().as_u128() as u32)
}

// ── State machine ──────────────────────────────────────────────────

enum Phase {
    ModelCall,
    ToolDispatch(Vec<ToolCall>),
    Done(String),
    Failed(RunFailure),
}

struct RunFailure {
    error: OrchestratorError,
    /// Best-effort text to show instead of the generic failure message.
    partial: Option<String>,
}

impl From<OrchestratorError> for RunFailure {
    fn from(error: OrchestratorError) -> Self {
        Self {
            error,
            partial: None,
        }
    }
}

// ── Orchestrator ───────────────────────────────────────────────────

/// Drives model/tool rounds for many threads concurrently.
///
/// Share it behind an `Arc`; `handle` takes `&self`.
///
/// ```ignore
/// let orchestrator = Orchestrator::new(gateway, registry, OrchestratorConfig::default());
/// let reply = orchestrator.handle(None, "Search for Python tutorials").await?;
/// assert!(reply.success);
/// ```
pub struct Orchestrator {
    gateway: Arc<dyn ModelGateway>,
    registry: ToolRegistry,
    tool_defs: Vec<ToolDef>,
    store: Arc<ThreadStore>,
    invoker: ResilientInvoker,
    config: OrchestratorConfig,
    system_prompt: String,
    events: Arc<dyn EventHandler>,
}

impl Orchestrator {
    pub fn new(
        gateway: Arc<dyn ModelGateway>,
        registry: ToolRegistry,
        config: OrchestratorConfig,
    ) -> Self {
        let registry = registry.with_arg_validation(config.validate_args);
        let system_prompt = config
            .system_prompt
            .clone()
            .unwrap_or_else(|| default_system_prompt(&registry));
        let invoker =
            ResilientInvoker::new(config.retry.clone()).with_attempt_timeout(config.tool_timeout);
        Self {
            gateway,
            tool_defs: registry.definitions(),
            registry,
            store: Arc::new(ThreadStore::default()),
            invoker,
            config,
            system_prompt,
            events: Arc::new(LoggingHandler),
        }
    }

    /// Use a shared thread store (for example one with its own idle timeout
    /// and eviction task).
    pub fn with_store(mut self, store: Arc<ThreadStore>) -> Self {
        self.store = store;
        self
    }

    /// Replace the default [`LoggingHandler`].
    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.events = handler;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<ThreadStore> {
        &self.store
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Health snapshot for a status endpoint.
    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            available_tools: self.registry.names(),
            model_configured: self.gateway.is_configured(),
            rule_dependent_tools_configured: self.registry.all_credentials_configured(),
        }
    }

    /// Copy of a stored thread, once any in-flight round on it has finished.
    pub async fn thread_history(&self, thread_id: &str) -> Option<Thread> {
        self.store.snapshot(thread_id).await
    }

    /// [`handle`](Self::handle) for a wire-shaped request.
    pub async fn handle_request(
        &self,
        request: &ChatRequest,
    ) -> Result<ChatResponse, ValidationError> {
        self.handle(request.thread_id.as_deref(), &request.message)
            .await
    }

    /// Process one user message on a thread (a fresh one when `thread_id` is
    /// absent or blank).
    ///
    /// Only input validation fails with `Err`, and then nothing has been
    /// created or called. Every other outcome is a [`ChatResponse`].
    pub async fn handle(
        &self,
        thread_id: Option<&str>,
        message: &str,
    ) -> Result<ChatResponse, ValidationError> {
        validate_message(message, self.config.max_message_chars)?;

        let thread_id = ThreadStore::resolve_id(thread_id);
        let span = info_span!("handle", trace_id = %generate_trace_id(), thread_id = %thread_id);
        let outcome = self
            .run_with_deadline(&thread_id, message)
            .instrument(span)
            .await;
        Ok(self.respond(thread_id, outcome))
    }

    async fn run_with_deadline(&self, thread_id: &str, message: &str) -> Result<String, RunFailure> {
        match self.config.deadline {
            Some(limit) => tokio::time::timeout(limit, self.run(thread_id, message))
                .await
                .unwrap_or_else(|_| Err(OrchestratorError::Timeout(limit).into())),
            None => self.run(thread_id, message).await,
        }
    }

    async fn run(&self, thread_id: &str, message: &str) -> Result<String, RunFailure> {
        let mut guard = self.store.checkout(thread_id).await;
        if guard.created() {
            self.events
                .on_event(&OrchestratorEvent::ThreadCreated { thread_id });
        }

        let mut history = guard.messages().to_vec();
        if !guard.thread().has_system_instruction() {
            history.insert(0, Message::system(self.system_prompt.as_str()));
        }
        history.push(Message::user(message));
        let call_start = history.len();

        let max_rounds = self.config.max_rounds;
        let mut round = 0;
        let mut phase = Phase::ModelCall;
        loop {
            phase = match phase {
                Phase::ModelCall => {
                    round += 1;
                    if round > max_rounds {
                        self.events.on_event(&OrchestratorEvent::RoundLimitReached {
                            thread_id,
                            max_rounds,
                        });
                        Phase::Failed(RunFailure {
                            error: OrchestratorError::IterationLimitExceeded { max_rounds },
                            partial: Some(partial_text(&history[call_start..], max_rounds)),
                        })
                    } else {
                        self.events.on_event(&OrchestratorEvent::RoundStart {
                            thread_id,
                            round,
                            max_rounds,
                        });
                        match self.gateway.invoke(&history, &self.tool_defs).await {
                            Ok(ModelResponse::ToolCalls(calls)) if !calls.is_empty() => {
                                Phase::ToolDispatch(calls)
                            }
                            Ok(ModelResponse::ToolCalls(_)) => Phase::Done(String::new()),
                            Ok(ModelResponse::FinalText(text)) => Phase::Done(text),
                            Err(e) => Phase::Failed(OrchestratorError::ModelUnavailable(e).into()),
                        }
                    }
                }
                Phase::ToolDispatch(calls) => {
                    self.events.on_event(&OrchestratorEvent::ToolCallsReceived {
                        round,
                        count: calls.len(),
                    });
                    match self.dispatch_all(&calls).await {
                        Ok(results) => {
                            history.push(Message::assistant_tool_calls(calls));
                            history.extend(
                                results
                                    .iter()
                                    .map(|r| r.to_message(self.config.max_result_bytes)),
                            );
                            guard.save(history.clone());
                            self.events
                                .on_event(&OrchestratorEvent::RoundCommitted { thread_id, round });
                            Phase::ModelCall
                        }
                        Err(e) => Phase::Failed(e.into()),
                    }
                }
                Phase::Done(text) => {
                    let text = if text.trim().is_empty() {
                        warn!("Model returned an empty answer");
                        EMPTY_REPLY.to_string()
                    } else {
                        text
                    };
                    history.push(Message::assistant_text(text.as_str()));
                    guard.save(history);
                    self.events
                        .on_event(&OrchestratorEvent::RoundCommitted { thread_id, round });
                    self.events.on_event(&OrchestratorEvent::Finished {
                        thread_id,
                        rounds: round,
                    });
                    return Ok(text);
                }
                Phase::Failed(failure) => return Err(failure),
            };
        }
    }

    /// Run every call of one round, concurrently unless configured otherwise.
    /// Results come back in the order the calls were issued.
    async fn dispatch_all(&self, calls: &[ToolCall]) -> Result<Vec<ToolResult>, OrchestratorError> {
        let guarded = calls.iter().map(|call| async move {
            self.events.on_event(&OrchestratorEvent::ToolExecuting {
                name: call.name(),
                call_id: &call.id,
            });
            let on_retry = |notice: &RetryNotice| {
                self.events.on_event(&OrchestratorEvent::ToolRetry {
                    name: call.name(),
                    call_id: &call.id,
                    attempt: notice.attempt,
                    kind: notice.kind,
                    delay: notice.delay,
                });
            };
            AssertUnwindSafe(self.invoker.dispatch_observed(&self.registry, call, &on_retry))
                .catch_unwind()
                .await
                .map_err(|_| OrchestratorError::ToolPanicked(call.name().to_string()))
        });

        let outcomes = if self.config.parallel_tools {
            futures::future::join_all(guarded).await
        } else {
            let mut outcomes = Vec::with_capacity(calls.len());
            for fut in guarded {
                outcomes.push(fut.await);
            }
            outcomes
        };

        let results = outcomes.into_iter().collect::<Result<Vec<_>, _>>()?;
        for result in &results {
            self.events.on_event(&OrchestratorEvent::ToolResult {
                name: &result.tool_name,
                call_id: &result.call_id,
                success: result.is_success(),
                degraded: result.is_degraded(),
                attempts: result.attempts,
            });
        }
        Ok(results)
    }

    fn respond(&self, thread_id: String, outcome: Result<String, RunFailure>) -> ChatResponse {
        match outcome {
            Ok(text) => ChatResponse::ok(thread_id, text),
            Err(RunFailure { error, partial }) => {
                let detail = error.to_string();
                self.events.on_event(&OrchestratorEvent::Failed {
                    thread_id: &thread_id,
                    error: &detail,
                });
                let response = partial
                    .filter(|p| !p.trim().is_empty())
                    .unwrap_or_else(|| error.user_message());
                debug!("Returning failure response for thread {thread_id}");
                ChatResponse::failed(thread_id, response, detail)
            }
        }
    }
}

/// Best-effort answer when the round limit cuts a call short.
///
/// `turn` is the part of the history added by the current call.
fn partial_text(turn: &[Message], max_rounds: u32) -> String {
    let last_text = turn
        .iter()
        .rev()
        .filter(|m| m.role == MessageRole::Assistant)
        .map(Message::text)
        .find(|t| !t.trim().is_empty());
    if let Some(text) = last_text {
        return text.to_string();
    }

    let mut tools: Vec<&str> = Vec::new();
    for call in turn.iter().filter_map(|m| m.tool_calls.as_ref()).flatten() {
        if !tools.contains(&call.name()) {
            tools.push(call.name());
        }
    }
    if tools.is_empty() {
        OrchestratorError::IterationLimitExceeded { max_rounds }.user_message()
    } else {
        format!(
            "I wasn't able to finish within {max_rounds} steps. I used these tools so far: {}. \
             Please try a more specific request.",
            tools.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::scripted::ScriptedGateway;
    use crate::error::GatewayError;
    use serde_json::json;

    fn orchestrator(gateway: Arc<ScriptedGateway>) -> Orchestrator {
        Orchestrator::new(gateway, ToolRegistry::new(), OrchestratorConfig::default())
    }

    #[test]
    fn validation_rules() {
        assert_eq!(validate_message("", 10), Err(ValidationError::EmptyMessage));
        assert_eq!(validate_message(" \n\t", 10), Err(ValidationError::EmptyMessage));
        assert!(validate_message("hello", 10).is_ok());
        assert!(validate_message(&"é".repeat(10), 10).is_ok());
        assert_eq!(
            validate_message(&"a".repeat(11), 10),
            Err(ValidationError::MessageTooLong { len: 11, max: 10 })
        );
    }

    #[test]
    fn trace_ids_are_unique() {
        let a = generate_trace_id();
        let b = generate_trace_id();
        assert!(a.starts_with("tr-"));
        assert_ne!(a, b);
    }

    #[test]
    fn partial_text_prefers_assistant_text_then_tools() {
        let calls = Message::assistant_tool_calls(vec![
            ToolCall::new("c1", "web_search", json!({})),
            ToolCall::new("c2", "web_search", json!({})),
            ToolCall::new("c3", "metrics_query", json!({})),
        ]);
        let text = partial_text(&[calls.clone()], 5);
        assert!(text.contains("web_search, metrics_query"));

        let with_text = [calls, Message::assistant_text("Here is what I found")];
        assert_eq!(partial_text(&with_text, 5), "Here is what I found");

        assert!(!partial_text(&[], 5).is_empty());
    }

    #[tokio::test]
    async fn system_instruction_is_inserted_once() {
        let gateway = Arc::new(ScriptedGateway::new().then_text("one").then_text("two"));
        let orch = orchestrator(gateway.clone());

        let first = orch.handle(Some("t"), "hi").await.unwrap();
        orch.handle(Some(first.thread_id.as_str()), "again").await.unwrap();

        let thread = orch.thread_history("t").await.unwrap();
        let systems = thread
            .messages
            .iter()
            .filter(|m| m.role == MessageRole::System)
            .count();
        assert_eq!(systems, 1);
        assert_eq!(thread.messages.len(), 5);
    }

    #[tokio::test]
    async fn empty_answer_is_replaced() {
        let gateway = Arc::new(ScriptedGateway::new().then_text("   "));
        let reply = orchestrator(gateway).handle(None, "hi").await.unwrap();
        assert!(reply.success);
        assert_eq!(reply.response, EMPTY_REPLY);
    }

    #[tokio::test]
    async fn model_failure_keeps_last_checkpoint() {
        let gateway = Arc::new(
            ScriptedGateway::new()
                .then_text("first answer")
                .then_error(GatewayError::Unauthorized {
                    status: 401,
                    body: "bad key".into(),
                }),
        );
        let orch = orchestrator(gateway);

        orch.handle(Some("t"), "one").await.unwrap();
        let reply = orch.handle(Some("t"), "two").await.unwrap();
        assert!(!reply.success);
        assert!(reply.response.contains("API configuration"));
        assert!(reply.error.unwrap().contains("401"));

        let thread = orch.thread_history("t").await.unwrap();
        assert_eq!(thread.messages.len(), 3);
        assert_eq!(thread.messages[2].text(), "first answer");
    }

    #[tokio::test]
    async fn custom_system_prompt_is_used() {
        let gateway = Arc::new(ScriptedGateway::new().then_text("ok"));
        let orch = Orchestrator::new(
            gateway.clone(),
            ToolRegistry::new(),
            OrchestratorConfig::new().with_system_prompt("Be brief."),
        );
        orch.handle(None, "hi").await.unwrap();
        assert_eq!(gateway.histories()[0][0], Message::system("Be brief."));
    }
}

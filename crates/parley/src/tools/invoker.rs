//! Retrying tool execution.
//!
//! [`ResilientInvoker`] runs a tool under a [`RetryPolicy`]. Retryable
//! failures (`RateLimited`, `TransientUpstream`) are retried after a jittered
//! delay; everything else returns immediately. When the attempts run out on a
//! retryable failure the caller gets the tool's degraded payload as a success,
//! so the conversation can carry on.

use crate::ToolCall;
use crate::api::retry::RetryPolicy;
use crate::error::{ToolErrorKind, ToolFailure};
use crate::tools::core::{Tool, ToolArgs, ToolOutcome, ToolRegistry, ToolResult, log_tool_call};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default per-attempt timeout for a single tool invocation.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of running a tool under the retry policy.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub outcome: ToolOutcome,
    pub attempts: u32,
}

/// A failed attempt that is about to be retried.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryNotice {
    /// The attempt that just failed, starting at 1.
    pub attempt: u32,
    pub kind: ToolErrorKind,
    /// Sleep before the next attempt.
    pub delay: Duration,
}

/// Executes tools with bounded, jittered retries.
#[derive(Debug, Clone)]
pub struct ResilientInvoker {
    policy: RetryPolicy,
    attempt_timeout: Option<Duration>,
}

impl Default for ResilientInvoker {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl ResilientInvoker {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempt_timeout: Some(DEFAULT_ATTEMPT_TIMEOUT),
        }
    }

    /// Bound each attempt. A timed-out attempt counts as `TransientUpstream`.
    pub fn with_attempt_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `tool` with `arguments` under the retry policy.
    ///
    /// Arguments are resent unchanged on every attempt.
    pub async fn invoke(&self, tool: &dyn Tool, arguments: &ToolArgs) -> Invocation {
        self.invoke_observed(tool, arguments, &|_| {}).await
    }

    /// [`invoke`](Self::invoke), calling `on_retry` before each retry sleep.
    pub async fn invoke_observed(
        &self,
        tool: &dyn Tool,
        arguments: &ToolArgs,
        on_retry: &(dyn Fn(&RetryNotice) + Sync),
    ) -> Invocation {
        let name = tool.name();
        let mut attempt = 1;
        loop {
            match self.attempt(tool, arguments).await {
                Ok(data) => {
                    if attempt > 1 {
                        info!("Tool {name} succeeded on attempt {attempt}");
                    }
                    return Invocation {
                        outcome: Ok(data),
                        attempts: attempt,
                    };
                }
                Err(failure) if !failure.is_retryable() => {
                    debug!("Tool {name} failed without retry: {failure}");
                    return Invocation {
                        outcome: Err(failure),
                        attempts: attempt,
                    };
                }
                Err(failure) if !self.policy.has_attempt_after(attempt) => {
                    warn!(
                        "Tool {name} still failing after {attempt} attempt(s), returning degraded result: {failure}"
                    );
                    let mut payload = tool.degraded_payload(arguments, &failure);
                    payload.insert("degraded".into(), Value::Bool(true));
                    payload.insert("attempts".into(), Value::from(attempt));
                    return Invocation {
                        outcome: Ok(payload),
                        attempts: attempt,
                    };
                }
                Err(failure) => {
                    let delay = self.policy.jitter();
                    warn!(
                        "Tool {name} attempt {attempt}/{} failed ({}), retrying in {:.1}s",
                        self.policy.max_attempts,
                        failure.kind,
                        delay.as_secs_f64(),
                    );
                    on_retry(&RetryNotice {
                        attempt,
                        kind: failure.kind,
                        delay,
                    });
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn attempt(&self, tool: &dyn Tool, arguments: &ToolArgs) -> ToolOutcome {
        match self.attempt_timeout {
            Some(limit) => match tokio::time::timeout(limit, tool.invoke(arguments)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ToolFailure::transient(format!(
                    "tool '{}' timed out after {:.0}s",
                    tool.name(),
                    limit.as_secs_f64()
                ))),
            },
            None => tool.invoke(arguments).await,
        }
    }

    /// Resolve a model-issued call through the registry and run it.
    ///
    /// Unknown tools and malformed arguments never reach the tool; they come
    /// back as failures with zero attempts.
    pub async fn dispatch(&self, registry: &ToolRegistry, call: &ToolCall) -> ToolResult {
        self.dispatch_observed(registry, call, &|_| {}).await
    }

    /// [`dispatch`](Self::dispatch), reporting retries to `on_retry`.
    pub async fn dispatch_observed(
        &self,
        registry: &ToolRegistry,
        call: &ToolCall,
        on_retry: &(dyn Fn(&RetryNotice) + Sync),
    ) -> ToolResult {
        let name = call.name();
        let prepared = registry.lookup(name).and_then(|tool| {
            let arguments = call.arguments_map()?;
            registry.validate_arguments(tool, &arguments)?;
            Ok((tool, arguments))
        });

        let (tool, arguments) = match prepared {
            Ok(p) => p,
            Err(failure) => {
                warn!("Rejected call {} to '{name}': {failure}", call.id);
                return ToolResult {
                    call_id: call.id.clone(),
                    tool_name: name.to_string(),
                    outcome: Err(failure),
                    attempts: 0,
                };
            }
        };

        log_tool_call(name, &arguments);
        let start = Instant::now();
        let invocation = self.invoke_observed(tool, &arguments, on_retry).await;
        debug!(
            "Tool {name} completed in {:.0}ms after {} attempt(s)",
            start.elapsed().as_secs_f64() * 1000.0,
            invocation.attempts
        );

        ToolResult {
            call_id: call.id.clone(),
            tool_name: name.to_string(),
            outcome: invocation.outcome,
            attempts: invocation.attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::core::{ToolData, ToolFuture, into_data};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails with the queued failures in order, then succeeds.
    struct ScriptedTool {
        failures: Mutex<VecDeque<ToolFailure>>,
        calls: AtomicU32,
        delay: Duration,
    }

    impl ScriptedTool {
        fn new(failures: Vec<ToolFailure>) -> Self {
            Self {
                failures: Mutex::new(failures.into()),
                calls: AtomicU32::new(0),
                delay: Duration::ZERO,
            }
        }

        fn always(failure: ToolFailure) -> Self {
            Self::new(vec![failure; 16])
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Tool for ScriptedTool {
        fn name(&self) -> &str {
            "scripted"
        }

        fn description(&self) -> String {
            "Fails on cue".into()
        }

        fn parameters(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "query": { "type": "string" } },
                "required": ["query"]
            })
        }

        fn invoke<'a>(&'a self, _arguments: &'a ToolArgs) -> ToolFuture<'a> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.failures.lock().unwrap().pop_front();
            let delay = self.delay;
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                match next {
                    Some(failure) => Err(failure),
                    None => Ok(into_data(json!({ "ok": true }))),
                }
            })
        }
    }

    fn invoker() -> ResilientInvoker {
        ResilientInvoker::new(RetryPolicy::immediate(3))
    }

    fn query() -> ToolData {
        into_data(json!({ "query": "rust" }))
    }

    #[tokio::test]
    async fn rate_limited_twice_then_success() {
        let tool = ScriptedTool::new(vec![
            ToolFailure::rate_limited("429"),
            ToolFailure::rate_limited("429"),
        ]);
        let inv = invoker().invoke(&tool, &query()).await;
        assert_eq!(inv.outcome.unwrap()["ok"], true);
        assert_eq!(inv.attempts, 3);
        assert_eq!(tool.calls(), 3);
    }

    #[tokio::test]
    async fn always_rate_limited_degrades_after_three_attempts() {
        let tool = ScriptedTool::always(ToolFailure::rate_limited("429"));
        let inv = invoker().invoke(&tool, &query()).await;
        let data = inv.outcome.expect("degraded success, not an error");
        assert_eq!(data["degraded"], true);
        assert_eq!(data["attempts"], 3);
        assert_eq!(tool.calls(), 3);
    }

    #[tokio::test]
    async fn retries_are_reported_before_each_sleep() {
        let tool = ScriptedTool::new(vec![
            ToolFailure::rate_limited("429"),
            ToolFailure::transient("503"),
        ]);
        let seen = Mutex::new(Vec::new());
        let inv = invoker()
            .invoke_observed(&tool, &query(), &|notice| seen.lock().unwrap().push(*notice))
            .await;

        assert!(inv.outcome.is_ok());
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!((seen[0].attempt, seen[0].kind), (1, ToolErrorKind::RateLimited));
        assert_eq!((seen[1].attempt, seen[1].kind), (2, ToolErrorKind::TransientUpstream));
        assert!(seen.iter().all(|n| n.delay == Duration::ZERO));
    }

    #[tokio::test]
    async fn exhausted_retries_report_one_notice_per_retry() {
        let tool = ScriptedTool::always(ToolFailure::rate_limited("429"));
        let count = AtomicU32::new(0);
        invoker()
            .invoke_observed(&tool, &query(), &|_| {
                count.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let tool = ScriptedTool::new(vec![ToolFailure::transient("502")]);
        let inv = invoker().invoke(&tool, &query()).await;
        assert!(inv.outcome.is_ok());
        assert_eq!(tool.calls(), 2);
    }

    #[tokio::test]
    async fn invalid_argument_is_invoked_exactly_once() {
        let tool = ScriptedTool::always(ToolFailure::invalid_argument("empty query"));
        let inv = invoker().invoke(&tool, &query()).await;
        assert_eq!(
            inv.outcome.unwrap_err().kind,
            ToolErrorKind::InvalidArgument
        );
        assert_eq!(tool.calls(), 1);
    }

    #[tokio::test]
    async fn not_configured_is_invoked_exactly_once() {
        let tool = ScriptedTool::always(ToolFailure::not_configured("no keys"));
        let inv = invoker().invoke(&tool, &query()).await;
        assert_eq!(inv.outcome.unwrap_err().kind, ToolErrorKind::NotConfigured);
        assert_eq!(inv.attempts, 1);
        assert_eq!(tool.calls(), 1);
    }

    #[tokio::test]
    async fn timed_out_attempt_counts_as_transient() {
        let mut tool = ScriptedTool::new(vec![]);
        tool.delay = Duration::from_millis(200);
        let invoker = ResilientInvoker::new(RetryPolicy::immediate(2))
            .with_attempt_timeout(Some(Duration::from_millis(10)));

        let inv = invoker.invoke(&tool, &query()).await;
        let data = inv.outcome.unwrap();
        assert_eq!(data["degraded"], true);
        assert_eq!(tool.calls(), 2);
    }

    #[tokio::test]
    async fn dispatch_unknown_tool_is_a_failure_result() {
        let registry = ToolRegistry::new().with(ScriptedTool::new(vec![]));
        let call = ToolCall::new("c1", "nope", json!({}));

        let result = invoker().dispatch(&registry, &call).await;
        assert_eq!(result.call_id, "c1");
        assert_eq!(result.failure_kind(), Some(ToolErrorKind::UnknownTool));
        assert_eq!(result.attempts, 0);
    }

    #[tokio::test]
    async fn dispatch_rejects_schema_violations_before_invoking() {
        let registry = ToolRegistry::new().with(ScriptedTool::new(vec![]));
        let call = ToolCall::new("c1", "scripted", json!({ "query": 42 }));

        let result = invoker().dispatch(&registry, &call).await;
        assert_eq!(result.failure_kind(), Some(ToolErrorKind::InvalidArgument));
        assert_eq!(result.attempts, 0);
    }

    #[tokio::test]
    async fn dispatch_runs_valid_call() {
        let registry = ToolRegistry::new().with(ScriptedTool::new(vec![]));
        let call = ToolCall::new("c7", "scripted", json!({ "query": "rust" }));

        let result = invoker().dispatch(&registry, &call).await;
        assert!(result.is_success());
        assert!(!result.is_degraded());
        assert_eq!(result.tool_name, "scripted");
        assert_eq!(result.attempts, 1);
    }
}

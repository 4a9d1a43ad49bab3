//! Lifecycle events emitted by the [`Orchestrator`](super::orchestrator::Orchestrator).
//!
//! Handlers observe a `handle` call from validation to completion: rounds,
//! tool dispatch, retries, results and the terminal outcome. They are observers only;
//! nothing a handler does changes the run.
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests, or when nobody is listening |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures |
//! | [`CompositeEventHandler`] | Fan out to several handlers in order |

use crate::error::ToolErrorKind;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Events emitted during a `handle` call.
#[derive(Debug)]
pub enum OrchestratorEvent<'a> {
    /// A thread was created for this call.
    ThreadCreated { thread_id: &'a str },
    /// A new round (model call) is starting.
    RoundStart {
        thread_id: &'a str,
        round: u32,
        max_rounds: u32,
    },
    /// The model asked for tools this round.
    ToolCallsReceived { round: u32, count: usize },
    /// A tool is about to run.
    ToolExecuting { name: &'a str, call_id: &'a str },
    /// A tool attempt failed with a retryable error; another attempt follows
    /// after `delay`.
    ToolRetry {
        name: &'a str,
        call_id: &'a str,
        attempt: u32,
        kind: ToolErrorKind,
        delay: Duration,
    },
    /// A tool finished (successfully, degraded or failed).
    ToolResult {
        name: &'a str,
        call_id: &'a str,
        success: bool,
        degraded: bool,
        attempts: u32,
    },
    /// The round's history was committed to the thread store.
    RoundCommitted { thread_id: &'a str, round: u32 },
    /// The model answered in plain text.
    Finished { thread_id: &'a str, rounds: u32 },
    /// The round cap was hit before a final answer.
    RoundLimitReached { thread_id: &'a str, max_rounds: u32 },
    /// The call ended with `success: false`.
    Failed { thread_id: &'a str, error: &'a str },
}

/// Observer for orchestrator events.
///
/// ```ignore
/// struct Counter(AtomicUsize);
///
/// impl EventHandler for Counter {
///     fn on_event(&self, event: &OrchestratorEvent<'_>) {
///         if let OrchestratorEvent::ToolResult { .. } = event {
///             self.0.fetch_add(1, Ordering::Relaxed);
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &OrchestratorEvent<'_>) {
        let _ = event;
    }
}

/// Ignores every event.
pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// An event handler backed by a closure.
pub struct FnEventHandler<F>(F)
where
    F: Fn(&OrchestratorEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&OrchestratorEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&OrchestratorEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &OrchestratorEvent<'_>) {
        (self.0)(event)
    }
}

/// Delegates to several handlers in registration order.
///
/// ```ignore
/// let handler = CompositeEventHandler::new()
///     .with(LoggingHandler)
///     .with_if(verbose, my_metrics_handler);
/// ```
#[derive(Default)]
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &OrchestratorEvent<'_>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

/// Logs events via `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &OrchestratorEvent<'_>) {
        match event {
            OrchestratorEvent::ThreadCreated { thread_id } => {
                debug!("Created thread {thread_id}");
            }
            OrchestratorEvent::RoundStart {
                round, max_rounds, ..
            } => {
                info!("[round {round}/{max_rounds}]");
            }
            OrchestratorEvent::ToolCallsReceived { round, count } => {
                debug!("{count} tool call(s) in round {round}");
            }
            OrchestratorEvent::ToolExecuting { name, call_id } => {
                debug!("Executing tool: {name} ({call_id})");
            }
            OrchestratorEvent::ToolRetry {
                name,
                attempt,
                kind,
                delay,
                ..
            } => {
                debug!(
                    "Tool {name} attempt {attempt} failed ({kind}), retrying in {:.1}s",
                    delay.as_secs_f64()
                );
            }
            OrchestratorEvent::ToolResult {
                name,
                success,
                degraded,
                attempts,
                ..
            } => {
                let state = match (success, degraded) {
                    (true, true) => "degraded",
                    (true, false) => "ok",
                    (false, _) => "failed",
                };
                debug!("Tool {name} {state} after {attempts} attempt(s)");
            }
            OrchestratorEvent::RoundCommitted { thread_id, round } => {
                debug!("Committed round {round} of thread {thread_id}");
            }
            OrchestratorEvent::Finished { rounds, .. } => {
                info!("Finished after {rounds} round(s)");
            }
            OrchestratorEvent::RoundLimitReached { max_rounds, .. } => {
                warn!("Hit round limit ({max_rounds})");
            }
            OrchestratorEvent::Failed { thread_id, error } => {
                warn!("Thread {thread_id} failed: {error}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn composite_fans_out_in_order() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let a = seen.clone();
        let b = seen.clone();
        let handler = CompositeEventHandler::new()
            .with(FnEventHandler::new(move |_| a.lock().unwrap().push("a")))
            .with(LoggingHandler)
            .with_if(false, NoopHandler)
            .with(FnEventHandler::new(move |_| b.lock().unwrap().push("b")));
        assert_eq!(handler.len(), 3);

        handler.on_event(&OrchestratorEvent::Finished {
            thread_id: "t",
            rounds: 1,
        });
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn fn_handler_sees_tool_results() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let handler = FnEventHandler::new(move |event| {
            if matches!(event, OrchestratorEvent::ToolResult { .. }) {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });
        handler.on_event(&OrchestratorEvent::ToolResult {
            name: "web_search",
            call_id: "c1",
            success: true,
            degraded: false,
            attempts: 1,
        });
        handler.on_event(&OrchestratorEvent::ToolCallsReceived { round: 1, count: 1 });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}

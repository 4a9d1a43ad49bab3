//! A gateway that replays canned responses.
//!
//! Used by the `--offline` mode of the binary and by tests that need to drive
//! the orchestrator through a known sequence of rounds.

use crate::api::gateway::{GatewayFuture, ModelGateway, ModelResponse};
use crate::error::GatewayError;
use crate::{Message, ToolDef};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

type Reply = Result<ModelResponse, GatewayError>;

/// Replays queued replies in order, recording every history it was sent.
///
/// Once the queue is drained, every call gets the fallback reply (by default
/// a fixed final text).
pub struct ScriptedGateway {
    queue: Mutex<VecDeque<Reply>>,
    fallback: Fallback,
    delay: Duration,
    configured: bool,
    histories: Mutex<Vec<Vec<Message>>>,
}

enum Fallback {
    Text(String),
    Repeat(ModelResponse),
    Unavailable,
}

impl Default for ScriptedGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: Fallback::Text("(no scripted reply)".into()),
            delay: Duration::ZERO,
            configured: true,
            histories: Mutex::new(Vec::new()),
        }
    }

    /// Queue a final answer.
    pub fn then_text(self, text: impl Into<String>) -> Self {
        self.then(Ok(ModelResponse::FinalText(text.into())))
    }

    /// Queue a round of tool calls.
    pub fn then_calls(self, calls: Vec<crate::ToolCall>) -> Self {
        self.then(Ok(ModelResponse::ToolCalls(calls)))
    }

    /// Queue a gateway failure.
    pub fn then_error(self, error: GatewayError) -> Self {
        self.then(Err(error))
    }

    pub fn then(self, reply: Reply) -> Self {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(reply);
        }
        self
    }

    /// Reply with `text` once the queue is empty.
    pub fn otherwise_text(mut self, text: impl Into<String>) -> Self {
        self.fallback = Fallback::Text(text.into());
        self
    }

    /// Reply with `response` forever once the queue is empty.
    pub fn otherwise_repeat(mut self, response: ModelResponse) -> Self {
        self.fallback = Fallback::Repeat(response);
        self
    }

    /// Fail with a transport error once the queue is empty.
    pub fn otherwise_unavailable(mut self) -> Self {
        self.fallback = Fallback::Unavailable;
        self
    }

    /// Sleep before every reply.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// What [`ModelGateway::is_configured`] reports.
    pub fn with_configured(mut self, configured: bool) -> Self {
        self.configured = configured;
        self
    }

    /// Number of times the gateway has been invoked.
    pub fn calls(&self) -> usize {
        self.histories.lock().map_or(0, |h| h.len())
    }

    /// Every history the gateway was invoked with, oldest first.
    pub fn histories(&self) -> Vec<Vec<Message>> {
        self.histories.lock().map(|h| h.clone()).unwrap_or_default()
    }

    fn next_reply(&self) -> Reply {
        let queued = self.queue.lock().ok().and_then(|mut q| q.pop_front());
        if let Some(reply) = queued {
            return reply;
        }
        match &self.fallback {
            Fallback::Text(text) => Ok(ModelResponse::FinalText(text.clone())),
            Fallback::Repeat(response) => Ok(response.clone()),
            Fallback::Unavailable => Err(GatewayError::Transport("scripted gateway exhausted".into())),
        }
    }
}

impl ModelGateway for ScriptedGateway {
    fn invoke<'a>(&'a self, messages: &'a [Message], _tools: &'a [ToolDef]) -> GatewayFuture<'a> {
        if let Ok(mut histories) = self.histories.lock() {
            histories.push(messages.to_vec());
        }
        let reply = self.next_reply();
        let delay = self.delay;
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            reply
        })
    }

    fn is_configured(&self) -> bool {
        self.configured
    }
}

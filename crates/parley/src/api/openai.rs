//! OpenAI-compatible chat completions gateway.

use crate::api::gateway::{GatewayFuture, ModelGateway, ModelResponse};
use crate::api::retry::RetryPolicy;
use crate::error::GatewayError;
use crate::{DEFAULT_MODEL, Message, OPENAI_BASE_URL, ToolCall, ToolDef};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Default sampling temperature.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
/// Default HTTP timeout for one completion request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

// ── Wire types ─────────────────────────────────────────────────────

/// Chat completion request body.
#[derive(Serialize, Debug)]
pub struct CompletionRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [Message],
    #[serde(skip_serializing_if = "no_tools")]
    pub tools: &'a [ToolDef],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<&'static str>,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn no_tools(tools: &&[ToolDef]) -> bool {
    tools.is_empty()
}

/// Raw API response (internal deserialization target).
#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
}

/// Token usage statistics.
#[derive(Deserialize, Debug, Clone)]
pub struct UsageInfo {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

/// Parse a successful response body into a [`ModelResponse`].
pub fn parse_completion(text: &str) -> Result<ModelResponse, GatewayError> {
    let parsed: RawChatResponse =
        serde_json::from_str(text).map_err(|e| GatewayError::Malformed(e.to_string()))?;

    if let Some(err) = parsed.error {
        return Err(GatewayError::Malformed(format!("API error: {}", err.message)));
    }

    if let Some(ref usage) = parsed.usage {
        debug!(
            "Token usage: prompt={}, completion={}, total={}",
            usage.prompt_tokens.unwrap_or(0),
            usage.completion_tokens.unwrap_or(0),
            usage.total_tokens.unwrap_or(0),
        );
    }

    let choice = parsed
        .choices
        .and_then(|c| c.into_iter().next())
        .ok_or_else(|| GatewayError::Malformed("response has no choices".into()))?;

    let calls = choice.message.tool_calls.unwrap_or_default();
    debug!(
        "LLM output: {} chars text, {} tool call(s), finish_reason={}",
        choice.message.content.as_ref().map_or(0, |s| s.len()),
        calls.len(),
        choice.finish_reason.as_deref().unwrap_or("-"),
    );
    if !calls.is_empty()
        && let Some(text) = choice.message.content.as_deref().filter(|t| !t.trim().is_empty())
    {
        let preview: String = text.chars().take(120).collect();
        debug!("Dropping text sent alongside tool calls: {preview}");
    }

    Ok(ModelResponse::from_parts(choice.message.content, calls))
}

// ── Gateway ────────────────────────────────────────────────────────

/// Async HTTP client for an OpenAI-compatible chat completions endpoint.
pub struct OpenAiGateway {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    retry: RetryPolicy,
}

impl OpenAiGateway {
    /// Create a gateway with its own HTTP client and default settings.
    pub fn new(api_key: Option<String>) -> Result<Self, String> {
        let client = crate::api::http_client(DEFAULT_REQUEST_TIMEOUT)?;
        Ok(Self::with_client(client, api_key))
    }

    pub fn with_client(client: reqwest::Client, api_key: Option<String>) -> Self {
        Self {
            client,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            base_url: OPENAI_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: None,
            retry: RetryPolicy::none(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Retry transient failures (429, 5xx, network) before giving up.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn chat(
        &self,
        api_key: &str,
        body: &CompletionRequest<'_>,
    ) -> Result<ModelResponse, GatewayError> {
        debug!(
            "LLM request: model={}, messages={}, tools={}, temp={}",
            body.model,
            body.messages.len(),
            body.tools.len(),
            body.temperature,
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(body).map_or(0, |s| s.len())
        );

        let start = Instant::now();
        let resp = self
            .client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| GatewayError::Transport(format!("failed to read response: {e}")))?;
        debug!(
            "LLM response: HTTP {} in {:.1}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        match status.as_u16() {
            200..=299 => parse_completion(&text),
            401 | 403 => Err(GatewayError::Unauthorized {
                status: status.as_u16(),
                body: text,
            }),
            code => Err(GatewayError::Http { status: code, body: text }),
        }
    }
}

impl ModelGateway for OpenAiGateway {
    fn invoke<'a>(&'a self, messages: &'a [Message], tools: &'a [ToolDef]) -> GatewayFuture<'a> {
        Box::pin(async move {
            let Some(api_key) = self.api_key.as_deref() else {
                return Err(GatewayError::NotConfigured("OPENAI_API_KEY is not set".into()));
            };
            let body = CompletionRequest {
                model: &self.model,
                messages,
                tools,
                tool_choice: (!tools.is_empty()).then_some("auto"),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
            };

            let mut attempt = 1;
            loop {
                match self.chat(api_key, &body).await {
                    Err(e) if e.is_transient() && self.retry.has_attempt_after(attempt) => {
                        let delay = self.retry.jitter();
                        warn!(
                            "Model call attempt {attempt}/{} failed ({e}), retrying in {:.1}s",
                            self.retry.max_attempts,
                            delay.as_secs_f64()
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    other => return other,
                }
            }
        })
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_text_response() {
        let body = r#"{
            "choices": [{"message": {"content": "Hello!"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 2, "total_tokens": 12}
        }"#;
        assert_eq!(
            parse_completion(body).unwrap(),
            ModelResponse::FinalText("Hello!".into())
        );
    }

    #[test]
    fn parses_tool_call_response() {
        let body = r#"{
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "web_search", "arguments": "{\"query\":\"rust\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        }"#;
        let ModelResponse::ToolCalls(calls) = parse_completion(body).unwrap() else {
            panic!("expected tool calls");
        };
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name(), "web_search");
        assert_eq!(calls[0].arguments_map().unwrap()["query"], "rust");
    }

    #[test]
    fn malformed_bodies_are_errors() {
        assert!(matches!(
            parse_completion("not json"),
            Err(GatewayError::Malformed(_))
        ));
        assert!(matches!(
            parse_completion(r#"{"choices": []}"#),
            Err(GatewayError::Malformed(_))
        ));
        assert!(matches!(
            parse_completion(r#"{"error": {"message": "overloaded"}}"#),
            Err(GatewayError::Malformed(m)) if m.contains("overloaded")
        ));
    }

    #[test]
    fn request_omits_empty_tools() {
        let messages = vec![Message::user("hi")];
        let body = CompletionRequest {
            model: "gpt-4o-mini",
            messages: &messages,
            tools: &[],
            tool_choice: None,
            temperature: 0.7,
            max_tokens: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("tools").is_none());
        assert!(json.get("tool_choice").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[tokio::test]
    async fn missing_key_is_not_configured() {
        let gateway = OpenAiGateway::with_client(reqwest::Client::new(), Some("  ".into()));
        assert!(!gateway.is_configured());

        let err = gateway.invoke(&[Message::user("hi")], &[]).await.unwrap_err();
        assert!(err.is_auth());
    }

    #[test]
    fn base_url_is_normalized() {
        let gateway = OpenAiGateway::with_client(reqwest::Client::new(), Some("k".into()))
            .with_base_url("http://localhost:8080/v1/")
            .with_model("local-model");
        assert_eq!(gateway.endpoint(), "http://localhost:8080/v1/chat/completions");
        assert_eq!(gateway.model(), "local-model");
    }
}

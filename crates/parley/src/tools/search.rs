//! Web search with a primary and a fallback provider.
//!
//! [`SearchTool`] asks the primary provider (Tavily, when a key is present)
//! and falls back to the secondary (DuckDuckGo's keyless Instant Answer API).
//! The failure of the last provider tried is what the resilient invoker sees,
//! so a throttled fallback is retried and eventually degrades into a manual
//! search link.

use crate::api::retry::{classify_status, classify_transport};
use crate::error::ToolFailure;
use crate::tools::core::{Tool, ToolArgs, ToolData, ToolFuture, into_data, parse_tool_args, truncate_chars};
use crate::tools::names;
use crate::tools::spec::ToolSpec;
use crate::tools::urlencoded;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, info, warn};

pub const TAVILY_URL: &str = "https://api.tavily.com/search";
pub const DUCKDUCKGO_API_URL: &str = "https://api.duckduckgo.com/";
pub const DUCKDUCKGO_MANUAL_URL: &str = "https://duckduckgo.com/";

/// Results returned when the caller does not ask for a count.
pub const DEFAULT_MAX_RESULTS: u32 = 5;
/// Snippet length cap, in characters.
pub const MAX_SNIPPET_CHARS: usize = 500;

/// Typed arguments for `web_search`.
#[derive(Deserialize, JsonSchema)]
pub struct SearchArgs {
    /// The search query (e.g. 'Python tutorials for beginners').
    pub query: String,
    /// Number of results to return (default 5, max 10).
    #[serde(default)]
    pub max_results: Option<u32>,
}

/// One search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub content: String,
    pub url: String,
}

// ── Providers ──────────────────────────────────────────────────────

pub type SearchFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<SearchHit>, ToolFailure>> + Send + 'a>>;

/// A search backend.
pub trait SearchProvider: Send + Sync {
    /// Label reported as `search_engine` in results.
    fn name(&self) -> &str;

    fn search<'a>(&'a self, query: &'a str, max_results: u32) -> SearchFuture<'a>;
}

/// Tavily search API. Needs an API key.
pub struct TavilyProvider {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl TavilyProvider {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            endpoint: TAVILY_URL.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

impl SearchProvider for TavilyProvider {
    fn name(&self) -> &str {
        "Tavily"
    }

    fn search<'a>(&'a self, query: &'a str, max_results: u32) -> SearchFuture<'a> {
        Box::pin(async move {
            let body = json!({
                "api_key": self.api_key,
                "query": query,
                "search_depth": "basic",
                "max_results": max_results,
            });
            let resp = self
                .client
                .post(&self.endpoint)
                .json(&body)
                .send()
                .await
                .map_err(|e| classify_transport("Tavily", &e))?;

            let status = resp.status();
            let text = resp
                .text()
                .await
                .map_err(|e| classify_transport("Tavily", &e))?;
            debug!("Tavily: HTTP {status} ({} bytes)", text.len());

            if !status.is_success() {
                return Err(classify_status("Tavily", status.as_u16(), &text));
            }
            let parsed: Value = serde_json::from_str(&text)
                .map_err(|e| ToolFailure::transient(format!("Tavily returned invalid JSON: {e}")))?;
            Ok(parse_tavily(&parsed, max_results))
        })
    }
}

/// DuckDuckGo Instant Answer API. Keyless, throttles aggressively.
pub struct DuckDuckGoProvider {
    client: reqwest::Client,
    endpoint: String,
}

impl DuckDuckGoProvider {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            endpoint: DUCKDUCKGO_API_URL.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

impl SearchProvider for DuckDuckGoProvider {
    fn name(&self) -> &str {
        "DuckDuckGo"
    }

    fn search<'a>(&'a self, query: &'a str, max_results: u32) -> SearchFuture<'a> {
        Box::pin(async move {
            let url = format!(
                "{}?q={}&format=json&no_html=1&skip_disambig=1",
                self.endpoint,
                urlencoded(query)
            );
            let resp = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| classify_transport("DuckDuckGo", &e))?;

            let status = resp.status();
            // DuckDuckGo answers 202 with an empty body when it is throttling.
            if status.as_u16() == 202 {
                return Err(ToolFailure::rate_limited(
                    "DuckDuckGo returned HTTP 202 (rate limited)",
                ));
            }
            let text = resp
                .text()
                .await
                .map_err(|e| classify_transport("DuckDuckGo", &e))?;
            debug!("DuckDuckGo: HTTP {status} ({} bytes)", text.len());

            if !status.is_success() {
                return Err(classify_status("DuckDuckGo", status.as_u16(), &text));
            }
            let parsed: Value = serde_json::from_str(&text).map_err(|e| {
                ToolFailure::transient(format!("DuckDuckGo returned invalid JSON: {e}"))
            })?;
            Ok(parse_duckduckgo(&parsed, max_results))
        })
    }
}

// ── SearchTool ─────────────────────────────────────────────────────

/// The `web_search` tool.
#[derive(Default)]
pub struct SearchTool {
    primary: Option<Box<dyn SearchProvider>>,
    fallback: Option<Box<dyn SearchProvider>>,
}

impl SearchTool {
    /// A search tool with no providers; every call is `NotConfigured`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tavily first when a key is given, DuckDuckGo as the fallback.
    pub fn from_keys(client: reqwest::Client, tavily_api_key: Option<String>) -> Self {
        let primary = tavily_api_key
            .filter(|k| !k.trim().is_empty())
            .map(|k| Box::new(TavilyProvider::new(client.clone(), k)) as Box<dyn SearchProvider>);
        Self {
            primary,
            fallback: Some(Box::new(DuckDuckGoProvider::new(client))),
        }
    }

    pub fn with_primary(mut self, provider: impl SearchProvider + 'static) -> Self {
        self.primary = Some(Box::new(provider));
        self
    }

    pub fn with_fallback(mut self, provider: impl SearchProvider + 'static) -> Self {
        self.fallback = Some(Box::new(provider));
        self
    }

    fn providers(&self) -> impl Iterator<Item = &dyn SearchProvider> {
        self.primary
            .iter()
            .chain(self.fallback.iter())
            .map(|p| p.as_ref())
    }
}

impl Tool for SearchTool {
    fn name(&self) -> &str {
        names::WEB_SEARCH
    }

    fn description(&self) -> String {
        ToolSpec::builder("Search the internet and return results with titles, snippets, and URLs")
            .when_to_use(
                "When the user needs current information, documentation, tutorials, news, \
                 or facts you are unsure about. Use specific, targeted queries",
            )
            .when_not_to_use(
                "When the user asks for infrastructure or application metrics, or when the \
                 answer needs no outside information",
            )
            .example(
                "Search for Python tutorials",
                r#"web_search(query="Python tutorials for beginners")"#,
            )
            .output_format("JSON: {query, results: [{title, content, url}], total_results, search_engine}")
            .prefer_instead("CPU, memory, latency, or other monitoring data", names::METRICS_QUERY)
            .to_description()
    }

    fn parameters(&self) -> Value {
        crate::json_schema_for::<SearchArgs>()
    }

    fn invoke<'a>(&'a self, arguments: &'a ToolArgs) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: SearchArgs = parse_tool_args(arguments)?;
            let query = args.query.trim();
            if query.is_empty() {
                return Err(ToolFailure::invalid_argument("search query must not be empty"));
            }
            let max_results = args.max_results.unwrap_or(DEFAULT_MAX_RESULTS).clamp(1, 10);

            let mut last = ToolFailure::not_configured(
                "no search provider is configured; set TAVILY_API_KEY or enable DuckDuckGo",
            );
            for provider in self.providers() {
                info!("Searching {} for '{query}'", provider.name());
                match provider.search(query, max_results).await {
                    Ok(hits) => return Ok(format_results(query, provider.name(), hits)),
                    Err(failure) => {
                        warn!("{} search failed: {failure}", provider.name());
                        last = failure;
                    }
                }
            }
            Err(last)
        })
    }

    fn degraded_payload(&self, arguments: &ToolArgs, failure: &ToolFailure) -> ToolData {
        let query = arguments
            .get("query")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim();
        let url = manual_search_url(query);
        into_data(json!({
            "query": query,
            "results": [{
                "title": "Search temporarily unavailable",
                "content": format!(
                    "Online search for '{query}' is temporarily unavailable. \
                     You can search manually at: {url}"
                ),
                "url": url,
            }],
            "total_results": 1,
            "search_engine": "DuckDuckGo (rate limited)",
            "degraded": true,
            "note": format!("Search failed after retries ({}), providing a manual search link", failure.kind),
        }))
    }
}

// ── Formatting ─────────────────────────────────────────────────────

/// Link the end user can open to run the search themselves.
pub fn manual_search_url(query: &str) -> String {
    format!("{DUCKDUCKGO_MANUAL_URL}?q={}", urlencoded(query))
}

/// Build the success payload.
pub fn format_results(query: &str, engine: &str, hits: Vec<SearchHit>) -> ToolData {
    let total = hits.len();
    let mut data = into_data(json!({
        "query": query,
        "results": hits,
        "total_results": total,
        "search_engine": engine,
    }));
    if total == 0 {
        data.insert(
            "note".into(),
            Value::from(format!("No results found for '{query}'. Try rephrasing the query.")),
        );
    }
    data
}

fn hit(title: &str, content: &str, url: &str) -> SearchHit {
    SearchHit {
        title: if title.is_empty() { "No title".into() } else { title.to_string() },
        content: truncate_chars(content, MAX_SNIPPET_CHARS),
        url: url.to_string(),
    }
}

/// Extract hits from a Tavily response body.
pub fn parse_tavily(body: &Value, max_results: u32) -> Vec<SearchHit> {
    body["results"]
        .as_array()
        .map(|results| {
            results
                .iter()
                .take(max_results as usize)
                .map(|r| {
                    hit(
                        r["title"].as_str().unwrap_or_default(),
                        r["content"].as_str().unwrap_or_default(),
                        r["url"].as_str().unwrap_or_default(),
                    )
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Extract hits from a DuckDuckGo Instant Answer body: the abstract first,
/// then related topics (flattening topic groups).
pub fn parse_duckduckgo(body: &Value, max_results: u32) -> Vec<SearchHit> {
    let mut hits = Vec::new();

    let abstract_text = body["AbstractText"].as_str().unwrap_or_default();
    if !abstract_text.is_empty() {
        hits.push(hit(
            body["Heading"].as_str().unwrap_or_default(),
            abstract_text,
            body["AbstractURL"].as_str().unwrap_or_default(),
        ));
    }

    let mut topics: Vec<&Value> = Vec::new();
    if let Some(related) = body["RelatedTopics"].as_array() {
        for topic in related {
            match topic["Topics"].as_array() {
                Some(group) => topics.extend(group.iter()),
                None => topics.push(topic),
            }
        }
    }

    for topic in topics {
        let (Some(text), Some(url)) = (topic["Text"].as_str(), topic["FirstURL"].as_str()) else {
            continue;
        };
        let title = text.split(" - ").next().unwrap_or(text);
        hits.push(hit(title, text, url));
    }

    hits.truncate(max_results as usize);
    hits
}

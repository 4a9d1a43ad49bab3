//! Process-level settings and wiring.
//!
//! [`Settings`] gathers everything the binary needs from the environment and
//! turns it into library values via the `build_*` methods. The library
//! itself never reads environment variables outside [`Settings::from_env`].
//!
//! | Variable | Default |
//! |----------|---------|
//! | `OPENAI_API_KEY` | unset (model not configured) |
//! | `OPENAI_BASE_URL` | `https://api.openai.com/v1` |
//! | `PARLEY_MODEL` | `gpt-4o-mini` |
//! | `PARLEY_TEMPERATURE` | `0.7` |
//! | `TAVILY_API_KEY` | unset (DuckDuckGo only) |
//! | `DATADOG_API_KEY`, `DATADOG_APP_KEY` | unset (metrics not configured) |
//! | `DATADOG_SITE` | `datadoghq.com` |
//! | `PARLEY_MAX_ROUNDS` | `5` |
//! | `PARLEY_THREAD_TIMEOUT_SECS` | `300` |

use crate::agent::config::{DEFAULT_DEADLINE, DEFAULT_MAX_ROUNDS, OrchestratorConfig};
use crate::agent::orchestrator::Orchestrator;
use crate::agent::store::{DEFAULT_IDLE_TIMEOUT, ThreadStore};
use crate::api::gateway::ModelGateway;
use crate::api::openai::{DEFAULT_TEMPERATURE, OpenAiGateway};
use crate::api::scripted::ScriptedGateway;
use crate::tools::core::ToolRegistry;
use crate::tools::metrics::{DatadogCredentials, MetricsTool};
use crate::tools::search::SearchTool;
use crate::{DEFAULT_MODEL, OPENAI_BASE_URL};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// HTTP timeout shared by the tool providers.
pub const TOOL_HTTP_TIMEOUT: Duration = Duration::from_secs(20);

/// Reply used by the offline gateway.
pub const OFFLINE_REPLY: &str =
    "Offline mode: no language model is connected, so this is a canned reply.";

#[derive(Debug, Clone)]
pub struct Settings {
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub model: String,
    pub temperature: f32,
    pub tavily_api_key: Option<String>,
    pub datadog: DatadogCredentials,
    pub max_rounds: u32,
    pub thread_timeout: Duration,
    pub deadline: Option<Duration>,
    /// Use a canned-reply gateway instead of the network model.
    pub offline: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_base_url: OPENAI_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            tavily_api_key: None,
            datadog: DatadogCredentials::default(),
            max_rounds: DEFAULT_MAX_ROUNDS,
            thread_timeout: DEFAULT_IDLE_TIMEOUT,
            deadline: Some(DEFAULT_DEADLINE),
            offline: false,
        }
    }
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`. Blank values count as unset; values
    /// that fail to parse are logged and replaced by the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        Self {
            openai_api_key: get("OPENAI_API_KEY"),
            openai_base_url: get("OPENAI_BASE_URL").unwrap_or(defaults.openai_base_url),
            model: get("PARLEY_MODEL").unwrap_or(defaults.model),
            temperature: parse_or("PARLEY_TEMPERATURE", get("PARLEY_TEMPERATURE"), defaults.temperature),
            tavily_api_key: get("TAVILY_API_KEY"),
            datadog: DatadogCredentials {
                api_key: get("DATADOG_API_KEY"),
                app_key: get("DATADOG_APP_KEY"),
                site: get("DATADOG_SITE"),
            },
            max_rounds: parse_or("PARLEY_MAX_ROUNDS", get("PARLEY_MAX_ROUNDS"), defaults.max_rounds)
                .max(1),
            thread_timeout: Duration::from_secs(parse_or(
                "PARLEY_THREAD_TIMEOUT_SECS",
                get("PARLEY_THREAD_TIMEOUT_SECS"),
                defaults.thread_timeout.as_secs(),
            )),
            deadline: defaults.deadline,
            offline: false,
        }
    }

    /// Whether a network model can be reached with these settings.
    pub fn model_configured(&self) -> bool {
        self.offline || self.openai_api_key.is_some()
    }

    /// How often the eviction task sweeps the store: a fifth of the idle
    /// timeout, at least one second.
    pub fn eviction_interval(&self) -> Duration {
        (self.thread_timeout / 5).max(Duration::from_secs(1))
    }

    /// Search and metrics tools sharing one HTTP client.
    pub fn build_registry(&self) -> Result<ToolRegistry, String> {
        let client = crate::api::http_client(TOOL_HTTP_TIMEOUT)?;
        Ok(ToolRegistry::new()
            .with(SearchTool::from_keys(client.clone(), self.tavily_api_key.clone()))
            .with(MetricsTool::new(client, self.datadog.clone())))
    }

    pub fn build_gateway(&self) -> Result<Arc<dyn ModelGateway>, String> {
        if self.offline {
            return Ok(Arc::new(ScriptedGateway::new().otherwise_text(OFFLINE_REPLY)));
        }
        let gateway = OpenAiGateway::new(self.openai_api_key.clone())?
            .with_base_url(self.openai_base_url.as_str())
            .with_model(self.model.as_str())
            .with_temperature(self.temperature);
        Ok(Arc::new(gateway))
    }

    pub fn build_store(&self) -> Arc<ThreadStore> {
        Arc::new(ThreadStore::new(self.thread_timeout))
    }

    pub fn build_config(&self) -> OrchestratorConfig {
        OrchestratorConfig::new()
            .with_max_rounds(self.max_rounds)
            .with_deadline(self.deadline)
    }

    /// Wire everything together. The eviction task is not started here; call
    /// [`ThreadStore::spawn_eviction`] from inside a runtime.
    pub fn build_orchestrator(&self) -> Result<Orchestrator, String> {
        let orchestrator = Orchestrator::new(
            self.build_gateway()?,
            self.build_registry()?,
            self.build_config(),
        )
        .with_store(self.build_store());
        Ok(orchestrator)
    }
}

fn parse_or<T: FromStr + Copy>(key: &str, raw: Option<String>, default: T) -> T {
    match raw {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid {key}={raw:?}, using the default");
            default
        }),
        None => default,
    }
}

//! Model interaction layer: the gateway seam, its HTTP and scripted
//! implementations, and the shared retry policy.
//!
//! - [`gateway`]: [`ModelGateway`] trait and the [`ModelResponse`] it returns.
//! - [`openai`]: [`OpenAiGateway`] for OpenAI-compatible `/chat/completions`
//!   endpoints.
//! - [`scripted`]: [`ScriptedGateway`], a canned-reply gateway for tests and
//!   offline runs.
//! - [`retry`]: [`RetryPolicy`] with uniform jitter, plus HTTP status
//!   classification for tool providers.

pub mod gateway;
pub mod openai;
pub mod retry;
pub mod scripted;

use std::time::Duration;

// Re-export commonly used items at the module level.
pub use gateway::{ModelGateway, ModelResponse};
pub use openai::OpenAiGateway;
pub use retry::RetryPolicy;
pub use scripted::ScriptedGateway;

/// Build the shared HTTP client used by tools.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, String> {
    reqwest::Client::builder()
        .user_agent(concat!("parley/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()
        .map_err(|e| format!("failed to build HTTP client: {e}"))
}

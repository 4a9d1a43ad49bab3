//! Retry policy with uniform jitter.
//!
//! Rate-limited providers punish synchronized retries, so the delay before
//! each retry is drawn uniformly from `[min_delay, max_delay]` rather than
//! growing exponentially. The same policy drives tool retries in the
//! [`ResilientInvoker`](crate::tools::invoker::ResilientInvoker) and optional
//! transient-error retries in the model gateway.

use crate::error::ToolFailure;
use rand::Rng;
use std::time::Duration;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first (1 = no retries).
    pub max_attempts: u32,
    /// Lower bound of the delay before a retry.
    pub min_delay: Duration,
    /// Upper bound of the delay before a retry.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    /// A single attempt, never retried.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Default delays with the given number of total attempts.
    pub fn with_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts.max(1),
            ..Default::default()
        }
    }

    /// Same attempt count, no waiting between attempts.
    pub fn immediate(attempts: u32) -> Self {
        Self {
            max_attempts: attempts.max(1),
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Whether `attempt` (1-based) may be followed by another.
    pub fn has_attempt_after(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Draw the delay to wait before the next attempt.
    pub fn jitter(&self) -> Duration {
        let lo = self.min_delay.as_millis() as u64;
        let hi = self.max_delay.as_millis() as u64;
        if hi <= lo {
            return self.min_delay;
        }
        // The RNG is dropped before the caller awaits.
        Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
    }
}

// ── HTTP status classification ─────────────────────────────────────

/// Map a non-success upstream HTTP status to a tool failure.
///
/// 429 is throttling, 5xx is transient, 401/403 means the credentials are
/// wrong, anything else is treated as a bad request.
pub fn classify_status(provider: &str, status: u16, body: &str) -> ToolFailure {
    let preview: String = body.chars().take(200).collect();
    let message = format!("{provider} returned HTTP {status}: {preview}");
    match status {
        429 => ToolFailure::rate_limited(message),
        401 | 403 => ToolFailure::not_configured(message),
        s if s >= 500 => ToolFailure::transient(message),
        _ => ToolFailure::invalid_argument(message),
    }
}

/// Map a transport-level `reqwest` error to a tool failure.
pub fn classify_transport(provider: &str, error: &reqwest::Error) -> ToolFailure {
    if error.is_timeout() {
        ToolFailure::transient(format!("{provider} request timed out: {error}"))
    } else {
        ToolFailure::transient(format!("{provider} request failed: {error}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolErrorKind;

    #[test]
    fn default_policy_is_three_attempts_one_to_three_seconds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.min_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(3));
    }

    #[test]
    fn jitter_stays_in_range() {
        let policy = RetryPolicy::default();
        for _ in 0..200 {
            let d = policy.jitter();
            assert!(d >= Duration::from_secs(1), "{d:?} below range");
            assert!(d <= Duration::from_secs(3), "{d:?} above range");
        }
    }

    #[test]
    fn immediate_policy_never_waits() {
        let policy = RetryPolicy::immediate(3);
        assert_eq!(policy.jitter(), Duration::ZERO);
    }

    #[test]
    fn attempt_accounting() {
        let policy = RetryPolicy::default();
        assert!(policy.has_attempt_after(1));
        assert!(policy.has_attempt_after(2));
        assert!(!policy.has_attempt_after(3));
        assert!(!RetryPolicy::none().has_attempt_after(1));
        assert_eq!(RetryPolicy::with_attempts(0).max_attempts, 1);
    }

    #[test]
    fn status_classification() {
        assert_eq!(
            classify_status("tavily", 429, "").kind,
            ToolErrorKind::RateLimited
        );
        assert_eq!(
            classify_status("tavily", 502, "bad gateway").kind,
            ToolErrorKind::TransientUpstream
        );
        assert_eq!(
            classify_status("datadog", 403, "forbidden").kind,
            ToolErrorKind::NotConfigured
        );
        assert_eq!(
            classify_status("datadog", 400, "bad query").kind,
            ToolErrorKind::InvalidArgument
        );
    }
}

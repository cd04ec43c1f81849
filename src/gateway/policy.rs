//! Retry policy for provider calls.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Longest wait honoured from a provider's retry-after hint.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Calls made to the primary provider for retryable errors before
    /// moving on to the fallbacks.
    #[serde(default = "default_max_attempts")]
    pub max_attempts_per_stage: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

fn default_max_attempts() -> u32 {
    2
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    8_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts_per_stage: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts.
    pub fn immediate(max_attempts_per_stage: u32) -> Self {
        Self {
            max_attempts_per_stage,
            backoff_base_ms: 0,
            backoff_max_ms: 0,
        }
    }

    /// Wait before retry number `attempt` (0-based), taking the provider's
    /// retry-after when it asks for longer.
    pub fn delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let backoff = backoff_delay(attempt, self.backoff_base_ms)
            .min(Duration::from_millis(self.backoff_max_ms));
        match retry_after {
            Some(hint) => backoff.max(hint.min(MAX_RETRY_AFTER)),
            None => backoff,
        }
    }
}

/// Exponential backoff: `base_ms * 2^attempt`, capped at one minute.
pub fn backoff_delay(attempt: u32, base_ms: u64) -> Duration {
    let delay_ms = base_ms.saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(delay_ms.min(60_000))
}

/// Parse a `Retry-After` header given in seconds.
pub fn parse_retry_after(header_value: Option<&str>) -> Option<Duration> {
    header_value?
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| Duration::from_secs(secs).min(MAX_RETRY_AFTER))
}

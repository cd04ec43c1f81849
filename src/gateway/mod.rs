//! Text-generation providers behind one retrying, falling-back gateway.
//!
//! The gateway knows nothing about recipes. Callers hand it a prompt plus
//! [`GenerationConstraints`] and, optionally, a parser that turns raw text
//! into a typed value; a parse failure counts as malformed output and moves
//! on to the next provider like any other provider error.

mod anthropic;
pub mod config;
mod fallback;
mod heuristic;
mod http;
mod ollama;
mod openai;
pub mod policy;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use anthropic::AnthropicProvider;
pub use config::{ProviderConfig, ProviderKind, ProvidersConfig};
pub use fallback::{Generated, ProviderExhausted, ProviderGateway};
pub use heuristic::HeuristicProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;
pub use policy::RetryPolicy;

/// What a generation call is for. Lets offline providers pick a behaviour
/// without reading the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationTask {
    ChangePlan,
    Variant,
}

impl GenerationTask {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChangePlan => "change_plan",
            Self::Variant => "variant",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConstraints {
    pub task: GenerationTask,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Structured form of the prompt's inputs.
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub constraints: GenerationConstraints,
    /// Upper bound for a single provider call.
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResult {
    pub text: String,
    pub provider: String,
    pub model: String,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("provider call timed out")]
    Timeout,

    #[error("provider rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("malformed provider output: {0}")]
    MalformedOutput(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

impl ProviderError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::RateLimited { .. } => "rate_limited",
            Self::MalformedOutput(_) => "malformed_output",
            Self::Unavailable(_) => "unavailable",
        }
    }

    /// Worth another attempt on the same provider.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::RateLimited { .. })
    }
}

/// A single text-generation backend.
#[async_trait]
pub trait TextProvider: Send + Sync {
    /// Name recorded as `provider_used`.
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<String, ProviderError>;
}

/// Build a provider from its configuration.
pub fn build_provider(
    config: &ProviderConfig,
) -> Result<std::sync::Arc<dyn TextProvider>, ProviderError> {
    use std::sync::Arc;
    Ok(match config.kind {
        ProviderKind::Ollama => Arc::new(OllamaProvider::new(config)?),
        ProviderKind::OpenAI => Arc::new(OpenAiProvider::new(config)?),
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(config)?),
        ProviderKind::Heuristic => Arc::new(HeuristicProvider::new()),
    })
}

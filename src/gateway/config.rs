//! Provider configuration.

use serde::{Deserialize, Serialize};

use super::policy::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Ollama API (local)
    #[default]
    Ollama,
    /// OpenAI-compatible chat completions (OpenAI, Groq, Together.ai)
    #[serde(rename = "openai", alias = "groq", alias = "together")]
    OpenAI,
    /// Anthropic messages API
    Anthropic,
    /// Offline rule-based generator
    Heuristic,
}

impl ProviderKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "ollama" => Some(Self::Ollama),
            "openai" | "groq" | "together" => Some(Self::OpenAI),
            "anthropic" | "claude" => Some(Self::Anthropic),
            "heuristic" | "offline" => Some(Self::Heuristic),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::OpenAI => "openai",
            Self::Anthropic => "anthropic",
            Self::Heuristic => "heuristic",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub kind: ProviderKind,
    /// Name recorded as `provider_used`; defaults to the kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// API endpoint; provider-specific default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_temperature() -> f32 {
    0.3
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::of_kind(ProviderKind::default())
    }
}

impl ProviderConfig {
    pub fn of_kind(kind: ProviderKind) -> Self {
        Self {
            kind,
            name: None,
            endpoint: None,
            api_key: None,
            model: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.kind.as_str())
    }

    pub fn endpoint(&self) -> &str {
        if let Some(ref endpoint) = self.endpoint {
            return endpoint.trim_end_matches('/');
        }
        match self.kind {
            ProviderKind::Ollama => "http://localhost:11434",
            ProviderKind::OpenAI => "https://api.openai.com",
            ProviderKind::Anthropic => "https://api.anthropic.com",
            ProviderKind::Heuristic => "",
        }
    }

    pub fn model(&self) -> &str {
        if let Some(ref model) = self.model {
            return model;
        }
        match self.kind {
            ProviderKind::Ollama => "llama3.1:8b",
            ProviderKind::OpenAI => "gpt-4o-mini",
            ProviderKind::Anthropic => "claude-3-5-haiku-latest",
            ProviderKind::Heuristic => "rules-v1",
        }
    }
}

/// Primary provider, ordered fallbacks and the retry policy between them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub primary: ProviderConfig,
    #[serde(default = "default_fallbacks")]
    pub fallbacks: Vec<ProviderConfig>,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Per-call timeout in seconds.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

fn default_fallbacks() -> Vec<ProviderConfig> {
    vec![ProviderConfig::of_kind(ProviderKind::Heuristic)]
}

fn default_call_timeout_secs() -> u64 {
    60
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            primary: ProviderConfig::default(),
            fallbacks: default_fallbacks(),
            retry: RetryPolicy::default(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

impl ProvidersConfig {
    /// Apply environment variable overrides to the primary provider.
    ///
    /// Supported env vars:
    /// - `LLM_PROVIDER`: "ollama", "openai", "groq", "together", "anthropic" or "heuristic"
    /// - `LLM_ENDPOINT`, `LLM_MODEL`, `LLM_API_KEY`
    /// - `OPENAI_API_KEY`, `GROQ_API_KEY`, `ANTHROPIC_API_KEY`
    /// - `ADJUST_MAX_ATTEMPTS`: attempts on the primary per stage
    ///
    /// An explicit `LLM_PROVIDER` wins over auto-detection from API keys.
    pub fn with_env_overrides(mut self) -> Self {
        let explicit_provider = std::env::var("LLM_PROVIDER").ok();
        let explicit_endpoint = std::env::var("LLM_ENDPOINT").ok();
        let primary = &mut self.primary;

        if let Some(ref val) = explicit_provider {
            if let Some(kind) = ProviderKind::from_str(val) {
                primary.kind = kind;
                primary.name = Some(val.to_lowercase());
            }
        }
        if let Some(ref endpoint) = explicit_endpoint {
            primary.endpoint = Some(endpoint.clone());
        }
        if let Ok(val) = std::env::var("LLM_API_KEY") {
            primary.api_key = Some(val);
        }

        if let Some(ref provider) = explicit_provider {
            let provider = provider.to_lowercase();
            if explicit_endpoint.is_none() {
                match provider.as_str() {
                    "groq" => primary.endpoint = Some("https://api.groq.com/openai".to_string()),
                    "together" => primary.endpoint = Some("https://api.together.xyz".to_string()),
                    _ => {}
                }
            }
            if primary.api_key.is_none() {
                primary.api_key = match provider.as_str() {
                    "groq" => std::env::var("GROQ_API_KEY").ok(),
                    "openai" => std::env::var("OPENAI_API_KEY").ok(),
                    "anthropic" | "claude" => std::env::var("ANTHROPIC_API_KEY").ok(),
                    _ => None,
                };
            }
        } else if primary.api_key.is_none() {
            let detected = [
                ("groq", ProviderKind::OpenAI, "GROQ_API_KEY", Some("https://api.groq.com/openai")),
                ("openai", ProviderKind::OpenAI, "OPENAI_API_KEY", None),
                ("anthropic", ProviderKind::Anthropic, "ANTHROPIC_API_KEY", None),
            ]
            .into_iter()
            .find_map(|(name, kind, var, endpoint)| {
                std::env::var(var).ok().map(|key| (name, kind, key, endpoint))
            });
            if let Some((name, kind, key, endpoint)) = detected {
                primary.kind = kind;
                primary.name = Some(name.to_string());
                primary.api_key = Some(key);
                if explicit_endpoint.is_none() {
                    primary.endpoint = endpoint.map(str::to_string);
                }
            }
        }

        if let Ok(val) = std::env::var("LLM_MODEL") {
            primary.model = Some(val);
        }
        if let Ok(val) = std::env::var("ADJUST_MAX_ATTEMPTS") {
            if let Ok(n) = val.parse::<u32>() {
                self.retry.max_attempts_per_stage = n.max(1);
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fall_back_to_heuristic() {
        let config = ProvidersConfig::default();
        assert_eq!(config.primary.kind, ProviderKind::Ollama);
        assert_eq!(config.fallbacks.len(), 1);
        assert_eq!(config.fallbacks[0].kind, ProviderKind::Heuristic);
        assert_eq!(config.retry.max_attempts_per_stage, 2);
    }

    #[test]
    fn test_provider_aliases() {
        assert_eq!(ProviderKind::from_str("Groq"), Some(ProviderKind::OpenAI));
        assert_eq!(ProviderKind::from_str("claude"), Some(ProviderKind::Anthropic));
        assert_eq!(ProviderKind::from_str("bard"), None);

        let parsed: ProviderConfig = toml::from_str("kind = \"together\"").unwrap();
        assert_eq!(parsed.kind, ProviderKind::OpenAI);
        assert_eq!(parsed.max_tokens, 2048);
    }

    #[test]
    fn test_endpoint_and_name_defaults() {
        let mut config = ProviderConfig::of_kind(ProviderKind::Anthropic);
        assert_eq!(config.endpoint(), "https://api.anthropic.com");
        assert_eq!(config.name(), "anthropic");

        config.endpoint = Some("http://proxy.local/".to_string());
        config.name = Some("claude-proxy".to_string());
        assert_eq!(config.endpoint(), "http://proxy.local");
        assert_eq!(config.name(), "claude-proxy");
    }
}

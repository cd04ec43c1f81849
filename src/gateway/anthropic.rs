//! Anthropic messages API.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::config::ProviderConfig;
use super::http::{build_client, read_json, send_error};
use super::{GenerationRequest, ProviderError, TextProvider};

const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    name: String,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    client: Client,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl AnthropicProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            name: config.name().to_string(),
            endpoint: config.endpoint().to_string(),
            model: config.model().to_string(),
            api_key: config.api_key.clone(),
            client: build_client()?,
        })
    }
}

#[async_trait]
impl TextProvider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, ProviderError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            ProviderError::Unavailable(format!("{}: ANTHROPIC_API_KEY not set", self.name))
        })?;

        let body = MessagesRequest {
            model: &self.model,
            max_tokens: request.constraints.max_tokens,
            temperature: request.constraints.temperature,
            system: "You are a careful recipe editor. Reply with a single JSON object and nothing else.",
            messages: vec![Message {
                role: "user",
                content: &request.prompt,
            }],
        };

        let url = format!("{}/v1/messages", self.endpoint);
        debug!(provider = %self.name, model = %self.model, "POST {}", url);
        let resp = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(send_error)?;

        let parsed: MessagesResponse = read_json(resp).await?;
        let text: String = parsed
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");
        if text.trim().is_empty() {
            return Err(ProviderError::MalformedOutput("empty message".to_string()));
        }
        Ok(text)
    }
}

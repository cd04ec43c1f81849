//! Ollama provider (local inference).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::config::ProviderConfig;
use super::http::{build_client, read_json, send_error};
use super::{GenerationRequest, ProviderError, TextProvider};

pub struct OllamaProvider {
    name: String,
    endpoint: String,
    model: String,
    client: Client,
}

/// Ollama API request format.
#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    format: &'a str,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

impl OllamaProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            name: config.name().to_string(),
            endpoint: config.endpoint().to_string(),
            model: config.model().to_string(),
            client: build_client()?,
        })
    }
}

#[async_trait]
impl TextProvider for OllamaProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, ProviderError> {
        let body = OllamaRequest {
            model: &self.model,
            prompt: &request.prompt,
            stream: false,
            format: "json",
            options: OllamaOptions {
                temperature: request.constraints.temperature,
                num_predict: request.constraints.max_tokens,
            },
        };

        let url = format!("{}/api/generate", self.endpoint);
        debug!(provider = %self.name, model = %self.model, "POST {}", url);
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(send_error)?;

        let parsed: OllamaResponse = read_json(resp).await?;
        Ok(parsed.response)
    }
}

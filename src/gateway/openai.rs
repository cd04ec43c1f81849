//! OpenAI-compatible chat completions (OpenAI, Groq, Together.ai).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::config::ProviderConfig;
use super::http::{build_client, read_json, send_error};
use super::{GenerationRequest, ProviderError, TextProvider};

const SYSTEM_PROMPT: &str =
    "You are a careful recipe editor. Reply with a single JSON object and nothing else.";

pub struct OpenAiProvider {
    name: String,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    client: Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

impl OpenAiProvider {
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
impl TextProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, ProviderError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            ProviderError::Unavailable(format!("{}: API key not configured", self.name))
        })?;

        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            max_tokens: request.constraints.max_tokens,
            temperature: request.constraints.temperature,
        };

        let url = format!("{}/v1/chat/completions", self.endpoint);
        debug!(provider = %self.name, model = %self.model, "POST {}", url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(send_error)?;

        let parsed: ChatResponse = read_json(resp).await?;
        if let Some(error) = parsed.error {
            return Err(ProviderError::Unavailable(error.message));
        }
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| ProviderError::MalformedOutput("empty completion".to_string()))
    }
}

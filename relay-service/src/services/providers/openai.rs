//! OpenAI chat-completion provider.
//!
//! Speaks the `/chat/completions` API, so any compatible endpoint can be
//! configured through the base URL.

use super::{
    ChatMessage, FinishReason, GenerationParams, ProviderError, ProviderResponse, TextProvider,
};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// OpenAI provider configuration.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: Secret<String>,
    /// API base URL, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    pub model: String,
    /// Upper bound on a single upstream call.
    pub timeout: Duration,
}

/// OpenAI text provider.
pub struct OpenAiTextProvider {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiTextProvider {
    pub fn new(config: OpenAiConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }
}

fn transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::NetworkError(e.to_string())
    }
}

#[async_trait]
impl TextProvider for OpenAiTextProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<ProviderResponse, ProviderError> {
        let request = ChatCompletionRequest {
            model: &self.config.model,
            messages,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
        };

        tracing::debug!(
            model = %self.config.model,
            message_count = messages.len(),
            "Sending request to chat-completion API"
        );

        let response = self
            .client
            .post(self.api_url("chat/completions"))
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();

            if status.as_u16() == 429 {
                return Err(ProviderError::RateLimited);
            }

            return Err(ProviderError::ApiError(format!(
                "chat-completion API error {}: {}",
                status, error_text
            )));
        }

        let api_response: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ApiError(format!("Failed to parse response: {}", e)))?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or(ProviderError::EmptyResponse)?;

        let text = choice
            .message
            .content
            .map(|c| c.trim().to_string())
            .unwrap_or_default();
        if text.is_empty() {
            return Err(ProviderError::EmptyResponse);
        }

        let finish_reason = match choice.finish_reason.as_deref() {
            Some("stop") => FinishReason::Complete,
            Some("length") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            _ => FinishReason::Other,
        };

        let usage = api_response.usage.unwrap_or_default();

        Ok(ProviderResponse {
            text,
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            finish_reason,
        })
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        let url = self.api_url(&format!("models/{}", self.config.model));

        let response = self
            .client
            .get(&url)
            .bearer_auth(self.config.api_key.expose_secret())
            .send()
            .await
            .map_err(transport_error)?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ProviderError::ApiError(format!(
                "Health check failed: {}",
                response.status()
            )))
        }
    }
}

// API request/response types

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

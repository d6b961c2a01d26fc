//! Anthropic Messages API client

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{LlmClient, MessageRequest, MessageResponse};
use crate::error::{Result, RunnerError};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

/// Connection settings for the Anthropic API
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub base_url: String,
}

impl AnthropicConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorDetail,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: String,
}

/// Anthropic API client. Failures are reported once; there is no retry.
pub struct AnthropicClient {
    client: Client,
    config: AnthropicConfig,
}

impl AnthropicClient {
    pub fn new(config: AnthropicConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn messages_url(&self) -> String {
        format!("{}/messages", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn send(&self, request: &MessageRequest) -> Result<MessageResponse> {
        debug!(
            "Sending {} messages to model {} ({} tools)",
            request.messages.len(),
            request.model,
            request.tools.len()
        );

        let res = self
            .client
            .post(self.messages_url())
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
            .json(request)
            .send()
            .await
            .map_err(|e| RunnerError::transport(format!("Failed to reach model API: {}", e)))?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<AnthropicError>(&body) {
                Ok(err) => format!("{} ({}): {}", status, err.error.error_type, err.error.message),
                Err(_) => format!("{}: {}", status, body),
            };
            return Err(RunnerError::transport(message));
        }

        res.json::<MessageResponse>()
            .await
            .map_err(|e| RunnerError::transport(format!("Invalid model response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_url_trims_trailing_slash() {
        let client = AnthropicClient::new(
            AnthropicConfig::new("key").with_base_url("http://localhost:9999/v1/"),
        );
        assert_eq!(client.messages_url(), "http://localhost:9999/v1/messages");
    }

    #[test]
    fn test_default_base_url() {
        let config = AnthropicConfig::new("key");
        assert_eq!(config.base_url, "https://api.anthropic.com/v1");
    }
}

//! OpenAI-compatible chat completions client.
//!
//! Works with any endpoint speaking the `/chat/completions` format (OpenAI,
//! Groq, DeepSeek, OpenRouter, Ollama, llama.cpp). Providers differ only by
//! base URL and API key.

use std::time::Duration;

use async_trait::async_trait;
use badgeflow_core::config::LlmConfig;
use badgeflow_core::error::{AutomationError, Result};
use serde_json::{Value, json};

use crate::{ChatClient, ChatMessage};

pub struct OpenAiCompatibleClient {
    /// Host of the endpoint, used in log and error messages.
    name: String,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
    client: reqwest::Client,
}

impl OpenAiCompatibleClient {
    /// API key: `llm.api_key` > `$llm.api_key_env` > none (local servers).
    pub fn from_config(config: &LlmConfig, timeout: Duration) -> Result<Self> {
        let base_url = config.endpoint.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(AutomationError::Config("llm.endpoint must not be empty".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AutomationError::Http(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            name: endpoint_name(&base_url),
            api_key: config.resolve_api_key(),
            base_url,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout,
            client,
        })
    }

    fn request_body(&self, messages: &[ChatMessage]) -> Value {
        json!({
            "model": self.model,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "messages": messages,
        })
    }

    fn apply_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            req
        } else {
            req.header("Authorization", format!("Bearer {}", self.api_key))
        }
    }
}

/// Text of the first choice in a chat completions response.
pub fn parse_completion(json: &Value) -> Result<String> {
    let choice = json["choices"]
        .get(0)
        .ok_or_else(|| AutomationError::Http("No choices in response".into()))?;
    choice["message"]["content"]
        .as_str()
        .map(String::from)
        .ok_or_else(|| AutomationError::Http("Response choice has no text content".into()))
}

fn endpoint_name(base_url: &str) -> String {
    let without_scheme = base_url.split("://").nth(1).unwrap_or(base_url);
    without_scheme.split('/').next().unwrap_or(without_scheme).to_string()
}

#[async_trait]
impl ChatClient for OpenAiCompatibleClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let req = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&self.request_body(messages));
        let resp = self.apply_auth(req).send().await.map_err(|e| {
            if e.is_timeout() {
                AutomationError::Timeout {
                    operation: format!("{} chat completion", self.name),
                    secs: self.timeout.as_secs(),
                }
            } else {
                AutomationError::Http(format!("{} connection failed ({}): {}", self.name, url, e))
            }
        })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(AutomationError::Http(format!(
                "{} API error {}: {}",
                self.name, status, text
            )));
        }

        let json: Value = resp
            .json()
            .await
            .map_err(|e| AutomationError::Http(e.to_string()))?;
        let content = parse_completion(&json)?;
        tracing::debug!("{} replied with {} chars", self.name, content.len());
        Ok(content)
    }
}

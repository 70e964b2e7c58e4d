use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use crate::core::config::LlmConfig;

pub mod observability;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("language model is not configured: {0}")]
    NotConfigured(String),
    #[error("request to language model failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("language model returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("language model returned an empty completion")]
    EmptyResponse,
    #[error("language model returned an unreadable response: {0}")]
    InvalidResponse(String),
}

/// Per-call overrides. Unset fields fall back to the provider's configuration.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Ask the provider for a bare JSON object.
    pub json_mode: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmCompletion {
    pub content: String,
    pub model: String,
    pub usage: TokenUsage,
}

#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn generate(
        &self,
        system: &str,
        user: &str,
        options: &GenerateOptions,
    ) -> Result<LlmCompletion, LlmError>;

    fn model_name(&self) -> &str;
}

pub struct OpenAIClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
}

impl OpenAIClient {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
                .trim_end_matches('/')
                .to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.2,
        }
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    fn request_body(&self, system: &str, user: &str, options: &GenerateOptions) -> Value {
        let mut body = json!({
            "model": options.model.as_deref().unwrap_or(&self.model),
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user}
            ],
            "temperature": options.temperature.unwrap_or(self.temperature),
        });
        if let Some(max_tokens) = options.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if options.json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }
        body
    }
}

#[async_trait]
impl LLMProvider for OpenAIClient {
    async fn generate(
        &self,
        system: &str,
        user: &str,
        options: &GenerateOptions,
    ) -> Result<LlmCompletion, LlmError> {
        if self.api_key.trim().is_empty() {
            return Err(LlmError::NotConfigured("llm.api_key is empty".to_string()));
        }

        let url = format!("{}/chat/completions", self.base_url);
        debug!("LLM request to {url} (model {})", options.model.as_deref().unwrap_or(&self.model));

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&self.request_body(system, user, options))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("LLM provider answered {status}");
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let result: Value = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let content = result["choices"][0]["message"]["content"]
            .as_str()
            .map(str::trim)
            .unwrap_or("");
        if content.is_empty() {
            return Err(LlmError::EmptyResponse);
        }

        let usage = TokenUsage {
            prompt_tokens: result["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
            completion_tokens: result["usage"]["completion_tokens"].as_u64().unwrap_or(0),
            total_tokens: result["usage"]["total_tokens"].as_u64().unwrap_or(0),
        };

        Ok(LlmCompletion {
            content: content.to_string(),
            model: result["model"]
                .as_str()
                .unwrap_or_else(|| options.model.as_deref().unwrap_or(&self.model))
                .to_string(),
            usage,
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_for(server: &mockito::ServerGuard) -> OpenAIClient {
        OpenAIClient::new("test-key".to_string(), Some(server.url())).with_model("gpt-test")
    }

    #[tokio::test]
    async fn test_generate_parses_completion() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .match_body(mockito::Matcher::PartialJson(json!({
                "model": "gpt-test",
                "response_format": {"type": "json_object"}
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "model": "gpt-test-0613",
                    "choices": [{"message": {"role": "assistant", "content": " {\"title\":\"x\"} "}}],
                    "usage": {"prompt_tokens": 12, "completion_tokens": 5, "total_tokens": 17}
                })
                .to_string(),
            )
            .create_async()
            .await;

        let options = GenerateOptions {
            json_mode: true,
            ..Default::default()
        };
        let completion = client_for(&server)
            .generate("system", "user", &options)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(completion.content, "{\"title\":\"x\"}");
        assert_eq!(completion.model, "gpt-test-0613");
        assert_eq!(completion.usage.total_tokens, 17);
    }

    #[tokio::test]
    async fn test_http_error_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_body("rate limited")
            .create_async()
            .await;

        let err = client_for(&server)
            .generate("s", "u", &GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Status { status: 429, .. }));
    }

    #[tokio::test]
    async fn test_empty_choice_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[{"message":{"content":""}}]}"#)
            .create_async()
            .await;

        let err = client_for(&server)
            .generate("s", "u", &GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::EmptyResponse));
    }

    #[tokio::test]
    async fn test_missing_key_fails_fast() {
        let client = OpenAIClient::new(String::new(), None);
        let err = client
            .generate("s", "u", &GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::NotConfigured(_)));
    }
}

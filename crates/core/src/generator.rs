//! # Generator
//!
//! The single external capability the pipeline consumes:
//! `generate(prompt) -> text`. Role workers are opaque to where the text comes
//! from; the bundled [`HttpGenerator`] talks to an OpenAI-compatible chat
//! endpoint, and [`StaticGenerator`] serves canned responses for tests and
//! demos.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Generator failure, split so callers can distinguish retryable conditions
#[derive(Debug, Error)]
pub enum GeneratorError {
    /// Network hiccup, rate limit, or server-side error; safe to retry
    #[error("transient generator failure: {0}")]
    Transient(String),
    /// Request rejected or malformed; retrying will not help
    #[error("generator request failed: {0}")]
    Fatal(String),
    /// The endpoint answered but produced no usable text
    #[error("generator returned an empty response")]
    Empty,
}

impl GeneratorError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GeneratorError::Transient(_))
    }
}

/// The external text-generation capability
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GeneratorError>;
}

/// Configuration for the HTTP generator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Base URL of an OpenAI-compatible endpoint (no trailing slash)
    pub base_url: String,
    /// Model name passed through to the endpoint
    pub model: String,
    /// Environment variable holding the API key, read lazily per request
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_temperature() -> f32 {
    0.7
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            temperature: 0.7,
        }
    }
}

/// Chat-completions client for any OpenAI-compatible endpoint.
///
/// Timeouts, 429s and 5xx responses surface as [`GeneratorError::Transient`]
/// so the caller can decide whether to retry; everything else is fatal.
pub struct HttpGenerator {
    client: reqwest::Client,
    config: GeneratorConfig,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

impl HttpGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn api_key(&self) -> Option<String> {
        self.config
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GeneratorError> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.config.temperature,
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = self.api_key() {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                GeneratorError::Transient(e.to_string())
            } else {
                GeneratorError::Fatal(e.to_string())
            }
        })?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(GeneratorError::Transient(format!(
                "endpoint returned {status}"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GeneratorError::Fatal(format!("{status}: {body}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| GeneratorError::Fatal(format!("malformed response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or(GeneratorError::Empty)
    }
}

/// Canned-response generator for tests and offline demos.
///
/// Serves queued responses in order, then falls back to a fixed string.
pub struct StaticGenerator {
    responses: Mutex<VecDeque<String>>,
    fallback: String,
}

impl StaticGenerator {
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            fallback: fallback.into(),
        }
    }

    pub fn push(&self, response: impl Into<String>) {
        self.responses.lock().unwrap().push_back(response.into());
    }

    pub fn with_responses<I, S>(responses: I, fallback: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            fallback: fallback.into(),
        }
    }
}

#[async_trait]
impl Generator for StaticGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String, GeneratorError> {
        let next = self.responses.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| self.fallback.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(GeneratorError::Transient("429".into()).is_transient());
        assert!(!GeneratorError::Fatal("401".into()).is_transient());
        assert!(!GeneratorError::Empty.is_transient());
    }

    #[tokio::test]
    async fn test_static_generator_order_then_fallback() {
        let gen = StaticGenerator::with_responses(["one", "two"], "rest");
        assert_eq!(gen.generate("p").await.unwrap(), "one");
        assert_eq!(gen.generate("p").await.unwrap(), "two");
        assert_eq!(gen.generate("p").await.unwrap(), "rest");
        assert_eq!(gen.generate("p").await.unwrap(), "rest");
    }

    #[test]
    fn test_default_config() {
        let config = GeneratorConfig::default();
        assert!(config.base_url.starts_with("https://"));
        assert_eq!(config.api_key_env.as_deref(), Some("OPENAI_API_KEY"));
    }
}

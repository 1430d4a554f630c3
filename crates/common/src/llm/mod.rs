//! Completion service abstraction
//!
//! Thin client over an OpenAI-compatible chat completions endpoint.
//! Temperature is pinned by configuration (0 by default) so that the
//! analyzer, rewriter, and generator behave reproducibly for identical
//! inputs against a frozen index snapshot.

use crate::config::CompletionConfig;
use crate::errors::{EngineError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Trait for completion generation
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Send a prompt and return the raw response text
    async fn complete(&self, system: &str, prompt: &str) -> Result<String>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// HTTP completion client (OpenAI-compatible chat shape)
pub struct HttpCompletion {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: usize,
    timeout: Duration,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

impl HttpCompletion {
    /// Create a new completion client from configuration
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let base_url = config
            .api_base
            .clone()
            .ok_or_else(|| EngineError::Configuration {
                message: "completion.api_base is required".to_string(),
            })?;

        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout,
        })
    }
}

#[async_trait]
impl CompletionClient for HttpCompletion {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                EngineError::CompletionTimeout {
                    timeout_ms: self.timeout.as_millis() as u64,
                }
            } else {
                EngineError::Completion {
                    message: format!("Request failed: {}", e),
                }
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Completion {
                message: format!("API error {}: {}", status, body),
            });
        }

        let chat_response: ChatResponse =
            response.json().await.map_err(|e| EngineError::Completion {
                message: format!("Failed to parse response: {}", e),
            })?;

        chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| EngineError::Completion {
                message: "Empty response from completion service".to_string(),
            })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Scripted completion client for testing.
///
/// Returns queued responses in order; once the script is exhausted it
/// returns the fallback response, or an error if none was set.
pub struct MockCompletion {
    responses: std::sync::Mutex<std::collections::VecDeque<String>>,
    fallback: Option<String>,
}

impl MockCompletion {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses.into()),
            fallback: None,
        }
    }

    /// Always return the same response, regardless of prompt
    pub fn always(response: impl Into<String>) -> Self {
        Self {
            responses: std::sync::Mutex::new(std::collections::VecDeque::new()),
            fallback: Some(response.into()),
        }
    }

    pub fn with_fallback(mut self, response: impl Into<String>) -> Self {
        self.fallback = Some(response.into());
        self
    }
}

#[async_trait]
impl CompletionClient for MockCompletion {
    async fn complete(&self, _system: &str, _prompt: &str) -> Result<String> {
        let next = self
            .responses
            .lock()
            .map_err(|_| EngineError::Internal {
                message: "Mock completion lock poisoned".to_string(),
            })?
            .pop_front();

        match next.or_else(|| self.fallback.clone()) {
            Some(response) => Ok(response),
            None => Err(EngineError::Completion {
                message: "Mock completion script exhausted".to_string(),
            }),
        }
    }

    fn model_name(&self) -> &str {
        "mock-completion"
    }
}

/// Create a completion client from configuration
pub fn create_completion_client(config: &CompletionConfig) -> Result<Arc<dyn CompletionClient>> {
    match &config.api_base {
        Some(_) => Ok(Arc::new(HttpCompletion::new(config)?)),
        None => {
            tracing::warn!("No completion endpoint configured, using mock client");
            Ok(Arc::new(MockCompletion::always(
                "No completion endpoint configured.",
            )))
        }
    }
}

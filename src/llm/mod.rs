//! LLM integration.
//!
//! Skills talk to the model through the `LlmProvider` trait; the only
//! shipping implementation is `AnthropicProvider`, a thin reqwest client for
//! the Messages API. Tests substitute mock providers.

pub mod anthropic;
pub mod json;

pub use anthropic::AnthropicProvider;
pub use json::extract_json_object;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::LlmSettings;
use crate::error::LlmError;

/// A chat message in a completion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Request for a text completion.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            max_tokens: 4096,
            temperature: 0.0,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Response from a completion call.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Abstraction over LLM backends.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Model identifier used in logs.
    fn model_name(&self) -> &str;

    /// Run a completion and return the text of the first content block.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;
}

/// Create the production LLM provider from configuration.
pub fn create_provider(settings: &LlmSettings) -> Arc<dyn LlmProvider> {
    tracing::info!(model = %settings.model, "Using Anthropic");
    Arc::new(AnthropicProvider::new(settings))
}

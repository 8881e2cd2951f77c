//! Chat completion client.
//!
//! [`CompletionClient::complete`] turns a role-tagged message sequence into
//! response text. It never returns an error: inference failures are
//! rendered as text and flow through the agent loop like any other
//! response, so the user always sees why no answer was produced.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::InferenceConfig;
use crate::inference::{InferenceError, InferenceTransport};
use crate::models::ChatMessage;

#[async_trait]
pub trait CompletionClient: Send + Sync {
    fn model_name(&self) -> &str;

    async fn try_complete(&self, messages: &[ChatMessage]) -> Result<String, InferenceError>;

    /// Generate a response, converting failures into descriptive text.
    async fn complete(&self, messages: &[ChatMessage]) -> String {
        match self.try_complete(messages).await {
            Ok(text) => text,
            Err(e) => {
                warn!(model = self.model_name(), error = %e, "completion failed");
                render_failure(&e)
            }
        }
    }
}

/// Text shown in place of a model response when the call failed.
pub fn render_failure(err: &InferenceError) -> String {
    match err {
        InferenceError::Status { status, body } => {
            format!("Model error (status {}): {}", status, body)
        }
        other => format!("Request failed: {}", other),
    }
}

/// Completion client for an Ollama-compatible `/api/chat` endpoint.
pub struct OllamaChat {
    transport: InferenceTransport,
    model: String,
}

impl OllamaChat {
    pub fn new(config: &InferenceConfig) -> Result<Self, InferenceError> {
        let transport = InferenceTransport::new(
            config.base_url.clone(),
            Duration::from_secs(config.chat_timeout_secs),
            config.max_retries,
        )?;
        Ok(Self {
            transport,
            model: config.chat_model.clone(),
        })
    }
}

#[async_trait]
impl CompletionClient for OllamaChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn try_complete(&self, messages: &[ChatMessage]) -> Result<String, InferenceError> {
        debug!(model = %self.model, messages = messages.len(), "calling chat model");
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
        });
        let json = self.transport.post_json("/api/chat", &body).await?;
        parse_chat_response(&json)
    }
}

fn parse_chat_response(json: &serde_json::Value) -> Result<String, InferenceError> {
    json.get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| InferenceError::Malformed("missing message.content".to_string()))
}

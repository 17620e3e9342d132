//! Completion providers.
//!
//! [`CompletionProvider`] is the seam between the gateway and the
//! outside world: production wires in [`AnthropicClient`], tests wire
//! in mocks. The trait is deliberately narrow — one non-streaming
//! completion call — because that is all the analysis routes need.

pub mod anthropic;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::cost::TokenUsage;

pub use anthropic::AnthropicClient;

/// Message role in a completion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A single conversation message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A completion request, provider-agnostic.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    /// System prompt; empty means none.
    pub system_prompt: String,
    /// Attach an ephemeral cache-control hint to the system prompt.
    pub cache_system_prompt: bool,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// What a provider returns for a completion.
#[derive(Debug, Clone)]
pub struct ProviderCompletion {
    pub content: String,
    pub usage: TokenUsage,
    pub model: String,
    pub stop_reason: Option<String>,
}

/// A model completion backend.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Provider name for logs and metrics.
    fn name(&self) -> &str;

    /// Execute a completion request.
    async fn complete(&self, request: &CompletionRequest) -> Result<ProviderCompletion>;
}

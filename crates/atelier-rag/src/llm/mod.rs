//! Completion provider boundary.

pub mod openai;
pub mod streaming;

pub use openai::OpenAiCompletions;
pub use streaming::{StreamFragment, TokenStream};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::MessageRole;

/// One message in a provider request, in the wire shape OpenAI-compatible
/// APIs expect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 800,
            top_p: 1.0,
        }
    }
}

/// A complete (non-streamed) generation result.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub tokens_used: Option<u32>,
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// One-shot generation. Idempotent from the caller's perspective, so
    /// transient failures may be retried by the implementation.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        config: &GenerationConfig,
    ) -> Result<Completion>;

    /// Streaming generation. Not retried: fragments already delivered cannot
    /// be withdrawn, so mid-stream failures surface as an `Error` fragment.
    async fn complete_stream(
        &self,
        messages: &[ChatMessage],
        config: &GenerationConfig,
    ) -> Result<TokenStream>;

    fn model(&self) -> &str;
}

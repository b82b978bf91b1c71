//! Turn request/response types, prompt assembly helpers, and SSE framing.

pub mod engine;

pub use engine::ChatEngine;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::llm::ChatMessage;
use crate::types::{Message, MetadataFilter, SourceSummary, StreamToken};

pub const MAX_MESSAGE_CHARS: usize = 2000;

/// Default system instruction for the assistant. Callers can override it per
/// engine instance.
pub const SYSTEM_PROMPT: &str = "\
Sei l'assistente virtuale di Atelier Designers, uno studio specializzato in architettura e interior design.

Il tuo compito è aiutare i visitatori del sito web a:
- Scoprire i progetti dello studio (residenziali, commerciali, hospitality, retail)
- Rispondere a domande su servizi, approccio progettuale e portfolio
- Guidare gli utenti verso il contatto con lo studio per preventivi o collaborazioni

## Tono e Stile
- Usa un tono amichevole, professionale ma accessibile
- Mantieni le risposte concise ma complete (2-4 paragrafi)

## Conoscenze e Comportamento
- Hai accesso a informazioni reali sui progetti attraverso documenti recuperati dal database
- Quando rispondi, utilizza sempre le informazioni fornite nel [CONTEXT] sotto
- Se le informazioni richieste non sono nel context, dillo onestamente e invita al contatto diretto con lo studio
- Non inventare progetti, clienti o dettagli che non sono nel context

## Lingua
- Rispondi in italiano; se l'utente scrive in un'altra lingua, rispondi nella stessa lingua";

/// One turn request, transport-agnostic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default = "default_true")]
    pub stream: bool,
    #[serde(default = "default_true")]
    pub use_rag: bool,
    /// Off by default; sources are delivered only on request.
    #[serde(default)]
    pub include_sources: bool,
    #[serde(default)]
    pub rag_filters: Option<MetadataFilter>,
}

fn default_true() -> bool {
    true
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            session_id: None,
            stream: true,
            use_rag: true,
            include_sources: false,
            rag_filters: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let trimmed = self.message.trim();
        if trimmed.is_empty() {
            return Err(Error::Validation {
                field: "message",
                message: "message must not be blank".into(),
            });
        }
        let chars = self.message.chars().count();
        if chars > MAX_MESSAGE_CHARS {
            return Err(Error::Validation {
                field: "message",
                message: format!("message is {} chars, max {}", chars, MAX_MESSAGE_CHARS),
            });
        }
        if let Some(session_id) = &self.session_id {
            if uuid::Uuid::parse_str(session_id).is_err() {
                return Err(Error::Validation {
                    field: "session_id",
                    message: "session_id must be a valid UUID".into(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub model: String,
    pub tokens_used: Option<u32>,
    pub processing_time_ms: u64,
    pub rag_enabled: bool,
    pub documents_found: usize,
}

/// Result of a batch (non-streamed) turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub session_id: String,
    pub sources: Vec<SourceSummary>,
    pub metadata: ResponseMetadata,
}

/// Rough token estimate, 1 token per 4 characters. Used where exact
/// tokenization is unavailable.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

/// Token cost of a provider message list: per message, content plus a fixed
/// overhead of 4 for formatting and 1 for the role; plus 2 overall.
pub fn count_messages_tokens(messages: &[ChatMessage]) -> usize {
    messages
        .iter()
        .map(|m| 4 + estimate_tokens(&m.content) + 1)
        .sum::<usize>()
        + 2
}

fn message_cost(message: &Message) -> usize {
    4 + estimate_tokens(&message.content) + 1
}

/// Drop oldest messages until the history fits the token budget, preserving
/// the relative order of what remains. A history already within budget comes
/// back unchanged.
pub fn trim_history(history: Vec<Message>, max_tokens: usize) -> Vec<Message> {
    if history.is_empty() {
        return history;
    }
    let mut total: usize = history.iter().map(message_cost).sum::<usize>() + 2;
    let mut start = 0;
    while total > max_tokens && start < history.len() {
        total -= message_cost(&history[start]);
        start += 1;
    }
    if start > 0 {
        tracing::debug!(dropped = start, kept = history.len() - start, "history trimmed");
    }
    history.into_iter().skip(start).collect()
}

/// Server-sent-event framing of stream tokens.
pub mod sse {
    use super::*;

    /// Render one token as an SSE event. Delta text passes through verbatim,
    /// whitespace included.
    pub fn frame(token: &StreamToken) -> String {
        match token {
            StreamToken::Delta { text } => format!("data: {}\n\n", text),
            StreamToken::Sources { sources } => {
                let json = serde_json::to_string(sources).unwrap_or_else(|_| "[]".into());
                format!("data: [SOURCES]{}\n\n", json)
            }
            StreamToken::Done => "data: [DONE]\n\n".to_string(),
            StreamToken::Error { message } => format!("data: [ERROR]{}\n\n", message),
        }
    }
}

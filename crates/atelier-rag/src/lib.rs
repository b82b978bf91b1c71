//! Hybrid retrieval and streaming chat pipeline for a design-studio
//! knowledge base: query classification, entity plus vector search over a
//! document store, bounded context formatting, and turn orchestration with
//! conversation memory and SSE-framed streaming.

pub mod chat;
pub mod classifier;
pub mod config;
pub mod context;
pub mod embeddings;
pub mod error;
pub mod llm;
pub mod memory;
pub mod search;
pub mod storage;
pub mod types;

// Re-export primary types for convenience
pub use chat::{ChatEngine, ChatRequest, ChatResponse, ResponseMetadata};
pub use classifier::QueryClassifier;
pub use config::ChatbotConfig;
pub use context::ContextFormatter;
pub use embeddings::{EmbeddingProvider, OpenAiEmbeddings};
pub use error::{Error, Result};
pub use llm::{CompletionProvider, GenerationConfig, OpenAiCompletions, TokenStream};
pub use memory::{ConversationStore, MemoryConversationStore, SessionInfo};
pub use search::HybridSearcher;
pub use storage::{DocumentStore, MemoryDocumentStore};
pub use types::{
    DocumentChunk, DocumentMetadata, Message, MessageRole, MetadataFilter, QueryClassification,
    SourceSummary, StreamToken,
};

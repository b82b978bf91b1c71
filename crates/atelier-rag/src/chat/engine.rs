//! Turn orchestration: retrieval, prompt assembly, generation, persistence.

use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tokio::sync::mpsc;

use super::{
    count_messages_tokens, sse, trim_history, ChatRequest, ChatResponse, ResponseMetadata,
    SYSTEM_PROMPT,
};
use crate::classifier::QueryClassifier;
use crate::config::ChatbotConfig;
use crate::context::ContextFormatter;
use crate::embeddings::EmbeddingProvider;
use crate::error::Result;
use crate::llm::{ChatMessage, CompletionProvider, GenerationConfig, StreamFragment};
use crate::memory::{generate_session_id, ConversationStore};
use crate::search::HybridSearcher;
use crate::storage::DocumentStore;
use crate::types::{MessageRole, SourceSummary, StreamToken};

/// Outcome of the retrieval stage. Errors never escape it; a failed
/// retrieval produces an empty outcome and the turn proceeds without context.
#[derive(Default)]
struct Retrieved {
    context: Option<String>,
    sources: Vec<SourceSummary>,
}

pub struct ChatEngine {
    config: ChatbotConfig,
    searcher: HybridSearcher,
    formatter: ContextFormatter,
    embeddings: Arc<dyn EmbeddingProvider>,
    completions: Arc<dyn CompletionProvider>,
    conversations: Arc<dyn ConversationStore>,
    system_prompt: String,
}

impl ChatEngine {
    pub fn new(
        config: ChatbotConfig,
        embeddings: Arc<dyn EmbeddingProvider>,
        completions: Arc<dyn CompletionProvider>,
        documents: Arc<dyn DocumentStore>,
        conversations: Arc<dyn ConversationStore>,
    ) -> Self {
        let searcher = HybridSearcher::new(
            QueryClassifier::new(),
            documents,
            config.rag.embedding_dimension,
            config.rag.candidate_multiplier,
        );
        Self {
            config,
            searcher,
            formatter: ContextFormatter::default(),
            embeddings,
            completions,
            conversations,
            system_prompt: SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_classifier(mut self, classifier: QueryClassifier) -> Self {
        let dimension = self.config.rag.embedding_dimension;
        let multiplier = self.config.rag.candidate_multiplier;
        self.searcher = HybridSearcher::new(
            classifier,
            self.searcher.into_store(),
            dimension,
            multiplier,
        );
        self
    }

    /// Run one batch turn: full response text plus metadata.
    pub async fn process(&self, request: ChatRequest) -> Result<ChatResponse> {
        request.validate()?;
        let session_id = resolve_session(&request);
        let started = Instant::now();

        let history = self.load_history(&session_id).await;
        let retrieved = if request.use_rag {
            self.retrieve(&request).await
        } else {
            Retrieved::default()
        };
        self.persist_user_message(&session_id, &request.message).await;

        let messages = self.assemble_messages(&retrieved, history, &request.message);
        tracing::debug!(
            input_tokens = count_messages_tokens(&messages),
            messages = messages.len(),
            "prompt assembled"
        );

        let completion = self
            .completions
            .complete(&messages, &self.generation_config())
            .await?;

        let documents_found = retrieved.sources.len();
        self.persist_assistant_message(
            &session_id,
            &completion.text,
            completion.tokens_used,
            request.use_rag,
            documents_found,
        )
        .await;

        let elapsed = started.elapsed().as_millis() as u64;
        tracing::info!(
            session = %session_id,
            tokens = ?completion.tokens_used,
            documents_found,
            elapsed_ms = elapsed,
            "turn completed"
        );
        Ok(ChatResponse {
            response: completion.text,
            session_id,
            sources: if request.include_sources {
                retrieved.sources
            } else {
                Vec::new()
            },
            metadata: ResponseMetadata {
                model: self.completions.model().to_string(),
                tokens_used: completion.tokens_used,
                processing_time_ms: elapsed,
                rag_enabled: request.use_rag,
                documents_found,
            },
        })
    }

    /// Run one streaming turn. Tokens arrive on the returned receiver as the
    /// provider produces them; dropping the receiver cancels the turn after
    /// the in-flight fragment, and the partial response is still persisted.
    pub async fn process_stream(
        self: &Arc<Self>,
        request: ChatRequest,
    ) -> Result<mpsc::Receiver<StreamToken>> {
        request.validate()?;
        // Capacity 1: never more than one undelivered token ahead of the caller.
        let (tx, rx) = mpsc::channel(1);
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.run_streaming_turn(request, tx).await;
        });
        Ok(rx)
    }

    async fn run_streaming_turn(&self, request: ChatRequest, tx: mpsc::Sender<StreamToken>) {
        let session_id = resolve_session(&request);

        let history = self.load_history(&session_id).await;
        let retrieved = if request.use_rag {
            self.retrieve(&request).await
        } else {
            Retrieved::default()
        };
        self.persist_user_message(&session_id, &request.message).await;

        let messages = self.assemble_messages(&retrieved, history, &request.message);
        let mut stream = match self
            .completions
            .complete_stream(&messages, &self.generation_config())
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(error = %e, session = %session_id, "streaming generation failed to start");
                let _ = tx
                    .send(StreamToken::Error {
                        message: "Si è verificato un errore nella generazione".into(),
                    })
                    .await;
                return;
            }
        };

        let mut full_response = String::new();
        let mut failure: Option<String> = None;
        let mut cancelled = false;

        while let Some(fragment) = stream.next().await {
            match fragment {
                StreamFragment::Delta { text } => {
                    full_response.push_str(&text);
                    if tx.send(StreamToken::Delta { text }).await.is_err() {
                        // Consumer disconnected; stop pulling from the provider.
                        cancelled = true;
                        break;
                    }
                }
                StreamFragment::Done => break,
                StreamFragment::Error { message } => {
                    failure = Some(message);
                    break;
                }
            }
        }
        drop(stream);

        if cancelled {
            tracing::info!(
                session = %session_id,
                accumulated = full_response.len(),
                "stream cancelled by consumer"
            );
        } else if let Some(message) = failure {
            tracing::error!(error = %message, session = %session_id, "provider failed mid-stream");
            let _ = tx
                .send(StreamToken::Error {
                    message: "Si è verificato un errore nella generazione".into(),
                })
                .await;
        } else {
            if request.include_sources && !retrieved.sources.is_empty() {
                let _ = tx
                    .send(StreamToken::Sources {
                        sources: retrieved.sources.clone(),
                    })
                    .await;
            }
            let _ = tx.send(StreamToken::Done).await;
        }

        // Partial text from a cancelled or failed stream is still worth keeping.
        if !full_response.is_empty() {
            self.persist_assistant_message(
                &session_id,
                &full_response,
                None,
                request.use_rag,
                retrieved.sources.len(),
            )
            .await;
        }
    }

    async fn retrieve(&self, request: &ChatRequest) -> Retrieved {
        let embedding = match self.embeddings.embed(&request.message).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "embedding failed, proceeding without context");
                return Retrieved::default();
            }
        };

        let chunks = match self
            .searcher
            .search(
                &request.message,
                &embedding,
                self.config.rag.match_count,
                self.config.rag.match_threshold,
                request.rag_filters.clone(),
            )
            .await
        {
            Ok(chunks) => chunks,
            Err(e) => {
                tracing::warn!(error = %e, "retrieval failed, proceeding without context");
                return Retrieved::default();
            }
        };

        if chunks.is_empty() {
            tracing::info!("no documents above threshold");
            return Retrieved::default();
        }

        let context = self.formatter.format(
            &chunks,
            true,
            Some(self.config.rag.max_context_length),
        );
        let sources = chunks.iter().map(SourceSummary::from_chunk).collect();
        Retrieved {
            context: Some(context),
            sources,
        }
    }

    fn assemble_messages(
        &self,
        retrieved: &Retrieved,
        history: Vec<crate::types::Message>,
        user_message: &str,
    ) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::new(MessageRole::System, &self.system_prompt)];
        if let Some(context) = &retrieved.context {
            messages.push(ChatMessage::new(
                MessageRole::System,
                format!("[CONTEXT - Documenti rilevanti dal database]\n\n{}", context),
            ));
        }
        for message in trim_history(history, self.config.llm.max_context_tokens) {
            messages.push(ChatMessage::new(message.role, message.content));
        }
        messages.push(ChatMessage::new(MessageRole::User, user_message));
        messages
    }

    /// Delete sessions idle longer than the configured timeout. Meant for a
    /// periodic scheduler, never the turn path.
    pub async fn sweep_expired_sessions(&self) -> Result<usize> {
        let ttl = chrono::Duration::hours(self.config.memory.session_timeout_hours);
        self.conversations.cleanup_old_sessions(ttl).await
    }

    async fn load_history(&self, session_id: &str) -> Vec<crate::types::Message> {
        let limit = self
            .config
            .llm
            .max_history_messages
            .min(self.config.memory.max_history_fetch);
        match self.conversations.list(session_id, limit, false).await {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!(error = %e, session = %session_id, "history load failed");
                Vec::new()
            }
        }
    }

    async fn persist_user_message(&self, session_id: &str, content: &str) {
        if let Err(e) = self
            .conversations
            .append(session_id, MessageRole::User, content, None)
            .await
        {
            tracing::warn!(error = %e, session = %session_id, "failed to persist user message");
        }
    }

    async fn persist_assistant_message(
        &self,
        session_id: &str,
        content: &str,
        tokens_used: Option<u32>,
        rag_enabled: bool,
        documents_used: usize,
    ) {
        let metadata = json!({
            "model": self.completions.model(),
            "tokens_used": tokens_used,
            "rag_enabled": rag_enabled,
            "documents_used": documents_used,
        });
        if let Err(e) = self
            .conversations
            .append(session_id, MessageRole::Assistant, content, Some(metadata))
            .await
        {
            tracing::error!(error = %e, session = %session_id, "failed to persist assistant message");
        }
    }

    fn generation_config(&self) -> GenerationConfig {
        GenerationConfig {
            temperature: self.config.llm.temperature,
            max_tokens: self.config.llm.max_tokens as u32,
            top_p: 1.0,
        }
    }
}

fn resolve_session(request: &ChatRequest) -> String {
    request
        .session_id
        .clone()
        .unwrap_or_else(generate_session_id)
}

/// Frame every token of a streaming turn as SSE. Convenience for transports.
pub async fn frame_stream(
    mut rx: mpsc::Receiver<StreamToken>,
    mut sink: impl FnMut(String),
) {
    while let Some(token) = rx.recv().await {
        let terminal = token.is_terminal();
        sink(sse::frame(&token));
        if terminal {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::llm::{Completion, TokenStream};
    use crate::memory::MemoryConversationStore;
    use crate::storage::MemoryDocumentStore;
    use crate::types::DocumentMetadata;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedEmbeddings {
        vector: Vec<f32>,
        calls: AtomicUsize,
    }

    impl FixedEmbeddings {
        fn new(vector: Vec<f32>) -> Self {
            Self {
                vector,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FixedEmbeddings {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.vector.clone())
        }

        fn dimension(&self) -> usize {
            self.vector.len()
        }
    }

    struct ScriptedCompletions {
        fragments: Vec<StreamFragment>,
        seen_messages: AtomicUsize,
    }

    impl ScriptedCompletions {
        fn new(fragments: Vec<StreamFragment>) -> Self {
            Self {
                fragments,
                seen_messages: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedCompletions {
        async fn complete(
            &self,
            messages: &[ChatMessage],
            _config: &GenerationConfig,
        ) -> Result<Completion> {
            self.seen_messages.store(messages.len(), Ordering::SeqCst);
            let text: String = self
                .fragments
                .iter()
                .filter_map(|f| match f {
                    StreamFragment::Delta { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect();
            if let Some(StreamFragment::Error { message }) = self
                .fragments
                .iter()
                .find(|f| matches!(f, StreamFragment::Error { .. }))
            {
                return Err(Error::ProviderFatal {
                    message: message.clone(),
                });
            }
            Ok(Completion {
                text,
                tokens_used: Some(42),
            })
        }

        async fn complete_stream(
            &self,
            _messages: &[ChatMessage],
            _config: &GenerationConfig,
        ) -> Result<TokenStream> {
            let (tx, stream) = TokenStream::channel();
            let fragments = self.fragments.clone();
            tokio::spawn(async move {
                for fragment in fragments {
                    if tx.send(fragment).await.is_err() {
                        return;
                    }
                }
            });
            Ok(stream)
        }

        fn model(&self) -> &str {
            "gpt-4"
        }
    }

    fn small_config() -> ChatbotConfig {
        let mut config = ChatbotConfig::default();
        config.rag.embedding_dimension = 4;
        config.rag.match_threshold = 0.5;
        config
    }

    fn seeded_documents() -> Arc<MemoryDocumentStore> {
        let store = MemoryDocumentStore::new();
        store.insert(
            1,
            "Restauro della Campana di Ferro.",
            DocumentMetadata {
                heading: Some("Campana di Ferro".into()),
                ..Default::default()
            },
            Some(vec![1.0, 0.0, 0.0, 0.0]),
        );
        Arc::new(store)
    }

    const SESSION: &str = "4b2f5a1e-6f0d-4c7a-9d3e-8a1b2c3d4e5f";

    fn engine_with(
        fragments: Vec<StreamFragment>,
        embedding: Vec<f32>,
    ) -> (Arc<ChatEngine>, Arc<MemoryConversationStore>) {
        let conversations = Arc::new(MemoryConversationStore::new());
        let engine = ChatEngine::new(
            small_config(),
            Arc::new(FixedEmbeddings::new(embedding)),
            Arc::new(ScriptedCompletions::new(fragments)),
            seeded_documents(),
            conversations.clone(),
        );
        (Arc::new(engine), conversations)
    }

    fn deltas(parts: &[&str]) -> Vec<StreamFragment> {
        let mut fragments: Vec<StreamFragment> = parts
            .iter()
            .map(|t| StreamFragment::Delta { text: t.to_string() })
            .collect();
        fragments.push(StreamFragment::Done);
        fragments
    }

    #[tokio::test]
    async fn streaming_turn_preserves_fragments_and_persists_full_text() {
        let (engine, conversations) =
            engine_with(deltas(&["Ciao", " mondo", "!"]), vec![1.0, 0.0, 0.0, 0.0]);
        let mut request = ChatRequest::new("mostrami il progetto Campana di Ferro");
        request.session_id = Some(SESSION.into());
        request.include_sources = true;

        let mut rx = engine.process_stream(request).await.unwrap();
        let mut tokens = Vec::new();
        while let Some(token) = rx.recv().await {
            tokens.push(token);
        }

        assert_eq!(tokens[0], StreamToken::Delta { text: "Ciao".into() });
        assert_eq!(tokens[1], StreamToken::Delta { text: " mondo".into() });
        assert_eq!(tokens[2], StreamToken::Delta { text: "!".into() });
        assert!(matches!(tokens[3], StreamToken::Sources { .. }));
        assert_eq!(*tokens.last().unwrap(), StreamToken::Done);

        let messages = conversations.list(SESSION, 10, false).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, MessageRole::Assistant);
        assert_eq!(messages[1].content, "Ciao mondo!");
    }

    #[tokio::test]
    async fn mid_stream_error_persists_partial_text() {
        let (engine, conversations) = engine_with(
            vec![
                StreamFragment::Delta { text: "metà ".into() },
                StreamFragment::Error {
                    message: "connection reset".into(),
                },
            ],
            vec![1.0, 0.0, 0.0, 0.0],
        );
        let mut request = ChatRequest::new("ciao");
        request.session_id = Some(SESSION.into());

        let mut rx = engine.process_stream(request).await.unwrap();
        let mut tokens = Vec::new();
        while let Some(token) = rx.recv().await {
            tokens.push(token);
        }

        assert!(matches!(tokens.last(), Some(StreamToken::Error { .. })));
        let messages = conversations.list(SESSION, 10, false).await.unwrap();
        assert_eq!(messages[1].content, "metà ");
    }

    #[tokio::test]
    async fn dimension_mismatch_degrades_to_no_context() {
        // Embedding provider returns 3 dims against a 4-dim store config.
        let (engine, _) = engine_with(deltas(&["ok"]), vec![1.0, 0.0, 0.0]);
        let response = engine.process(ChatRequest::new("ciao")).await.unwrap();

        assert_eq!(response.metadata.documents_found, 0);
        assert!(response.sources.is_empty());
        assert_eq!(response.response, "ok");
    }

    #[tokio::test]
    async fn batch_turn_mints_session_and_persists_both_messages() {
        let (engine, conversations) =
            engine_with(deltas(&["risposta"]), vec![1.0, 0.0, 0.0, 0.0]);
        let mut request = ChatRequest::new("mostrami il progetto Campana di Ferro");
        request.include_sources = true;
        let response = engine.process(request).await.unwrap();

        assert!(!response.session_id.is_empty());
        assert_eq!(response.metadata.documents_found, 1);
        assert_eq!(response.sources.len(), 1);
        assert_eq!(response.metadata.tokens_used, Some(42));

        let messages = conversations
            .list(&response.session_id, 10, false)
            .await
            .unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[1].content, "risposta");
    }

    #[tokio::test]
    async fn use_rag_false_skips_embedding_and_search() {
        let conversations = Arc::new(MemoryConversationStore::new());
        let embeddings = Arc::new(FixedEmbeddings::new(vec![1.0, 0.0, 0.0, 0.0]));
        let engine = ChatEngine::new(
            small_config(),
            embeddings.clone(),
            Arc::new(ScriptedCompletions::new(deltas(&["ok"]))),
            seeded_documents(),
            conversations,
        );

        let mut request = ChatRequest::new("ciao");
        request.use_rag = false;
        let response = engine.process(request).await.unwrap();

        assert_eq!(embeddings.calls.load(Ordering::SeqCst), 0);
        assert!(!response.metadata.rag_enabled);
        assert_eq!(response.metadata.documents_found, 0);
    }

    #[tokio::test]
    async fn history_fetch_is_capped_by_memory_config() {
        let conversations = Arc::new(MemoryConversationStore::new());
        for i in 0..5 {
            conversations
                .append(SESSION, MessageRole::User, &format!("m{}", i), None)
                .await
                .unwrap();
        }
        let completions = Arc::new(ScriptedCompletions::new(deltas(&["ok"])));
        let mut config = small_config();
        config.memory.max_history_fetch = 2;
        let engine = ChatEngine::new(
            config,
            Arc::new(FixedEmbeddings::new(vec![1.0, 0.0, 0.0, 0.0])),
            completions.clone(),
            seeded_documents(),
            conversations,
        );

        let mut request = ChatRequest::new("ciao");
        request.session_id = Some(SESSION.into());
        request.use_rag = false;
        engine.process(request).await.unwrap();

        // System prompt + two history messages + the new user message.
        assert_eq!(completions.seen_messages.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn sweep_uses_configured_session_timeout() {
        let (engine, conversations) = engine_with(deltas(&["ok"]), vec![1.0, 0.0, 0.0, 0.0]);
        conversations
            .append(SESSION, MessageRole::User, "x", None)
            .await
            .unwrap();

        assert_eq!(engine.sweep_expired_sessions().await.unwrap(), 0);

        conversations.age_session(SESSION, chrono::Duration::hours(25));
        assert_eq!(engine.sweep_expired_sessions().await.unwrap(), 1);
        assert!(conversations.sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn validation_failure_precedes_any_work() {
        let (engine, conversations) = engine_with(deltas(&["ok"]), vec![1.0, 0.0, 0.0, 0.0]);
        let err = engine.process(ChatRequest::new("  ")).await.unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));

        let err = engine.process_stream(ChatRequest::new("")).await;
        assert!(err.is_err());
        assert!(conversations.sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dropped_receiver_cancels_and_persists_partial() {
        let (engine, conversations) = engine_with(
            deltas(&["uno", "due", "tre", "quattro"]),
            vec![1.0, 0.0, 0.0, 0.0],
        );
        let mut request = ChatRequest::new("ciao");
        request.session_id = Some(SESSION.into());
        request.use_rag = false;

        let mut rx = engine.process_stream(request).await.unwrap();
        // Take one fragment, then hang up.
        let first = rx.recv().await.unwrap();
        assert_eq!(first, StreamToken::Delta { text: "uno".into() });
        drop(rx);

        // Give the orchestrator task time to observe the closed channel.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let messages = conversations.list(SESSION, 10, false).await.unwrap();
        assert_eq!(messages.len(), 2);
        let partial = &messages[1].content;
        assert!(partial.starts_with("uno"));
        assert!(partial.len() < "unoduetrequattro".len());
    }

    #[tokio::test]
    async fn sse_framing_of_a_full_stream() {
        let (engine, _) = engine_with(deltas(&["Ciao", "!"]), vec![1.0, 0.0, 0.0, 0.0]);
        let mut request = ChatRequest::new("ciao");
        request.use_rag = false;

        let rx = engine.process_stream(request).await.unwrap();
        let mut frames = Vec::new();
        frame_stream(rx, |f| frames.push(f)).await;

        assert_eq!(frames[0], "data: Ciao\n\n");
        assert_eq!(frames[1], "data: !\n\n");
        assert_eq!(frames.last().unwrap(), "data: [DONE]\n\n");
    }
}

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatbotConfig {
    pub rag: RagParams,
    pub llm: LlmParams,
    pub memory: MemoryParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagParams {
    /// Expected embedding dimensionality of the backing store.
    pub embedding_dimension: usize,
    /// Default number of chunks returned per query.
    pub match_count: usize,
    /// Minimum similarity in [0, 1] for a vector match to survive.
    pub match_threshold: f32,
    /// Candidate oversampling factor when ranking happens client-side.
    pub candidate_multiplier: usize,
    /// Maximum formatted context length in characters.
    pub max_context_length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmParams {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: usize,
    /// Token budget for history included in the prompt, independent of the
    /// message-count ceiling.
    pub max_context_tokens: usize,
    /// Most recent non-system messages loaded per turn.
    pub max_history_messages: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryParams {
    /// Inactivity timeout after which a session is eligible for cleanup.
    pub session_timeout_hours: i64,
    /// Hard cap on messages fetched per session.
    pub max_history_fetch: usize,
}

impl ChatbotConfig {
    /// Validate config values, returning errors for clearly broken configurations.
    pub fn validate(&self) -> Result<(), String> {
        if self.rag.embedding_dimension == 0 {
            return Err("rag.embedding_dimension must be > 0".into());
        }
        if self.rag.match_count == 0 {
            return Err("rag.match_count must be > 0".into());
        }
        if !(0.0..=1.0).contains(&self.rag.match_threshold) {
            return Err("rag.match_threshold must be in [0.0, 1.0]".into());
        }
        if self.rag.candidate_multiplier == 0 {
            return Err("rag.candidate_multiplier must be > 0".into());
        }
        if self.llm.max_tokens == 0 {
            return Err("llm.max_tokens must be > 0".into());
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err("llm.temperature must be in [0.0, 2.0]".into());
        }
        if self.memory.session_timeout_hours <= 0 {
            return Err("memory.session_timeout_hours must be > 0".into());
        }
        Ok(())
    }

    /// Load config from a JSON file, validating after parse.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        let config: Self =
            serde_json::from_str(&content).map_err(|e| format!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for ChatbotConfig {
    fn default() -> Self {
        Self {
            rag: RagParams {
                embedding_dimension: 1536,
                match_count: 5,
                match_threshold: 0.6,
                candidate_multiplier: 3,
                max_context_length: 8000,
            },
            llm: LlmParams {
                model: "gpt-4".to_string(),
                temperature: 0.7,
                max_tokens: 800,
                max_context_tokens: 6000,
                max_history_messages: 10,
            },
            memory: MemoryParams {
                session_timeout_hours: 24,
                max_history_fetch: 50,
            },
        }
    }
}

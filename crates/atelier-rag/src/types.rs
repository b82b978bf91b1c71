use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

/// A single message in a conversation. Append-only within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Attribute map attached to every document chunk. Mirrors the JSONB
/// `metadata` column of the backing store; all fields optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Comma-separated free-text tags.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<String>,
    /// Ranking tie-breaker only, 0-5. Never a primary rank key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub featured: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_scale: Option<String>,
}

impl DocumentMetadata {
    pub fn priority(&self) -> u8 {
        self.priority.unwrap_or(0)
    }
}

/// A retrievable unit of document text with attributes and an optional
/// similarity score. Immutable once read; the pipeline holds transient copies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: i64,
    pub content: String,
    pub metadata: DocumentMetadata,
    /// Cosine similarity in [0, 1]. Absent for non-ranked fetches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
}

impl DocumentChunk {
    pub fn similarity(&self) -> f32 {
        self.similarity.unwrap_or(0.0)
    }
}

/// Optional equality/threshold constraints applied to both the entity and
/// the vector search paths.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataFilter {
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub client: Option<String>,
    pub client_type: Option<String>,
    pub brand: Option<String>,
    pub visibility: Option<String>,
    pub featured: Option<bool>,
    /// Minimum priority (0-5), inclusive.
    pub min_priority: Option<u8>,
    pub project_scale: Option<String>,
    pub document_type: Option<String>,
}

impl MetadataFilter {
    pub fn is_empty(&self) -> bool {
        self.category.is_none()
            && self.subcategory.is_none()
            && self.client.is_none()
            && self.client_type.is_none()
            && self.brand.is_none()
            && self.visibility.is_none()
            && self.featured.is_none()
            && self.min_priority.is_none()
            && self.project_scale.is_none()
            && self.document_type.is_none()
    }

    /// True when the chunk's attributes satisfy every set constraint.
    pub fn matches(&self, metadata: &DocumentMetadata) -> bool {
        fn eq(filter: &Option<String>, value: &Option<String>) -> bool {
            match filter {
                Some(want) => value.as_deref() == Some(want.as_str()),
                None => true,
            }
        }

        eq(&self.category, &metadata.category)
            && eq(&self.subcategory, &metadata.subcategory)
            && eq(&self.client, &metadata.client)
            && eq(&self.client_type, &metadata.client_type)
            && eq(&self.brand, &metadata.brand)
            && eq(&self.visibility, &metadata.visibility)
            && eq(&self.project_scale, &metadata.project_scale)
            && eq(&self.document_type, &metadata.document_type)
            && self.featured.map_or(true, |f| metadata.featured == Some(f))
            && self
                .min_priority
                .map_or(true, |min| metadata.priority() >= min)
    }
}

/// Outcome of query classification. Derived per query, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryClassification {
    /// The query names one or more specific entities (proper nouns).
    EntityBased { entities: Vec<String> },
    /// The query matches a known coarse category.
    CategoryBased { categories: Vec<String> },
    /// Purely semantic; vector search alone applies.
    Semantic,
}

impl QueryClassification {
    /// Heuristic confidence in [0, 1] attached to each variant.
    pub fn confidence(&self) -> f32 {
        match self {
            QueryClassification::EntityBased { .. } => 0.9,
            QueryClassification::CategoryBased { .. } => 0.8,
            QueryClassification::Semantic => 1.0,
        }
    }
}

/// Abbreviated chunk shipped to callers alongside a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub id: i64,
    pub content: String,
    pub similarity: Option<f32>,
    pub metadata: DocumentMetadata,
}

impl SourceSummary {
    const PREVIEW_CHARS: usize = 200;

    pub fn from_chunk(chunk: &DocumentChunk) -> Self {
        let content = if chunk.content.chars().count() > Self::PREVIEW_CHARS {
            let preview: String = chunk.content.chars().take(Self::PREVIEW_CHARS).collect();
            format!("{}...", preview)
        } else {
            chunk.content.clone()
        };
        Self {
            id: chunk.id,
            content,
            similarity: chunk.similarity.map(|s| (s * 1000.0).round() / 1000.0),
            metadata: chunk.metadata.clone(),
        }
    }
}

/// One event emitted by the orchestrator during a streaming turn.
/// Exactly one `Done` or `Error` terminates a turn; no `Delta` follows either.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamToken {
    /// Raw text exactly as produced by the provider, whitespace preserved.
    Delta { text: String },
    Sources { sources: Vec<SourceSummary> },
    Done,
    Error { message: String },
}

impl StreamToken {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamToken::Done | StreamToken::Error { .. })
    }
}

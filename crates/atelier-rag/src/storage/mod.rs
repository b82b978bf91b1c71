//! Document store boundary.
//!
//! The backing vector store is an external collaborator; the pipeline only
//! depends on this trait. `MemoryDocumentStore` is the in-process
//! implementation used by tests and by embedders that ship a small corpus.

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::Result;
use crate::types::{DocumentChunk, DocumentMetadata, MetadataFilter};

/// Metadata fields that entity search probes, in lookup order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextField {
    Heading,
    Client,
    Brand,
    Tags,
}

impl TextField {
    pub fn as_str(&self) -> &'static str {
        match self {
            TextField::Heading => "heading",
            TextField::Client => "client",
            TextField::Brand => "brand",
            TextField::Tags => "tags",
        }
    }
}

/// A raw row as returned by the store. Carries the stored embedding when the
/// store does not rank natively, or a similarity score when it does.
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub id: i64,
    pub content: String,
    pub metadata: DocumentMetadata,
    pub embedding: Option<Vec<f32>>,
    pub similarity: Option<f32>,
}

impl StoredChunk {
    pub fn into_chunk(self, similarity: Option<f32>) -> DocumentChunk {
        DocumentChunk {
            id: self.id,
            content: self.content,
            metadata: self.metadata,
            similarity,
        }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch up to `limit` rows matching `filter`. When `query_vector` is
    /// given and the store ranks natively, rows come back ordered by
    /// similarity with scores set; otherwise rows are unranked and carry
    /// their raw embeddings for client-side scoring.
    async fn query(
        &self,
        filter: Option<&MetadataFilter>,
        limit: usize,
        query_vector: Option<&[f32]>,
    ) -> Result<Vec<StoredChunk>>;

    /// Case-insensitive substring match against a single metadata field.
    async fn find_text(
        &self,
        field: TextField,
        needle: &str,
        limit: usize,
    ) -> Result<Vec<StoredChunk>>;

    /// Whether `query` returns similarity-ranked rows for vector queries.
    /// Stores that answer false are oversampled and scored client-side.
    fn ranks_natively(&self) -> bool;
}

/// In-memory store over a pre-chunked corpus.
#[derive(Default)]
pub struct MemoryDocumentStore {
    rows: RwLock<Vec<StoredChunk>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: i64, content: impl Into<String>, metadata: DocumentMetadata, embedding: Option<Vec<f32>>) {
        self.rows.write().push(StoredChunk {
            id,
            content: content.into(),
            metadata,
            embedding,
            similarity: None,
        });
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn query(
        &self,
        filter: Option<&MetadataFilter>,
        limit: usize,
        _query_vector: Option<&[f32]>,
    ) -> Result<Vec<StoredChunk>> {
        let rows = self.rows.read();
        Ok(rows
            .iter()
            .filter(|row| filter.map_or(true, |f| f.matches(&row.metadata)))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn find_text(
        &self,
        field: TextField,
        needle: &str,
        limit: usize,
    ) -> Result<Vec<StoredChunk>> {
        let needle_lower = needle.to_lowercase();
        let rows = self.rows.read();
        Ok(rows
            .iter()
            .filter(|row| {
                let value = match field {
                    TextField::Heading => row.metadata.heading.as_deref(),
                    TextField::Client => row.metadata.client.as_deref(),
                    TextField::Brand => row.metadata.brand.as_deref(),
                    TextField::Tags => row.metadata.tags.as_deref(),
                };
                value.map_or(false, |v| v.to_lowercase().contains(&needle_lower))
            })
            .take(limit)
            .cloned()
            .collect())
    }

    fn ranks_natively(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(heading: &str, category: &str) -> DocumentMetadata {
        DocumentMetadata {
            heading: Some(heading.into()),
            category: Some(category.into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn query_applies_filter_and_limit() {
        let store = MemoryDocumentStore::new();
        store.insert(1, "a", metadata("Uno", "portfolio"), None);
        store.insert(2, "b", metadata("Due", "servizi"), None);
        store.insert(3, "c", metadata("Tre", "portfolio"), None);

        let filter = MetadataFilter {
            category: Some("portfolio".into()),
            ..Default::default()
        };
        let rows = store.query(Some(&filter), 10, None).await.unwrap();
        assert_eq!(rows.len(), 2);

        let rows = store.query(None, 2, None).await.unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn find_text_is_case_insensitive_substring() {
        let store = MemoryDocumentStore::new();
        store.insert(1, "a", metadata("Campana di Ferro", "portfolio"), None);
        store.insert(2, "b", metadata("Casa Bianca", "portfolio"), None);

        let rows = store
            .find_text(TextField::Heading, "campana", 10)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, 1);

        let rows = store.find_text(TextField::Client, "campana", 10).await.unwrap();
        assert!(rows.is_empty());
    }
}

//! Hybrid search: query classification, entity lookup, vector similarity,
//! and result merging behind one entry point.

pub mod entity;
pub mod merge;
pub mod vector;

pub use entity::{EntityMatch, EntitySearcher};
pub use merge::merge_hybrid_results;
pub use vector::{cosine_similarity, VectorSearcher};

use std::sync::Arc;

use futures::future::join_all;

use crate::classifier::QueryClassifier;
use crate::error::Result;
use crate::storage::DocumentStore;
use crate::types::{DocumentChunk, MetadataFilter, QueryClassification};

pub struct HybridSearcher {
    classifier: QueryClassifier,
    store: Arc<dyn DocumentStore>,
    entity: EntitySearcher,
    vector: VectorSearcher,
}

impl HybridSearcher {
    pub fn new(
        classifier: QueryClassifier,
        store: Arc<dyn DocumentStore>,
        embedding_dimension: usize,
        candidate_multiplier: usize,
    ) -> Self {
        Self {
            classifier,
            store: store.clone(),
            entity: EntitySearcher::new(store.clone()),
            vector: VectorSearcher::new(store, embedding_dimension, candidate_multiplier),
        }
    }

    pub fn classifier(&self) -> &QueryClassifier {
        &self.classifier
    }

    pub fn into_store(self) -> Arc<dyn DocumentStore> {
        self.store
    }

    /// Run the full hybrid pipeline for one query.
    ///
    /// Vector search always runs; entity search runs only when classification
    /// extracts entities. A category classification injects a category filter
    /// when the caller supplied none. Entity and vector lookups are issued
    /// concurrently and the merge waits for both.
    pub async fn search(
        &self,
        query_text: &str,
        query_embedding: &[f32],
        match_count: usize,
        match_threshold: f32,
        filter: Option<MetadataFilter>,
    ) -> Result<Vec<DocumentChunk>> {
        let classification = self.classifier.classify(query_text);
        tracing::info!(
            classification = ?classification,
            confidence = classification.confidence(),
            "query classified"
        );

        let mut filter = filter;
        let needs_category = filter.as_ref().map_or(true, |f| f.category.is_none());
        let entities: Vec<String> = match &classification {
            QueryClassification::EntityBased { entities } => entities.clone(),
            QueryClassification::CategoryBased { categories } => {
                if needs_category {
                    let category = categories[0].clone();
                    tracing::info!(category, "injecting category filter from classification");
                    filter
                        .get_or_insert_with(MetadataFilter::default)
                        .category = Some(category);
                }
                Vec::new()
            }
            QueryClassification::Semantic => {
                // No entity or category signal; fall back to coarse intent.
                if needs_category {
                    if let Some(intent) = self.classifier.detect_intent(query_text) {
                        tracing::info!(category = intent, "injecting category filter from intent");
                        filter
                            .get_or_insert_with(MetadataFilter::default)
                            .category = Some(intent.to_string());
                    }
                }
                Vec::new()
            }
        };

        let entity_lookups = join_all(
            entities
                .iter()
                .map(|entity| self.entity.search_by_entity(entity, match_count)),
        );
        let vector_lookup = self.vector.search_similar(
            query_embedding,
            match_count,
            match_threshold,
            filter.as_ref(),
        );
        let (entity_outcomes, vector_results) = tokio::join!(entity_lookups, vector_lookup);
        let vector_results = vector_results?;

        // Union entity matches across entities, de-duplicated by chunk id.
        let mut entity_results: Vec<DocumentChunk> = Vec::new();
        for outcome in entity_outcomes {
            match outcome {
                Ok(matches) => {
                    for m in matches {
                        if !entity_results.iter().any(|c| c.id == m.chunk.id) {
                            entity_results.push(m.chunk);
                        }
                    }
                }
                Err(e) => {
                    // Entity lookup failure falls back to pure vector results.
                    tracing::warn!(error = %e, "entity search failed, continuing without it");
                }
            }
        }

        if entity_results.is_empty() {
            return Ok(vector_results);
        }
        Ok(merge_hybrid_results(
            entity_results,
            vector_results,
            match_count,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryDocumentStore;
    use crate::types::DocumentMetadata;

    fn seeded_store() -> Arc<MemoryDocumentStore> {
        let store = MemoryDocumentStore::new();
        store.insert(
            1,
            "Restauro della Campana di Ferro.",
            DocumentMetadata {
                heading: Some("Campana di Ferro".into()),
                category: Some("portfolio".into()),
                priority: Some(0),
                ..Default::default()
            },
            Some(vec![0.0, 1.0, 0.0, 0.0]),
        );
        store.insert(
            2,
            "Negozio concept nel quartiere moda.",
            DocumentMetadata {
                heading: Some("Concept store".into()),
                category: Some("retail".into()),
                priority: Some(5),
                ..Default::default()
            },
            Some(vec![1.0, 0.0, 0.0, 0.0]),
        );
        store.insert(
            3,
            "Appartamento residenziale.",
            DocumentMetadata {
                heading: Some("Residenza privata".into()),
                category: Some("residenziale".into()),
                ..Default::default()
            },
            Some(vec![0.9, 0.1, 0.0, 0.0]),
        );
        Arc::new(store)
    }

    fn searcher(store: Arc<MemoryDocumentStore>) -> HybridSearcher {
        HybridSearcher::new(QueryClassifier::new(), store, 4, 3)
    }

    #[tokio::test]
    async fn entity_match_ranks_first_despite_low_vector_similarity() {
        let searcher = searcher(seeded_store());
        // Embedding points away from chunk 1; entity match still wins.
        let results = searcher
            .search("mostrami il progetto Campana di Ferro", &[1.0, 0.0, 0.0, 0.0], 5, 0.0, None)
            .await
            .unwrap();
        assert_eq!(results[0].id, 1);
        assert_eq!(results[0].similarity, Some(1.0));
    }

    #[tokio::test]
    async fn category_classification_injects_filter() {
        let searcher = searcher(seeded_store());
        let results = searcher
            .search("progetti retail", &[1.0, 0.0, 0.0, 0.0], 5, 0.0, None)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, 2);
    }

    #[tokio::test]
    async fn caller_supplied_category_is_not_overridden() {
        let searcher = searcher(seeded_store());
        let filter = MetadataFilter {
            category: Some("residenziale".into()),
            ..Default::default()
        };
        let results = searcher
            .search("progetti retail", &[0.9, 0.1, 0.0, 0.0], 5, 0.0, Some(filter))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, 3);
    }

    #[tokio::test]
    async fn intent_keywords_inject_category_on_semantic_query() {
        let store = MemoryDocumentStore::new();
        store.insert(
            1,
            "I nostri lavori completati.",
            DocumentMetadata {
                category: Some("portfolio".into()),
                ..Default::default()
            },
            Some(vec![1.0, 0.0, 0.0, 0.0]),
        );
        store.insert(
            2,
            "Come contattarci.",
            DocumentMetadata {
                category: Some("informazioni".into()),
                ..Default::default()
            },
            Some(vec![1.0, 0.0, 0.0, 0.0]),
        );
        let searcher = searcher(Arc::new(store));

        // No entity, no category keyword; "lavori realizzati" scores as
        // portfolio intent.
        let results = searcher
            .search("vorrei vedere i lavori realizzati", &[1.0, 0.0, 0.0, 0.0], 5, 0.0, None)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, 1);
    }

    #[tokio::test]
    async fn semantic_query_uses_vector_order() {
        let searcher = searcher(seeded_store());
        let results = searcher
            .search("qualcosa di interessante", &[1.0, 0.0, 0.0, 0.0], 5, 0.5, None)
            .await
            .unwrap();
        assert_eq!(results[0].id, 2);
        assert!(results.iter().all(|c| c.similarity() >= 0.5));
    }
}

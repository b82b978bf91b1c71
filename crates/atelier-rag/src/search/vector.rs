//! Vector similarity search with client-side cosine fallback.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::storage::DocumentStore;
use crate::types::{DocumentChunk, MetadataFilter};

/// Cosine similarity clamped into [0, 1]. A zero-norm vector yields 0.0
/// rather than an error; small negatives from floating-point error clamp to 0.
/// Mismatched lengths yield 0.0; stored rows bypass the query-side dimension
/// check, so a malformed embedding must not score against a prefix.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}

pub struct VectorSearcher {
    store: Arc<dyn DocumentStore>,
    dimension: usize,
    candidate_multiplier: usize,
}

impl VectorSearcher {
    pub fn new(store: Arc<dyn DocumentStore>, dimension: usize, candidate_multiplier: usize) -> Self {
        Self {
            store,
            dimension,
            candidate_multiplier,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Retrieve the `match_count` chunks nearest to `query_embedding`,
    /// discarding candidates below `match_threshold`. Ordered by similarity
    /// descending, priority descending on ties.
    pub async fn search_similar(
        &self,
        query_embedding: &[f32],
        match_count: usize,
        match_threshold: f32,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<DocumentChunk>> {
        if query_embedding.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                got: query_embedding.len(),
            });
        }

        // Natively-ranked stores return exactly what we need; otherwise
        // oversample so the threshold filter still leaves enough candidates.
        let limit = if self.store.ranks_natively() {
            match_count
        } else {
            match_count * self.candidate_multiplier
        };

        let rows = self
            .store
            .query(filter, limit, Some(query_embedding))
            .await?;
        tracing::debug!(candidates = rows.len(), limit, "vector search retrieved candidates");

        let mut results: Vec<DocumentChunk> = Vec::with_capacity(rows.len());
        for row in rows {
            let similarity = match row.similarity {
                Some(s) => s.clamp(0.0, 1.0),
                None => match row.embedding.as_deref() {
                    Some(embedding) => cosine_similarity(query_embedding, embedding),
                    None => {
                        // No embedding stored; excluded from vector ranking.
                        tracing::warn!(id = row.id, "chunk has no embedding, skipping");
                        continue;
                    }
                },
            };
            if similarity >= match_threshold {
                results.push(row.into_chunk(Some(similarity)));
            }
        }

        results.sort_by(|a, b| {
            b.similarity()
                .partial_cmp(&a.similarity())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.metadata.priority().cmp(&a.metadata.priority()))
        });
        results.truncate(match_count);

        tracing::debug!(
            results = results.len(),
            threshold = match_threshold,
            "vector search completed"
        );
        Ok(results)
    }
}

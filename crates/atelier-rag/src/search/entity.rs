//! Exact/partial name lookup against metadata fields.
//!
//! An entity match is treated as maximally relevant: every result is
//! assigned similarity 1.0 and outranks any vector match at merge time.

use std::sync::Arc;

use crate::error::Result;
use crate::storage::{DocumentStore, TextField};
use crate::types::DocumentChunk;

/// A chunk found by name, labeled with the first field that matched.
/// The label is informational only; it has no effect on ranking.
#[derive(Debug, Clone)]
pub struct EntityMatch {
    pub chunk: DocumentChunk,
    pub matched_field: TextField,
}

/// Fields probed per entity, in fixed order. The first field to match a
/// given chunk wins the label.
const SEARCH_FIELDS: [TextField; 4] = [
    TextField::Heading,
    TextField::Client,
    TextField::Brand,
    TextField::Tags,
];

pub struct EntitySearcher {
    store: Arc<dyn DocumentStore>,
}

impl EntitySearcher {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Case-insensitive substring lookup for `entity` across all probed
    /// fields. Results are unioned, de-duplicated by chunk id, sorted by
    /// priority descending, and truncated to `max_results`. Per-field fetches
    /// are unbounded; truncation happens only after the priority sort.
    pub async fn search_by_entity(
        &self,
        entity: &str,
        max_results: usize,
    ) -> Result<Vec<EntityMatch>> {
        let mut results: Vec<EntityMatch> = Vec::new();

        for field in SEARCH_FIELDS {
            // A failing field is skipped; the remaining fields may still match.
            let rows = match self.store.find_text(field, entity, usize::MAX).await {
                Ok(rows) => rows,
                Err(e) => {
                    tracing::warn!(field = field.as_str(), error = %e, "entity field lookup failed");
                    continue;
                }
            };
            for row in rows {
                if results.iter().any(|m| m.chunk.id == row.id) {
                    continue;
                }
                results.push(EntityMatch {
                    chunk: row.into_chunk(Some(1.0)),
                    matched_field: field,
                });
            }
        }

        results.sort_by(|a, b| {
            b.chunk
                .metadata
                .priority()
                .cmp(&a.chunk.metadata.priority())
        });
        results.truncate(max_results);

        tracing::debug!(entity, matches = results.len(), "entity search completed");
        Ok(results)
    }
}

//! Merging of entity and vector result sets into one ranked list.

use crate::types::DocumentChunk;

/// Combine entity matches and vector matches. Entity matches always precede
/// vector matches regardless of similarity values: an exact name match is
/// considered strictly more relevant than any semantic match. Within each
/// group, ties break by priority descending. Duplicate chunk ids are kept
/// once and counted as entity matches. Truncation happens after the merge,
/// never before.
pub fn merge_hybrid_results(
    entity_results: Vec<DocumentChunk>,
    vector_results: Vec<DocumentChunk>,
    max_results: usize,
) -> Vec<DocumentChunk> {
    let mut merged: Vec<DocumentChunk> = Vec::new();
    let mut seen: Vec<i64> = Vec::new();

    let mut entity_group = entity_results;
    entity_group.sort_by(|a, b| b.metadata.priority().cmp(&a.metadata.priority()));
    for chunk in entity_group {
        if !seen.contains(&chunk.id) {
            seen.push(chunk.id);
            merged.push(chunk);
        }
    }
    let entity_count = merged.len();

    let mut vector_group: Vec<DocumentChunk> = vector_results
        .into_iter()
        .filter(|chunk| !seen.contains(&chunk.id))
        .collect();
    vector_group.sort_by(|a, b| {
        b.similarity()
            .partial_cmp(&a.similarity())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.metadata.priority().cmp(&a.metadata.priority()))
    });
    merged.extend(vector_group);

    merged.truncate(max_results);

    tracing::debug!(
        total = merged.len(),
        entity = entity_count.min(merged.len()),
        "hybrid merge completed"
    );
    merged
}

//! RAG channel: semantic vector search over memories
//!
//! Embeds the query, runs a filtered ANN search, loads the backing
//! memories, and scores them with the multi-factor scorer. Hits whose
//! memory is missing from storage are dropped.

use crate::config::ScoringConfig;
use crate::embeddings::EmbeddingClient;
use crate::retrieval::covered_query_terms;
use crate::scoring::{score_memory, ScoredMemory};
use crate::storage::StorageBackend;
use crate::types::{CandidateSection, CandidateSource, ContextFilters, Memory, MemoryId};
use crate::vectors::{VectorFilter, VectorStore, PAYLOAD_TYPE_MEMORY};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Build the ANN filter predicate from the request filters
pub fn build_filter(filters: &ContextFilters) -> VectorFilter {
    let mut filter = VectorFilter::new().match_value("type", PAYLOAD_TYPE_MEMORY);
    if !filters.kinds.is_empty() {
        filter = filter.match_any(
            "kind",
            filters.kinds.iter().map(|k| json!(k.as_str())).collect(),
        );
    }
    if !filters.tags.is_empty() {
        filter = filter.match_any(
            "tags",
            filters.tags.iter().map(|t| json!(t)).collect(),
        );
    }
    if let Some(min_importance) = filters.min_importance {
        filter = filter.range_gte("importance", min_importance as f64);
    }
    if !filters.related_files.is_empty() {
        filter = filter.match_any(
            "relatedFiles",
            filters.related_files.iter().map(|f| json!(f)).collect(),
        );
    }
    filter
}

fn section_for(memory: &Memory, score: f32, query: &str) -> CandidateSection {
    let text = format!("{} {}", memory.title, memory.body);
    CandidateSection {
        id: format!("rag-{}", memory.id),
        source: CandidateSource::Rag,
        title: memory.title.clone(),
        body: memory.body.clone(),
        relevance: score,
        query_terms: covered_query_terms(query, &text),
        memory_id: Some(memory.id.clone()),
        entity_id: None,
        source_memory_ids: vec![memory.id.clone()],
        tags: memory.tags.clone(),
        importance: Some(memory.importance),
    }
}

/// Retrieve, score, and rank memory candidates for a query
pub async fn retrieve_rag(
    query: &str,
    filters: &ContextFilters,
    limit: usize,
    storage: &Arc<dyn StorageBackend>,
    vectors: &Arc<dyn VectorStore>,
    embeddings: &Arc<dyn EmbeddingClient>,
    scoring: &ScoringConfig,
    now: DateTime<Utc>,
) -> crate::error::Result<Vec<CandidateSection>> {
    if limit == 0 {
        return Ok(Vec::new());
    }

    let embedding = embeddings.embed(query).await?;
    let filter = build_filter(filters);
    let hits = vectors.search(&embedding, Some(&filter), limit).await?;
    if hits.is_empty() {
        return Ok(Vec::new());
    }

    // Pair similarities with backing memories; a hit can name its memory
    // either on the hit itself or in the payload.
    let mut similarity_by_id: HashMap<MemoryId, f32> = HashMap::new();
    let mut ordered_ids: Vec<MemoryId> = Vec::with_capacity(hits.len());
    for hit in &hits {
        let memory_id = hit
            .memory_id
            .clone()
            .or_else(|| {
                hit.payload
                    .get("memoryId")
                    .and_then(|v| v.as_str())
                    .map(String::from)
            })
            .unwrap_or_else(|| hit.id.clone());
        let memory_id = MemoryId::new(memory_id);
        if !similarity_by_id.contains_key(&memory_id) {
            ordered_ids.push(memory_id.clone());
        }
        similarity_by_id
            .entry(memory_id)
            .and_modify(|s| *s = s.max(hit.score))
            .or_insert(hit.score);
    }

    let memories = storage.get_memories(&ordered_ids).await?;
    if memories.len() < ordered_ids.len() {
        debug!(
            dropped = ordered_ids.len() - memories.len(),
            "rag hits without backing memories were dropped"
        );
    }

    let mut scored: Vec<ScoredMemory> = memories
        .into_iter()
        .map(|memory| {
            let similarity = similarity_by_id
                .get(&memory.id)
                .copied()
                .unwrap_or_default();
            let breakdown = score_memory(&memory, similarity, now, scoring);
            ScoredMemory {
                score: breakdown.final_score,
                breakdown,
                memory,
            }
        })
        .collect();
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(limit);

    Ok(scored
        .iter()
        .map(|hit| section_for(&hit.memory, hit.score, query))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MemoryKind;

    #[test]
    fn test_filter_includes_payload_type() {
        let filter = build_filter(&ContextFilters::default());
        assert_eq!(filter.conditions.len(), 1);
        assert!(filter.matches(&json!({"type": "MEMORY"})));
        assert!(!filter.matches(&json!({"type": "GRAPHRAG_REPORT"})));
    }

    #[test]
    fn test_filter_composes_all_dimensions() {
        let filters = ContextFilters {
            kinds: vec![MemoryKind::Decision],
            tags: vec!["auth".to_string()],
            min_importance: Some(0.5),
            related_files: vec!["src/auth.rs".to_string()],
        };
        let filter = build_filter(&filters);
        assert!(filter.matches(&json!({
            "type": "MEMORY",
            "kind": "decision",
            "tags": ["auth", "jwt"],
            "importance": 0.7,
            "relatedFiles": ["src/auth.rs"],
        })));
        assert!(!filter.matches(&json!({
            "type": "MEMORY",
            "kind": "note",
            "tags": ["auth"],
            "importance": 0.7,
            "relatedFiles": ["src/auth.rs"],
        })));
    }

    #[test]
    fn test_section_carries_contributing_ids() {
        let mut memory = Memory::new("m9", MemoryKind::Decision, "Use JWTs", "Signed tokens");
        memory.tags = vec!["auth".to_string()];
        let section = section_for(&memory, 0.8, "why jwt tokens");
        assert_eq!(section.memory_id, Some(MemoryId::from("m9")));
        assert_eq!(section.source_memory_ids, vec![MemoryId::from("m9")]);
        assert!(section.query_terms.contains(&"tokens".to_string()));
    }
}

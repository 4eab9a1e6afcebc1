//! Local (entity-centric) GraphRAG search
//!
//! Finds seed entities by hybrid score (semantic similarity AND lexical
//! overlap), then expands along relationships with a depth-bounded BFS and
//! a visited set, pruning edges below the minimum strength.

use crate::config::GraphRagConfig;
use crate::storage::GraphStorage;
use crate::types::{Entity, Relationship};
use crate::vectors::{VectorFilter, VectorStore, PAYLOAD_TYPE_GRAPHRAG_ENTITY};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Seed search width before hybrid gating
const SEED_SEARCH_LIMIT: usize = 16;

/// An entity surfaced by local search
#[derive(Debug, Clone)]
pub struct ScoredEntity {
    pub entity: Entity,

    /// Semantic similarity for seeds; expanded entities inherit a damped
    /// score from the seed that reached them
    pub score: f32,

    /// True when the entity matched the query directly
    pub is_seed: bool,
}

/// Result of one local search
#[derive(Debug, Clone, Default)]
pub struct LocalSearchResult {
    pub entities: Vec<ScoredEntity>,
    pub relationships: Vec<Relationship>,

    /// Entities discovered through relationship expansion
    pub total_expanded: usize,
}

/// Lexical overlap between query tokens and the entity's name/description
pub fn lexical_score(query: &str, entity: &Entity) -> f32 {
    let query_tokens: HashSet<String> = tokenize(query);
    if query_tokens.is_empty() {
        return 0.0;
    }
    let entity_text = format!("{} {}", entity.canonical_name, entity.description);
    let entity_tokens: HashSet<String> = tokenize(&entity_text);
    let overlap = query_tokens.intersection(&entity_tokens).count();
    overlap as f32 / query_tokens.len() as f32
}

fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 3)
        .map(String::from)
        .collect()
}

async fn resolve_entity(
    graph: &Arc<GraphStorage>,
    hit_id: &str,
    payload: &serde_json::Value,
) -> crate::error::Result<Option<Entity>> {
    if let Some(entity_id) = payload.get("entityId").and_then(|v| v.as_str()) {
        if let Some(entity) = graph.get_entity(entity_id).await? {
            return Ok(Some(entity));
        }
    }
    graph.get_entity_by_embedding_id(hit_id).await
}

/// Run a local search from a pre-computed query embedding
///
/// `query_text` is the text the lexical gate scores against (the raw query,
/// or the current hypothesis during drift iterations).
pub async fn local_search(
    query_text: &str,
    query_embedding: &[f32],
    graph: &Arc<GraphStorage>,
    vectors: &Arc<dyn VectorStore>,
    config: &GraphRagConfig,
) -> crate::error::Result<LocalSearchResult> {
    let filter = VectorFilter::new().match_value("type", PAYLOAD_TYPE_GRAPHRAG_ENTITY);
    let hits = vectors
        .search(query_embedding, Some(&filter), SEED_SEARCH_LIMIT)
        .await?;

    let mut seeds: Vec<ScoredEntity> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for hit in &hits {
        if hit.score < config.semantic_threshold {
            continue;
        }
        let Some(entity) = resolve_entity(graph, &hit.id, &hit.payload).await? else {
            continue;
        };
        if lexical_score(query_text, &entity) < config.lexical_threshold {
            continue;
        }
        if seen.insert(entity.id.clone()) {
            seeds.push(ScoredEntity {
                entity,
                score: hit.score,
                is_seed: true,
            });
        }
    }

    if seeds.is_empty() {
        return Ok(LocalSearchResult::default());
    }

    // Depth-bounded BFS along relationships from every seed.
    let mut relationships: Vec<Relationship> = Vec::new();
    let mut seen_relationships: HashSet<String> = HashSet::new();
    let mut expanded: Vec<ScoredEntity> = Vec::new();
    let mut frontier: Vec<(String, f32)> = seeds
        .iter()
        .map(|s| (s.entity.id.clone(), s.score))
        .collect();
    let seed_scores: HashMap<String, f32> = frontier.iter().cloned().collect();

    for _depth in 0..config.max_depth {
        let mut next: Vec<(String, f32)> = Vec::new();
        for (entity_id, score) in &frontier {
            for relationship in graph
                .relationships_touching(entity_id, config.min_edge_weight)
                .await?
            {
                if seen_relationships.insert(relationship.id.clone()) {
                    relationships.push(relationship.clone());
                }
                let other = if relationship.source_id == *entity_id {
                    &relationship.target_id
                } else {
                    &relationship.source_id
                };
                if seen.insert(other.clone()) {
                    if let Some(entity) = graph.get_entity(other).await? {
                        // Expanded entities inherit a damped seed score.
                        let inherited = score * 0.7;
                        expanded.push(ScoredEntity {
                            entity,
                            score: inherited,
                            is_seed: false,
                        });
                        next.push((other.clone(), inherited));
                    }
                }
            }
        }
        frontier = next;
        if frontier.is_empty() {
            break;
        }
    }

    debug!(
        seeds = seeds.len(),
        expanded = expanded.len(),
        relationships = relationships.len(),
        "local graph search complete"
    );

    let total_expanded = expanded.len();
    let mut entities = seeds;
    entities.extend(expanded);
    // Seeds keep their original similarity even if reachable from another
    // seed at a different score.
    for scored in &mut entities {
        if let Some(original) = seed_scores.get(&scored.entity.id) {
            scored.score = scored.score.max(*original);
        }
    }

    Ok(LocalSearchResult {
        entities,
        relationships,
        total_expanded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entity(id: &str, name: &str, description: &str) -> Entity {
        Entity {
            id: id.to_string(),
            canonical_name: name.to_string(),
            entity_type: crate::types::EntityType::Technology,
            description: description.to_string(),
            mention_count: 1,
            extraction_confidence: 0.9,
            first_seen_at: Utc::now(),
            last_seen_at: Utc::now(),
            embedding_id: Some(format!("vec-{}", id)),
        }
    }

    #[test]
    fn test_lexical_score_overlap() {
        let e = entity("e1", "PostgreSQL", "relational database used for persistence");
        let score = lexical_score("why postgresql database", &e);
        // two of the three query tokens ("postgresql", "database") overlap
        assert!((score - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_lexical_score_no_overlap() {
        let e = entity("e1", "Redis", "cache layer");
        assert_eq!(lexical_score("frontend rendering pipeline", &e), 0.0);
    }

    #[test]
    fn test_lexical_score_short_tokens_ignored() {
        let e = entity("e1", "Go", "a language");
        // "go" is below the token length floor on both sides
        assert_eq!(lexical_score("go", &e), 0.0);
    }
}

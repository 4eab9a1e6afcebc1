//! Drift (iterative) GraphRAG search
//!
//! Seeds with a local search, synthesises a hypothesis from the surfaced
//! entities, re-embeds the hypothesis, and iterates until successive
//! hypotheses converge in embedding space or the iteration cap is reached.

use crate::config::GraphRagConfig;
use crate::embeddings::{cosine_similarity, EmbeddingClient};
use crate::retrieval::graphrag::local::{local_search, ScoredEntity};
use crate::storage::GraphStorage;
use crate::types::Entity;
use crate::vectors::VectorStore;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Entities folded into each hypothesis
const HYPOTHESIS_ENTITY_LIMIT: usize = 3;

/// Result of one drift search
#[derive(Debug, Clone, Default)]
pub struct DriftSearchResult {
    /// All entities surfaced across iterations, deduplicated
    pub entities: Vec<ScoredEntity>,

    /// Hypothesis produced by each iteration, in order
    pub hypotheses: Vec<String>,

    pub iterations: usize,
    pub converged: bool,
}

/// Build a hypothesis sentence from the strongest surfaced entities
fn synthesize_hypothesis(query: &str, entities: &[ScoredEntity]) -> String {
    if entities.is_empty() {
        return format!("The query \"{}\" matches no known entities.", query);
    }
    let described: Vec<String> = entities
        .iter()
        .take(HYPOTHESIS_ENTITY_LIMIT)
        .map(|scored| {
            let entity: &Entity = &scored.entity;
            format!("{} ({})", entity.canonical_name, entity.description)
        })
        .collect();
    format!("The query concerns {}.", described.join("; "))
}

/// Run a drift search
pub async fn drift_search(
    query: &str,
    graph: &Arc<GraphStorage>,
    vectors: &Arc<dyn VectorStore>,
    embeddings: &Arc<dyn EmbeddingClient>,
    config: &GraphRagConfig,
) -> crate::error::Result<DriftSearchResult> {
    let mut embedding = embeddings.embed(query).await?;
    let mut current_text = query.to_string();
    let mut previous_hypothesis_embedding: Option<Vec<f32>> = None;

    let mut result = DriftSearchResult::default();
    let mut seen: HashSet<String> = HashSet::new();

    for iteration in 0..config.max_iterations.max(1) {
        result.iterations = iteration + 1;

        let local = local_search(&current_text, &embedding, graph, vectors, config).await?;
        for scored in local.entities {
            if seen.insert(scored.entity.id.clone()) {
                result.entities.push(scored);
            }
        }

        let hypothesis = synthesize_hypothesis(query, &result.entities);
        let hypothesis_embedding = embeddings.embed(&hypothesis).await?;
        result.hypotheses.push(hypothesis.clone());

        if let Some(previous) = &previous_hypothesis_embedding {
            let similarity = cosine_similarity(previous, &hypothesis_embedding);
            if similarity >= config.convergence_threshold {
                debug!(iteration, similarity, "drift search converged");
                result.converged = true;
                break;
            }
        }

        previous_hypothesis_embedding = Some(hypothesis_embedding.clone());
        embedding = hypothesis_embedding;
        current_text = hypothesis;
    }

    Ok(result)
}

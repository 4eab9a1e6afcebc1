//! GraphRAG channel: entity/community graph search
//!
//! Three modes over the knowledge graph: local (entity-centric), global
//! (community-centric), and drift (iterative hypothesis refinement). Each
//! surfaced entity or report becomes a candidate section; the memory ids of
//! linked evidence are propagated for cache invalidation.

pub mod drift;
pub mod global;
pub mod local;

use crate::config::{GraphRagConfig, GraphRagMode};
use crate::embeddings::EmbeddingClient;
use crate::retrieval::covered_query_terms;
use crate::storage::GraphStorage;
use crate::types::{CandidateSection, CandidateSource};
use crate::vectors::VectorStore;
use std::sync::Arc;

pub use drift::{drift_search, DriftSearchResult};
pub use global::{global_search, GlobalSearchResult, ScoredReport};
pub use local::{local_search, lexical_score, LocalSearchResult, ScoredEntity};

async fn entity_section(
    graph: &Arc<GraphStorage>,
    scored: &ScoredEntity,
    result: &LocalSearchResult,
    query: &str,
) -> crate::error::Result<CandidateSection> {
    let entity = &scored.entity;

    let mut body = entity.description.clone();
    let related: Vec<String> = result
        .relationships
        .iter()
        .filter(|r| r.source_id == entity.id || r.target_id == entity.id)
        .take(5)
        .map(|r| format!("{}: {}", r.rel_type, r.description))
        .collect();
    if !related.is_empty() {
        body.push_str("\nRelationships:\n");
        body.push_str(&related.join("\n"));
    }

    let source_memory_ids = graph.memories_for_entity(&entity.id).await?;

    Ok(CandidateSection {
        id: format!("graphrag-entity-{}", entity.id),
        source: CandidateSource::Graphrag,
        title: entity.canonical_name.clone(),
        body: body.clone(),
        relevance: scored.score.clamp(0.0, 1.0),
        query_terms: covered_query_terms(query, &body),
        memory_id: None,
        entity_id: Some(entity.id.clone()),
        source_memory_ids,
        tags: Vec::new(),
        importance: None,
    })
}

async fn report_section(
    graph: &Arc<GraphStorage>,
    scored: &ScoredReport,
    query: &str,
) -> crate::error::Result<CandidateSection> {
    let report = &scored.report;

    let mut body = report.summary.clone();
    if !report.key_findings.is_empty() {
        body.push_str("\nKey findings:\n");
        for finding in report.key_findings.iter().take(3) {
            body.push_str(&format!("- {}\n", finding));
        }
    }

    let source_memory_ids = graph.memories_for_report(&report.id).await?;

    Ok(CandidateSection {
        id: format!("graphrag-report-{}", report.id),
        source: CandidateSource::Graphrag,
        title: report.title.clone(),
        body: body.clone(),
        relevance: scored.score.clamp(0.0, 1.0),
        query_terms: covered_query_terms(query, &body),
        memory_id: None,
        entity_id: Some(report.id.clone()),
        source_memory_ids,
        tags: Vec::new(),
        importance: None,
    })
}

/// Retrieve knowledge-graph candidates for a query
pub async fn retrieve_graphrag(
    query: &str,
    limit: usize,
    graph: &Arc<GraphStorage>,
    vectors: &Arc<dyn VectorStore>,
    embeddings: &Arc<dyn EmbeddingClient>,
    config: &GraphRagConfig,
) -> crate::error::Result<Vec<CandidateSection>> {
    if limit == 0 {
        return Ok(Vec::new());
    }

    let mut sections: Vec<CandidateSection> = Vec::new();

    match config.mode {
        GraphRagMode::Local => {
            let embedding = embeddings.embed(query).await?;
            let result = local_search(query, &embedding, graph, vectors, config).await?;
            for scored in &result.entities {
                sections.push(entity_section(graph, scored, &result, query).await?);
            }
        }
        GraphRagMode::Global => {
            let embedding = embeddings.embed(query).await?;
            let result = global_search(&embedding, graph, vectors, config).await?;
            for scored in &result.reports {
                sections.push(report_section(graph, scored, query).await?);
            }
        }
        GraphRagMode::Auto => {
            let embedding = embeddings.embed(query).await?;
            let local_result = local_search(query, &embedding, graph, vectors, config).await?;
            for scored in &local_result.entities {
                sections.push(entity_section(graph, scored, &local_result, query).await?);
            }
            let global_result = global_search(&embedding, graph, vectors, config).await?;
            for scored in &global_result.reports {
                sections.push(report_section(graph, scored, query).await?);
            }
        }
        GraphRagMode::Drift => {
            let result = drift_search(query, graph, vectors, embeddings, config).await?;
            let as_local = LocalSearchResult {
                entities: result.entities.clone(),
                relationships: Vec::new(),
                total_expanded: 0,
            };
            for scored in &result.entities {
                sections.push(entity_section(graph, scored, &as_local, query).await?);
            }
        }
    }

    sections.sort_by(|a, b| {
        b.relevance
            .partial_cmp(&a.relevance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    sections.truncate(limit);
    Ok(sections)
}

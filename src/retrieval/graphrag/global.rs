//! Global (community-centric) GraphRAG search
//!
//! Searches the community-report vector set and synthesises an answer from
//! the matched report summaries with source attributions. Report
//! resolution takes the first non-null id in the order payload.reportId,
//! hit.memoryId, hit.id, falling back to the embedding-id index.

use crate::config::GraphRagConfig;
use crate::storage::GraphStorage;
use crate::types::CommunityReport;
use crate::vectors::{VectorFilter, VectorHit, VectorStore, PAYLOAD_TYPE_GRAPHRAG_REPORT};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// A community report matched by global search
#[derive(Debug, Clone)]
pub struct ScoredReport {
    pub report: CommunityReport,
    pub score: f32,
}

/// Result of one global search
#[derive(Debug, Clone, Default)]
pub struct GlobalSearchResult {
    /// Top reports by descending score
    pub reports: Vec<ScoredReport>,

    /// Answer synthesised from the report summaries
    pub answer: String,
}

/// Resolve a hit to its report: explicit report id first, embedding-id
/// fallback second
async fn resolve_report(
    graph: &Arc<GraphStorage>,
    hit: &VectorHit,
) -> crate::error::Result<Option<CommunityReport>> {
    let candidate_id = hit
        .payload
        .get("reportId")
        .and_then(|v| v.as_str())
        .map(String::from)
        .or_else(|| hit.memory_id.clone())
        .unwrap_or_else(|| hit.id.clone());

    if let Some(report) = graph.get_report(&candidate_id).await? {
        return Ok(Some(report));
    }
    graph.get_report_by_embedding_id(&hit.id).await
}

fn synthesize_answer(reports: &[ScoredReport]) -> String {
    let mut answer = String::new();
    for scored in reports {
        if !answer.is_empty() {
            answer.push_str("\n\n");
        }
        answer.push_str(scored.report.summary.trim());
        answer.push_str(&format!(" (source: {})", scored.report.title));
    }
    answer
}

/// Run a global search from a pre-computed query embedding
pub async fn global_search(
    query_embedding: &[f32],
    graph: &Arc<GraphStorage>,
    vectors: &Arc<dyn VectorStore>,
    config: &GraphRagConfig,
) -> crate::error::Result<GlobalSearchResult> {
    let filter = VectorFilter::new().match_value("type", PAYLOAD_TYPE_GRAPHRAG_REPORT);
    let hits = vectors
        .search(query_embedding, Some(&filter), config.max_reports * 2)
        .await?;

    // Dedupe by report id keeping the max score.
    let mut best: HashMap<String, ScoredReport> = HashMap::new();
    for hit in &hits {
        let Some(report) = resolve_report(graph, hit).await? else {
            continue;
        };
        let entry = best.entry(report.id.clone());
        match entry {
            std::collections::hash_map::Entry::Occupied(mut existing) => {
                if hit.score > existing.get().score {
                    existing.get_mut().score = hit.score;
                }
            }
            std::collections::hash_map::Entry::Vacant(vacant) => {
                vacant.insert(ScoredReport {
                    report,
                    score: hit.score,
                });
            }
        }
    }

    let mut reports: Vec<ScoredReport> = best.into_values().collect();
    reports.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.report.id.cmp(&b.report.id))
    });
    reports.truncate(config.max_reports);

    debug!(reports = reports.len(), "global graph search complete");

    let answer = synthesize_answer(&reports);
    Ok(GlobalSearchResult { reports, answer })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{SqliteStorage, StorageBackend};
    use crate::types::Community;
    use serde_json::json;

    async fn graph_with_report(id: &str, embedding_id: &str) -> (SqliteStorage, Arc<GraphStorage>) {
        let storage = SqliteStorage::in_memory().unwrap();
        let graph = storage.graph();
        graph
            .upsert_community(&Community {
                id: "c0".to_string(),
                level: 0,
                parent_id: None,
                entity_count: 0,
                modularity: None,
                member_entity_ids: Vec::new(),
            })
            .await
            .unwrap();
        graph
            .upsert_report(&CommunityReport {
                id: id.to_string(),
                community_id: "c0".to_string(),
                title: format!("Report {}", id),
                summary: "The storage layer centres on SQLite.".to_string(),
                full_content: "Full".to_string(),
                key_findings: Vec::new(),
                rating: None,
                embedding_id: Some(embedding_id.to_string()),
            })
            .await
            .unwrap();
        (storage, graph)
    }

    fn hit(id: &str, score: f32, payload: serde_json::Value) -> VectorHit {
        VectorHit {
            id: id.to_string(),
            score,
            memory_id: None,
            payload,
        }
    }

    #[tokio::test]
    async fn test_resolution_prefers_payload_report_id() {
        let (_storage, graph) = graph_with_report("rep1", "vec-other").await;
        let resolved = resolve_report(&graph, &hit("unrelated", 0.9, json!({"reportId": "rep1"})))
            .await
            .unwrap();
        assert_eq!(resolved.map(|r| r.id), Some("rep1".to_string()));
    }

    #[tokio::test]
    async fn test_resolution_memory_id_before_hit_id() {
        let (_storage, graph) = graph_with_report("rep1", "vec-rep1").await;
        let mut h = hit("vec-rep1", 0.9, json!({}));
        h.memory_id = Some("rep1".to_string());
        let resolved = resolve_report(&graph, &h).await.unwrap();
        assert_eq!(resolved.map(|r| r.id), Some("rep1".to_string()));
    }

    #[tokio::test]
    async fn test_resolution_falls_back_to_embedding_id() {
        let (_storage, graph) = graph_with_report("rep1", "vec-rep1").await;
        // hit id is not a report id, but matches the embedding-id index
        let resolved = resolve_report(&graph, &hit("vec-rep1", 0.9, json!({})))
            .await
            .unwrap();
        assert_eq!(resolved.map(|r| r.id), Some("rep1".to_string()));
    }

    #[test]
    fn test_answer_includes_attributions() {
        let report = CommunityReport {
            id: "rep1".to_string(),
            community_id: "c0".to_string(),
            title: "Storage".to_string(),
            summary: "Summary text.".to_string(),
            full_content: String::new(),
            key_findings: Vec::new(),
            rating: None,
            embedding_id: None,
        };
        let answer = synthesize_answer(&[ScoredReport {
            report,
            score: 0.9,
        }]);
        assert!(answer.contains("Summary text."));
        assert!(answer.contains("(source: Storage)"));
    }
}

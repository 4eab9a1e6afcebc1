//! KAG channel: code-graph traversal
//!
//! Extracts probable identifiers from the query, looks them up in the code
//! structure graph, and produces sections describing each node's signature,
//! nearby callers/callees, and implementations for interface-like nodes.

use crate::context::estimate_tokens;
use crate::retrieval::covered_query_terms;
use crate::storage::GraphStorage;
use crate::types::{CandidateSection, CandidateSource, CodeNode};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Relevance assigned to a found-node section
const NODE_RELEVANCE: f32 = 0.8;

/// Relevance assigned to an implementations section
const IMPLEMENTATIONS_RELEVANCE: f32 = 0.7;

/// At most this many callers/callees/implementations are named per section
const NEIGHBOR_DISPLAY_LIMIT: usize = 5;

/// Call-graph expansion bounds
const EXPANSION_MAX_DEPTH: usize = 2;
const EXPANSION_MAX_NODES: usize = 50;

/// camelCase / PascalCase words
static CAMEL_CASE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Za-z][a-z0-9]*[A-Z][A-Za-z0-9]*\b").expect("camel-case regex is valid")
});

/// Words followed by a call parenthesis
static CALL_LIKE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*)\s*\(").expect("call regex is valid"));

/// Extract probable identifiers from a query, deduplicated in query order
pub fn extract_identifiers(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut identifiers = Vec::new();

    for m in CAMEL_CASE.find_iter(query) {
        let name = m.as_str();
        if name.len() >= 3 && seen.insert(name.to_string()) {
            identifiers.push(name.to_string());
        }
    }
    for caps in CALL_LIKE.captures_iter(query) {
        let name = &caps[1];
        if name.len() >= 3 && seen.insert(name.to_string()) {
            identifiers.push(name.to_string());
        }
    }
    identifiers
}

fn name_list(nodes: &[CodeNode]) -> String {
    let shown: Vec<&str> = nodes
        .iter()
        .take(NEIGHBOR_DISPLAY_LIMIT)
        .map(|n| n.name.as_str())
        .collect();
    let mut rendered = shown.join(", ");
    if nodes.len() > NEIGHBOR_DISPLAY_LIMIT {
        rendered.push_str(&format!(" ({} more)", nodes.len() - NEIGHBOR_DISPLAY_LIMIT));
    }
    rendered
}

/// Bounded breadth-first expansion over call edges
///
/// Counts distinct nodes reachable within two hops, capped at 50, so the
/// section can report neighbourhood size without unbounded traversal.
async fn expansion_size(
    graph: &Arc<GraphStorage>,
    root: &CodeNode,
) -> crate::error::Result<usize> {
    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(root.id.clone());
    let mut frontier = vec![root.id.clone()];

    for _ in 0..EXPANSION_MAX_DEPTH {
        let mut next = Vec::new();
        for node_id in frontier {
            for neighbor in graph
                .callers_of(&node_id)
                .await?
                .into_iter()
                .chain(graph.callees_of(&node_id).await?)
            {
                if visited.len() >= EXPANSION_MAX_NODES {
                    return Ok(visited.len());
                }
                if visited.insert(neighbor.id.clone()) {
                    next.push(neighbor.id);
                }
            }
        }
        frontier = next;
        if frontier.is_empty() {
            break;
        }
    }
    Ok(visited.len())
}

async fn node_section(
    graph: &Arc<GraphStorage>,
    node: &CodeNode,
    query: &str,
) -> crate::error::Result<CandidateSection> {
    let callers = graph.callers_of(&node.id).await?;
    let callees = graph.callees_of(&node.id).await?;
    let expanded = expansion_size(graph, node).await?;

    let mut body = format!("`{}`", node.signature);
    if let Some(summary) = &node.summary {
        body.push('\n');
        body.push_str(summary);
    }
    if !callers.is_empty() {
        body.push_str(&format!("\nCallers: {}", name_list(&callers)));
    }
    if !callees.is_empty() {
        body.push_str(&format!("\nCallees: {}", name_list(&callees)));
    }
    body.push_str(&format!("\nRelated nodes within two hops: {}", expanded));
    if let Some(file) = &node.file {
        body.push_str(&format!("\nDefined in {}", file));
    }

    let mut query_terms = covered_query_terms(query, &body);
    let lowered = node.name.to_lowercase();
    if !query_terms.contains(&lowered) {
        query_terms.push(lowered);
    }

    Ok(CandidateSection {
        id: format!("kag-{}", node.id),
        source: CandidateSource::Kag,
        title: format!("{} ({})", node.name, node.kind.as_str()),
        body,
        relevance: NODE_RELEVANCE,
        query_terms,
        memory_id: None,
        entity_id: None,
        source_memory_ids: Vec::new(),
        tags: Vec::new(),
        importance: None,
    })
}

fn implementations_section(
    node: &CodeNode,
    implementations: &[CodeNode],
    query: &str,
) -> CandidateSection {
    let body = format!(
        "Implementations of {}: {}",
        node.name,
        name_list(implementations)
    );
    CandidateSection {
        id: format!("kag-impl-{}", node.id),
        source: CandidateSource::Kag,
        title: format!("Implementations of {}", node.name),
        body: body.clone(),
        relevance: IMPLEMENTATIONS_RELEVANCE,
        query_terms: covered_query_terms(query, &body),
        memory_id: None,
        entity_id: None,
        source_memory_ids: Vec::new(),
        tags: Vec::new(),
        importance: None,
    }
}

/// Retrieve code-graph candidates for a query under a token sub-budget
///
/// Section tokens are measured post-format; once the sub-budget is spent no
/// further identifiers are expanded.
pub async fn retrieve_kag(
    query: &str,
    token_budget: usize,
    graph: &Arc<GraphStorage>,
) -> crate::error::Result<Vec<CandidateSection>> {
    let identifiers = extract_identifiers(query);
    if identifiers.is_empty() {
        return Ok(Vec::new());
    }
    debug!(count = identifiers.len(), "extracted identifiers from query");

    let mut sections = Vec::new();
    let mut used_tokens = 0usize;

    'identifiers: for name in identifiers {
        let Some(node) = graph.get_code_node_by_name(&name).await? else {
            continue;
        };

        let mut produced = vec![node_section(graph, &node, query).await?];
        if node.kind.is_abstract() {
            let implementations = graph.implementations_of(&node.id).await?;
            if !implementations.is_empty() {
                produced.push(implementations_section(&node, &implementations, query));
            }
        }

        for section in produced {
            let tokens = estimate_tokens(&format!("{}\n{}", section.title, section.body));
            if used_tokens + tokens > token_budget {
                break 'identifiers;
            }
            used_tokens += tokens;
            sections.push(section);
        }
    }
    Ok(sections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{SqliteStorage, StorageBackend};
    use crate::types::{CodeEdgeKind, CodeNodeKind};

    #[test]
    fn test_extract_identifiers_camel_and_calls() {
        let ids = extract_identifiers("What calls validateToken and parse_config( today?");
        assert_eq!(ids, vec!["validateToken", "parse_config"]);
    }

    #[test]
    fn test_extract_identifiers_dedup_and_length() {
        let ids = extract_identifiers("fn ab( and validateToken plus validateToken again");
        assert_eq!(ids, vec!["validateToken"]);
    }

    #[test]
    fn test_plain_prose_has_no_identifiers() {
        assert!(extract_identifiers("why did we pick this database").is_empty());
    }

    async fn seeded_graph() -> (SqliteStorage, Arc<GraphStorage>) {
        let storage = SqliteStorage::in_memory().unwrap();
        let graph = storage.graph();
        let node = |id: &str, name: &str, kind: CodeNodeKind| CodeNode {
            id: id.to_string(),
            name: name.to_string(),
            kind,
            signature: format!("fn {}()", name),
            summary: Some(format!("{} summary", name)),
            file: Some("src/auth.rs".to_string()),
        };
        graph
            .upsert_code_node(&node("n1", "validateToken", CodeNodeKind::Function))
            .await
            .unwrap();
        for i in 0..7 {
            let caller = node(&format!("c{}", i), &format!("caller{}", i), CodeNodeKind::Function);
            graph.upsert_code_node(&caller).await.unwrap();
            graph
                .upsert_code_edge(&caller.id, "n1", CodeEdgeKind::Call)
                .await
                .unwrap();
        }
        (storage, graph)
    }

    #[tokio::test]
    async fn test_node_section_truncates_neighbor_lists() {
        let (_storage, graph) = seeded_graph().await;
        let sections = retrieve_kag("what calls validateToken", 2_000, &graph)
            .await
            .unwrap();
        assert_eq!(sections.len(), 1);
        let body = &sections[0].body;
        assert!(body.contains("(2 more)"), "body: {}", body);
        assert!((sections[0].relevance - 0.8).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_unknown_identifiers_are_skipped() {
        let (_storage, graph) = seeded_graph().await;
        let sections = retrieve_kag("what calls missingThing", 2_000, &graph)
            .await
            .unwrap();
        assert!(sections.is_empty());
    }

    #[tokio::test]
    async fn test_interface_gets_implementations_section() {
        let storage = SqliteStorage::in_memory().unwrap();
        let graph = storage.graph();
        graph
            .upsert_code_node(&CodeNode {
                id: "t1".to_string(),
                name: "TokenStore".to_string(),
                kind: CodeNodeKind::Trait,
                signature: "trait TokenStore".to_string(),
                summary: None,
                file: None,
            })
            .await
            .unwrap();
        graph
            .upsert_code_node(&CodeNode {
                id: "i1".to_string(),
                name: "RedisTokenStore".to_string(),
                kind: CodeNodeKind::Struct,
                signature: "struct RedisTokenStore".to_string(),
                summary: None,
                file: None,
            })
            .await
            .unwrap();
        graph
            .upsert_code_edge("i1", "t1", CodeEdgeKind::Implements)
            .await
            .unwrap();

        let sections = retrieve_kag("how is TokenStore used", 2_000, &graph)
            .await
            .unwrap();
        assert_eq!(sections.len(), 2);
        assert!((sections[1].relevance - 0.7).abs() < f32::EPSILON);
        assert!(sections[1].body.contains("RedisTokenStore"));
    }

    #[tokio::test]
    async fn test_sub_budget_limits_sections() {
        let (_storage, graph) = seeded_graph().await;
        let sections = retrieve_kag("what calls validateToken", 5, &graph)
            .await
            .unwrap();
        assert!(sections.is_empty());
    }
}

//! Deterministic in-process collaborators
//!
//! A hash-based embedding client and an exhaustive-scan vector store, used
//! by the benchmark binary and the integration suites so runs never depend
//! on model downloads or external services. Embeddings are deterministic
//! per input text.

use crate::embeddings::{cosine_similarity, EmbeddingClient};
use crate::error::{EngramError, Result};
use crate::retrieval::remember;
use crate::storage::StorageBackend;
use crate::types::{
    CodeEdgeKind, CodeNode, CodeNodeKind, Community, CommunityReport, Entity, EntityType, Memory,
    MemoryKind,
};
use crate::vectors::{
    VectorFilter, VectorHit, VectorStore, PAYLOAD_TYPE_GRAPHRAG_ENTITY,
    PAYLOAD_TYPE_GRAPHRAG_REPORT,
};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Deterministic embedding client
///
/// Generates unit-length vectors from a content hash so that vector search
/// behaves consistently across runs without a model.
pub struct HashEmbeddingClient {
    dimensions: usize,
}

impl HashEmbeddingClient {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    /// Standard 384-dimension client
    pub fn new_standard() -> Self {
        Self::new(384)
    }

    fn generate(&self, text: &str) -> Vec<f32> {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let base_hash = hasher.finish();

        let mut embedding = Vec::with_capacity(self.dimensions);
        for i in 0..self.dimensions {
            let mut dim_hasher = DefaultHasher::new();
            base_hash.hash(&mut dim_hasher);
            i.hash(&mut dim_hasher);
            let dim_hash = dim_hasher.finish();
            let value = ((dim_hash % 2000) as f32 - 1000.0) / 1000.0;
            embedding.push(value);
        }

        let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut embedding {
                *value /= magnitude;
            }
        }
        embedding
    }
}

#[async_trait]
impl EmbeddingClient for HashEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.generate(text))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.generate(text)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "hash-embedding-client"
    }
}

/// An embedding client that always fails, for degradation tests
pub struct FailingEmbeddingClient;

#[async_trait]
impl EmbeddingClient for FailingEmbeddingClient {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(EngramError::Embedding("provider unavailable".to_string()))
    }

    async fn embed_batch(&self, _texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Err(EngramError::Embedding("provider unavailable".to_string()))
    }

    fn dimensions(&self) -> usize {
        384
    }

    fn model_name(&self) -> &str {
        "failing-embedding-client"
    }
}

/// Exhaustive-scan in-memory vector store
///
/// Cosine similarity over every stored vector; adequate for fixture-sized
/// indexes and fully deterministic.
#[derive(Default)]
pub struct InMemoryVectorStore {
    entries: RwLock<HashMap<String, (Vec<f32>, Value)>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert(&self, id: &str, vector: Vec<f32>, payload: Value) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(id.to_string(), (vector, payload));
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        filter: Option<&VectorFilter>,
        limit: usize,
    ) -> Result<Vec<VectorHit>> {
        let entries = self.entries.read().await;
        let mut hits: Vec<VectorHit> = entries
            .iter()
            .filter(|(_, (_, payload))| filter.map(|f| f.matches(payload)).unwrap_or(true))
            .map(|(id, (stored, payload))| VectorHit {
                id: id.clone(),
                score: cosine_similarity(vector, stored),
                memory_id: payload
                    .get("memoryId")
                    .and_then(|v| v.as_str())
                    .map(String::from),
                payload: payload.clone(),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.entries.write().await.remove(id);
        Ok(())
    }

    async fn delete_by_filter(&self, filter: &VectorFilter) -> Result<()> {
        self.entries
            .write()
            .await
            .retain(|_, (_, payload)| !filter.matches(payload));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

fn sample_memory(
    id: &str,
    kind: MemoryKind,
    title: &str,
    body: &str,
    tags: &[&str],
    importance: f32,
) -> Memory {
    let mut memory = Memory::new(id, kind, title, body);
    memory.tags = tags.iter().map(|t| t.to_string()).collect();
    memory.importance = importance;
    memory
}

/// Seed a small, deterministic project: memories, a knowledge graph with a
/// community report, and a code structure graph
pub async fn seed_sample_project(
    storage: &Arc<dyn StorageBackend>,
    vectors: &Arc<dyn VectorStore>,
    embeddings: &Arc<dyn EmbeddingClient>,
) -> Result<()> {
    let memories = vec![
        sample_memory(
            "mem-auth-jwt",
            MemoryKind::Decision,
            "Use JWT for session tokens",
            "We decided to use signed JWTs for session tokens because they avoid a database lookup per request. The tradeoff is revocation latency.",
            &["auth", "security"],
            0.9,
        ),
        sample_memory(
            "mem-auth-refresh",
            MemoryKind::Solution,
            "Refresh token rotation fix",
            "Rotating refresh tokens on every use closed the replay window reported in the security audit of validateToken.",
            &["auth", "bugfix"],
            0.7,
        ),
        sample_memory(
            "mem-db-postgres",
            MemoryKind::Decision,
            "Choose PostgreSQL over MySQL",
            "PostgreSQL was chosen for its JSONB support and transactional DDL. The tradeoff was slightly higher operational complexity.",
            &["database", "architecture"],
            0.95,
        ),
        sample_memory(
            "mem-cache-layer",
            MemoryKind::Architecture,
            "Two-tier cache layout",
            "Requests hit an in-process LRU before the shared Redis tier. Invalidation is pushed over a pub/sub channel.",
            &["cache", "architecture"],
            0.8,
        ),
        sample_memory(
            "mem-retry-pattern",
            MemoryKind::Pattern,
            "Exponential backoff with jitter",
            "All outbound HTTP calls use exponential backoff with full jitter and a three-attempt cap.",
            &["resilience", "http"],
            0.6,
        ),
        sample_memory(
            "mem-logging-note",
            MemoryKind::Note,
            "Structured logging fields",
            "Log lines carry request_id, route, and latency_ms fields so the dashboards can aggregate without parsing.",
            &["observability"],
            0.4,
        ),
    ];
    for memory in &memories {
        remember(memory, storage, vectors, embeddings).await?;
    }

    // Knowledge graph: entities, relationships, a community and its report.
    let graph = storage.graph();
    let now = Utc::now();
    let entities = vec![
        ("ent-jwt", "JWT", EntityType::Technology, "Signed token format used for sessions"),
        ("ent-postgres", "PostgreSQL", EntityType::Technology, "Primary relational database"),
        ("ent-redis", "Redis", EntityType::Technology, "Shared cache tier"),
        ("ent-auth", "AuthService", EntityType::Component, "Service issuing and validating tokens"),
    ];
    for (id, name, entity_type, description) in &entities {
        let embedding_id = format!("vec-{}", id);
        let embedding = embeddings
            .embed(&format!("{} {}", name, description))
            .await?;
        vectors
            .upsert(
                &embedding_id,
                embedding,
                json!({"type": PAYLOAD_TYPE_GRAPHRAG_ENTITY, "entityId": id}),
            )
            .await?;
        graph
            .upsert_entity(&Entity {
                id: id.to_string(),
                canonical_name: name.to_string(),
                entity_type: entity_type.clone(),
                description: description.to_string(),
                mention_count: 2,
                extraction_confidence: 0.9,
                first_seen_at: now,
                last_seen_at: now,
                embedding_id: Some(embedding_id),
            })
            .await?;
    }
    graph.link_entity_memory("ent-jwt", &"mem-auth-jwt".into()).await?;
    graph.link_entity_memory("ent-auth", &"mem-auth-jwt".into()).await?;
    graph.link_entity_memory("ent-auth", &"mem-auth-refresh".into()).await?;
    graph.link_entity_memory("ent-postgres", &"mem-db-postgres".into()).await?;
    graph.link_entity_memory("ent-redis", &"mem-cache-layer".into()).await?;

    for (id, source, target, rel_type, strength) in [
        ("rel-auth-jwt", "ent-auth", "ent-jwt", "ISSUES", 4),
        ("rel-auth-redis", "ent-auth", "ent-redis", "CACHES_IN", 2),
        ("rel-auth-postgres", "ent-auth", "ent-postgres", "PERSISTS_TO", 3),
    ] {
        graph
            .upsert_relationship(&crate::types::Relationship {
                id: id.to_string(),
                source_id: source.to_string(),
                target_id: target.to_string(),
                rel_type: rel_type.to_string(),
                strength,
                description: format!("{} {} {}", source, rel_type, target),
            })
            .await?;
    }

    graph
        .upsert_community(&Community {
            id: "com-auth".to_string(),
            level: 0,
            parent_id: None,
            entity_count: 3,
            modularity: Some(0.35),
            member_entity_ids: vec![
                "ent-jwt".to_string(),
                "ent-auth".to_string(),
                "ent-redis".to_string(),
            ],
        })
        .await?;

    let report = CommunityReport {
        id: "rep-auth".to_string(),
        community_id: "com-auth".to_string(),
        title: "Authentication subsystem".to_string(),
        summary: "AuthService issues JWT session tokens, caches them in Redis, and rotates refresh tokens on use.".to_string(),
        full_content: "The authentication community centres on AuthService and its token lifecycle.".to_string(),
        key_findings: vec![
            "JWTs avoid per-request database lookups".to_string(),
            "Refresh rotation closed a replay window".to_string(),
        ],
        rating: Some(8.0),
        embedding_id: Some("vec-rep-auth".to_string()),
    };
    let report_embedding = embeddings
        .embed(&format!("{} {}", report.title, report.summary))
        .await?;
    vectors
        .upsert(
            "vec-rep-auth",
            report_embedding,
            json!({"type": PAYLOAD_TYPE_GRAPHRAG_REPORT, "reportId": "rep-auth"}),
        )
        .await?;
    graph.upsert_report(&report).await?;

    // Code structure graph.
    let code_node = |id: &str, name: &str, kind: CodeNodeKind, signature: &str| CodeNode {
        id: id.to_string(),
        name: name.to_string(),
        kind,
        signature: signature.to_string(),
        summary: Some(format!("{} in the auth flow", name)),
        file: Some("src/auth/service.rs".to_string()),
    };
    graph
        .upsert_code_node(&code_node(
            "cn-validate",
            "validateToken",
            CodeNodeKind::Function,
            "fn validateToken(token: &str) -> Result<Claims>",
        ))
        .await?;
    graph
        .upsert_code_node(&code_node(
            "cn-login",
            "login",
            CodeNodeKind::Function,
            "async fn login(credentials: Credentials) -> Result<Session>",
        ))
        .await?;
    graph
        .upsert_code_node(&code_node(
            "cn-decode",
            "decodeJwt",
            CodeNodeKind::Function,
            "fn decodeJwt(token: &str) -> Result<Claims>",
        ))
        .await?;
    graph
        .upsert_code_node(&code_node(
            "cn-store",
            "TokenStore",
            CodeNodeKind::Trait,
            "trait TokenStore",
        ))
        .await?;
    graph
        .upsert_code_node(&code_node(
            "cn-redis-store",
            "RedisTokenStore",
            CodeNodeKind::Struct,
            "struct RedisTokenStore",
        ))
        .await?;
    graph.upsert_code_edge("cn-login", "cn-validate", CodeEdgeKind::Call).await?;
    graph.upsert_code_edge("cn-validate", "cn-decode", CodeEdgeKind::Call).await?;
    graph
        .upsert_code_edge("cn-redis-store", "cn-store", CodeEdgeKind::Implements)
        .await?;

    Ok(())
}

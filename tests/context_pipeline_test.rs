//! End-to-end tests for the context retrieval pipeline
//!
//! These exercise the full build_context path against seeded in-process
//! backends: route classification, budget packing, evidence emission,
//! caching, and the delete cascade.

mod common;

use common::{make_memory, seeded_world};
use engram_core::bench::fixtures::FailingEmbeddingClient;
use engram_core::context::FORMAT_OVERHEAD_TOKENS;
use engram_core::{
    build_context, build_context_with_config, context_cache_stats, forget_memory, remember,
    reset_context_cache, CandidateSource, ContextRequest, MemoryId, RetrievalConfig, Route,
    StorageBackend, Template,
};
use serial_test::serial;
use std::sync::Arc;

fn request(query: &str) -> ContextRequest {
    ContextRequest::new(query)
}

#[tokio::test]
#[serial]
async fn test_hybrid_query_routes_and_fills_budget() {
    reset_context_cache();
    let world = seeded_world().await;

    let mut req = request("What calls validateToken and why did we choose this design?");
    req.include_evidence = true;
    let response = build_context(
        req,
        Arc::clone(&world.storage),
        Arc::clone(&world.vectors),
        Arc::clone(&world.embeddings),
        None,
        None,
    )
    .await
    .unwrap();

    assert_eq!(response.metadata.route, Route::Hybrid);
    assert!(response.metadata.sections_included > 0);
    assert!(response.metadata.total_tokens <= 4096);
    assert!(response.metadata.kag_sections > 0, "expected code sections");
    assert!(response.context.contains("validateToken"));

    let evidence = response.evidence.expect("evidence requested");
    assert_eq!(evidence.len(), response.metadata.sections_included);
}

#[tokio::test]
#[serial]
async fn test_memory_route_for_history_question() {
    reset_context_cache();
    let world = seeded_world().await;

    let response = build_context(
        request("Why did we choose PostgreSQL and what was the tradeoff?"),
        Arc::clone(&world.storage),
        Arc::clone(&world.vectors),
        Arc::clone(&world.embeddings),
        None,
        None,
    )
    .await
    .unwrap();

    assert_eq!(response.metadata.route, Route::Memory);
    assert!(response.metadata.rag_sections > 0);
    assert_eq!(response.metadata.graphrag_sections, 0);
}

#[tokio::test]
#[serial]
async fn test_code_route_for_structural_question() {
    reset_context_cache();
    let world = seeded_world().await;

    let response = build_context(
        request("What calls validateToken and what depends on AuthService?"),
        Arc::clone(&world.storage),
        Arc::clone(&world.vectors),
        Arc::clone(&world.embeddings),
        None,
        None,
    )
    .await
    .unwrap();

    assert_eq!(response.metadata.route, Route::Code);
}

#[tokio::test]
#[serial]
async fn test_token_budget_is_a_hard_ceiling() {
    reset_context_cache();
    let world = seeded_world().await;

    for budget in [FORMAT_OVERHEAD_TOKENS, 300, 600, 2_000] {
        reset_context_cache();
        let mut req = request("authentication token design decisions");
        req.token_budget = budget;
        let response = build_context(
            req,
            Arc::clone(&world.storage),
            Arc::clone(&world.vectors),
            Arc::clone(&world.embeddings),
            None,
            None,
        )
        .await
        .unwrap();
        assert!(
            response.metadata.total_tokens <= budget,
            "budget {} exceeded: {}",
            budget,
            response.metadata.total_tokens
        );
    }
}

#[tokio::test]
#[serial]
async fn test_budget_at_overhead_admits_nothing() {
    reset_context_cache();
    let world = seeded_world().await;

    let mut req = request("authentication token design");
    req.token_budget = FORMAT_OVERHEAD_TOKENS;
    let response = build_context(
        req,
        Arc::clone(&world.storage),
        Arc::clone(&world.vectors),
        Arc::clone(&world.embeddings),
        None,
        None,
    )
    .await
    .unwrap();

    assert_eq!(response.metadata.sections_included, 0);
    assert!(response.metadata.truncated);
}

#[tokio::test]
#[serial]
async fn test_second_call_hits_cache() {
    reset_context_cache();
    let world = seeded_world().await;

    let first = build_context(
        request("how does the cache invalidation work"),
        Arc::clone(&world.storage),
        Arc::clone(&world.vectors),
        Arc::clone(&world.embeddings),
        None,
        None,
    )
    .await
    .unwrap();
    assert!(!first.metadata.cache_hit);

    let second = build_context(
        request("How does the cache   invalidation work?"),
        Arc::clone(&world.storage),
        Arc::clone(&world.vectors),
        Arc::clone(&world.embeddings),
        None,
        None,
    )
    .await
    .unwrap();
    // Same query modulo case/whitespace/punctuation: same fingerprint.
    assert!(second.metadata.cache_hit);
    assert_eq!(first.context, second.context);

    let stats = context_cache_stats();
    assert_eq!(stats.hits, 1);
}

#[tokio::test]
#[serial]
async fn test_empty_store_produces_stub() {
    reset_context_cache();
    let world = common::empty_world();

    let response = build_context(
        request("anything at all"),
        Arc::clone(&world.storage),
        Arc::clone(&world.vectors),
        Arc::clone(&world.embeddings),
        None,
        None,
    )
    .await
    .unwrap();

    assert_eq!(response.metadata.sections_included, 0);
    assert!(!response.metadata.truncated);
    assert!(response.context.contains("anything at all"));
}

#[tokio::test]
#[serial]
async fn test_compact_template_shrinks_output() {
    reset_context_cache();
    let world = seeded_world().await;

    let mut full = request("authentication token design decisions");
    full.template = Template::Default;
    let full_response = build_context(
        full,
        Arc::clone(&world.storage),
        Arc::clone(&world.vectors),
        Arc::clone(&world.embeddings),
        None,
        None,
    )
    .await
    .unwrap();

    reset_context_cache();
    let mut compact = request("authentication token design decisions");
    compact.template = Template::Compact;
    let compact_response = build_context(
        compact,
        Arc::clone(&world.storage),
        Arc::clone(&world.vectors),
        Arc::clone(&world.embeddings),
        None,
        None,
    )
    .await
    .unwrap();

    assert!(
        compact_response.metadata.total_tokens <= full_response.metadata.total_tokens,
        "compact {} > default {}",
        compact_response.metadata.total_tokens,
        full_response.metadata.total_tokens
    );
}

#[tokio::test]
#[serial]
async fn test_channel_failure_surfaces_without_degrade() {
    reset_context_cache();
    let world = seeded_world().await;
    let failing = Arc::new(FailingEmbeddingClient) as Arc<dyn engram_core::EmbeddingClient>;

    let result = build_context(
        request("why did we pick this design"),
        Arc::clone(&world.storage),
        Arc::clone(&world.vectors),
        failing,
        None,
        None,
    )
    .await;
    assert!(result.is_err());
}

#[tokio::test]
#[serial]
async fn test_channel_failure_degrades_when_configured() {
    reset_context_cache();
    let world = seeded_world().await;
    let failing = Arc::new(FailingEmbeddingClient) as Arc<dyn engram_core::EmbeddingClient>;

    let config = RetrievalConfig {
        degrade_on_channel_error: true,
        ..Default::default()
    };
    // RAG and GraphRAG lose their embeddings; KAG still produces sections.
    let timed = build_context_with_config(
        request("What calls validateToken and why did we choose this design?"),
        &config,
        Arc::clone(&world.storage),
        Arc::clone(&world.vectors),
        failing,
        None,
        None,
    )
    .await
    .unwrap();

    assert_eq!(timed.response.metadata.rag_sections, 0);
    assert!(timed.response.metadata.kag_sections > 0);
}

#[tokio::test]
#[serial]
async fn test_evidence_groups_match_document_order() {
    reset_context_cache();
    let world = seeded_world().await;

    let mut req = request("What calls validateToken and why did we choose this design?");
    req.include_evidence = true;
    let response = build_context(
        req,
        Arc::clone(&world.storage),
        Arc::clone(&world.vectors),
        Arc::clone(&world.embeddings),
        None,
        None,
    )
    .await
    .unwrap();

    let evidence = response.evidence.unwrap();
    // Evidence follows the document's RAG, KAG, GraphRAG group order.
    let mut last_rank = 0usize;
    for record in &evidence {
        let rank = match record.source {
            CandidateSource::Rag => 0,
            CandidateSource::Kag => 1,
            CandidateSource::Graphrag => 2,
        };
        assert!(rank >= last_rank, "evidence out of group order");
        last_rank = rank;
    }
}

#[tokio::test]
#[serial]
async fn test_store_then_forget_restores_counts() {
    reset_context_cache();
    let world = seeded_world().await;

    let memories_before = world.storage.count_memories().await.unwrap();
    let entities_before = world.storage.graph().count_entities().await.unwrap();

    let memory = make_memory(
        "mem-temp",
        "Temporary note",
        "A note that will be deleted shortly.",
        &["temp"],
        0.5,
    );
    remember(&memory, &world.storage, &world.vectors, &world.embeddings)
        .await
        .unwrap();
    assert_eq!(
        world.storage.count_memories().await.unwrap(),
        memories_before + 1
    );

    forget_memory(&MemoryId::from("mem-temp"), &world.storage, &world.vectors)
        .await
        .unwrap();

    assert_eq!(
        world.storage.count_memories().await.unwrap(),
        memories_before
    );
    assert_eq!(
        world.storage.graph().count_entities().await.unwrap(),
        entities_before
    );
}

#[tokio::test]
#[serial]
async fn test_forget_invalidates_cached_contexts() {
    reset_context_cache();
    let world = seeded_world().await;

    let first = build_context(
        request("authentication token decisions"),
        Arc::clone(&world.storage),
        Arc::clone(&world.vectors),
        Arc::clone(&world.embeddings),
        None,
        None,
    )
    .await
    .unwrap();
    assert!(first.metadata.rag_sections > 0);

    // Deleting a contributing memory invalidates the cached entry, so the
    // same query misses and recomputes.
    forget_memory(
        &MemoryId::from("mem-auth-jwt"),
        &world.storage,
        &world.vectors,
    )
    .await
    .unwrap();

    let second = build_context(
        request("authentication token decisions"),
        Arc::clone(&world.storage),
        Arc::clone(&world.vectors),
        Arc::clone(&world.embeddings),
        None,
        None,
    )
    .await
    .unwrap();
    assert!(!second.metadata.cache_hit);
    assert!(!second.context.contains("Use JWT for session tokens"));
}

#[tokio::test]
#[serial]
async fn test_surfaced_memories_get_access_bumps() {
    reset_context_cache();
    let world = seeded_world().await;

    let before = world
        .storage
        .get_memory(&MemoryId::from("mem-db-postgres"))
        .await
        .unwrap()
        .access_count;

    let response = build_context(
        request("Why did we choose PostgreSQL and what was the tradeoff?"),
        Arc::clone(&world.storage),
        Arc::clone(&world.vectors),
        Arc::clone(&world.embeddings),
        None,
        None,
    )
    .await
    .unwrap();
    assert!(response.context.contains("PostgreSQL"));

    let after = world
        .storage
        .get_memory(&MemoryId::from("mem-db-postgres"))
        .await
        .unwrap()
        .access_count;
    assert!(after > before, "access count should have been bumped");
}

//! Benchmark runner, history, and gate integration tests

mod common;

use common::seeded_world;
use engram_core::bench::fixtures::FailingEmbeddingClient;
use engram_core::bench::{
    append_record, benchmark_context_retrieval, compare, evaluate_gate, find_baseline,
    load_records, BaselineOptions, BenchQuery, BenchmarkMetadata, BenchmarkOptions,
    BenchmarkRecord, GateConfig, RunSource,
};
use engram_core::{CacheConfig, EmbeddingClient, RetrievalConfig};
use chrono::Utc;
use serial_test::serial;
use std::sync::Arc;

fn small_options() -> BenchmarkOptions {
    BenchmarkOptions {
        queries: vec![
            BenchQuery::new("Why did we choose PostgreSQL and what was the tradeoff?"),
            BenchQuery::new("What calls validateToken and what depends on AuthService?"),
        ],
        runs_per_query: 2,
        warmup_runs: 0,
        token_budget: 2048,
        reset_cache_between_runs: false,
        include_evidence: true,
    }
}

fn record_for(result: engram_core::RetrievalBenchmarkResult, run_id: &str, minutes_ago: i64) -> BenchmarkRecord {
    BenchmarkRecord {
        metadata: BenchmarkMetadata {
            run_id: run_id.to_string(),
            timestamp: Utc::now() - chrono::Duration::minutes(minutes_ago),
            commit: None,
            branch: Some("main".to_string()),
            source: RunSource::Local,
            project_path: None,
        },
        config: serde_json::json!({"runs": 2}),
        result,
    }
}

#[tokio::test]
#[serial]
async fn test_benchmark_measures_all_runs_and_stages() {
    let world = seeded_world().await;
    let options = small_options();

    let result = benchmark_context_retrieval(
        &options,
        &RetrievalConfig::default(),
        Arc::clone(&world.storage),
        Arc::clone(&world.vectors),
        Arc::clone(&world.embeddings),
        CacheConfig::default(),
        None,
    )
    .await
    .unwrap();

    assert_eq!(result.samples.len(), 4);
    assert_eq!(result.overall.count, 4);
    assert_eq!(result.stages.total.count, 4);
    assert!(result.failures.is_empty());
    assert!(result.overall.max_ms >= result.overall.min_ms);

    // Two distinct queries ran twice each without cache resets: the second
    // run of each is a hit.
    assert_eq!(result.cache.hits, 2);
    assert_eq!(result.cache.misses, 2);

    // Both routes appear in the per-route stats.
    assert!(result.routes.len() >= 2);
    for route in &result.routes {
        assert_eq!(route.latency.count, 2);
    }
}

#[tokio::test]
#[serial]
async fn test_benchmark_isolates_per_query_failures() {
    let world = seeded_world().await;
    let failing = Arc::new(FailingEmbeddingClient) as Arc<dyn EmbeddingClient>;

    let options = BenchmarkOptions {
        queries: vec![BenchQuery::new("why did we pick the database")],
        runs_per_query: 3,
        warmup_runs: 0,
        ..small_options()
    };

    let result = benchmark_context_retrieval(
        &options,
        &RetrievalConfig::default(),
        Arc::clone(&world.storage),
        Arc::clone(&world.vectors),
        failing,
        CacheConfig::default(),
        None,
    )
    .await
    .unwrap();

    // Every run failed, none crashed the benchmark.
    assert_eq!(result.failures.len(), 3);
    assert!(result.samples.is_empty());
    assert_eq!(result.overall.count, 0);
}

#[tokio::test]
#[serial]
async fn test_gate_and_history_end_to_end() {
    let world = seeded_world().await;
    let options = small_options();

    let result = benchmark_context_retrieval(
        &options,
        &RetrievalConfig::default(),
        Arc::clone(&world.storage),
        Arc::clone(&world.vectors),
        Arc::clone(&world.embeddings),
        CacheConfig::default(),
        None,
    )
    .await
    .unwrap();

    // An absurdly tight overall threshold must trip the gate.
    let tight = GateConfig {
        max_p95_ms: Some(0.000_001),
        ..Default::default()
    };
    let violations = evaluate_gate(&result, None, &tight);
    assert_eq!(violations.len(), 1);
    assert!(violations[0].to_string().contains("overall p95"));

    // A generous threshold passes.
    let loose = GateConfig {
        max_p95_ms: Some(60_000.0),
        ..Default::default()
    };
    assert!(evaluate_gate(&result, None, &loose).is_empty());

    // History round-trip with baseline discovery and comparison.
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.jsonl");

    let baseline_record = record_for(result.clone(), "baseline", 30);
    append_record(&path, &baseline_record, 10).unwrap();

    let current_record = record_for(result, "current", 0);
    let records = load_records(&path).unwrap();
    let baseline = find_baseline(&records, &current_record, &BaselineOptions::default())
        .expect("baseline discovered");
    assert_eq!(baseline.metadata.run_id, "baseline");

    let comparison = compare(&current_record, baseline);
    // Same result compared with itself: ratio 1, deltas 0.
    assert!((comparison.p95_ratio - 1.0).abs() < 1e-9 || baseline.result.overall.p95_ms < 0.01);
    assert!(comparison.p95_delta_ms.abs() < 1e-9);

    // History gate thresholds evaluated against the comparison.
    let history_gate = GateConfig {
        history_max_p95_ratio: Some(0.5),
        ..Default::default()
    };
    let violations = evaluate_gate(&current_record.result, Some(&comparison), &history_gate);
    assert_eq!(violations.len(), 1);
    assert!(violations[0].threshold.contains("history p95 ratio"));
}

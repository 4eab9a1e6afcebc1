//! Retrieval benchmarking and the quality gate
//!
//! Runs the full retrieval pipeline over a query set, times every stage,
//! aggregates nearest-rank percentiles overall and per route, and feeds the
//! result into the history/baseline comparison and the gate. One failing
//! query never prevents the others from being measured.

pub mod fixtures;
pub mod gate;
pub mod history;
pub mod stats;

use crate::config::{CacheConfig, RetrievalConfig, ScoringConfig};
use crate::context::{context_cache_stats, reset_context_cache, CacheStats};
use crate::embeddings::EmbeddingClient;
use crate::error::Result;
use crate::retrieval::{build_context_with_config, StageTimings};
use crate::storage::StorageBackend;
use crate::types::{ContextRequest, Route};
use crate::vectors::VectorStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use tracing::{info, warn};

pub use gate::{evaluate_gate, GateConfig, GateViolation};
pub use history::{
    append_record, compare, find_baseline, load_records, BaselineOptions, BenchmarkMetadata,
    BenchmarkRecord, Comparison, HistoryStats, RunSource,
};
pub use stats::{percentile, LatencyStats, StageStats};

/// One benchmark query with its channel toggles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchQuery {
    pub query: String,

    #[serde(default = "default_true")]
    pub include_code_graph: bool,

    #[serde(default = "default_true")]
    pub include_graphrag: bool,
}

fn default_true() -> bool {
    true
}

impl BenchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            include_code_graph: true,
            include_graphrag: true,
        }
    }
}

/// Accept either bare strings or full objects in query-set JSON
#[derive(Deserialize)]
#[serde(untagged)]
enum QuerySpec {
    Text(String),
    Full(BenchQuery),
}

impl From<QuerySpec> for BenchQuery {
    fn from(spec: QuerySpec) -> Self {
        match spec {
            QuerySpec::Text(query) => BenchQuery::new(query),
            QuerySpec::Full(query) => query,
        }
    }
}

/// Built-in query set covering all three routes
pub fn default_queries() -> Vec<BenchQuery> {
    vec![
        BenchQuery::new("Why did we choose PostgreSQL and what was the tradeoff?"),
        BenchQuery::new("What calls validateToken and what depends on AuthService?"),
        BenchQuery::new("What calls validateToken and why did we choose this design?"),
        BenchQuery::new("How does the cache invalidation work?"),
        BenchQuery::new("Which patterns do we use for retries?"),
    ]
}

/// Resolve the benchmark query set
///
/// Priority: `BENCH_QUERIES_JSON` (inline JSON), then `BENCH_QUERIES_PATH`
/// (JSON file), then the built-in defaults.
pub fn queries_from_env() -> Result<Vec<BenchQuery>> {
    if let Ok(raw) = env::var("BENCH_QUERIES_JSON") {
        let specs: Vec<QuerySpec> = serde_json::from_str(&raw)?;
        return Ok(specs.into_iter().map(BenchQuery::from).collect());
    }
    if let Ok(path) = env::var("BENCH_QUERIES_PATH") {
        let raw = std::fs::read_to_string(path)?;
        let specs: Vec<QuerySpec> = serde_json::from_str(&raw)?;
        return Ok(specs.into_iter().map(BenchQuery::from).collect());
    }
    Ok(default_queries())
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}

/// Benchmark run options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkOptions {
    pub queries: Vec<BenchQuery>,
    pub runs_per_query: usize,
    pub warmup_runs: usize,
    pub token_budget: usize,

    /// Reset the context cache before every measured run (cold-path
    /// scenario); leaving it false measures the mixed hot/cold path
    pub reset_cache_between_runs: bool,

    pub include_evidence: bool,
}

impl Default for BenchmarkOptions {
    fn default() -> Self {
        Self {
            queries: default_queries(),
            runs_per_query: 5,
            warmup_runs: 1,
            token_budget: 4096,
            reset_cache_between_runs: false,
            include_evidence: true,
        }
    }
}

impl BenchmarkOptions {
    /// Options with the environment knobs applied
    ///
    /// Recognises `BENCH_QUERIES_JSON`/`BENCH_QUERIES_PATH`,
    /// `PERF_RUNS_PER_QUERY`, `PERF_WARMUP_RUNS`, and `PERF_TOKEN_BUDGET`.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            queries: queries_from_env()?,
            runs_per_query: env_usize("PERF_RUNS_PER_QUERY", defaults.runs_per_query),
            warmup_runs: env_usize("PERF_WARMUP_RUNS", defaults.warmup_runs),
            token_budget: env_usize("PERF_TOKEN_BUDGET", defaults.token_budget),
            ..defaults
        })
    }
}

/// One measured run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerySample {
    pub query: String,
    pub route: Route,
    pub total_ms: f64,
    pub total_tokens: usize,
    pub sections_included: usize,
    pub cache_hit: bool,
}

/// Latency statistics for one route's subset of runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteStats {
    pub route: Route,
    pub latency: LatencyStats,
}

/// A query that failed during measurement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkFailure {
    pub query: String,
    pub error: String,
}

/// Aggregated benchmark result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalBenchmarkResult {
    /// Overall latency over the `total` stage
    pub overall: LatencyStats,

    pub stages: StageStats,
    pub cache: CacheStats,
    pub routes: Vec<RouteStats>,
    pub samples: Vec<QuerySample>,
    pub failures: Vec<BenchmarkFailure>,
}

/// Benchmark the full retrieval pipeline
pub async fn benchmark_context_retrieval(
    options: &BenchmarkOptions,
    config: &RetrievalConfig,
    storage: Arc<dyn StorageBackend>,
    vectors: Arc<dyn VectorStore>,
    embeddings: Arc<dyn EmbeddingClient>,
    cache_config: CacheConfig,
    scoring_config: Option<ScoringConfig>,
) -> Result<RetrievalBenchmarkResult> {
    reset_context_cache();

    let mut timings: Vec<StageTimings> = Vec::new();
    let mut samples: Vec<QuerySample> = Vec::new();
    let mut failures: Vec<BenchmarkFailure> = Vec::new();
    let mut route_samples: HashMap<Route, Vec<f64>> = HashMap::new();

    for bench_query in &options.queries {
        let request_for = |query: &BenchQuery| {
            let mut request = ContextRequest::new(query.query.clone());
            request.token_budget = options.token_budget;
            request.include_code_graph = query.include_code_graph;
            request.include_graphrag = query.include_graphrag;
            request.include_evidence = options.include_evidence;
            request
        };

        for _ in 0..options.warmup_runs {
            let _ = build_context_with_config(
                request_for(bench_query),
                config,
                Arc::clone(&storage),
                Arc::clone(&vectors),
                Arc::clone(&embeddings),
                Some(cache_config),
                scoring_config.clone(),
            )
            .await;
        }

        for _ in 0..options.runs_per_query {
            if options.reset_cache_between_runs {
                reset_context_cache();
            }
            let outcome = build_context_with_config(
                request_for(bench_query),
                config,
                Arc::clone(&storage),
                Arc::clone(&vectors),
                Arc::clone(&embeddings),
                Some(cache_config),
                scoring_config.clone(),
            )
            .await;

            match outcome {
                Ok(timed) => {
                    let metadata = &timed.response.metadata;
                    route_samples
                        .entry(metadata.route)
                        .or_default()
                        .push(timed.timings.total_ms);
                    samples.push(QuerySample {
                        query: bench_query.query.clone(),
                        route: metadata.route,
                        total_ms: timed.timings.total_ms,
                        total_tokens: metadata.total_tokens,
                        sections_included: metadata.sections_included,
                        cache_hit: metadata.cache_hit,
                    });
                    timings.push(timed.timings);
                }
                Err(error) => {
                    // Isolate per-query failures so the rest of the run
                    // still gets measured.
                    warn!(query = %bench_query.query, %error, "benchmark query failed");
                    failures.push(BenchmarkFailure {
                        query: bench_query.query.clone(),
                        error: error.to_string(),
                    });
                }
            }
        }
    }

    let total_samples: Vec<f64> = timings.iter().map(|t| t.total_ms).collect();
    let mut routes: Vec<RouteStats> = route_samples
        .into_iter()
        .map(|(route, samples)| RouteStats {
            route,
            latency: LatencyStats::from_samples(&samples),
        })
        .collect();
    routes.sort_by_key(|r| r.route.to_string());

    info!(
        runs = samples.len(),
        failures = failures.len(),
        "benchmark complete"
    );

    Ok(RetrievalBenchmarkResult {
        overall: LatencyStats::from_samples(&total_samples),
        stages: StageStats::from_timings(&timings),
        cache: context_cache_stats(),
        routes,
        samples,
        failures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_queries_cover_routes() {
        let queries = default_queries();
        assert!(queries.len() >= 3);
    }

    #[test]
    #[serial]
    fn test_queries_from_env_json() {
        env::set_var(
            "BENCH_QUERIES_JSON",
            r#"["plain query", {"query": "full query", "include_code_graph": false}]"#,
        );
        let queries = queries_from_env().unwrap();
        env::remove_var("BENCH_QUERIES_JSON");

        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0].query, "plain query");
        assert!(queries[0].include_code_graph);
        assert!(!queries[1].include_code_graph);
    }

    #[test]
    #[serial]
    fn test_options_env_knobs() {
        env::set_var("PERF_RUNS_PER_QUERY", "9");
        env::set_var("PERF_TOKEN_BUDGET", "2048");
        let options = BenchmarkOptions::from_env().unwrap();
        env::remove_var("PERF_RUNS_PER_QUERY");
        env::remove_var("PERF_TOKEN_BUDGET");

        assert_eq!(options.runs_per_query, 9);
        assert_eq!(options.token_budget, 2048);
        assert_eq!(options.warmup_runs, 1);
    }
}

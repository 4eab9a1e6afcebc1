//! Benchmark and quality-gate binary
//!
//! Runs the retrieval benchmark against a seeded project, appends the
//! result to the JSONL history, compares against the discovered baseline,
//! and evaluates the gate. Exit code 0 means pass; 1 means a violated
//! threshold, printed one per line to stderr.

use chrono::Utc;
use clap::Parser;
use engram_core::bench::fixtures::{seed_sample_project, HashEmbeddingClient, InMemoryVectorStore};
use engram_core::bench::{
    append_record, benchmark_context_retrieval, compare, evaluate_gate, find_baseline,
    load_records, BaselineOptions, BenchmarkMetadata, BenchmarkOptions, BenchmarkRecord,
    Comparison, GateConfig, RunSource,
};
use engram_core::{
    CacheConfig, EmbeddingClient, RetrievalConfig, SqliteStorage, StorageBackend, VectorStore,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "engram-bench",
    about = "Benchmark the engram retrieval pipeline and enforce the quality gate"
)]
struct Args {
    /// SQLite database path; omitted = in-memory database seeded with the
    /// sample project
    #[arg(long)]
    db: Option<PathBuf>,

    /// JSONL history file
    #[arg(long, env = "PERF_HISTORY_PATH", default_value = ".engram/bench-history.jsonl")]
    history: PathBuf,

    /// Number of history records kept after each append
    #[arg(long, env = "PERF_HISTORY_RETENTION", default_value_t = 100)]
    retention: usize,

    /// Baseline scan depth
    #[arg(long, env = "PERF_HISTORY_MAX_LOOKBACK", default_value_t = 20)]
    max_lookback: usize,

    /// Only accept baselines from the same branch
    #[arg(
        long,
        env = "PERF_HISTORY_SAME_BRANCH",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    same_branch: bool,

    /// Only accept baselines with an identical config snapshot
    #[arg(long, env = "PERF_HISTORY_SAME_CONFIG", default_value_t = false)]
    same_config: bool,

    /// Fail the run when no baseline can be found
    #[arg(long, env = "PERF_HISTORY_REQUIRE_BASELINE", default_value_t = false)]
    require_baseline: bool,

    /// Branch recorded in history metadata
    #[arg(long, env = "PERF_BRANCH")]
    branch: Option<String>,

    /// Commit sha recorded in history metadata
    #[arg(long, env = "PERF_COMMIT")]
    commit: Option<String>,

    /// Record source: "ci" or "local"
    #[arg(long, default_value = "local")]
    source: String,

    /// Reset the context cache before every measured run (cold-path
    /// scenario)
    #[arg(long)]
    reset_cache: bool,

    /// Skip history append and baseline comparison
    #[arg(long)]
    no_history: bool,
}

fn print_report(record: &BenchmarkRecord, comparison: Option<&Comparison>) {
    let result = &record.result;
    println!("engram retrieval benchmark — run {}", record.metadata.run_id);
    println!(
        "  runs: {}  failures: {}",
        result.samples.len(),
        result.failures.len()
    );
    println!(
        "  overall: avg {:.2}ms  p50 {:.2}ms  p95 {:.2}ms  p99 {:.2}ms",
        result.overall.avg_ms, result.overall.p50_ms, result.overall.p95_ms, result.overall.p99_ms
    );
    println!("  stages (p95 ms):");
    for (stage, p95) in result.stages.p95_by_stage() {
        println!("    {:<9} {:>8.3}", stage, p95);
    }
    println!(
        "  cache: hits {}  misses {}  evictions {}  hit-rate {:.2}",
        result.cache.hits,
        result.cache.misses,
        result.cache.evictions,
        result.cache.hit_rate()
    );
    for route in &result.routes {
        println!(
            "  route {:<7} runs {:>3}  p95 {:.2}ms",
            route.route.to_string(),
            route.latency.count,
            route.latency.p95_ms
        );
    }
    if let Some(comparison) = comparison {
        println!(
            "  baseline {}: p95 {:+.2}ms (ratio {:.2})  p50 {:+.2}ms  hit-rate {:+.2}",
            comparison.baseline_run_id,
            comparison.p95_delta_ms,
            comparison.p95_ratio,
            comparison.p50_delta_ms,
            comparison.hit_rate_delta
        );
    }
    for failure in &result.failures {
        println!("  FAILED query \"{}\": {}", failure.query, failure.error);
    }
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    let storage: Arc<dyn StorageBackend> = match &args.db {
        Some(path) => Arc::new(SqliteStorage::new(path)?),
        None => Arc::new(SqliteStorage::in_memory()?),
    };
    let vectors: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
    let embeddings: Arc<dyn EmbeddingClient> = Arc::new(HashEmbeddingClient::new_standard());

    if args.db.is_none() {
        seed_sample_project(&storage, &vectors, &embeddings).await?;
    }

    let mut options = BenchmarkOptions::from_env()?;
    options.reset_cache_between_runs = args.reset_cache;
    let retrieval_config = RetrievalConfig::default();

    let result = benchmark_context_retrieval(
        &options,
        &retrieval_config,
        Arc::clone(&storage),
        Arc::clone(&vectors),
        Arc::clone(&embeddings),
        CacheConfig::default(),
        None,
    )
    .await?;

    let record = BenchmarkRecord {
        metadata: BenchmarkMetadata {
            run_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            commit: args.commit.clone(),
            branch: args.branch.clone(),
            source: if args.source.eq_ignore_ascii_case("ci") {
                RunSource::Ci
            } else {
                RunSource::Local
            },
            project_path: std::env::current_dir()
                .ok()
                .map(|p| p.display().to_string()),
        },
        config: serde_json::to_value(&options)?,
        result,
    };

    let comparison = if args.no_history {
        None
    } else {
        let existing = load_records(&args.history)?;
        let baseline_options = BaselineOptions {
            max_lookback: args.max_lookback,
            require_same_branch: args.same_branch,
            require_same_config: args.same_config,
        };
        let comparison =
            find_baseline(&existing, &record, &baseline_options).map(|b| compare(&record, b));
        append_record(&args.history, &record, args.retention)?;
        comparison
    };

    print_report(&record, comparison.as_ref());

    let gate_config = GateConfig::from_env();
    let violations = evaluate_gate(&record.result, comparison.as_ref(), &gate_config);

    let mut failed = false;
    for violation in &violations {
        eprintln!("gate failure: {}", violation);
        failed = true;
    }
    if args.require_baseline && !args.no_history && comparison.is_none() {
        eprintln!("gate failure: no baseline found and a baseline is required");
        failed = true;
    }

    Ok(if failed {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    run(Args::parse()).await
}

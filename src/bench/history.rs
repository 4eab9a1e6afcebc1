//! Benchmark history and baseline comparison
//!
//! History is a JSONL file: one record per line, UTF-8, newline delimited
//! with a trailing newline. Records are append-only with head-truncation
//! retention. Unreadable lines are skipped, never fatal.

use crate::bench::RetrievalBenchmarkResult;
use crate::error::{EngramError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::{debug, warn};

/// Where a benchmark record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunSource {
    Ci,
    Local,
}

/// Identifying metadata for one benchmark run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkMetadata {
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub commit: Option<String>,
    pub branch: Option<String>,
    pub source: RunSource,
    pub project_path: Option<String>,
}

/// One persisted history record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkRecord {
    pub metadata: BenchmarkMetadata,

    /// Snapshot of the benchmark configuration, compared verbatim when
    /// same-config baselines are required
    pub config: serde_json::Value,

    pub result: RetrievalBenchmarkResult,
}

/// Baseline discovery options
#[derive(Debug, Clone)]
pub struct BaselineOptions {
    /// Stop after considering this many candidate records
    pub max_lookback: usize,

    pub require_same_branch: bool,
    pub require_same_config: bool,
}

impl Default for BaselineOptions {
    fn default() -> Self {
        Self {
            max_lookback: 20,
            require_same_branch: true,
            require_same_config: false,
        }
    }
}

/// Retention outcome of one append
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HistoryStats {
    pub total_records: usize,
    pub pruned_records: usize,
}

/// Load every parseable record in file order
pub fn load_records(path: &Path) -> Result<Vec<BenchmarkRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = fs::read_to_string(path)?;
    let mut records = Vec::new();
    for (line_no, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<BenchmarkRecord>(line) {
            Ok(record) => records.push(record),
            Err(error) => {
                warn!(line = line_no + 1, %error, "skipping corrupt history line");
            }
        }
    }
    Ok(records)
}

/// Append a record and apply tail-keep retention
pub fn append_record(
    path: &Path,
    record: &BenchmarkRecord,
    retention: usize,
) -> Result<HistoryStats> {
    if retention == 0 {
        return Err(EngramError::Validation(
            "history retention must be positive".to_string(),
        ));
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut records = load_records(path)?;
    records.push(record.clone());

    let pruned = records.len().saturating_sub(retention);
    if pruned > 0 {
        records.drain(0..pruned);
        debug!(pruned, "history retention pruned oldest records");
    }

    let mut file = fs::File::create(path)?;
    for record in &records {
        let line = serde_json::to_string(record)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
    }
    file.flush()?;

    Ok(HistoryStats {
        total_records: records.len(),
        pruned_records: pruned,
    })
}

/// Find the baseline for a new record
///
/// Scans newest-first, skipping the new run's id and any record whose
/// timestamp is not strictly earlier; applies the same-branch and
/// same-config requirements; gives up after `max_lookback` candidates.
pub fn find_baseline<'a>(
    records: &'a [BenchmarkRecord],
    current: &BenchmarkRecord,
    options: &BaselineOptions,
) -> Option<&'a BenchmarkRecord> {
    let mut considered = 0usize;
    for record in records.iter().rev() {
        if considered >= options.max_lookback {
            return None;
        }
        if record.metadata.run_id == current.metadata.run_id {
            continue;
        }
        if record.metadata.timestamp >= current.metadata.timestamp {
            continue;
        }
        considered += 1;

        if options.require_same_branch && record.metadata.branch != current.metadata.branch {
            continue;
        }
        if options.require_same_config && record.config != current.config {
            continue;
        }
        return Some(record);
    }
    None
}

/// Deltas between a current run and its baseline
#[derive(Debug, Clone, Serialize)]
pub struct Comparison {
    pub baseline_run_id: String,
    pub p50_delta_ms: f64,
    pub p95_delta_ms: f64,
    pub avg_delta_ms: f64,

    /// current p95 / max(0.01, baseline p95)
    pub p95_ratio: f64,

    /// p95 ratio over the memory-route subset, when both runs measured it
    pub memory_route_p95_ratio: Option<f64>,

    pub stage_p95_deltas: HashMap<String, f64>,
    pub stage_p95_ratios: HashMap<String, f64>,
    pub hit_rate_delta: f64,
}

fn ratio(current: f64, baseline: f64) -> f64 {
    current / baseline.max(0.01)
}

fn memory_route_p95(result: &RetrievalBenchmarkResult) -> Option<f64> {
    result
        .routes
        .iter()
        .find(|r| r.route == crate::types::Route::Memory)
        .map(|r| r.latency.p95_ms)
}

/// Compare a run against a baseline record
pub fn compare(current: &BenchmarkRecord, baseline: &BenchmarkRecord) -> Comparison {
    let cur = &current.result;
    let base = &baseline.result;

    let memory_route_p95_ratio = match (memory_route_p95(cur), memory_route_p95(base)) {
        (Some(current_p95), Some(baseline_p95)) => Some(ratio(current_p95, baseline_p95)),
        _ => None,
    };

    let mut stage_p95_deltas = HashMap::new();
    let mut stage_p95_ratios = HashMap::new();
    let current_stages: HashMap<&str, f64> = cur.stages.p95_by_stage().into_iter().collect();
    for (stage, baseline_p95) in base.stages.p95_by_stage() {
        let current_p95 = current_stages.get(stage).copied().unwrap_or_default();
        stage_p95_deltas.insert(stage.to_string(), current_p95 - baseline_p95);
        stage_p95_ratios.insert(stage.to_string(), ratio(current_p95, baseline_p95));
    }

    Comparison {
        baseline_run_id: baseline.metadata.run_id.clone(),
        p50_delta_ms: cur.overall.p50_ms - base.overall.p50_ms,
        p95_delta_ms: cur.overall.p95_ms - base.overall.p95_ms,
        avg_delta_ms: cur.overall.avg_ms - base.overall.avg_ms,
        p95_ratio: ratio(cur.overall.p95_ms, base.overall.p95_ms),
        memory_route_p95_ratio,
        stage_p95_deltas,
        stage_p95_ratios,
        hit_rate_delta: cur.cache.hit_rate() - base.cache.hit_rate(),
    }
}

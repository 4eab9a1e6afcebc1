//! Latency statistics
//!
//! Percentiles use the nearest-rank method on sorted samples:
//! index ceil((p/100)·n) − 1, clamped to [0, n−1].

use crate::retrieval::StageTimings;
use serde::{Deserialize, Serialize};

/// Nearest-rank percentile over a sorted sample slice
///
/// Returns 0.0 for an empty slice.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let n = sorted.len();
    let rank = ((p / 100.0) * n as f64).ceil() as usize;
    let index = rank.saturating_sub(1).min(n - 1);
    sorted[index]
}

/// min/max/avg and the standard percentiles for one sample set
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub count: usize,
    pub min_ms: f64,
    pub max_ms: f64,
    pub avg_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

impl LatencyStats {
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let mut sorted: Vec<f64> = samples.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let sum: f64 = sorted.iter().sum();
        Self {
            count: sorted.len(),
            min_ms: sorted[0],
            max_ms: sorted[sorted.len() - 1],
            avg_ms: sum / sorted.len() as f64,
            p50_ms: percentile(&sorted, 50.0),
            p95_ms: percentile(&sorted, 95.0),
            p99_ms: percentile(&sorted, 99.0),
        }
    }
}

/// Per-stage latency statistics across a benchmark run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageStats {
    pub rag: LatencyStats,
    pub kag: LatencyStats,
    pub graphrag: LatencyStats,
    pub rerank: LatencyStats,
    pub format: LatencyStats,
    pub tokenize: LatencyStats,
    pub evidence: LatencyStats,
    pub total: LatencyStats,
}

impl StageStats {
    pub fn from_timings(timings: &[StageTimings]) -> Self {
        fn collect(timings: &[StageTimings], f: impl Fn(&StageTimings) -> f64) -> LatencyStats {
            let samples: Vec<f64> = timings.iter().map(f).collect();
            LatencyStats::from_samples(&samples)
        }
        Self {
            rag: collect(timings, |t| t.rag_ms),
            kag: collect(timings, |t| t.kag_ms),
            graphrag: collect(timings, |t| t.graphrag_ms),
            rerank: collect(timings, |t| t.rerank_ms),
            format: collect(timings, |t| t.format_ms),
            tokenize: collect(timings, |t| t.tokenize_ms),
            evidence: collect(timings, |t| t.evidence_ms),
            total: collect(timings, |t| t.total_ms),
        }
    }

    /// (stage name, p95) pairs for the gate's per-stage thresholds
    pub fn p95_by_stage(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("rag", self.rag.p95_ms),
            ("kag", self.kag.p95_ms),
            ("graphrag", self.graphrag.p95_ms),
            ("rerank", self.rerank.p95_ms),
            ("format", self.format.p95_ms),
            ("tokenize", self.tokenize.p95_ms),
            ("evidence", self.evidence.p95_ms),
            ("total", self.total.p95_ms),
        ]
    }
}

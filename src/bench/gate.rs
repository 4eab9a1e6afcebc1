//! Benchmark quality gate
//!
//! Evaluates a benchmark result (and its optional baseline comparison)
//! against configured latency thresholds. Violations produce structured
//! errors; the benchmark binary prints one human-readable line per
//! violation to stderr and exits non-zero.

use crate::bench::history::Comparison;
use crate::bench::RetrievalBenchmarkResult;
use serde::Serialize;
use std::collections::HashMap;
use std::env;

/// Stage names recognised by `PERF_GATE_MAX_<STAGE>_P95_MS`
pub const GATE_STAGES: [&str; 8] = [
    "rag", "kag", "graphrag", "rerank", "format", "tokenize", "evidence", "total",
];

/// Gate thresholds; unset thresholds are not enforced
#[derive(Debug, Clone, Default)]
pub struct GateConfig {
    /// Overall p95 ceiling in milliseconds
    pub max_p95_ms: Option<f64>,

    /// Memory-route p95 ratio ceiling against the baseline
    pub max_p95_ratio: Option<f64>,

    /// Per-stage p95 ceilings in milliseconds
    pub stage_max_p95_ms: HashMap<String, f64>,

    /// History comparison ceilings
    pub history_max_p95_ratio: Option<f64>,
    pub history_max_p95_delta_ms: Option<f64>,
}

fn env_f64(name: &str) -> Option<f64> {
    env::var(name).ok().and_then(|raw| raw.trim().parse().ok())
}

impl GateConfig {
    /// Read thresholds from the environment
    ///
    /// Recognises `PERF_GATE_MAX_P95_MS`, `PERF_GATE_MAX_P95_RATIO`,
    /// `PERF_GATE_MAX_<STAGE>_P95_MS`, `PERF_HISTORY_MAX_P95_RATIO`, and
    /// `PERF_HISTORY_MAX_P95_DELTA_MS`.
    pub fn from_env() -> Self {
        let mut stage_max_p95_ms = HashMap::new();
        for stage in GATE_STAGES {
            let var = format!("PERF_GATE_MAX_{}_P95_MS", stage.to_uppercase());
            if let Some(limit) = env_f64(&var) {
                stage_max_p95_ms.insert(stage.to_string(), limit);
            }
        }
        Self {
            max_p95_ms: env_f64("PERF_GATE_MAX_P95_MS"),
            max_p95_ratio: env_f64("PERF_GATE_MAX_P95_RATIO"),
            stage_max_p95_ms,
            history_max_p95_ratio: env_f64("PERF_HISTORY_MAX_P95_RATIO"),
            history_max_p95_delta_ms: env_f64("PERF_HISTORY_MAX_P95_DELTA_MS"),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.max_p95_ms.is_none()
            && self.max_p95_ratio.is_none()
            && self.stage_max_p95_ms.is_empty()
            && self.history_max_p95_ratio.is_none()
            && self.history_max_p95_delta_ms.is_none()
    }
}

/// One violated threshold
#[derive(Debug, Clone, Serialize)]
pub struct GateViolation {
    pub threshold: String,
    pub limit: f64,
    pub observed: f64,
}

impl std::fmt::Display for GateViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: observed {:.2} exceeds limit {:.2}",
            self.threshold, self.observed, self.limit
        )
    }
}

/// Evaluate the gate; an empty result means the run passes
pub fn evaluate_gate(
    result: &RetrievalBenchmarkResult,
    comparison: Option<&Comparison>,
    config: &GateConfig,
) -> Vec<GateViolation> {
    let mut violations = Vec::new();

    if let Some(limit) = config.max_p95_ms {
        if result.overall.p95_ms > limit {
            violations.push(GateViolation {
                threshold: "overall p95 ms".to_string(),
                limit,
                observed: result.overall.p95_ms,
            });
        }
    }

    if let Some(limit) = config.max_p95_ratio {
        if let Some(comparison) = comparison {
            let observed = comparison.memory_route_p95_ratio.unwrap_or(comparison.p95_ratio);
            if observed > limit {
                violations.push(GateViolation {
                    threshold: "memory-route p95 ratio".to_string(),
                    limit,
                    observed,
                });
            }
        }
    }

    for (stage, p95) in result.stages.p95_by_stage() {
        if let Some(limit) = config.stage_max_p95_ms.get(stage) {
            if p95 > *limit {
                violations.push(GateViolation {
                    threshold: format!("stage {} p95 ms", stage),
                    limit: *limit,
                    observed: p95,
                });
            }
        }
    }

    if let Some(comparison) = comparison {
        if let Some(limit) = config.history_max_p95_ratio {
            if comparison.p95_ratio > limit {
                violations.push(GateViolation {
                    threshold: "history p95 ratio".to_string(),
                    limit,
                    observed: comparison.p95_ratio,
                });
            }
        }
        if let Some(limit) = config.history_max_p95_delta_ms {
            if comparison.p95_delta_ms > limit {
                violations.push(GateViolation {
                    threshold: "history p95 delta ms".to_string(),
                    limit,
                    observed: comparison.p95_delta_ms,
                });
            }
        }
    }

    violations
}

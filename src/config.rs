//! Configuration for scoring, caching, and retrieval
//!
//! All knobs are plain serde values passed through every call rather than
//! global mutable state. `validate()` is the single entry point for input
//! validation; invalid configuration is surfaced to the caller and never
//! retried.

use crate::error::{EngramError, Result};
use crate::types::{MemoryKind, Route};
use serde::{Deserialize, Serialize};

/// Factor weights for the multi-factor scorer
///
/// Weights are renormalised so they sum to 1 before use; if all are zero
/// they default to 0.25 each.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub semantic: f32,
    pub recency: f32,
    pub confidence: f32,
    pub frequency: f32,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            semantic: 0.4,
            recency: 0.25,
            confidence: 0.2,
            frequency: 0.15,
        }
    }
}

impl ScoringWeights {
    /// Renormalise to sum 1.0 (0.25 each when all weights are zero)
    pub fn normalized(&self) -> [f32; 4] {
        let raw = [self.semantic, self.recency, self.confidence, self.frequency];
        let sum: f32 = raw.iter().filter(|w| w.is_finite()).sum();
        if sum <= 0.0 || !sum.is_finite() {
            return [0.25; 4];
        }
        [
            raw[0].max(0.0) / sum,
            raw[1].max(0.0) / sum,
            raw[2].max(0.0) / sum,
            raw[3].max(0.0) / sum,
        ]
    }

    fn validate(&self) -> Result<()> {
        for (name, w) in [
            ("semantic", self.semantic),
            ("recency", self.recency),
            ("confidence", self.confidence),
            ("frequency", self.frequency),
        ] {
            if !w.is_finite() || w < 0.0 {
                return Err(EngramError::Validation(format!(
                    "scoring weight '{}' must be finite and non-negative, got {}",
                    name, w
                )));
            }
        }
        Ok(())
    }
}

/// One step-decay threshold: memories no older than `max_age_days` score
/// `score`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepThreshold {
    pub max_age_days: f64,
    pub score: f32,
}

/// Recency decay policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "function")]
pub enum RecencyDecay {
    /// 2^(-age_days / half_life_days)
    Exponential { half_life_days: f64 },

    /// max(0, 1 - age_days / full_decay_days)
    Linear { full_decay_days: f64 },

    /// Score of the first threshold whose max_age_days covers the age;
    /// ages beyond the table take the last threshold's score
    Step { thresholds: Vec<StepThreshold> },
}

impl Default for RecencyDecay {
    fn default() -> Self {
        RecencyDecay::Exponential {
            half_life_days: 30.0,
        }
    }
}

impl RecencyDecay {
    fn validate(&self) -> Result<()> {
        match self {
            RecencyDecay::Exponential { half_life_days } => {
                if !half_life_days.is_finite() || *half_life_days <= 0.0 {
                    return Err(EngramError::Validation(format!(
                        "recency half_life_days must be positive, got {}",
                        half_life_days
                    )));
                }
            }
            RecencyDecay::Linear { full_decay_days } => {
                if !full_decay_days.is_finite() || *full_decay_days <= 0.0 {
                    return Err(EngramError::Validation(format!(
                        "recency full_decay_days must be positive, got {}",
                        full_decay_days
                    )));
                }
            }
            RecencyDecay::Step { thresholds } => {
                if thresholds.is_empty() {
                    return Err(EngramError::Validation(
                        "step decay requires at least one threshold".to_string(),
                    ));
                }
                for t in thresholds {
                    if !t.max_age_days.is_finite() || t.max_age_days < 0.0 {
                        return Err(EngramError::Validation(format!(
                            "step threshold day must be non-negative, got {}",
                            t.max_age_days
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Access-count normalisation method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrequencyMethod {
    /// ln(1 + count) / ln(1 + max_count)
    Log,

    /// count / max_count
    Linear,

    /// 1 / (1 + e^(-(count - max_count/2) / (max_count/8)))
    Sigmoid,
}

/// Frequency factor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencyConfig {
    pub method: FrequencyMethod,

    /// Count at (or above) which the factor saturates at 1.0
    pub max_count: u32,

    /// Score returned for never-accessed memories
    pub cold_start: f32,
}

impl Default for FrequencyConfig {
    fn default() -> Self {
        Self {
            method: FrequencyMethod::Log,
            max_count: 100,
            cold_start: 0.5,
        }
    }
}

impl FrequencyConfig {
    fn validate(&self) -> Result<()> {
        if self.max_count == 0 {
            return Err(EngramError::Validation(
                "frequency max_count must be positive".to_string(),
            ));
        }
        if !self.cold_start.is_finite() || !(0.0..=1.0).contains(&self.cold_start) {
            return Err(EngramError::Validation(format!(
                "frequency cold_start must be within [0, 1], got {}",
                self.cold_start
            )));
        }
        Ok(())
    }
}

/// Confidence aging configuration
///
/// When enabled, the confidence factor becomes
/// `min(importance, max(floor, importance * decay))` where the decay factor
/// follows `function` over the anchor timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceDecayConfig {
    pub enabled: bool,

    /// Decay curve applied to importance
    pub function: crate::types::DecayFunction,

    pub half_life_days: f64,
    pub full_decay_days: f64,

    /// Thresholds for step decay
    #[serde(default)]
    pub thresholds: Vec<StepThreshold>,

    /// Confidence never drops below this (unless importance itself is lower)
    pub floor: f32,

    /// Use accessed_at as the decay anchor when no explicit refresh exists
    pub refresh_on_access: bool,

    /// Memory kinds that never decay
    #[serde(default)]
    pub exempt_kinds: Vec<MemoryKind>,

    /// Tags (case-insensitive) that pin a memory against decay
    #[serde(default)]
    pub exempt_tags: Vec<String>,
}

impl Default for ConfidenceDecayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            function: crate::types::DecayFunction::Exponential,
            half_life_days: 90.0,
            full_decay_days: 180.0,
            thresholds: Vec::new(),
            floor: 0.1,
            refresh_on_access: true,
            exempt_kinds: Vec::new(),
            exempt_tags: Vec::new(),
        }
    }
}

impl ConfidenceDecayConfig {
    fn validate(&self) -> Result<()> {
        if !self.floor.is_finite() || !(0.0..=1.0).contains(&self.floor) {
            return Err(EngramError::Validation(format!(
                "confidence floor must be within [0, 1], got {}",
                self.floor
            )));
        }
        if !self.half_life_days.is_finite() || self.half_life_days <= 0.0 {
            return Err(EngramError::Validation(
                "confidence half_life_days must be positive".to_string(),
            ));
        }
        if !self.full_decay_days.is_finite() || self.full_decay_days <= 0.0 {
            return Err(EngramError::Validation(
                "confidence full_decay_days must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Tag-condition matching mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagMatch {
    /// Intersection size >= 1
    Any,

    /// Every listed tag present
    All,
}

/// Condition under which a boost rule applies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "condition")]
pub enum BoostCondition {
    /// Age in days <= max_days
    Recency { max_days: f64 },

    /// Age in days >= min_days
    Staleness { min_days: f64 },

    /// importance >= min_value
    Importance { min_value: f32 },

    /// access_count >= min_access_count
    Frequency { min_access_count: u32 },

    /// Memory kind is one of the listed kinds
    MemoryKind { kinds: Vec<MemoryKind> },

    /// Case-insensitive tag intersection per the match mode
    Tags {
        tags: Vec<String>,
        #[serde(rename = "match")]
        match_mode: TagMatch,
    },
}

/// Named multiplicative boost applied after the weighted combination
///
/// Matching rules are applied in listed order; the final score is clamped
/// to [0, 2].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostRule {
    pub name: String,
    #[serde(flatten)]
    pub condition: BoostCondition,
    pub factor: f32,
}

impl BoostRule {
    fn validate(&self) -> Result<()> {
        if !self.factor.is_finite() || self.factor < 0.0 {
            return Err(EngramError::Validation(format!(
                "boost rule '{}' factor must be finite and non-negative, got {}",
                self.name, self.factor
            )));
        }
        Ok(())
    }
}

/// Full scoring configuration passed through every scoring call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default)]
    pub weights: ScoringWeights,

    #[serde(default)]
    pub recency: RecencyDecay,

    #[serde(default)]
    pub frequency: FrequencyConfig,

    #[serde(default)]
    pub confidence_decay: ConfidenceDecayConfig,

    /// Ordered boost-rule list
    #[serde(default)]
    pub boosts: Vec<BoostRule>,
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<()> {
        self.weights.validate()?;
        self.recency.validate()?;
        self.frequency.validate()?;
        self.confidence_decay.validate()?;
        for rule in &self.boosts {
            rule.validate()?;
        }
        Ok(())
    }
}

/// Context cache configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
    pub ttl_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 100,
            ttl_ms: 300_000,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(EngramError::Validation(
                "cache max_entries must be positive".to_string(),
            ));
        }
        if self.ttl_ms == 0 {
            return Err(EngramError::Validation(
                "cache ttl_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-route channel mixing ratios used by the fusion reranker
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RouteRatios {
    pub rag: f32,
    pub kag: f32,
    pub graphrag: f32,
}

impl RouteRatios {
    fn validate(&self, route: &str) -> Result<()> {
        for (name, r) in [("rag", self.rag), ("kag", self.kag), ("graphrag", self.graphrag)] {
            if !r.is_finite() || r < 0.0 {
                return Err(EngramError::Validation(format!(
                    "route '{}' ratio '{}' must be finite and non-negative, got {}",
                    route, name, r
                )));
            }
        }
        if self.rag + self.kag + self.graphrag <= 0.0 {
            return Err(EngramError::Validation(format!(
                "route '{}' ratios must not all be zero",
                route
            )));
        }
        Ok(())
    }
}

/// Ratio table for the three routes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub memory: RouteRatios,
    pub code: RouteRatios,
    pub hybrid: RouteRatios,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            memory: RouteRatios {
                rag: 0.9,
                kag: 0.1,
                graphrag: 0.0,
            },
            code: RouteRatios {
                rag: 0.25,
                kag: 0.75,
                graphrag: 0.0,
            },
            hybrid: RouteRatios {
                rag: 0.5,
                kag: 0.3,
                graphrag: 0.2,
            },
        }
    }
}

impl RouteConfig {
    pub fn ratios_for(&self, route: Route) -> RouteRatios {
        match route {
            Route::Memory => self.memory,
            Route::Code => self.code,
            Route::Hybrid => self.hybrid,
        }
    }

    fn validate(&self) -> Result<()> {
        self.memory.validate("memory")?;
        self.code.validate("code")?;
        self.hybrid.validate("hybrid")?;
        Ok(())
    }
}

/// GraphRAG search mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphRagMode {
    /// Entity-centric local search plus community-centric global search
    #[default]
    Auto,

    /// Entity-centric search only
    Local,

    /// Community-report search only
    Global,

    /// Iterative hypothesis refinement
    Drift,
}

/// GraphRAG search knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphRagConfig {
    /// Which search mode the channel runs
    pub mode: GraphRagMode,

    /// Relationship expansion depth for local search
    pub max_depth: usize,

    /// Edges weaker than this are not expanded
    pub min_edge_weight: i32,

    /// Drift search iteration cap
    pub max_iterations: usize,

    /// Drift converges when successive hypotheses reach this cosine
    /// similarity
    pub convergence_threshold: f32,

    /// Minimum semantic score for a local entity match
    pub semantic_threshold: f32,

    /// Minimum lexical score for a local entity match
    pub lexical_threshold: f32,

    /// Global search returns at most this many reports
    pub max_reports: usize,
}

impl Default for GraphRagConfig {
    fn default() -> Self {
        Self {
            mode: GraphRagMode::Auto,
            max_depth: 2,
            min_edge_weight: 2,
            max_iterations: 3,
            convergence_threshold: 0.9,
            semantic_threshold: 0.12,
            lexical_threshold: 0.2,
            max_reports: 10,
        }
    }
}

impl GraphRagConfig {
    fn validate(&self) -> Result<()> {
        if self.max_reports == 0 || self.max_reports > 10 {
            return Err(EngramError::Validation(format!(
                "graphrag max_reports must be within [1, 10], got {}",
                self.max_reports
            )));
        }
        if !(0.0..=1.0).contains(&self.convergence_threshold) {
            return Err(EngramError::Validation(
                "graphrag convergence_threshold must be within [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

/// Backpressure policy when the request-level concurrency cap is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Wait for a slot
    Block,

    /// Fail immediately with a retrieval error
    FailFast,
}

/// Top-level retrieval configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default)]
    pub routes: RouteConfig,

    #[serde(default)]
    pub graphrag: GraphRagConfig,

    /// Per-query deadline propagated to all channel sub-tasks
    pub query_timeout_ms: u64,

    /// Return a partial result when a channel fails instead of surfacing
    /// the error
    pub degrade_on_channel_error: bool,

    /// Optional request-level in-flight cap
    pub max_concurrent_requests: Option<usize>,

    pub backpressure: BackpressurePolicy,

    /// Weight of the novelty boost applied by the fusion reranker
    pub novelty_weight: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            routes: RouteConfig::default(),
            graphrag: GraphRagConfig::default(),
            query_timeout_ms: 30_000,
            degrade_on_channel_error: false,
            max_concurrent_requests: None,
            backpressure: BackpressurePolicy::Block,
            novelty_weight: 0.15,
        }
    }
}

impl RetrievalConfig {
    pub fn validate(&self) -> Result<()> {
        self.routes.validate()?;
        self.graphrag.validate()?;
        if self.query_timeout_ms == 0 {
            return Err(EngramError::Validation(
                "query_timeout_ms must be positive".to_string(),
            ));
        }
        if let Some(cap) = self.max_concurrent_requests {
            if cap == 0 {
                return Err(EngramError::Validation(
                    "max_concurrent_requests must be positive when set".to_string(),
                ));
            }
        }
        if !self.novelty_weight.is_finite() || self.novelty_weight < 0.0 {
            return Err(EngramError::Validation(
                "novelty_weight must be finite and non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

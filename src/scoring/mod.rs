//! Multi-factor relevance scoring
//!
//! Combines semantic similarity, recency, confidence, and access frequency
//! into a final rank with a breakdown naming every factor's contribution.
//! For fixed inputs and time the scorer is a pure function; the decay cache
//! in [`decay`] is a transparent accelerator.

pub mod boosts;
pub mod decay;

use crate::config::{FrequencyConfig, FrequencyMethod, RecencyDecay, ScoringConfig};
use crate::types::Memory;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use boosts::AppliedBoost;
pub use decay::{calculate_decayed_confidence, decay_cache_len, reset_decay_cache};

/// Per-factor contributions for one scored memory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    /// Normalised factor values in [0, 1]
    pub semantic: f32,
    pub recency: f32,
    pub confidence: f32,
    pub frequency: f32,

    /// Renormalised weights (sum to 1)
    pub weights: [f32; 4],

    /// Weighted combination before boosts
    pub raw: f32,

    /// Boost rules that matched, in listed order
    pub boosts: Vec<AppliedBoost>,

    /// Decayed confidence when confidence aging is enabled
    pub decayed_confidence: Option<f32>,

    /// Final score after boosts, clamped to [0, 2]
    pub final_score: f32,
}

/// A memory with its final score and breakdown
#[derive(Debug, Clone)]
pub struct ScoredMemory {
    pub memory: Memory,
    pub score: f32,
    pub breakdown: ScoreBreakdown,
}

/// Age in days over max(created_at, accessed_at)
///
/// May be negative for clock-skewed rows; factor functions treat that as
/// fresh.
pub fn age_days(memory: &Memory, now: DateTime<Utc>) -> f64 {
    let anchor = memory.created_at.max(memory.accessed_at);
    (now - anchor).num_seconds() as f64 / 86_400.0
}

/// Semantic factor: clamp to [0, 1], non-finite input scores 0
pub fn semantic_factor(similarity: f32) -> f32 {
    if !similarity.is_finite() {
        return 0.0;
    }
    similarity.clamp(0.0, 1.0)
}

/// Recency factor under the configured decay policy
///
/// Non-finite or negative ages are treated as fresh and score 1.
pub fn recency_factor(age_days: f64, policy: &RecencyDecay) -> f32 {
    if !age_days.is_finite() || age_days < 0.0 {
        return 1.0;
    }
    match policy {
        RecencyDecay::Exponential { half_life_days } => {
            (2f64.powf(-age_days / half_life_days) as f32).clamp(0.0, 1.0)
        }
        RecencyDecay::Linear { full_decay_days } => {
            ((1.0 - age_days / full_decay_days).max(0.0) as f32).clamp(0.0, 1.0)
        }
        RecencyDecay::Step { thresholds } => step_value(age_days, thresholds, 1.0),
    }
}

/// Resolve a step table: score of the first threshold covering the age,
/// falling back to the last threshold for ages beyond the table
pub(crate) fn step_value(
    age_days: f64,
    thresholds: &[crate::config::StepThreshold],
    rate_divisor: f64,
) -> f32 {
    let mut sorted: Vec<_> = thresholds.to_vec();
    sorted.sort_by(|a, b| {
        a.max_age_days
            .partial_cmp(&b.max_age_days)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    for threshold in &sorted {
        if age_days <= threshold.max_age_days / rate_divisor {
            return threshold.score.clamp(0.0, 1.0);
        }
    }
    sorted
        .last()
        .map(|t| t.score.clamp(0.0, 1.0))
        .unwrap_or(1.0)
}

/// Confidence factor: importance clamped to [0, 1], NaN scores 0.5
pub fn confidence_factor(importance: f32) -> f32 {
    if !importance.is_finite() {
        return 0.5;
    }
    importance.clamp(0.0, 1.0)
}

/// Frequency factor: normalised access count
///
/// A count of zero returns the configured cold-start value; the score caps
/// at 1 once the count exceeds max_count.
pub fn frequency_factor(access_count: u32, config: &FrequencyConfig) -> f32 {
    if access_count == 0 {
        return config.cold_start;
    }
    if access_count >= config.max_count {
        return 1.0;
    }
    let count = access_count as f64;
    let max = config.max_count as f64;
    let value = match config.method {
        FrequencyMethod::Log => (1.0 + count).ln() / (1.0 + max).ln(),
        FrequencyMethod::Linear => count / max,
        FrequencyMethod::Sigmoid => {
            let midpoint = max / 2.0;
            let steepness = (max / 8.0).max(1.0);
            1.0 / (1.0 + (-(count - midpoint) / steepness).exp())
        }
    };
    (value as f32).clamp(0.0, 1.0)
}

/// Score a memory given its raw semantic similarity and the current time
pub fn score_memory(
    memory: &Memory,
    similarity: f32,
    now: DateTime<Utc>,
    config: &ScoringConfig,
) -> ScoreBreakdown {
    let age = age_days(memory, now);

    let semantic = semantic_factor(similarity);
    let recency = recency_factor(age, &config.recency);
    let (confidence, decayed_confidence) = if config.confidence_decay.enabled {
        let decayed = decay::cached_decayed_confidence(memory, &config.confidence_decay, now);
        (confidence_factor(decayed), Some(decayed))
    } else {
        (confidence_factor(memory.importance), None)
    };
    let frequency = frequency_factor(memory.access_count, &config.frequency);

    let weights = config.weights.normalized();
    let raw = weights[0] * semantic
        + weights[1] * recency
        + weights[2] * confidence
        + weights[3] * frequency;

    let (final_score, applied) = boosts::apply_boosts(memory, raw, age, &config.boosts);

    ScoreBreakdown {
        semantic,
        recency,
        confidence,
        frequency,
        weights,
        raw,
        boosts: applied,
        decayed_confidence,
        final_score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ScoringWeights, StepThreshold};
    use crate::types::MemoryKind;
    use proptest::prelude::*;

    fn memory_with_age(days: i64) -> Memory {
        let mut memory = Memory::new("m1", MemoryKind::Note, "t", "b");
        memory.created_at = Utc::now() - chrono::Duration::days(days);
        memory.accessed_at = memory.created_at;
        memory
    }

    #[test]
    fn test_semantic_factor_clamps_and_zeroes_nan() {
        assert_eq!(semantic_factor(0.5), 0.5);
        assert_eq!(semantic_factor(1.7), 1.0);
        assert_eq!(semantic_factor(-0.3), 0.0);
        assert_eq!(semantic_factor(f32::NAN), 0.0);
        assert_eq!(semantic_factor(f32::INFINITY), 0.0);
    }

    #[test]
    fn test_recency_exponential_half_life() {
        let policy = RecencyDecay::Exponential {
            half_life_days: 30.0,
        };
        assert!((recency_factor(30.0, &policy) - 0.5).abs() < 1e-3);
        assert!((recency_factor(0.0, &policy) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_recency_linear_hits_zero() {
        let policy = RecencyDecay::Linear {
            full_decay_days: 10.0,
        };
        assert!((recency_factor(5.0, &policy) - 0.5).abs() < 1e-6);
        assert_eq!(recency_factor(20.0, &policy), 0.0);
    }

    #[test]
    fn test_recency_step_last_threshold_wins() {
        let policy = RecencyDecay::Step {
            thresholds: vec![
                StepThreshold {
                    max_age_days: 7.0,
                    score: 1.0,
                },
                StepThreshold {
                    max_age_days: 30.0,
                    score: 0.6,
                },
                StepThreshold {
                    max_age_days: 90.0,
                    score: 0.3,
                },
            ],
        };
        assert_eq!(recency_factor(3.0, &policy), 1.0);
        assert_eq!(recency_factor(15.0, &policy), 0.6);
        assert_eq!(recency_factor(400.0, &policy), 0.3);
    }

    #[test]
    fn test_negative_age_is_fresh() {
        let policy = RecencyDecay::default();
        assert_eq!(recency_factor(-5.0, &policy), 1.0);
        assert_eq!(recency_factor(f64::NAN, &policy), 1.0);
    }

    #[test]
    fn test_confidence_nan_defaults_to_half() {
        assert_eq!(confidence_factor(f32::NAN), 0.5);
        assert_eq!(confidence_factor(0.8), 0.8);
        assert_eq!(confidence_factor(3.0), 1.0);
    }

    #[test]
    fn test_frequency_cold_start_and_cap() {
        let config = FrequencyConfig::default();
        assert_eq!(frequency_factor(0, &config), 0.5);
        assert_eq!(frequency_factor(100, &config), 1.0);
        assert_eq!(frequency_factor(5_000, &config), 1.0);

        let mid = frequency_factor(10, &config);
        assert!(mid > 0.0 && mid < 1.0);
    }

    #[test]
    fn test_frequency_methods_are_monotonic() {
        for method in [
            FrequencyMethod::Log,
            FrequencyMethod::Linear,
            FrequencyMethod::Sigmoid,
        ] {
            let config = FrequencyConfig {
                method,
                max_count: 100,
                cold_start: 0.5,
            };
            let mut last = 0.0f32;
            for count in [1, 5, 20, 50, 99] {
                let value = frequency_factor(count, &config);
                assert!(
                    value >= last,
                    "{:?} not monotonic at count {}",
                    method,
                    count
                );
                last = value;
            }
        }
    }

    #[test]
    fn test_score_memory_combines_weighted_factors() {
        let memory = memory_with_age(0);
        let config = ScoringConfig {
            weights: ScoringWeights {
                semantic: 1.0,
                recency: 0.0,
                confidence: 0.0,
                frequency: 0.0,
            },
            ..Default::default()
        };
        let breakdown = score_memory(&memory, 0.75, Utc::now(), &config);
        assert!((breakdown.raw - 0.75).abs() < 1e-6);
        assert!((breakdown.final_score - 0.75).abs() < 1e-6);
        assert!(breakdown.decayed_confidence.is_none());
    }

    proptest! {
        #[test]
        fn prop_normalized_weights_sum_to_one(
            s in 0.0f32..10.0,
            r in 0.0f32..10.0,
            c in 0.0f32..10.0,
            f in 0.0f32..10.0,
        ) {
            prop_assume!(s + r + c + f > 0.0);
            let weights = ScoringWeights {
                semantic: s,
                recency: r,
                confidence: c,
                frequency: f,
            };
            let sum: f32 = weights.normalized().iter().sum();
            prop_assert!((sum - 1.0).abs() < 1e-6);
        }

        #[test]
        fn prop_final_score_stays_in_range(
            similarity in proptest::num::f32::ANY,
            importance in proptest::num::f32::ANY,
            access_count in 0u32..10_000,
            days in 0i64..5_000,
        ) {
            let mut memory = memory_with_age(days);
            memory.importance = importance;
            memory.access_count = access_count;
            let config = ScoringConfig::default();
            let breakdown = score_memory(&memory, similarity, Utc::now(), &config);
            prop_assert!(breakdown.final_score >= 0.0);
            prop_assert!(breakdown.final_score <= 2.0);
            prop_assert!(breakdown.raw.is_finite());
        }
    }
}

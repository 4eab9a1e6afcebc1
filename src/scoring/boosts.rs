//! Multiplicative boost rules
//!
//! Each rule names a condition and a factor; matching rules apply in listed
//! order and the final score is clamped to [0, 2] regardless of factor
//! values.

use crate::config::{BoostCondition, BoostRule, TagMatch};
use crate::types::Memory;
use serde::{Deserialize, Serialize};

/// Upper clamp for the boosted score
const MAX_BOOSTED_SCORE: f32 = 2.0;

/// One boost rule that matched, recorded in the score breakdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedBoost {
    pub name: String,
    pub factor: f32,
}

fn condition_matches(memory: &Memory, condition: &BoostCondition, age_days: f64) -> bool {
    match condition {
        BoostCondition::Recency { max_days } => {
            age_days.is_finite() && age_days <= *max_days
        }
        BoostCondition::Staleness { min_days } => {
            age_days.is_finite() && age_days >= *min_days
        }
        BoostCondition::Importance { min_value } => {
            memory.importance.is_finite() && memory.importance >= *min_value
        }
        BoostCondition::Frequency { min_access_count } => {
            memory.access_count >= *min_access_count
        }
        BoostCondition::MemoryKind { kinds } => kinds.contains(&memory.kind),
        BoostCondition::Tags { tags, match_mode } => {
            let matched = tags.iter().filter(|tag| memory.has_tag(tag)).count();
            match match_mode {
                TagMatch::Any => matched >= 1,
                TagMatch::All => matched == tags.len() && !tags.is_empty(),
            }
        }
    }
}

/// Apply the ordered rule list to a raw score
///
/// Returns the clamped final score and the rules that matched.
pub fn apply_boosts(
    memory: &Memory,
    raw: f32,
    age_days: f64,
    rules: &[BoostRule],
) -> (f32, Vec<AppliedBoost>) {
    let mut score = if raw.is_finite() { raw.max(0.0) } else { 0.0 };
    let mut applied = Vec::new();

    for rule in rules {
        if condition_matches(memory, &rule.condition, age_days) {
            score *= rule.factor;
            applied.push(AppliedBoost {
                name: rule.name.clone(),
                factor: rule.factor,
            });
        }
    }

    (score.clamp(0.0, MAX_BOOSTED_SCORE), applied)
}

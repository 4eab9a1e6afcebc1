//! Confidence aging
//!
//! When enabled, a memory's confidence is its importance multiplied by a
//! decay factor over an anchor timestamp, clamped so it never drops below
//! the floor nor inflates above the importance itself.
//!
//! The decay cache is the one intentional process-wide mutable state: its
//! lifetime is the process, its size is bounded, and its semantics are
//! observationally equivalent to the pure function it accelerates.

use crate::config::ConfidenceDecayConfig;
use crate::scoring::step_value;
use crate::types::{DecayFunction, Memory};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Cached decay computations are reused for this long
const CACHE_TTL: Duration = Duration::from_secs(60);

/// Prune the cache once it grows past this many entries
const CACHE_MAX_ENTRIES: usize = 1_000;

struct CachedDecay {
    value: f32,
    config_hash: u64,
    computed_at: Instant,
}

static DECAY_CACHE: Lazy<Mutex<HashMap<(String, i64), CachedDecay>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn config_hash(config: &ConfidenceDecayConfig) -> u64 {
    let mut hasher = DefaultHasher::new();
    // Serialized form is stable for identical configs
    if let Ok(json) = serde_json::to_string(config) {
        json.hash(&mut hasher);
    }
    hasher.finish()
}

/// Anchor timestamp priority: last_refreshed_at, then accessed_at (only
/// when refresh_on_access), then created_at
pub fn decay_anchor(memory: &Memory, config: &ConfidenceDecayConfig) -> DateTime<Utc> {
    if let Some(refreshed) = memory.last_refreshed_at {
        return refreshed;
    }
    if config.refresh_on_access {
        return memory.accessed_at;
    }
    memory.created_at
}

/// Whether the memory is exempt from confidence decay
fn is_exempt(memory: &Memory, config: &ConfidenceDecayConfig) -> bool {
    if config.exempt_kinds.contains(&memory.kind) {
        return true;
    }
    if config
        .exempt_tags
        .iter()
        .any(|tag| memory.has_tag(tag))
    {
        return true;
    }
    if memory.decay_rate == Some(0.0) {
        return true;
    }
    memory.decay_function == Some(DecayFunction::None)
}

/// Pure decayed-confidence computation
///
/// Result is always within [floor, importance] (clamped against importance
/// first, so a floor above importance never inflates the output) and is
/// monotonically non-increasing in the time since the anchor.
pub fn calculate_decayed_confidence(
    memory: &Memory,
    config: &ConfidenceDecayConfig,
    now: DateTime<Utc>,
) -> f32 {
    let importance = if memory.importance.is_finite() {
        memory.importance.clamp(0.0, 1.0)
    } else {
        0.5
    };

    if !config.enabled || is_exempt(memory, config) {
        return importance;
    }

    let anchor = decay_anchor(memory, config);
    let age_days = (now - anchor).num_seconds() as f64 / 86_400.0;
    if !age_days.is_finite() || age_days <= 0.0 {
        return importance;
    }

    // Per-memory rate scales the effective half-life / full-decay by 1/r
    let rate = match memory.decay_rate {
        Some(r) if r.is_finite() && r > 0.0 => r as f64,
        Some(_) => return importance,
        None => 1.0,
    };

    let function = memory.decay_function.unwrap_or(config.function);
    let decay = match function {
        DecayFunction::None => 1.0,
        DecayFunction::Exponential => {
            let half_life = config.half_life_days / rate;
            2f64.powf(-age_days / half_life) as f32
        }
        DecayFunction::Linear => {
            let full_decay = config.full_decay_days / rate;
            (1.0 - age_days / full_decay).max(0.0) as f32
        }
        DecayFunction::Step => step_value(age_days, &config.thresholds, rate),
    };

    let floor = memory.confidence_floor.unwrap_or(config.floor);
    let floor = if floor.is_finite() {
        floor.clamp(0.0, 1.0)
    } else {
        0.0
    };

    importance.min((importance * decay).max(floor))
}

/// Decayed confidence with the transparent process-wide cache
///
/// Keyed by (memory id, anchor timestamp); entries expire after 60 s and
/// the map is pruned when it exceeds 1,000 entries.
pub fn cached_decayed_confidence(
    memory: &Memory,
    config: &ConfidenceDecayConfig,
    now: DateTime<Utc>,
) -> f32 {
    let anchor_ts = decay_anchor(memory, config).timestamp();
    let key = (memory.id.to_string(), anchor_ts);
    let cfg_hash = config_hash(config);

    {
        let cache = match DECAY_CACHE.lock() {
            Ok(cache) => cache,
            Err(_) => return calculate_decayed_confidence(memory, config, now),
        };
        if let Some(entry) = cache.get(&key) {
            if entry.config_hash == cfg_hash && entry.computed_at.elapsed() < CACHE_TTL {
                return entry.value;
            }
        }
    }

    let value = calculate_decayed_confidence(memory, config, now);

    if let Ok(mut cache) = DECAY_CACHE.lock() {
        cache.insert(
            key,
            CachedDecay {
                value,
                config_hash: cfg_hash,
                computed_at: Instant::now(),
            },
        );
        if cache.len() > CACHE_MAX_ENTRIES {
            prune(&mut cache);
        }
    }
    value
}

/// Drop expired entries, then oldest-first until back under the cap
fn prune(cache: &mut HashMap<(String, i64), CachedDecay>) {
    cache.retain(|_, entry| entry.computed_at.elapsed() < CACHE_TTL);
    if cache.len() <= CACHE_MAX_ENTRIES {
        return;
    }
    let mut stamps: Vec<Instant> = cache.values().map(|e| e.computed_at).collect();
    stamps.sort();
    let cutoff = stamps[stamps.len() - CACHE_MAX_ENTRIES];
    cache.retain(|_, entry| entry.computed_at >= cutoff);
}

/// Clear the decay cache (test isolation)
pub fn reset_decay_cache() {
    if let Ok(mut cache) = DECAY_CACHE.lock() {
        cache.clear();
    }
}

/// Current decay-cache size
pub fn decay_cache_len() -> usize {
    DECAY_CACHE.lock().map(|c| c.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StepThreshold;
    use crate::types::MemoryKind;
    use proptest::prelude::*;
    use serial_test::serial;

    fn decaying_memory(age_days: i64) -> Memory {
        let mut memory = Memory::new("m1", MemoryKind::Note, "t", "b");
        memory.importance = 1.0;
        memory.created_at = Utc::now() - chrono::Duration::days(age_days);
        memory.accessed_at = memory.created_at;
        memory
    }

    fn decay_config() -> ConfidenceDecayConfig {
        ConfidenceDecayConfig {
            enabled: true,
            half_life_days: 90.0,
            floor: 0.1,
            refresh_on_access: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_half_life_decay() {
        // importance 1.0, 90 days old, half-life 90d => ~0.5
        let memory = decaying_memory(90);
        let value = calculate_decayed_confidence(&memory, &decay_config(), Utc::now());
        assert!((value - 0.5).abs() < 0.01, "got {}", value);
    }

    #[test]
    fn test_floor_never_inflates_above_importance() {
        let mut memory = decaying_memory(365);
        memory.importance = 0.05;
        let config = decay_config(); // floor 0.1 > importance
        let value = calculate_decayed_confidence(&memory, &config, Utc::now());
        assert!(value <= 0.05 + f32::EPSILON);
    }

    #[test]
    fn test_exempt_kind_skips_decay() {
        let mut memory = decaying_memory(365);
        memory.kind = MemoryKind::Architecture;
        let config = ConfidenceDecayConfig {
            exempt_kinds: vec![MemoryKind::Architecture],
            ..decay_config()
        };
        assert_eq!(
            calculate_decayed_confidence(&memory, &config, Utc::now()),
            1.0
        );
    }

    #[test]
    fn test_exempt_tag_is_case_insensitive() {
        let mut memory = decaying_memory(365);
        memory.tags = vec!["Evergreen".to_string()];
        let config = ConfidenceDecayConfig {
            exempt_tags: vec!["evergreen".to_string()],
            ..decay_config()
        };
        assert_eq!(
            calculate_decayed_confidence(&memory, &config, Utc::now()),
            1.0
        );
    }

    #[test]
    fn test_zero_rate_pins_memory() {
        let mut memory = decaying_memory(365);
        memory.decay_rate = Some(0.0);
        assert_eq!(
            calculate_decayed_confidence(&memory, &decay_config(), Utc::now()),
            1.0
        );
    }

    #[test]
    fn test_rate_scales_half_life() {
        // rate 2 halves the effective half-life: 45 days at rate 2 ~ 0.5
        let mut memory = decaying_memory(45);
        memory.decay_rate = Some(2.0);
        let value = calculate_decayed_confidence(&memory, &decay_config(), Utc::now());
        assert!((value - 0.5).abs() < 0.01, "got {}", value);
    }

    #[test]
    fn test_refresh_anchor_takes_priority() {
        let mut memory = decaying_memory(365);
        memory.last_refreshed_at = Some(Utc::now());
        let value = calculate_decayed_confidence(&memory, &decay_config(), Utc::now());
        assert!((value - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_accessed_anchor_only_with_refresh_on_access() {
        let mut memory = decaying_memory(365);
        memory.accessed_at = Utc::now();

        let without = decay_config();
        let with = ConfidenceDecayConfig {
            refresh_on_access: true,
            ..decay_config()
        };

        let stale = calculate_decayed_confidence(&memory, &without, Utc::now());
        let fresh = calculate_decayed_confidence(&memory, &with, Utc::now());
        assert!(stale < 0.1 + 0.01);
        assert!((fresh - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_step_decay_with_rate() {
        let mut memory = decaying_memory(20);
        memory.decay_function = Some(DecayFunction::Step);
        let config = ConfidenceDecayConfig {
            function: DecayFunction::Step,
            thresholds: vec![
                StepThreshold {
                    max_age_days: 30.0,
                    score: 0.9,
                },
                StepThreshold {
                    max_age_days: 90.0,
                    score: 0.4,
                },
            ],
            ..decay_config()
        };
        // Plain: 20 days <= 30 => 0.9
        let value = calculate_decayed_confidence(&memory, &config, Utc::now());
        assert!((value - 0.9).abs() < 1e-6);

        // rate 2 divides thresholds: 30/2=15 < 20 <= 90/2=45 => 0.4
        memory.decay_rate = Some(2.0);
        let value = calculate_decayed_confidence(&memory, &config, Utc::now());
        assert!((value - 0.4).abs() < 1e-6);
    }

    #[test]
    #[serial]
    fn test_cache_is_transparent() {
        reset_decay_cache();
        let memory = decaying_memory(90);
        let config = decay_config();
        let now = Utc::now();

        let pure = calculate_decayed_confidence(&memory, &config, now);
        let first = cached_decayed_confidence(&memory, &config, now);
        let second = cached_decayed_confidence(&memory, &config, now);
        assert_eq!(first, pure);
        assert_eq!(second, pure);
        assert_eq!(decay_cache_len(), 1);
    }

    #[test]
    #[serial]
    fn test_cache_respects_config_changes() {
        reset_decay_cache();
        let memory = decaying_memory(90);
        let now = Utc::now();

        let config_a = decay_config();
        let config_b = ConfidenceDecayConfig {
            half_life_days: 9.0,
            ..decay_config()
        };

        let a = cached_decayed_confidence(&memory, &config_a, now);
        let b = cached_decayed_confidence(&memory, &config_b, now);
        assert!(a > b, "cache must not serve stale config results");
    }

    proptest! {
        #[test]
        fn prop_decayed_confidence_bounded_and_monotonic(
            importance in 0.0f32..=1.0,
            age_a in 0i64..2_000,
            age_b in 0i64..2_000,
        ) {
            let config = decay_config();
            let now = Utc::now();
            let (younger, older) = if age_a <= age_b {
                (age_a, age_b)
            } else {
                (age_b, age_a)
            };

            let mut memory = decaying_memory(younger);
            memory.importance = importance;
            let recent = calculate_decayed_confidence(&memory, &config, now);

            let mut memory = decaying_memory(older);
            memory.importance = importance;
            let aged = calculate_decayed_confidence(&memory, &config, now);

            let floor = config.floor.min(importance);
            prop_assert!(recent <= importance + 1e-6);
            prop_assert!(aged >= floor - 1e-6);
            prop_assert!(aged <= recent + 1e-6);
        }
    }
}

//! Request-fingerprinted context cache
//!
//! LRU + TTL cache keyed by a stable hash of every request component that
//! can change the assembled output. Entries remember the set of memory ids
//! that contributed so updates to any one of them can invalidate exactly
//! the affected entries.

use crate::config::{CacheConfig, ScoringConfig};
use crate::types::{ContextRequest, ContextResponse, MemoryId};
use lru::LruCache;
use once_cell::sync::Lazy;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use unicode_normalization::UnicodeNormalization;

/// Punctuation stripped from token edges during query normalisation
const EDGE_PUNCTUATION: &[char] = &[
    '"', '\'', '`', '.', ',', '!', '?', ';', ':', '(', ')', '[', ']', '{', '}', '<', '>', '~',
    '_', '-',
];

/// Fraction of the cache above which targeted invalidation degenerates to a
/// full clear. Deliberate: at high invalidation fractions clearing is
/// cheaper and more correct; tests encode this threshold.
const CLEAR_ALL_FRACTION: f64 = 0.5;

/// Normalise a query for fingerprinting
///
/// NFKC, lower-case, whitespace collapse, then per-token edge-punctuation
/// strip so internal punctuation (`C++`, `foo.bar`) survives. Idempotent.
pub fn normalize_query(query: &str) -> String {
    let folded: String = query.nfkc().collect::<String>().to_lowercase();
    folded
        .split_whitespace()
        .map(|token| token.trim_matches(EDGE_PUNCTUATION))
        .filter(|token| !token.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Compute the cache fingerprint for a request
///
/// Canonical JSON with lexicographically sorted keys; `filters.tags` are
/// sorted ascending, other arrays keep their given order. The scoring
/// config participates as a nested hash when scoring is enabled.
pub fn fingerprint(request: &ContextRequest, scoring: Option<&ScoringConfig>) -> String {
    let mut tags = request.filters.tags.clone();
    tags.sort();

    let scoring_hash = scoring
        .and_then(|config| serde_json::to_string(config).ok())
        .map(|json| sha256_hex(&json));

    // serde_json maps serialize with sorted keys, which gives us the
    // canonical ordering for free.
    let canonical = json!({
        "query": normalize_query(&request.query),
        "tokenBudget": request.token_budget,
        "includeCodeGraph": request.include_code_graph,
        "includeGraphRag": request.include_graphrag,
        "includeEvidence": request.include_evidence,
        "template": request.template.as_str(),
        "filters": {
            "kinds": request.filters.kinds.iter().map(|k| k.as_str()).collect::<Vec<_>>(),
            "tags": tags,
            "minImportance": request.filters.min_importance,
            "relatedFiles": request.filters.related_files,
        },
        "scoring": scoring_hash,
    });

    sha256_hex(&canonical.to_string())
}

/// Cache operation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub invalidations: u64,
    pub size: usize,
}

impl CacheStats {
    /// hits / (hits + misses); 0 when nothing has been observed
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

struct CacheEntry {
    value: ContextResponse,
    memory_ids: Vec<MemoryId>,
    created_at: Instant,
    last_accessed_at: Instant,
}

/// LRU + TTL context cache with targeted invalidation
pub struct ContextCache {
    entries: LruCache<String, CacheEntry>,
    enabled: bool,
    max_entries: usize,
    ttl: Duration,
    hits: u64,
    misses: u64,
    evictions: u64,
    invalidations: u64,
}

impl ContextCache {
    pub fn new(config: CacheConfig) -> Self {
        let cap = NonZeroUsize::new(config.max_entries.max(1)).expect("capacity is at least 1");
        Self {
            entries: LruCache::new(cap),
            enabled: config.enabled,
            max_entries: config.max_entries.max(1),
            ttl: Duration::from_millis(config.ttl_ms),
            hits: 0,
            misses: 0,
            evictions: 0,
            invalidations: 0,
        }
    }

    /// Apply a new configuration in place
    ///
    /// Shrinking max_entries evicts oldest entries until the cache fits.
    pub fn configure(&mut self, config: CacheConfig) {
        self.enabled = config.enabled;
        self.ttl = Duration::from_millis(config.ttl_ms);
        let new_max = config.max_entries.max(1);
        if new_max != self.max_entries {
            if new_max < self.entries.len() {
                let excess = self.entries.len() - new_max;
                self.evictions += excess as u64;
                debug!(excess, "cache shrink evicting oldest entries");
            }
            if let Some(cap) = NonZeroUsize::new(new_max) {
                self.entries.resize(cap);
            }
            self.max_entries = new_max;
        }
    }

    /// Look up a fingerprint; a hit refreshes recency and access time
    pub fn get(&mut self, key: &str) -> Option<ContextResponse> {
        if !self.enabled {
            self.misses += 1;
            return None;
        }

        let expired = match self.entries.peek(key) {
            Some(entry) => entry.created_at.elapsed() > self.ttl,
            None => {
                self.misses += 1;
                return None;
            }
        };
        if expired {
            self.entries.pop(key);
            self.misses += 1;
            return None;
        }

        // Promote to most-recently-used and refresh the access stamp
        let entry = self.entries.get_mut(key)?;
        entry.last_accessed_at = Instant::now();
        self.hits += 1;
        Some(entry.value.clone())
    }

    /// Insert a value with its contributing memory ids
    ///
    /// When at capacity, the LRU entry is evicted first. Last writer wins
    /// per key.
    pub fn set(&mut self, key: String, value: ContextResponse, memory_ids: Vec<MemoryId>) {
        if !self.enabled {
            return;
        }
        if !self.entries.contains(&key) && self.entries.len() >= self.max_entries {
            self.entries.pop_lru();
            self.evictions += 1;
        }
        let now = Instant::now();
        self.entries.put(
            key,
            CacheEntry {
                value,
                memory_ids,
                created_at: now,
                last_accessed_at: now,
            },
        );
    }

    /// Remove every entry whose contributing set contains the memory id
    ///
    /// When more than half the cache is affected, clearing the whole cache
    /// is cheaper and safer; below that, targeted removal wins. Returns the
    /// number of entries removed.
    pub fn invalidate_by_memory_id(&mut self, memory_id: &MemoryId) -> usize {
        let affected: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.memory_ids.contains(memory_id))
            .map(|(key, _)| key.clone())
            .collect();

        if affected.is_empty() {
            return 0;
        }

        let size = self.entries.len();
        if (affected.len() as f64) > CLEAR_ALL_FRACTION * size as f64 {
            info!(
                affected = affected.len(),
                size, "invalidation fraction above threshold, clearing cache"
            );
            self.invalidations += size as u64;
            self.entries.clear();
            return size;
        }

        for key in &affected {
            self.entries.pop(key);
        }
        self.invalidations += affected.len() as u64;
        debug!(removed = affected.len(), "targeted cache invalidation");
        affected.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Reset entries and counters
    pub fn reset(&mut self) {
        self.entries.clear();
        self.hits = 0;
        self.misses = 0;
        self.evictions = 0;
        self.invalidations = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            invalidations: self.invalidations,
            size: self.entries.len(),
        }
    }
}

/// Process-wide context cache shared by all requests
static CONTEXT_CACHE: Lazy<Mutex<ContextCache>> =
    Lazy::new(|| Mutex::new(ContextCache::new(CacheConfig::default())));

/// Run a closure under the global context-cache lock
pub(crate) fn with_context_cache<R>(f: impl FnOnce(&mut ContextCache) -> R) -> R {
    let mut cache = CONTEXT_CACHE
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    f(&mut cache)
}

/// Clear the process-wide context cache and its counters
pub fn reset_context_cache() {
    with_context_cache(|cache| cache.reset());
}

/// Counters for the process-wide context cache
pub fn context_cache_stats() -> CacheStats {
    with_context_cache(|cache| cache.stats())
}

/// Invalidate the process-wide cache by contributing memory id
pub fn invalidate_context_cache(memory_id: &MemoryId) -> usize {
    with_context_cache(|cache| cache.invalidate_by_memory_id(memory_id))
}

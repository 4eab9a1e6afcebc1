//! Retrieval orchestration
//!
//! One request-scoped task classifies the route, runs the three retrieval
//! channels concurrently under a per-query deadline, fuses and reranks the
//! candidates, assembles the budgeted document, and stores the result in
//! the context cache. Every stage is timed.

pub mod graphrag;
pub mod kag;
pub mod rag;
pub mod rerank;
pub mod route;

use crate::config::{
    BackpressurePolicy, CacheConfig, RetrievalConfig, ScoringConfig,
};
use crate::context::template::render_document;
use crate::context::{
    cache::with_context_cache, estimate_tokens, evidence_records, fingerprint, select_sections,
    FORMAT_OVERHEAD_TOKENS,
};
use crate::embeddings::EmbeddingClient;
use crate::error::{EngramError, Result};
use crate::storage::StorageBackend;
use crate::types::{
    CandidateSection, ContextMetadata, ContextRequest, ContextResponse, Memory, MemoryId,
};
use crate::vectors::{VectorFilter, VectorStore, PAYLOAD_TYPE_MEMORY};
use chrono::Utc;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

pub use rerank::rerank;
pub use route::classify_route;

/// Wall-clock milliseconds spent in each retrieval stage
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StageTimings {
    pub rag_ms: f64,
    pub kag_ms: f64,
    pub graphrag_ms: f64,
    pub rerank_ms: f64,
    pub format_ms: f64,
    pub tokenize_ms: f64,
    pub evidence_ms: f64,
    pub total_ms: f64,
}

/// A context response together with its stage timings
#[derive(Debug, Clone)]
pub struct TimedContext {
    pub response: ContextResponse,
    pub timings: StageTimings,
}

/// Lower-cased query tokens (length >= 3) that appear in the given text
///
/// These become a candidate's `query_terms`, which the reranker's novelty
/// boost consumes.
pub(crate) fn covered_query_terms(query: &str, text: &str) -> Vec<String> {
    let text_lower = text.to_lowercase();
    let mut seen = HashSet::new();
    let mut terms = Vec::new();
    for token in query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 3)
    {
        if text_lower.contains(token) && seen.insert(token.to_string()) {
            terms.push(token.to_string());
        }
    }
    terms
}

fn ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1_000.0
}

/// Request-level in-flight cap; sized by the first configuration that asks
/// for one
static REQUEST_SEMAPHORE: OnceCell<Arc<Semaphore>> = OnceCell::new();

async fn acquire_request_slot(
    config: &RetrievalConfig,
) -> Result<Option<tokio::sync::OwnedSemaphorePermit>> {
    let Some(cap) = config.max_concurrent_requests else {
        return Ok(None);
    };
    let semaphore = REQUEST_SEMAPHORE
        .get_or_init(|| Arc::new(Semaphore::new(cap)))
        .clone();
    match config.backpressure {
        BackpressurePolicy::Block => semaphore
            .acquire_owned()
            .await
            .map(Some)
            .map_err(|_| EngramError::Retrieval("request semaphore closed".to_string())),
        BackpressurePolicy::FailFast => match semaphore.try_acquire_owned() {
            Ok(permit) => Ok(Some(permit)),
            Err(_) => Err(EngramError::Retrieval(
                "retrieval concurrency limit reached".to_string(),
            )),
        },
    }
}

/// Resolve a channel outcome under the degrade policy
fn settle_channel(
    channel: &str,
    outcome: Result<Vec<CandidateSection>>,
    degrade: bool,
) -> Result<Vec<CandidateSection>> {
    match outcome {
        Ok(candidates) => Ok(candidates),
        Err(error) if degrade => {
            warn!(channel, %error, "channel failed, degrading to partial result");
            Ok(Vec::new())
        }
        Err(error) => Err(EngramError::Retrieval(format!(
            "{} channel failed: {}",
            channel, error
        ))),
    }
}

fn validate_request(request: &ContextRequest) -> Result<()> {
    if let Some(min_importance) = request.filters.min_importance {
        if !min_importance.is_finite() || !(0.0..=1.0).contains(&min_importance) {
            return Err(EngramError::Validation(format!(
                "filters.min_importance must be within [0, 1], got {}",
                min_importance
            )));
        }
    }
    Ok(())
}

/// Build a ranked, deduplicated, budget-fitting context document for a query
///
/// Public convenience wrapper over [`build_context_with_config`] using the
/// default retrieval configuration.
pub async fn build_context(
    request: ContextRequest,
    storage: Arc<dyn StorageBackend>,
    vectors: Arc<dyn VectorStore>,
    embeddings: Arc<dyn EmbeddingClient>,
    cache_config: Option<CacheConfig>,
    scoring_config: Option<ScoringConfig>,
) -> Result<ContextResponse> {
    build_context_with_config(
        request,
        &RetrievalConfig::default(),
        storage,
        vectors,
        embeddings,
        cache_config,
        scoring_config,
    )
    .await
    .map(|timed| timed.response)
}

/// Build a context document with explicit retrieval configuration and
/// per-stage timings (the benchmark entry point)
pub async fn build_context_with_config(
    request: ContextRequest,
    config: &RetrievalConfig,
    storage: Arc<dyn StorageBackend>,
    vectors: Arc<dyn VectorStore>,
    embeddings: Arc<dyn EmbeddingClient>,
    cache_config: Option<CacheConfig>,
    scoring_config: Option<ScoringConfig>,
) -> Result<TimedContext> {
    let total_start = Instant::now();

    config.validate()?;
    validate_request(&request)?;
    let cache_config = cache_config.unwrap_or_default();
    cache_config.validate()?;
    if let Some(scoring) = &scoring_config {
        scoring.validate()?;
    }
    let scoring = scoring_config.clone().unwrap_or_default();

    let _permit = acquire_request_slot(config).await?;

    // Cache lookup
    let key = fingerprint(&request, scoring_config.as_ref());
    let cached = with_context_cache(|cache| {
        cache.configure(cache_config);
        cache.get(&key)
    });
    if let Some(mut response) = cached {
        debug!(%key, "context cache hit");
        response.metadata.cache_hit = true;
        if !request.include_evidence {
            response.evidence = None;
        }
        return Ok(TimedContext {
            response,
            timings: StageTimings {
                total_ms: ms(total_start),
                ..Default::default()
            },
        });
    }

    let route = classify_route(&request.query, request.include_code_graph);
    let ratios = config.routes.ratios_for(route);
    let timeout = Duration::from_millis(config.query_timeout_ms);
    let degrade = config.degrade_on_channel_error;
    let now = Utc::now();

    let run_rag = ratios.rag > 0.0;
    let run_kag = request.include_code_graph && ratios.kag > 0.0;
    let run_graphrag = request.include_graphrag && ratios.graphrag > 0.0;

    let kag_budget = (request.token_budget.saturating_sub(FORMAT_OVERHEAD_TOKENS) as f32
        * ratios.kag) as usize;

    // The three channels run concurrently under the shared deadline. With
    // degradation disabled the first failure cancels the remaining
    // channels via try_join.
    let rag_task = async {
        if !run_rag {
            return Ok((Vec::new(), 0.0));
        }
        let start = Instant::now();
        let outcome = match tokio::time::timeout(
            timeout,
            rag::retrieve_rag(
                &request.query,
                &request.filters,
                request.limit,
                &storage,
                &vectors,
                &embeddings,
                &scoring,
                now,
            ),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(EngramError::Timeout(config.query_timeout_ms)),
        };
        settle_channel("rag", outcome, degrade).map(|candidates| (candidates, ms(start)))
    };

    let graph = storage.graph();
    let kag_task = async {
        if !run_kag {
            return Ok((Vec::new(), 0.0));
        }
        let start = Instant::now();
        let outcome =
            match tokio::time::timeout(timeout, kag::retrieve_kag(&request.query, kag_budget, &graph))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(EngramError::Timeout(config.query_timeout_ms)),
            };
        settle_channel("kag", outcome, degrade).map(|candidates| (candidates, ms(start)))
    };

    let graphrag_graph = storage.graph();
    let graphrag_task = async {
        if !run_graphrag {
            return Ok((Vec::new(), 0.0));
        }
        let start = Instant::now();
        let outcome = match tokio::time::timeout(
            timeout,
            graphrag::retrieve_graphrag(
                &request.query,
                request.limit,
                &graphrag_graph,
                &vectors,
                &embeddings,
                &config.graphrag,
            ),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(EngramError::Timeout(config.query_timeout_ms)),
        };
        settle_channel("graphrag", outcome, degrade).map(|candidates| (candidates, ms(start)))
    };

    let ((rag_candidates, rag_ms), (kag_candidates, kag_ms), (graphrag_candidates, graphrag_ms)) =
        tokio::try_join!(rag_task, kag_task, graphrag_task)?;

    let mut candidates = rag_candidates;
    candidates.extend(kag_candidates);
    candidates.extend(graphrag_candidates);

    // Fusion rerank
    let rerank_start = Instant::now();
    let ranked = rerank::rerank(candidates, &ratios, route, config.novelty_weight);
    let rerank_ms = ms(rerank_start);

    // Select within budget and format
    let format_start = Instant::now();
    let (sections, truncated) = select_sections(&ranked, request.token_budget, request.template);
    let document = render_document(&request.query, route, &sections, request.template);
    let format_ms = ms(format_start);

    // Tokenise the final document
    let tokenize_start = Instant::now();
    let total_tokens = estimate_tokens(&document);
    let tokenize_ms = ms(tokenize_start);

    // Emit evidence
    let evidence_start = Instant::now();
    let evidence = request.include_evidence.then(|| evidence_records(&sections));
    let evidence_ms = ms(evidence_start);

    let rag_sections = sections
        .iter()
        .filter(|s| s.source == crate::types::CandidateSource::Rag)
        .count();
    let kag_sections = sections
        .iter()
        .filter(|s| s.source == crate::types::CandidateSource::Kag)
        .count();
    let graphrag_sections = sections.len() - rag_sections - kag_sections;

    let response = ContextResponse {
        context: document,
        metadata: ContextMetadata {
            total_tokens,
            sections_included: sections.len(),
            rag_sections,
            kag_sections,
            graphrag_sections,
            truncated,
            route,
            cache_hit: false,
        },
        evidence,
    };

    // Contributing memory ids, deduplicated in admitted order
    let mut seen_ids = HashSet::new();
    let mut contributing: Vec<MemoryId> = Vec::new();
    for section in &sections {
        for memory_id in &section.source_memory_ids {
            if seen_ids.insert(memory_id.clone()) {
                contributing.push(memory_id.clone());
            }
        }
    }

    with_context_cache(|cache| {
        cache.set(key.clone(), response.clone(), contributing);
    });

    // Surfaced memories count as accessed; the increment is a single
    // atomic statement per memory.
    for section in &sections {
        if let Some(memory_id) = &section.memory_id {
            if let Err(error) = storage.increment_access_count(memory_id).await {
                warn!(%memory_id, %error, "failed to bump access count");
            }
        }
    }

    Ok(TimedContext {
        timings: StageTimings {
            rag_ms,
            kag_ms,
            graphrag_ms,
            rerank_ms,
            format_ms,
            tokenize_ms,
            evidence_ms,
            total_ms: ms(total_start),
        },
        response,
    })
}

/// Ingest a memory: embed it, upsert the vector, store the row
///
/// External ingesters are the production writers; this entry point backs
/// fixtures and benchmark seeding.
pub async fn remember(
    memory: &Memory,
    storage: &Arc<dyn StorageBackend>,
    vectors: &Arc<dyn VectorStore>,
    embeddings: &Arc<dyn EmbeddingClient>,
) -> Result<()> {
    let vector_id = memory
        .vector_id
        .clone()
        .unwrap_or_else(|| format!("mem-{}", memory.id));

    let text = format!("{}\n{}", memory.title, memory.body);
    let embedding = embeddings.embed(&text).await?;

    let payload = json!({
        "type": PAYLOAD_TYPE_MEMORY,
        "memoryId": memory.id.to_string(),
        "kind": memory.kind.as_str(),
        "tags": memory.tags,
        "importance": memory.importance,
        "relatedFiles": memory.related_files,
    });
    vectors.upsert(&vector_id, embedding, payload).await?;

    let mut stored = memory.clone();
    stored.vector_id = Some(vector_id);
    storage.store_memory(&stored).await
}

/// Delete a memory everywhere: storage row, graph links and orphans,
/// vector entry, and any cached contexts it contributed to
pub async fn forget_memory(
    id: &MemoryId,
    storage: &Arc<dyn StorageBackend>,
    vectors: &Arc<dyn VectorStore>,
) -> Result<()> {
    let memory = storage.get_memory(id).await?;
    storage.delete_memory(id).await?;

    if let Some(vector_id) = &memory.vector_id {
        vectors.delete(vector_id).await?;
    } else {
        // Defensive cleanup for rows ingested before vector ids were
        // recorded.
        let filter = VectorFilter::new().match_value("memoryId", id.to_string());
        vectors.delete_by_filter(&filter).await?;
    }

    let removed = crate::context::invalidate_context_cache(id);
    if removed > 0 {
        debug!(%id, removed, "invalidated cached contexts for deleted memory");
    }
    Ok(())
}

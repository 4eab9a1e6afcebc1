//! Engram - persistent-memory retrieval engine for AI coding assistants
//!
//! Engram ingests heterogeneous evidence about a codebase (free-text
//! memories, a code structure graph, and an entity/community knowledge
//! graph) and, given a natural-language query plus a token budget,
//! assembles a ranked, deduplicated, budget-fitting context document with
//! machine-readable evidence citations.
//!
//! # Architecture
//!
//! - **Types**: core data structures (Memory, Entity, CandidateSection)
//! - **Storage**: typed sqlite adapters for memories and the two graphs
//! - **Scoring**: multi-factor relevance with decay, boosts, and aging
//! - **Retrieval**: three channels (RAG, KAG, GraphRAG), route
//!   classification, and fusion reranking
//! - **Context**: token-budgeted assembly, templates, and the
//!   fingerprinted context cache
//! - **Bench**: stage-level latency percentiles, history, and the gate
//!
//! # Example
//!
//! ```ignore
//! use engram_core::{build_context, ContextRequest};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let response = build_context(
//!         ContextRequest::new("why did we choose PostgreSQL?"),
//!         storage,
//!         vectors,
//!         embeddings,
//!         None,
//!         None,
//!     )
//!     .await?;
//!     println!("{}", response.context);
//!     Ok(())
//! }
//! ```

pub mod bench;
pub mod config;
pub mod context;
pub mod embeddings;
pub mod error;
pub mod retrieval;
pub mod scoring;
pub mod storage;
pub mod types;
pub mod vectors;

// Re-export commonly used types
pub use bench::{benchmark_context_retrieval, BenchmarkOptions, RetrievalBenchmarkResult};
pub use config::{
    BackpressurePolicy, BoostCondition, BoostRule, CacheConfig, ConfidenceDecayConfig,
    FrequencyConfig, FrequencyMethod, GraphRagConfig, GraphRagMode, RecencyDecay,
    RetrievalConfig, RouteConfig, RouteRatios, ScoringConfig, ScoringWeights, StepThreshold,
    TagMatch,
};
pub use context::{context_cache_stats, reset_context_cache, CacheStats};
pub use embeddings::{cosine_similarity, EmbeddingClient};
pub use error::{EngramError, Result};
pub use retrieval::{
    build_context, build_context_with_config, classify_route, forget_memory, remember,
    StageTimings, TimedContext,
};
pub use scoring::{calculate_decayed_confidence, score_memory, ScoreBreakdown, ScoredMemory};
pub use storage::{GraphStorage, MemorySortOrder, SqliteStorage, StorageBackend};
pub use types::{
    CandidateSection, CandidateSource, CodeEdgeKind, CodeNode, CodeNodeKind, Community,
    CommunityReport, ContextFilters, ContextMetadata, ContextRequest, ContextResponse,
    DecayFunction, Entity, EntityType, Evidence, GraphEvidence, Memory, MemoryId, MemoryKind,
    Relationship, Route, Template,
};
pub use vectors::{FilterCondition, VectorFilter, VectorHit, VectorStore};

//! Core data types for the Engram retrieval engine
//!
//! This module defines the fundamental data structures used throughout engram,
//! including memories, knowledge-graph entities, code-graph nodes, retrieval
//! candidates, and the context request/response surface. These types form the
//! foundation of the persistent-memory retrieval engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for memories
///
/// Wraps an opaque string to provide type safety and prevent mixing memory
/// ids with other string identifiers in the system. Ids are assigned by the
/// external ingesters and treated as opaque here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryId(pub String);

impl MemoryId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MemoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MemoryId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for MemoryId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Memory kind classification for organizational and filtering purposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    /// Architectural or technical decisions and their outcomes
    Decision,

    /// Problem solutions (bug fixes, workarounds)
    Solution,

    /// Code patterns and implementation approaches
    Pattern,

    /// System architecture notes
    Architecture,

    /// Free-form notes
    Note,
}

impl MemoryKind {
    /// Stable string form used in vector payloads and storage rows
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::Decision => "decision",
            MemoryKind::Solution => "solution",
            MemoryKind::Pattern => "pattern",
            MemoryKind::Architecture => "architecture",
            MemoryKind::Note => "note",
        }
    }

    /// Parse from the stable string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "decision" => Some(MemoryKind::Decision),
            "solution" => Some(MemoryKind::Solution),
            "pattern" => Some(MemoryKind::Pattern),
            "architecture" => Some(MemoryKind::Architecture),
            "note" => Some(MemoryKind::Note),
            _ => None,
        }
    }
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-memory confidence decay curve override
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecayFunction {
    /// Never decays
    None,

    /// Half-life decay: 2^(-age/half_life)
    Exponential,

    /// Linear ramp down to zero over full_decay_days
    Linear,

    /// Stepwise thresholds from a sorted table
    Step,
}

/// Complete memory structure with all metadata
///
/// This is the atomic unit of stored knowledge. It includes content,
/// classification, relationships, lifecycle counters, and optional
/// per-memory decay overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    // === Identity ===
    /// Unique identifier
    pub id: MemoryId,

    /// Memory kind
    pub kind: MemoryKind,

    /// Short human-readable title
    pub title: String,

    /// Full memory content
    pub body: String,

    /// Optional concise summary
    pub summary: Option<String>,

    // === Numeric attributes ===
    /// Importance in [0.0, 1.0]
    pub importance: f32,

    /// Number of times this memory has been accessed (monotonically
    /// non-decreasing)
    pub access_count: u32,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last access timestamp
    pub accessed_at: DateTime<Utc>,

    /// Last explicit refresh (re-validation) timestamp
    pub last_refreshed_at: Option<DateTime<Utc>>,

    // === Sets ===
    /// Categorization tags (canonicalised lower-case)
    pub tags: Vec<String>,

    /// Related file paths in the codebase
    pub related_files: Vec<String>,

    /// Names of people with expertise on this memory
    pub experts: Vec<String>,

    // === Decay overrides ===
    /// Decay-rate multiplier (>= 0; 0 means pinned, never decays)
    pub decay_rate: Option<f32>,

    /// Decay curve override
    pub decay_function: Option<DecayFunction>,

    /// Confidence floor override
    pub confidence_floor: Option<f32>,

    // === Foreign references ===
    /// Id of the embedding in the vector index
    pub vector_id: Option<String>,

    /// Source pull-request number
    pub source_pr: Option<u64>,

    /// Source git commit sha
    pub source_commit: Option<String>,
}

impl Memory {
    /// Create a memory with sensible defaults for the optional fields
    pub fn new(
        id: impl Into<MemoryId>,
        kind: MemoryKind,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            kind,
            title: title.into(),
            body: body.into(),
            summary: None,
            importance: 0.5,
            access_count: 0,
            created_at: now,
            accessed_at: now,
            last_refreshed_at: None,
            tags: Vec::new(),
            related_files: Vec::new(),
            experts: Vec::new(),
            decay_rate: None,
            decay_function: None,
            confidence_floor: None,
            vector_id: None,
            source_pr: None,
            source_commit: None,
        }
    }

    /// Whether any of the memory's tags matches `tag` case-insensitively
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

/// Entity type extracted from memories (GraphRAG)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Technology,
    Concept,
    Component,
    Pattern,
    Person,
    /// Unrecognised types round-trip through storage unchanged
    #[serde(other)]
    Other,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Technology => "TECHNOLOGY",
            EntityType::Concept => "CONCEPT",
            EntityType::Component => "COMPONENT",
            EntityType::Pattern => "PATTERN",
            EntityType::Person => "PERSON",
            EntityType::Other => "OTHER",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "TECHNOLOGY" => EntityType::Technology,
            "CONCEPT" => EntityType::Concept,
            "COMPONENT" => EntityType::Component,
            "PATTERN" => EntityType::Pattern,
            "PERSON" => EntityType::Person,
            _ => EntityType::Other,
        }
    }
}

/// Named concept extracted from memories (GraphRAG node)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Unique identifier
    pub id: String,

    /// Canonical name (case-insensitively unique)
    pub canonical_name: String,

    /// Entity type
    pub entity_type: EntityType,

    /// Free-text description synthesised during extraction
    pub description: String,

    /// How many memories mention this entity (>= 1)
    pub mention_count: u32,

    /// Extraction confidence in [0.0, 1.0]
    pub extraction_confidence: f32,

    /// First extraction timestamp
    pub first_seen_at: DateTime<Utc>,

    /// Most recent extraction timestamp
    pub last_seen_at: DateTime<Utc>,

    /// Id of the entity embedding in the vector index
    pub embedding_id: Option<String>,
}

/// Directed typed edge between two entities
///
/// Unique per (source, target, type).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub rel_type: String,

    /// Integer strength; retrieval expansion prunes edges below a minimum
    pub strength: i32,

    pub description: String,
}

/// Clustering of entities at a hierarchical level
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Community {
    pub id: String,

    /// Hierarchical level (>= 0; 0 is the leaf level)
    pub level: u32,

    pub parent_id: Option<String>,
    pub entity_count: u32,
    pub modularity: Option<f64>,

    /// Member entity ids
    pub member_entity_ids: Vec<String>,
}

/// Narrative summary of a community
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunityReport {
    pub id: String,
    pub community_id: String,
    pub title: String,
    pub summary: String,
    pub full_content: String,

    /// Ordered key findings
    pub key_findings: Vec<String>,

    pub rating: Option<f64>,
    pub embedding_id: Option<String>,
}

/// Kind of a code-graph node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeNodeKind {
    Function,
    Method,
    Struct,
    Class,
    Trait,
    Interface,
    Module,
}

impl CodeNodeKind {
    /// Interface-like nodes additionally surface their implementations
    pub fn is_abstract(&self) -> bool {
        matches!(self, CodeNodeKind::Trait | CodeNodeKind::Interface)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CodeNodeKind::Function => "function",
            CodeNodeKind::Method => "method",
            CodeNodeKind::Struct => "struct",
            CodeNodeKind::Class => "class",
            CodeNodeKind::Trait => "trait",
            CodeNodeKind::Interface => "interface",
            CodeNodeKind::Module => "module",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "function" => Some(CodeNodeKind::Function),
            "method" => Some(CodeNodeKind::Method),
            "struct" => Some(CodeNodeKind::Struct),
            "class" => Some(CodeNodeKind::Class),
            "trait" => Some(CodeNodeKind::Trait),
            "interface" => Some(CodeNodeKind::Interface),
            "module" => Some(CodeNodeKind::Module),
            _ => None,
        }
    }
}

/// Node in the code structure graph extracted from source (KAG)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeNode {
    pub id: String,
    pub name: String,
    pub kind: CodeNodeKind,
    pub signature: String,
    pub summary: Option<String>,

    /// Defining file, when known
    pub file: Option<String>,
}

/// Kind of a code-graph edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeEdgeKind {
    /// source calls target
    Call,

    /// source implements target
    Implements,
}

impl CodeEdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodeEdgeKind::Call => "call",
            CodeEdgeKind::Implements => "implements",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "call" => Some(CodeEdgeKind::Call),
            "implements" => Some(CodeEdgeKind::Implements),
            _ => None,
        }
    }
}

/// High-level classification of query intent
///
/// Decides channel weighting in the fusion reranker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// Semantic memory retrieval dominates
    Memory,

    /// Code-graph retrieval dominates
    Code,

    /// Both families are relevant
    Hybrid,
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Route::Memory => write!(f, "memory"),
            Route::Code => write!(f, "code"),
            Route::Hybrid => write!(f, "hybrid"),
        }
    }
}

/// Which retrieval channel produced a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    Rag,
    Kag,
    Graphrag,
}

impl std::fmt::Display for CandidateSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CandidateSource::Rag => write!(f, "rag"),
            CandidateSource::Kag => write!(f, "kag"),
            CandidateSource::Graphrag => write!(f, "graphrag"),
        }
    }
}

/// One candidate context section produced by a retrieval channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSection {
    /// Stable id within a single request (e.g. "rag-<memory id>")
    pub id: String,

    pub source: CandidateSource,
    pub title: String,
    pub body: String,

    /// Channel-assigned relevance in [0.0, 1.0+] used for ranking
    pub relevance: f32,

    /// Lower-cased terms this candidate covers, for the novelty boost
    pub query_terms: Vec<String>,

    /// Backing memory, for RAG candidates
    pub memory_id: Option<MemoryId>,

    /// Backing entity, for GraphRAG candidates
    pub entity_id: Option<String>,

    /// Every memory whose content influenced this section; drives targeted
    /// cache invalidation
    pub source_memory_ids: Vec<MemoryId>,

    /// Tags surfaced by the detailed template
    pub tags: Vec<String>,

    /// Importance surfaced by the detailed template
    pub importance: Option<f32>,
}

/// Output template for the assembled context document
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Template {
    /// Full sections with headings
    #[default]
    Default,

    /// First line of each section body only
    Compact,

    /// Full sections plus inline raw metadata (tags, importance)
    Detailed,
}

impl Template {
    pub fn as_str(&self) -> &'static str {
        match self {
            Template::Default => "default",
            Template::Compact => "compact",
            Template::Detailed => "detailed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "default" => Some(Template::Default),
            "compact" => Some(Template::Compact),
            "detailed" => Some(Template::Detailed),
            _ => None,
        }
    }
}

/// Filters applied to the RAG vector search
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextFilters {
    /// Restrict to these memory kinds (empty = no restriction)
    #[serde(default)]
    pub kinds: Vec<MemoryKind>,

    /// Any-of tag filter
    #[serde(default)]
    pub tags: Vec<String>,

    /// Minimum importance
    #[serde(default)]
    pub min_importance: Option<f32>,

    /// Any-of related-file filter
    #[serde(default)]
    pub related_files: Vec<String>,
}

impl ContextFilters {
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
            && self.tags.is_empty()
            && self.min_importance.is_none()
            && self.related_files.is_empty()
    }
}

/// One context retrieval request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextRequest {
    /// Natural-language query
    pub query: String,

    /// Hard token ceiling for the assembled document
    pub token_budget: usize,

    /// Enable the KAG channel
    pub include_code_graph: bool,

    /// Enable the GraphRAG channel
    pub include_graphrag: bool,

    /// Emit machine-readable evidence records
    pub include_evidence: bool,

    /// Output template
    pub template: Template,

    /// RAG filters
    pub filters: ContextFilters,

    /// Per-channel candidate limit
    pub limit: usize,
}

impl ContextRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            token_budget: 4096,
            include_code_graph: true,
            include_graphrag: true,
            include_evidence: false,
            template: Template::Default,
            filters: ContextFilters::default(),
            limit: 10,
        }
    }
}

/// Graph provenance attached to GraphRAG evidence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEvidence {
    pub entity_id: String,
    pub source_memory_ids: Vec<MemoryId>,
}

/// Machine-readable citation for one admitted section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub source: CandidateSource,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_id: Option<MemoryId>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph: Option<GraphEvidence>,

    pub score: f32,
}

/// Metadata describing one assembled context document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextMetadata {
    pub total_tokens: usize,
    pub sections_included: usize,
    pub rag_sections: usize,
    pub kag_sections: usize,
    pub graphrag_sections: usize,

    /// More candidates were considered than admitted
    pub truncated: bool,

    pub route: Route,
    pub cache_hit: bool,
}

/// Result of one context retrieval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextResponse {
    /// The assembled context document
    pub context: String,

    pub metadata: ContextMetadata,

    /// Present iff the request asked for evidence
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<Vec<Evidence>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_id_roundtrip() {
        let id = MemoryId::from("m-42");
        assert_eq!(id.to_string(), "m-42");
        assert_eq!(id, MemoryId::new("m-42"));
    }

    #[test]
    fn test_memory_kind_parse() {
        for kind in [
            MemoryKind::Decision,
            MemoryKind::Solution,
            MemoryKind::Pattern,
            MemoryKind::Architecture,
            MemoryKind::Note,
        ] {
            assert_eq!(MemoryKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(MemoryKind::parse("bogus"), None);
    }

    #[test]
    fn test_has_tag_is_case_insensitive() {
        let mut memory = Memory::new("m1", MemoryKind::Note, "t", "b");
        memory.tags = vec!["Database".to_string()];
        assert!(memory.has_tag("database"));
        assert!(memory.has_tag("DATABASE"));
        assert!(!memory.has_tag("cache"));
    }

    #[test]
    fn test_entity_type_parse_unknown_maps_to_other() {
        assert_eq!(EntityType::parse("TECHNOLOGY"), EntityType::Technology);
        assert_eq!(EntityType::parse("WEIRD_NEW_TYPE"), EntityType::Other);
    }

    #[test]
    fn test_abstract_code_nodes() {
        assert!(CodeNodeKind::Trait.is_abstract());
        assert!(CodeNodeKind::Interface.is_abstract());
        assert!(!CodeNodeKind::Function.is_abstract());
    }

    #[test]
    fn test_template_parse_rejects_unknown() {
        assert_eq!(Template::parse("compact"), Some(Template::Compact));
        assert_eq!(Template::parse("verbose"), None);
    }

    #[test]
    fn test_context_request_defaults() {
        let req = ContextRequest::new("how does auth work");
        assert_eq!(req.token_budget, 4096);
        assert!(req.include_code_graph);
        assert!(!req.include_evidence);
        assert_eq!(req.template, Template::Default);
    }
}

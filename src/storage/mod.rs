//! Storage layer for the Engram retrieval engine
//!
//! Provides abstractions and implementations for persistent storage of
//! memories, documents, pending ingests, cached embeddings, and the two
//! graphs (entity graph and code structure graph).

pub mod graph;
pub mod sqlite;

use crate::error::Result;
use crate::types::{Memory, MemoryId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use graph::GraphStorage;
pub use sqlite::SqliteStorage;

/// Sort order for listing memories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemorySortOrder {
    Recent,
    Importance,
    AccessCount,
}

/// A source document tracked alongside memories
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub path: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// One chunk of a document, referenced from the vector index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: String,
    pub document_id: String,

    /// Position within the document
    pub seq: u32,

    pub content: String,
    pub vector_id: Option<String>,
}

/// A memory queued for ingestion but not yet embedded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingMemory {
    pub id: String,

    /// Serialized [`Memory`] awaiting embedding
    pub memory: Memory,

    pub queued_at: DateTime<Utc>,
}

/// Storage backend trait defining all required operations
///
/// Typed accessors over the persistent tables. Implementations serialise
/// writes through the underlying database; readers may execute concurrently
/// as the backend allows.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    // === Memories ===

    /// Store a new memory
    async fn store_memory(&self, memory: &Memory) -> Result<()>;

    /// Retrieve a memory by id
    async fn get_memory(&self, id: &MemoryId) -> Result<Memory>;

    /// Batch-load memories; missing ids are silently dropped
    async fn get_memories(&self, ids: &[MemoryId]) -> Result<Vec<Memory>>;

    /// Update an existing memory
    async fn update_memory(&self, memory: &Memory) -> Result<()>;

    /// Delete a memory and cascade to its graph links (entity links,
    /// relationship sources, orphaned entities) in one transaction
    async fn delete_memory(&self, id: &MemoryId) -> Result<()>;

    /// List memories by sort order
    async fn list_memories(&self, limit: usize, sort: MemorySortOrder) -> Result<Vec<Memory>>;

    /// Total number of stored memories
    async fn count_memories(&self) -> Result<usize>;

    /// Atomic single-statement access-count increment; also bumps
    /// accessed_at
    async fn increment_access_count(&self, id: &MemoryId) -> Result<()>;

    // === Documents & chunks ===

    async fn store_document(&self, document: &Document) -> Result<()>;

    async fn get_document(&self, id: &str) -> Result<Option<Document>>;

    async fn store_chunk(&self, chunk: &DocumentChunk) -> Result<()>;

    async fn chunks_for_document(&self, document_id: &str) -> Result<Vec<DocumentChunk>>;

    // === Pending memories ===

    async fn enqueue_pending(&self, pending: &PendingMemory) -> Result<()>;

    /// Remove and return up to `limit` pending memories in queue order
    async fn take_pending(&self, limit: usize) -> Result<Vec<PendingMemory>>;

    // === Cached embeddings ===

    async fn get_cached_embedding(&self, content_hash: &str) -> Result<Option<Vec<f32>>>;

    async fn put_cached_embedding(
        &self,
        content_hash: &str,
        model: &str,
        vector: &[f32],
    ) -> Result<()>;

    // === Graph ===

    /// The graph storage adapter sharing this backend's database handle
    fn graph(&self) -> Arc<GraphStorage>;

    /// Release all resources; must succeed on every path
    async fn close(&self) -> Result<()>;
}

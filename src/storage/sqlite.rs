//! SQLite storage backend implementation
//!
//! Provides persistent storage using rusqlite with idempotent schema
//! creation. One connection is shared behind an async mutex; the graph
//! storage adapter reuses the same handle so memory deletion can cascade
//! across the graph tables in a single transaction.

use crate::error::{EngramError, Result};
use crate::storage::graph::GraphStorage;
use crate::storage::{
    Document, DocumentChunk, MemorySortOrder, PendingMemory, StorageBackend,
};
use crate::types::{DecayFunction, Memory, MemoryId, MemoryKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS memories (
    id                TEXT PRIMARY KEY NOT NULL,
    kind              TEXT NOT NULL,
    title             TEXT NOT NULL,
    body              TEXT NOT NULL,
    summary           TEXT,
    importance        REAL NOT NULL DEFAULT 0.5,
    access_count      INTEGER NOT NULL DEFAULT 0,
    created_at        INTEGER NOT NULL,
    accessed_at       INTEGER NOT NULL,
    last_refreshed_at INTEGER,
    tags              TEXT NOT NULL DEFAULT '[]',
    related_files     TEXT NOT NULL DEFAULT '[]',
    experts           TEXT NOT NULL DEFAULT '[]',
    decay_rate        REAL,
    decay_function    TEXT,
    confidence_floor  REAL,
    vector_id         TEXT,
    source_pr         INTEGER,
    source_commit     TEXT
);

CREATE INDEX IF NOT EXISTS idx_memories_kind ON memories(kind);
CREATE INDEX IF NOT EXISTS idx_memories_accessed_at ON memories(accessed_at);

CREATE TABLE IF NOT EXISTS documents (
    id         TEXT PRIMARY KEY NOT NULL,
    title      TEXT NOT NULL,
    path       TEXT,
    content    TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS document_chunks (
    id          TEXT PRIMARY KEY NOT NULL,
    document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    seq         INTEGER NOT NULL,
    content     TEXT NOT NULL,
    vector_id   TEXT
);

CREATE INDEX IF NOT EXISTS idx_chunks_document ON document_chunks(document_id);

CREATE TABLE IF NOT EXISTS pending_memories (
    id        TEXT PRIMARY KEY NOT NULL,
    payload   TEXT NOT NULL,
    queued_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS cached_embeddings (
    content_hash TEXT PRIMARY KEY NOT NULL,
    model        TEXT NOT NULL,
    vector       BLOB NOT NULL,
    created_at   INTEGER NOT NULL
);
"#;

/// Convert an epoch-seconds column to a timestamp
fn ts_to_dt(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
}

/// Serialize an f32 slice as a little-endian blob
pub(crate) fn vec_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

/// Deserialize a little-endian blob back to f32s
pub(crate) fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn json_list(raw: String) -> Vec<String> {
    serde_json::from_str(&raw).unwrap_or_default()
}

fn memory_from_row(row: &Row<'_>) -> rusqlite::Result<Memory> {
    let kind_raw: String = row.get("kind")?;
    let decay_fn_raw: Option<String> = row.get("decay_function")?;
    Ok(Memory {
        id: MemoryId::new(row.get::<_, String>("id")?),
        kind: MemoryKind::parse(&kind_raw).unwrap_or(MemoryKind::Note),
        title: row.get("title")?,
        body: row.get("body")?,
        summary: row.get("summary")?,
        importance: row.get("importance")?,
        access_count: row.get("access_count")?,
        created_at: ts_to_dt(row.get("created_at")?),
        accessed_at: ts_to_dt(row.get("accessed_at")?),
        last_refreshed_at: row
            .get::<_, Option<i64>>("last_refreshed_at")?
            .map(ts_to_dt),
        tags: json_list(row.get("tags")?),
        related_files: json_list(row.get("related_files")?),
        experts: json_list(row.get("experts")?),
        decay_rate: row.get("decay_rate")?,
        decay_function: decay_fn_raw.and_then(|s| match s.as_str() {
            "none" => Some(DecayFunction::None),
            "exponential" => Some(DecayFunction::Exponential),
            "linear" => Some(DecayFunction::Linear),
            "step" => Some(DecayFunction::Step),
            _ => None,
        }),
        confidence_floor: row.get("confidence_floor")?,
        vector_id: row.get("vector_id")?,
        source_pr: row.get::<_, Option<i64>>("source_pr")?.map(|n| n as u64),
        source_commit: row.get("source_commit")?,
    })
}

fn decay_fn_to_str(function: DecayFunction) -> &'static str {
    match function {
        DecayFunction::None => "none",
        DecayFunction::Exponential => "exponential",
        DecayFunction::Linear => "linear",
        DecayFunction::Step => "step",
    }
}

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
    graph: Arc<GraphStorage>,
}

impl SqliteStorage {
    /// Open (creating if missing) a file-backed database
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path_str = db_path.as_ref().to_string_lossy().to_string();
        info!("Opening engram storage at: {}", path_str);
        let conn = Connection::open(db_path)
            .map_err(|e| EngramError::Database(format!("Failed to open database: {}", e)))?;
        Self::from_connection(conn)
    }

    /// In-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| EngramError::Database(format!("Failed to open database: {}", e)))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| EngramError::Database(format!("Failed to enable foreign keys: {}", e)))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| EngramError::Database(format!("Failed to create schema: {}", e)))?;
        conn.execute_batch(crate::storage::graph::GRAPH_SCHEMA)
            .map_err(|e| EngramError::Database(format!("Failed to create graph schema: {}", e)))?;

        let conn = Arc::new(Mutex::new(conn));
        let graph = Arc::new(GraphStorage::new(Arc::clone(&conn)));

        debug!("Storage schema initialized");
        Ok(Self { conn, graph })
    }

}

#[async_trait]
impl StorageBackend for SqliteStorage {
    async fn store_memory(&self, memory: &Memory) -> Result<()> {
        let tags = serde_json::to_string(&memory.tags)?;
        let related_files = serde_json::to_string(&memory.related_files)?;
        let experts = serde_json::to_string(&memory.experts)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO memories (
                id, kind, title, body, summary, importance, access_count,
                created_at, accessed_at, last_refreshed_at, tags, related_files,
                experts, decay_rate, decay_function, confidence_floor,
                vector_id, source_pr, source_commit
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                       ?14, ?15, ?16, ?17, ?18, ?19)",
            params![
                memory.id.to_string(),
                memory.kind.as_str(),
                memory.title,
                memory.body,
                memory.summary,
                memory.importance,
                memory.access_count,
                memory.created_at.timestamp(),
                memory.accessed_at.timestamp(),
                memory.last_refreshed_at.map(|t| t.timestamp()),
                tags,
                related_files,
                experts,
                memory.decay_rate,
                memory.decay_function.map(decay_fn_to_str),
                memory.confidence_floor,
                memory.vector_id,
                memory.source_pr.map(|n| n as i64),
                memory.source_commit,
            ],
        )
        .map_err(|e| EngramError::Database(format!("Failed to store memory: {}", e)))?;
        debug!("Stored memory {}", memory.id);
        Ok(())
    }

    async fn get_memory(&self, id: &MemoryId) -> Result<Memory> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT * FROM memories WHERE id = ?1",
            params![id.to_string()],
            memory_from_row,
        )
        .optional()
        .map_err(|e| EngramError::Database(format!("Failed to load memory: {}", e)))?
        .ok_or_else(|| EngramError::MemoryNotFound(id.to_string()))
    }

    async fn get_memories(&self, ids: &[MemoryId]) -> Result<Vec<Memory>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT * FROM memories WHERE id = ?1")
            .map_err(|e| EngramError::Database(format!("Failed to prepare query: {}", e)))?;
        let mut memories = Vec::with_capacity(ids.len());
        for id in ids {
            let found = stmt
                .query_row(params![id.to_string()], memory_from_row)
                .optional()
                .map_err(|e| EngramError::Database(format!("Failed to load memory: {}", e)))?;
            if let Some(memory) = found {
                memories.push(memory);
            }
        }
        Ok(memories)
    }

    async fn update_memory(&self, memory: &Memory) -> Result<()> {
        let tags = serde_json::to_string(&memory.tags)?;
        let related_files = serde_json::to_string(&memory.related_files)?;
        let experts = serde_json::to_string(&memory.experts)?;
        let conn = self.conn.lock().await;
        let updated = conn
            .execute(
                "UPDATE memories SET
                    kind = ?2, title = ?3, body = ?4, summary = ?5,
                    importance = ?6, access_count = ?7, created_at = ?8,
                    accessed_at = ?9, last_refreshed_at = ?10, tags = ?11,
                    related_files = ?12, experts = ?13, decay_rate = ?14,
                    decay_function = ?15, confidence_floor = ?16,
                    vector_id = ?17, source_pr = ?18, source_commit = ?19
                 WHERE id = ?1",
                params![
                    memory.id.to_string(),
                    memory.kind.as_str(),
                    memory.title,
                    memory.body,
                    memory.summary,
                    memory.importance,
                    memory.access_count,
                    memory.created_at.timestamp(),
                    memory.accessed_at.timestamp(),
                    memory.last_refreshed_at.map(|t| t.timestamp()),
                    tags,
                    related_files,
                    experts,
                    memory.decay_rate,
                    memory.decay_function.map(decay_fn_to_str),
                    memory.confidence_floor,
                    memory.vector_id,
                    memory.source_pr.map(|n| n as i64),
                    memory.source_commit,
                ],
            )
            .map_err(|e| EngramError::Database(format!("Failed to update memory: {}", e)))?;
        if updated == 0 {
            return Err(EngramError::MemoryNotFound(memory.id.to_string()));
        }
        Ok(())
    }

    async fn delete_memory(&self, id: &MemoryId) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn
            .transaction()
            .map_err(|e| EngramError::Database(format!("Failed to begin transaction: {}", e)))?;

        let id_str = id.to_string();

        // Entities linked to this memory; any left without links afterwards
        // are orphans and go too (relationships cascade via foreign keys).
        let linked: Vec<String> = {
            let mut stmt = tx
                .prepare("SELECT entity_id FROM entity_memories WHERE memory_id = ?1")
                .map_err(|e| EngramError::Database(format!("Failed to prepare query: {}", e)))?;
            let rows = stmt
                .query_map(params![id_str], |row| row.get::<_, String>(0))
                .map_err(|e| EngramError::Database(format!("Failed to query links: {}", e)))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| EngramError::Database(format!("Failed to read links: {}", e)))?
        };

        tx.execute(
            "DELETE FROM entity_memories WHERE memory_id = ?1",
            params![id_str],
        )
        .map_err(|e| EngramError::Database(format!("Failed to delete entity links: {}", e)))?;
        tx.execute(
            "DELETE FROM relationship_sources WHERE memory_id = ?1",
            params![id_str],
        )
        .map_err(|e| {
            EngramError::Database(format!("Failed to delete relationship sources: {}", e))
        })?;

        for entity_id in linked {
            tx.execute(
                "DELETE FROM entities WHERE id = ?1
                 AND NOT EXISTS (SELECT 1 FROM entity_memories WHERE entity_id = ?1)",
                params![entity_id],
            )
            .map_err(|e| {
                EngramError::Database(format!("Failed to delete orphaned entity: {}", e))
            })?;
        }

        let deleted = tx
            .execute("DELETE FROM memories WHERE id = ?1", params![id_str])
            .map_err(|e| EngramError::Database(format!("Failed to delete memory: {}", e)))?;

        tx.commit()
            .map_err(|e| EngramError::Database(format!("Failed to commit delete: {}", e)))?;

        if deleted == 0 {
            return Err(EngramError::MemoryNotFound(id.to_string()));
        }
        debug!("Deleted memory {} with graph cascade", id);
        Ok(())
    }

    async fn list_memories(&self, limit: usize, sort: MemorySortOrder) -> Result<Vec<Memory>> {
        let order_clause = match sort {
            MemorySortOrder::Recent => "accessed_at DESC",
            MemorySortOrder::Importance => "importance DESC",
            MemorySortOrder::AccessCount => "access_count DESC",
        };
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT * FROM memories ORDER BY {} LIMIT ?1",
            order_clause
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| EngramError::Database(format!("Failed to prepare query: {}", e)))?;
        let rows = stmt
            .query_map(params![limit as i64], memory_from_row)
            .map_err(|e| EngramError::Database(format!("Failed to list memories: {}", e)))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| EngramError::Database(format!("Failed to read memories: {}", e)))
    }

    async fn count_memories(&self) -> Result<usize> {
        let conn = self.conn.lock().await;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))
            .map_err(|e| EngramError::Database(format!("Failed to count memories: {}", e)))?;
        Ok(count as usize)
    }

    async fn increment_access_count(&self, id: &MemoryId) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE memories
             SET access_count = access_count + 1, accessed_at = ?1
             WHERE id = ?2",
            params![Utc::now().timestamp(), id.to_string()],
        )
        .map_err(|e| EngramError::Database(format!("Failed to increment access count: {}", e)))?;
        Ok(())
    }

    async fn store_document(&self, document: &Document) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO documents (id, title, path, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                document.id,
                document.title,
                document.path,
                document.content,
                document.created_at.timestamp(),
            ],
        )
        .map_err(|e| EngramError::Database(format!("Failed to store document: {}", e)))?;
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT id, title, path, content, created_at FROM documents WHERE id = ?1",
            params![id],
            |row| {
                Ok(Document {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    path: row.get(2)?,
                    content: row.get(3)?,
                    created_at: ts_to_dt(row.get(4)?),
                })
            },
        )
        .optional()
        .map_err(|e| EngramError::Database(format!("Failed to load document: {}", e)))
    }

    async fn store_chunk(&self, chunk: &DocumentChunk) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO document_chunks (id, document_id, seq, content, vector_id)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                chunk.id,
                chunk.document_id,
                chunk.seq,
                chunk.content,
                chunk.vector_id,
            ],
        )
        .map_err(|e| EngramError::Database(format!("Failed to store chunk: {}", e)))?;
        Ok(())
    }

    async fn chunks_for_document(&self, document_id: &str) -> Result<Vec<DocumentChunk>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT id, document_id, seq, content, vector_id
                 FROM document_chunks WHERE document_id = ?1 ORDER BY seq",
            )
            .map_err(|e| EngramError::Database(format!("Failed to prepare query: {}", e)))?;
        let rows = stmt
            .query_map(params![document_id], |row| {
                Ok(DocumentChunk {
                    id: row.get(0)?,
                    document_id: row.get(1)?,
                    seq: row.get(2)?,
                    content: row.get(3)?,
                    vector_id: row.get(4)?,
                })
            })
            .map_err(|e| EngramError::Database(format!("Failed to query chunks: {}", e)))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| EngramError::Database(format!("Failed to read chunks: {}", e)))
    }

    async fn enqueue_pending(&self, pending: &PendingMemory) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO pending_memories (id, payload, queued_at)
             VALUES (?1, ?2, ?3)",
            params![
                pending.id,
                serde_json::to_string(&pending.memory)?,
                pending.queued_at.timestamp(),
            ],
        )
        .map_err(|e| EngramError::Database(format!("Failed to enqueue pending memory: {}", e)))?;
        Ok(())
    }

    async fn take_pending(&self, limit: usize) -> Result<Vec<PendingMemory>> {
        let mut conn = self.conn.lock().await;
        let tx = conn
            .transaction()
            .map_err(|e| EngramError::Database(format!("Failed to begin transaction: {}", e)))?;

        let pending: Vec<PendingMemory> = {
            let mut stmt = tx
                .prepare(
                    "SELECT id, payload, queued_at FROM pending_memories
                     ORDER BY queued_at, id LIMIT ?1",
                )
                .map_err(|e| EngramError::Database(format!("Failed to prepare query: {}", e)))?;
            let rows = stmt
                .query_map(params![limit as i64], |row| {
                    let id: String = row.get(0)?;
                    let payload: String = row.get(1)?;
                    let queued_at: i64 = row.get(2)?;
                    Ok((id, payload, queued_at))
                })
                .map_err(|e| EngramError::Database(format!("Failed to query pending: {}", e)))?;
            let raw = rows
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| EngramError::Database(format!("Failed to read pending: {}", e)))?;
            raw.into_iter()
                .filter_map(|(id, payload, queued_at)| {
                    // Corrupt payloads are dropped rather than wedging the queue
                    serde_json::from_str(&payload).ok().map(|memory| PendingMemory {
                        id,
                        memory,
                        queued_at: ts_to_dt(queued_at),
                    })
                })
                .collect()
        };

        for item in &pending {
            tx.execute(
                "DELETE FROM pending_memories WHERE id = ?1",
                params![item.id],
            )
            .map_err(|e| EngramError::Database(format!("Failed to dequeue pending: {}", e)))?;
        }
        tx.commit()
            .map_err(|e| EngramError::Database(format!("Failed to commit dequeue: {}", e)))?;
        Ok(pending)
    }

    async fn get_cached_embedding(&self, content_hash: &str) -> Result<Option<Vec<f32>>> {
        let conn = self.conn.lock().await;
        let blob: Option<Vec<u8>> = conn
            .query_row(
                "SELECT vector FROM cached_embeddings WHERE content_hash = ?1",
                params![content_hash],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| EngramError::Database(format!("Failed to load cached embedding: {}", e)))?;
        Ok(blob.map(|b| blob_to_vec(&b)))
    }

    async fn put_cached_embedding(
        &self,
        content_hash: &str,
        model: &str,
        vector: &[f32],
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO cached_embeddings (content_hash, model, vector, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                content_hash,
                model,
                vec_to_blob(vector),
                Utc::now().timestamp(),
            ],
        )
        .map_err(|e| EngramError::Database(format!("Failed to cache embedding: {}", e)))?;
        Ok(())
    }

    fn graph(&self) -> Arc<GraphStorage> {
        Arc::clone(&self.graph)
    }

    async fn close(&self) -> Result<()> {
        // The pooled connection closes when the last Arc drops; flush WAL
        // state so every path releases cleanly.
        let conn = self.conn.lock().await;
        conn.execute_batch("PRAGMA optimize;")
            .map_err(|e| EngramError::Database(format!("Failed to close storage: {}", e)))?;
        Ok(())
    }
}

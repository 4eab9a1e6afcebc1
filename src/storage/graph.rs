//! Graph storage adapter
//!
//! Typed access to the knowledge-graph tables (entities, relationships,
//! communities, community reports) and the code structure graph (nodes and
//! call/implements edges). Shares the backend's database handle; foreign
//! keys cascade on entity delete.
//!
//! The cyclic memory<->entity graph is kept as arena-plus-index: entities,
//! memories, and their links live in separate tables and traversal uses
//! explicit depth-bounded BFS with a visited set.

use crate::error::{EngramError, Result};
use crate::types::{
    CodeEdgeKind, CodeNode, CodeNodeKind, Community, CommunityReport, Entity, EntityType,
    MemoryId, Relationship,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Graph table DDL, executed with the rest of the backend schema
pub(crate) const GRAPH_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS entities (
    id                    TEXT PRIMARY KEY NOT NULL,
    canonical_name        TEXT NOT NULL,
    entity_type           TEXT NOT NULL,
    description           TEXT NOT NULL DEFAULT '',
    mention_count         INTEGER NOT NULL DEFAULT 1,
    extraction_confidence REAL NOT NULL DEFAULT 0.5,
    first_seen_at         INTEGER NOT NULL,
    last_seen_at          INTEGER NOT NULL,
    embedding_id          TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_entities_canonical_name
    ON entities(canonical_name COLLATE NOCASE);
CREATE INDEX IF NOT EXISTS idx_entities_embedding ON entities(embedding_id);

CREATE TABLE IF NOT EXISTS entity_memories (
    entity_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    memory_id TEXT NOT NULL,
    PRIMARY KEY (entity_id, memory_id)
);

CREATE INDEX IF NOT EXISTS idx_entity_memories_memory ON entity_memories(memory_id);

CREATE TABLE IF NOT EXISTS relationships (
    id          TEXT PRIMARY KEY NOT NULL,
    source_id   TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    target_id   TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    rel_type    TEXT NOT NULL,
    strength    INTEGER NOT NULL DEFAULT 1,
    description TEXT NOT NULL DEFAULT '',
    UNIQUE (source_id, target_id, rel_type)
);

CREATE INDEX IF NOT EXISTS idx_relationships_source ON relationships(source_id);
CREATE INDEX IF NOT EXISTS idx_relationships_target ON relationships(target_id);

CREATE TABLE IF NOT EXISTS relationship_sources (
    relationship_id TEXT NOT NULL REFERENCES relationships(id) ON DELETE CASCADE,
    memory_id       TEXT NOT NULL,
    PRIMARY KEY (relationship_id, memory_id)
);

CREATE TABLE IF NOT EXISTS communities (
    id           TEXT PRIMARY KEY NOT NULL,
    level        INTEGER NOT NULL DEFAULT 0,
    parent_id    TEXT REFERENCES communities(id) ON DELETE SET NULL,
    entity_count INTEGER NOT NULL DEFAULT 0,
    modularity   REAL
);

CREATE TABLE IF NOT EXISTS community_members (
    community_id TEXT NOT NULL REFERENCES communities(id) ON DELETE CASCADE,
    entity_id    TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    PRIMARY KEY (community_id, entity_id)
);

CREATE TABLE IF NOT EXISTS community_reports (
    id           TEXT PRIMARY KEY NOT NULL,
    community_id TEXT NOT NULL REFERENCES communities(id) ON DELETE CASCADE,
    title        TEXT NOT NULL,
    summary      TEXT NOT NULL,
    full_content TEXT NOT NULL,
    key_findings TEXT NOT NULL DEFAULT '[]',
    rating       REAL,
    embedding_id TEXT
);

CREATE INDEX IF NOT EXISTS idx_reports_embedding ON community_reports(embedding_id);

CREATE TABLE IF NOT EXISTS code_nodes (
    id        TEXT PRIMARY KEY NOT NULL,
    name      TEXT NOT NULL,
    kind      TEXT NOT NULL,
    signature TEXT NOT NULL DEFAULT '',
    summary   TEXT,
    file      TEXT
);

CREATE INDEX IF NOT EXISTS idx_code_nodes_name ON code_nodes(name);

CREATE TABLE IF NOT EXISTS code_edges (
    source_id TEXT NOT NULL REFERENCES code_nodes(id) ON DELETE CASCADE,
    target_id TEXT NOT NULL REFERENCES code_nodes(id) ON DELETE CASCADE,
    kind      TEXT NOT NULL,
    PRIMARY KEY (source_id, target_id, kind)
);

CREATE INDEX IF NOT EXISTS idx_code_edges_target ON code_edges(target_id, kind);
"#;

fn ts_to_dt(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
}

fn entity_from_row(row: &Row<'_>) -> rusqlite::Result<Entity> {
    let type_raw: String = row.get("entity_type")?;
    Ok(Entity {
        id: row.get("id")?,
        canonical_name: row.get("canonical_name")?,
        entity_type: EntityType::parse(&type_raw),
        description: row.get("description")?,
        mention_count: row.get("mention_count")?,
        extraction_confidence: row.get("extraction_confidence")?,
        first_seen_at: ts_to_dt(row.get("first_seen_at")?),
        last_seen_at: ts_to_dt(row.get("last_seen_at")?),
        embedding_id: row.get("embedding_id")?,
    })
}

fn relationship_from_row(row: &Row<'_>) -> rusqlite::Result<Relationship> {
    Ok(Relationship {
        id: row.get("id")?,
        source_id: row.get("source_id")?,
        target_id: row.get("target_id")?,
        rel_type: row.get("rel_type")?,
        strength: row.get("strength")?,
        description: row.get("description")?,
    })
}

fn code_node_from_row(row: &Row<'_>) -> rusqlite::Result<CodeNode> {
    let kind_raw: String = row.get("kind")?;
    Ok(CodeNode {
        id: row.get("id")?,
        name: row.get("name")?,
        kind: CodeNodeKind::parse(&kind_raw).unwrap_or(CodeNodeKind::Function),
        signature: row.get("signature")?,
        summary: row.get("summary")?,
        file: row.get("file")?,
    })
}

fn report_from_row(row: &Row<'_>) -> rusqlite::Result<CommunityReport> {
    let findings_raw: String = row.get("key_findings")?;
    Ok(CommunityReport {
        id: row.get("id")?,
        community_id: row.get("community_id")?,
        title: row.get("title")?,
        summary: row.get("summary")?,
        full_content: row.get("full_content")?,
        key_findings: serde_json::from_str(&findings_raw).unwrap_or_default(),
        rating: row.get("rating")?,
        embedding_id: row.get("embedding_id")?,
    })
}

/// Graph storage adapter over the shared database handle
pub struct GraphStorage {
    conn: Arc<Mutex<Connection>>,
}

impl GraphStorage {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    // === Entities ===

    pub async fn upsert_entity(&self, entity: &Entity) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO entities (
                id, canonical_name, entity_type, description, mention_count,
                extraction_confidence, first_seen_at, last_seen_at, embedding_id
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                canonical_name = excluded.canonical_name,
                entity_type = excluded.entity_type,
                description = excluded.description,
                mention_count = excluded.mention_count,
                extraction_confidence = excluded.extraction_confidence,
                last_seen_at = excluded.last_seen_at,
                embedding_id = excluded.embedding_id",
            params![
                entity.id,
                entity.canonical_name,
                entity.entity_type.as_str(),
                entity.description,
                entity.mention_count,
                entity.extraction_confidence,
                entity.first_seen_at.timestamp(),
                entity.last_seen_at.timestamp(),
                entity.embedding_id,
            ],
        )
        .map_err(|e| EngramError::Database(format!("Failed to upsert entity: {}", e)))?;
        Ok(())
    }

    pub async fn get_entity(&self, id: &str) -> Result<Option<Entity>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT * FROM entities WHERE id = ?1",
            params![id],
            entity_from_row,
        )
        .optional()
        .map_err(|e| EngramError::Database(format!("Failed to load entity: {}", e)))
    }

    /// Case-insensitive lookup by canonical name
    pub async fn get_entity_by_name(&self, name: &str) -> Result<Option<Entity>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT * FROM entities WHERE canonical_name = ?1 COLLATE NOCASE",
            params![name],
            entity_from_row,
        )
        .optional()
        .map_err(|e| EngramError::Database(format!("Failed to load entity by name: {}", e)))
    }

    pub async fn get_entity_by_embedding_id(&self, embedding_id: &str) -> Result<Option<Entity>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT * FROM entities WHERE embedding_id = ?1",
            params![embedding_id],
            entity_from_row,
        )
        .optional()
        .map_err(|e| EngramError::Database(format!("Failed to load entity by embedding: {}", e)))
    }

    pub async fn link_entity_memory(&self, entity_id: &str, memory_id: &MemoryId) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR IGNORE INTO entity_memories (entity_id, memory_id) VALUES (?1, ?2)",
            params![entity_id, memory_id.to_string()],
        )
        .map_err(|e| EngramError::Database(format!("Failed to link entity to memory: {}", e)))?;
        Ok(())
    }

    /// Memory ids whose content mentions the entity
    pub async fn memories_for_entity(&self, entity_id: &str) -> Result<Vec<MemoryId>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT memory_id FROM entity_memories WHERE entity_id = ?1 ORDER BY memory_id",
            )
            .map_err(|e| EngramError::Database(format!("Failed to prepare query: {}", e)))?;
        let rows = stmt
            .query_map(params![entity_id], |row| {
                row.get::<_, String>(0).map(MemoryId::new)
            })
            .map_err(|e| EngramError::Database(format!("Failed to query links: {}", e)))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| EngramError::Database(format!("Failed to read links: {}", e)))
    }

    pub async fn count_entities(&self) -> Result<usize> {
        let conn = self.conn.lock().await;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM entities", [], |row| row.get(0))
            .map_err(|e| EngramError::Database(format!("Failed to count entities: {}", e)))?;
        Ok(count as usize)
    }

    // === Relationships ===

    pub async fn upsert_relationship(&self, relationship: &Relationship) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO relationships (id, source_id, target_id, rel_type, strength, description)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(source_id, target_id, rel_type) DO UPDATE SET
                strength = excluded.strength,
                description = excluded.description",
            params![
                relationship.id,
                relationship.source_id,
                relationship.target_id,
                relationship.rel_type,
                relationship.strength,
                relationship.description,
            ],
        )
        .map_err(|e| EngramError::Database(format!("Failed to upsert relationship: {}", e)))?;
        Ok(())
    }

    pub async fn link_relationship_source(
        &self,
        relationship_id: &str,
        memory_id: &MemoryId,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR IGNORE INTO relationship_sources (relationship_id, memory_id)
             VALUES (?1, ?2)",
            params![relationship_id, memory_id.to_string()],
        )
        .map_err(|e| {
            EngramError::Database(format!("Failed to link relationship source: {}", e))
        })?;
        Ok(())
    }

    /// Relationships touching the entity in either direction with at least
    /// the given strength
    pub async fn relationships_touching(
        &self,
        entity_id: &str,
        min_strength: i32,
    ) -> Result<Vec<Relationship>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT * FROM relationships
                 WHERE (source_id = ?1 OR target_id = ?1) AND strength >= ?2
                 ORDER BY strength DESC, id",
            )
            .map_err(|e| EngramError::Database(format!("Failed to prepare query: {}", e)))?;
        let rows = stmt
            .query_map(params![entity_id, min_strength], relationship_from_row)
            .map_err(|e| EngramError::Database(format!("Failed to query relationships: {}", e)))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| EngramError::Database(format!("Failed to read relationships: {}", e)))
    }

    pub async fn count_relationships(&self) -> Result<usize> {
        let conn = self.conn.lock().await;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM relationships", [], |row| row.get(0))
            .map_err(|e| EngramError::Database(format!("Failed to count relationships: {}", e)))?;
        Ok(count as usize)
    }

    // === Communities & reports ===

    pub async fn upsert_community(&self, community: &Community) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn
            .transaction()
            .map_err(|e| EngramError::Database(format!("Failed to begin transaction: {}", e)))?;
        tx.execute(
            "INSERT OR REPLACE INTO communities (id, level, parent_id, entity_count, modularity)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                community.id,
                community.level,
                community.parent_id,
                community.entity_count,
                community.modularity,
            ],
        )
        .map_err(|e| EngramError::Database(format!("Failed to upsert community: {}", e)))?;
        for entity_id in &community.member_entity_ids {
            tx.execute(
                "INSERT OR IGNORE INTO community_members (community_id, entity_id)
                 VALUES (?1, ?2)",
                params![community.id, entity_id],
            )
            .map_err(|e| EngramError::Database(format!("Failed to add member: {}", e)))?;
        }
        tx.commit()
            .map_err(|e| EngramError::Database(format!("Failed to commit community: {}", e)))?;
        Ok(())
    }

    pub async fn get_community(&self, id: &str) -> Result<Option<Community>> {
        let conn = self.conn.lock().await;
        let community = conn
            .query_row(
                "SELECT id, level, parent_id, entity_count, modularity
                 FROM communities WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Community {
                        id: row.get(0)?,
                        level: row.get(1)?,
                        parent_id: row.get(2)?,
                        entity_count: row.get(3)?,
                        modularity: row.get(4)?,
                        member_entity_ids: Vec::new(),
                    })
                },
            )
            .optional()
            .map_err(|e| EngramError::Database(format!("Failed to load community: {}", e)))?;

        let Some(mut community) = community else {
            return Ok(None);
        };

        let mut stmt = conn
            .prepare(
                "SELECT entity_id FROM community_members WHERE community_id = ?1 ORDER BY entity_id",
            )
            .map_err(|e| EngramError::Database(format!("Failed to prepare query: {}", e)))?;
        let rows = stmt
            .query_map(params![id], |row| row.get::<_, String>(0))
            .map_err(|e| EngramError::Database(format!("Failed to query members: {}", e)))?;
        community.member_entity_ids = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| EngramError::Database(format!("Failed to read members: {}", e)))?;
        Ok(Some(community))
    }

    pub async fn upsert_report(&self, report: &CommunityReport) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO community_reports (
                id, community_id, title, summary, full_content, key_findings,
                rating, embedding_id
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                report.id,
                report.community_id,
                report.title,
                report.summary,
                report.full_content,
                serde_json::to_string(&report.key_findings)?,
                report.rating,
                report.embedding_id,
            ],
        )
        .map_err(|e| EngramError::Database(format!("Failed to upsert report: {}", e)))?;
        Ok(())
    }

    pub async fn get_report(&self, id: &str) -> Result<Option<CommunityReport>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT * FROM community_reports WHERE id = ?1",
            params![id],
            report_from_row,
        )
        .optional()
        .map_err(|e| EngramError::Database(format!("Failed to load report: {}", e)))
    }

    pub async fn get_report_by_embedding_id(
        &self,
        embedding_id: &str,
    ) -> Result<Option<CommunityReport>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT * FROM community_reports WHERE embedding_id = ?1",
            params![embedding_id],
            report_from_row,
        )
        .optional()
        .map_err(|e| EngramError::Database(format!("Failed to load report by embedding: {}", e)))
    }

    /// Memory ids backing a community report: every memory linked to a
    /// member entity of the report's community
    pub async fn memories_for_report(&self, report_id: &str) -> Result<Vec<MemoryId>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT DISTINCT em.memory_id
                 FROM community_reports r
                 JOIN community_members cm ON cm.community_id = r.community_id
                 JOIN entity_memories em ON em.entity_id = cm.entity_id
                 WHERE r.id = ?1
                 ORDER BY em.memory_id",
            )
            .map_err(|e| EngramError::Database(format!("Failed to prepare query: {}", e)))?;
        let rows = stmt
            .query_map(params![report_id], |row| {
                row.get::<_, String>(0).map(MemoryId::new)
            })
            .map_err(|e| EngramError::Database(format!("Failed to query report sources: {}", e)))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| EngramError::Database(format!("Failed to read report sources: {}", e)))
    }

    // === Code graph ===

    pub async fn upsert_code_node(&self, node: &CodeNode) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO code_nodes (id, name, kind, signature, summary, file)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                node.id,
                node.name,
                node.kind.as_str(),
                node.signature,
                node.summary,
                node.file,
            ],
        )
        .map_err(|e| EngramError::Database(format!("Failed to upsert code node: {}", e)))?;
        Ok(())
    }

    pub async fn upsert_code_edge(
        &self,
        source_id: &str,
        target_id: &str,
        kind: CodeEdgeKind,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR IGNORE INTO code_edges (source_id, target_id, kind) VALUES (?1, ?2, ?3)",
            params![source_id, target_id, kind.as_str()],
        )
        .map_err(|e| EngramError::Database(format!("Failed to upsert code edge: {}", e)))?;
        Ok(())
    }

    /// Exact-name lookup; ambiguous names resolve to the lexically first id
    pub async fn get_code_node_by_name(&self, name: &str) -> Result<Option<CodeNode>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT * FROM code_nodes WHERE name = ?1 ORDER BY id LIMIT 1",
            params![name],
            code_node_from_row,
        )
        .optional()
        .map_err(|e| EngramError::Database(format!("Failed to load code node: {}", e)))
    }

    /// Nodes that call the given node
    pub async fn callers_of(&self, node_id: &str) -> Result<Vec<CodeNode>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT n.* FROM code_nodes n
                 JOIN code_edges e ON e.source_id = n.id
                 WHERE e.target_id = ?1 AND e.kind = 'call'
                 ORDER BY n.name",
            )
            .map_err(|e| EngramError::Database(format!("Failed to prepare query: {}", e)))?;
        let rows = stmt
            .query_map(params![node_id], code_node_from_row)
            .map_err(|e| EngramError::Database(format!("Failed to query callers: {}", e)))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| EngramError::Database(format!("Failed to read callers: {}", e)))
    }

    /// Nodes the given node calls
    pub async fn callees_of(&self, node_id: &str) -> Result<Vec<CodeNode>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT n.* FROM code_nodes n
                 JOIN code_edges e ON e.target_id = n.id
                 WHERE e.source_id = ?1 AND e.kind = 'call'
                 ORDER BY n.name",
            )
            .map_err(|e| EngramError::Database(format!("Failed to prepare query: {}", e)))?;
        let rows = stmt
            .query_map(params![node_id], code_node_from_row)
            .map_err(|e| EngramError::Database(format!("Failed to query callees: {}", e)))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| EngramError::Database(format!("Failed to read callees: {}", e)))
    }

    /// Implementations of an interface/abstract node
    pub async fn implementations_of(&self, node_id: &str) -> Result<Vec<CodeNode>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT n.* FROM code_nodes n
                 JOIN code_edges e ON e.source_id = n.id
                 WHERE e.target_id = ?1 AND e.kind = 'implements'
                 ORDER BY n.name",
            )
            .map_err(|e| EngramError::Database(format!("Failed to prepare query: {}", e)))?;
        let rows = stmt
            .query_map(params![node_id], code_node_from_row)
            .map_err(|e| EngramError::Database(format!("Failed to query implementations: {}", e)))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| EngramError::Database(format!("Failed to read implementations: {}", e)))
    }

    #[cfg(test)]
    pub(crate) fn sample_entity(&self, id: &str, name: &str) -> Entity {
        Entity {
            id: id.to_string(),
            canonical_name: name.to_string(),
            entity_type: EntityType::Technology,
            description: format!("{} description", name),
            mention_count: 1,
            extraction_confidence: 0.9,
            first_seen_at: Utc::now(),
            last_seen_at: Utc::now(),
            embedding_id: None,
        }
    }
}

//! Common test utilities and fixtures

use engram_core::bench::fixtures::{
    seed_sample_project, HashEmbeddingClient, InMemoryVectorStore,
};
use engram_core::{
    EmbeddingClient, Memory, MemoryKind, SqliteStorage, StorageBackend, VectorStore,
};
use std::sync::Arc;

/// A complete in-process world: storage, vector index, embeddings
pub struct TestWorld {
    pub storage: Arc<dyn StorageBackend>,
    pub vectors: Arc<dyn VectorStore>,
    pub embeddings: Arc<dyn EmbeddingClient>,
}

/// Empty world with in-memory backends
#[allow(dead_code)]
pub fn empty_world() -> TestWorld {
    TestWorld {
        storage: Arc::new(SqliteStorage::in_memory().expect("in-memory storage")),
        vectors: Arc::new(InMemoryVectorStore::new()),
        embeddings: Arc::new(HashEmbeddingClient::new_standard()),
    }
}

/// World seeded with the sample project (memories, knowledge graph, code
/// graph)
pub async fn seeded_world() -> TestWorld {
    let world = empty_world();
    seed_sample_project(&world.storage, &world.vectors, &world.embeddings)
        .await
        .expect("seed sample project");
    world
}

/// A memory with controlled tags and importance
#[allow(dead_code)]
pub fn make_memory(id: &str, title: &str, body: &str, tags: &[&str], importance: f32) -> Memory {
    let mut memory = Memory::new(id, MemoryKind::Note, title, body);
    memory.tags = tags.iter().map(|t| t.to_string()).collect();
    memory.importance = importance;
    memory
}

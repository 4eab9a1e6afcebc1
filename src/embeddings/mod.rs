//! Embedding client interface for vector similarity search
//!
//! Concrete providers (remote APIs, local ONNX models) live behind the
//! [`EmbeddingClient`] trait; the core only holds shared handles to it.

use crate::error::Result;
use async_trait::async_trait;

/// Embedding client trait defining required operations
///
/// Vectors have a fixed, configured dimension; provider failures surface as
/// [`crate::error::EngramError::Embedding`].
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts (batched)
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Get embedding dimensionality
    fn dimensions(&self) -> usize;

    /// Get model name
    fn model_name(&self) -> &str;
}

/// Cosine similarity between two embedding vectors
///
/// Used to compare hypothesis embeddings during drift search and by the
/// in-memory index scan. Mismatched dimensions and zero-magnitude vectors
/// score 0 rather than erroring; comparisons are only meaningful between
/// vectors from the same model.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denominator = norm_a.sqrt() * norm_b.sqrt();
    if denominator == 0.0 {
        return 0.0;
    }
    dot / denominator
}

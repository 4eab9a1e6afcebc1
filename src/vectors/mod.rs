//! Vector index interface
//!
//! The concrete ANN index lives behind the [`VectorStore`] trait; the core
//! treats it as a shared, thread-safe handle. The default similarity is
//! cosine and scores are comparable within a single index.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Payload type marker for memory embeddings
pub const PAYLOAD_TYPE_MEMORY: &str = "MEMORY";

/// Payload type marker for entity embeddings
pub const PAYLOAD_TYPE_GRAPHRAG_ENTITY: &str = "GRAPHRAG_ENTITY";

/// Payload type marker for community-report embeddings
pub const PAYLOAD_TYPE_GRAPHRAG_REPORT: &str = "GRAPHRAG_REPORT";

/// One filter condition evaluated against a hit payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum FilterCondition {
    /// payload[key] equals value
    Match { key: String, value: Value },

    /// payload[key] equals any listed value; when payload[key] is an array,
    /// any intersection satisfies the condition
    MatchAny { key: String, values: Vec<Value> },

    /// payload[key] interpreted as a number is >= value
    RangeGte { key: String, value: f64 },
}

/// AND-combination of filter conditions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorFilter {
    pub conditions: Vec<FilterCondition>,
}

impl VectorFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn match_value(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.conditions.push(FilterCondition::Match {
            key: key.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn match_any(mut self, key: &str, values: Vec<Value>) -> Self {
        self.conditions.push(FilterCondition::MatchAny {
            key: key.to_string(),
            values,
        });
        self
    }

    pub fn range_gte(mut self, key: &str, value: f64) -> Self {
        self.conditions.push(FilterCondition::RangeGte {
            key: key.to_string(),
            value,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Evaluate the filter against a payload object
    ///
    /// Shared by in-memory implementations and tests so every backend agrees
    /// on the predicate semantics. A missing key fails its condition.
    pub fn matches(&self, payload: &Value) -> bool {
        self.conditions.iter().all(|c| match c {
            FilterCondition::Match { key, value } => payload.get(key) == Some(value),
            FilterCondition::MatchAny { key, values } => match payload.get(key) {
                Some(Value::Array(items)) => items.iter().any(|item| values.contains(item)),
                Some(item) => values.contains(item),
                None => false,
            },
            FilterCondition::RangeGte { key, value } => payload
                .get(key)
                .and_then(|v| v.as_f64())
                .map(|v| v >= *value)
                .unwrap_or(false),
        })
    }
}

/// One ANN search hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorHit {
    /// Vector id
    pub id: String,

    /// Similarity score (cosine by default)
    pub score: f32,

    /// Backing memory id, when the payload carries one
    pub memory_id: Option<String>,

    /// Arbitrary payload stored at upsert time
    pub payload: Value,
}

/// Vector index trait defining required operations
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Prepare the index (create collections, load extensions)
    async fn initialize(&self) -> Result<()>;

    /// Insert or replace a vector with its payload
    async fn upsert(&self, id: &str, vector: Vec<f32>, payload: Value) -> Result<()>;

    /// Approximate-nearest-neighbour search with an optional filter
    /// predicate, returning at most `limit` hits ordered by descending score
    async fn search(
        &self,
        vector: &[f32],
        filter: Option<&VectorFilter>,
        limit: usize,
    ) -> Result<Vec<VectorHit>>;

    /// Delete a vector by id (missing ids are a no-op)
    async fn delete(&self, id: &str) -> Result<()>;

    /// Delete every vector whose payload matches the filter
    async fn delete_by_filter(&self, filter: &VectorFilter) -> Result<()>;

    /// Release resources
    async fn close(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = VectorFilter::new();
        assert!(filter.matches(&json!({"type": "MEMORY"})));
    }

    #[test]
    fn test_match_condition() {
        let filter = VectorFilter::new().match_value("type", PAYLOAD_TYPE_MEMORY);
        assert!(filter.matches(&json!({"type": "MEMORY"})));
        assert!(!filter.matches(&json!({"type": "GRAPHRAG_REPORT"})));
        assert!(!filter.matches(&json!({})));
    }

    #[test]
    fn test_match_any_intersects_arrays() {
        let filter =
            VectorFilter::new().match_any("tags", vec![json!("auth"), json!("database")]);
        assert!(filter.matches(&json!({"tags": ["database", "infra"]})));
        assert!(filter.matches(&json!({"tags": "auth"})));
        assert!(!filter.matches(&json!({"tags": ["ui"]})));
        assert!(!filter.matches(&json!({"other": ["auth"]})));
    }

    #[test]
    fn test_range_gte() {
        let filter = VectorFilter::new().range_gte("importance", 0.7);
        assert!(filter.matches(&json!({"importance": 0.7})));
        assert!(filter.matches(&json!({"importance": 0.9})));
        assert!(!filter.matches(&json!({"importance": 0.5})));
        assert!(!filter.matches(&json!({"importance": "high"})));
    }

    #[test]
    fn test_conditions_are_anded() {
        let filter = VectorFilter::new()
            .match_value("type", PAYLOAD_TYPE_MEMORY)
            .range_gte("importance", 0.5);
        assert!(filter.matches(&json!({"type": "MEMORY", "importance": 0.8})));
        assert!(!filter.matches(&json!({"type": "MEMORY", "importance": 0.2})));
        assert!(!filter.matches(&json!({"type": "OTHER", "importance": 0.8})));
    }
}

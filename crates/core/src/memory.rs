//! Conversational memory — records, retrieval results, and the embedding
//! and vector-store seams.
//!
//! The vector index itself is an external collaborator. The core only
//! assumes it returns cosine distances in `[0, 2]` together with the
//! metadata that was upserted alongside each vector.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::error::MemoryError;

/// One remembered exchange. Created after each successful generation and
/// never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Unique ID for this memory
    pub id: String,

    /// What the user asked
    pub user_text: String,

    /// What the assistant answered
    pub assistant_text: String,

    /// Vector for the exchange (held by the vector store, not the metadata)
    #[serde(skip)]
    pub embedding: Vec<f32>,

    /// When the exchange happened
    pub timestamp: DateTime<Utc>,

    /// Difficulty recorded for the original query (1–100)
    pub difficulty: u8,

    /// Model that produced the answer
    pub model_id: String,
}

impl MemoryRecord {
    /// Text used for embedding and overlap comparisons.
    pub fn content(&self) -> String {
        format!("{}\n{}", self.user_text, self.assistant_text)
    }

    /// Metadata map stored next to the vector.
    pub fn to_metadata(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }

    /// Rebuild a record from vector-store metadata. Returns `None` when the
    /// metadata was not written by [`MemoryRecord::to_metadata`].
    pub fn from_metadata(metadata: &serde_json::Map<String, serde_json::Value>) -> Option<Self> {
        serde_json::from_value(serde_json::Value::Object(metadata.clone())).ok()
    }

    /// Age in fractional days relative to `now`, never negative.
    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        let secs = now.signed_duration_since(self.timestamp).num_milliseconds() as f64 / 1000.0;
        (secs / 86_400.0).max(0.0)
    }
}

/// A raw nearest-neighbour hit from the vector store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorHit {
    pub id: String,

    /// Cosine distance in `[0, 2]` (0 = identical direction)
    pub distance: f32,

    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// A ranked memory for one query. Ephemeral, never persisted.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub record: MemoryRecord,
    pub similarity: f32,
    pub recency: f32,
    pub difficulty_proximity: f32,
    pub hybrid: f32,
}

/// Turns text into a vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// The embedder name (e.g., "text-embedding-3-small", "hash").
    fn name(&self) -> &str;

    /// Encode one text.
    async fn encode(&self, text: &str) -> std::result::Result<Vec<f32>, MemoryError>;
}

/// Nearest-neighbour storage for memory vectors.
///
/// Implementations: in-memory and JSONL file in `switchyard-memory`;
/// external databases in the hosting application.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// The backend name (e.g., "in_memory", "file").
    fn name(&self) -> &str;

    /// Insert or replace a vector and its metadata.
    async fn upsert(
        &self,
        id: &str,
        vector: Vec<f32>,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> std::result::Result<(), MemoryError>;

    /// Return up to `top_k` hits ordered by ascending distance.
    async fn query(&self, vector: &[f32], top_k: usize) -> std::result::Result<Vec<VectorHit>, MemoryError>;

    /// Get total vector count.
    async fn count(&self) -> std::result::Result<usize, MemoryError>;
}

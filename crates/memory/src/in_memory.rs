//! In-memory vector store — useful for testing and ephemeral sessions.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use switchyard_core::error::MemoryError;
use switchyard_core::memory::{VectorHit, VectorStore};
use tokio::sync::RwLock;

use crate::vector::{StoredVector, rank_stored};

/// Brute-force cosine index held in a map.
pub struct InMemoryVectorStore {
    entries: Arc<RwLock<HashMap<String, StoredVector>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn upsert(
        &self,
        id: &str,
        vector: Vec<f32>,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), MemoryError> {
        if vector.is_empty() {
            return Err(MemoryError::Storage("refusing to store an empty vector".into()));
        }
        self.entries.write().await.insert(
            id.to_string(),
            StoredVector {
                id: id.to_string(),
                vector,
                metadata,
            },
        );
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<VectorHit>, MemoryError> {
        let entries = self.entries.read().await;
        Ok(rank_stored(vector, &entries, top_k))
    }

    async fn count(&self) -> Result<usize, MemoryError> {
        Ok(self.entries.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(tag: &str) -> serde_json::Map<String, serde_json::Value> {
        let mut m = serde_json::Map::new();
        m.insert("tag".into(), serde_json::json!(tag));
        m
    }

    #[tokio::test]
    async fn upsert_and_query_nearest() {
        let store = InMemoryVectorStore::new();
        store.upsert("x", vec![1.0, 0.0], meta("x")).await.unwrap();
        store.upsert("y", vec![0.0, 1.0], meta("y")).await.unwrap();

        let hits = store.query(&[0.9, 0.1], 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "x");
        assert_eq!(hits[0].metadata["tag"], "x");
    }

    #[tokio::test]
    async fn upsert_replaces_existing_id() {
        let store = InMemoryVectorStore::new();
        store.upsert("x", vec![1.0, 0.0], meta("old")).await.unwrap();
        store.upsert("x", vec![0.0, 1.0], meta("new")).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        let hits = store.query(&[0.0, 1.0], 5).await.unwrap();
        assert_eq!(hits[0].metadata["tag"], "new");
        assert!(hits[0].distance < 1e-6);
    }

    #[tokio::test]
    async fn empty_vector_is_rejected() {
        let store = InMemoryVectorStore::new();
        assert!(store.upsert("x", vec![], meta("x")).await.is_err());
        assert_eq!(store.count().await.unwrap(), 0);
    }
}

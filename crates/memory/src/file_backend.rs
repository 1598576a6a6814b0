//! File-based vector store — persistent JSON-lines storage.
//!
//! Each line is one `{id, vector, metadata}` object. Entries are loaded into
//! memory on creation; upserts append one line, and the in-memory entry only
//! changes once that line is on disk. A later line for the same id replaces
//! an earlier one, so hand-appended lines also work. Opening a file with
//! superseded or corrupt lines rewrites it compacted.
//!
//! Storage location: `<data_dir>/memories.jsonl`

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use switchyard_core::error::MemoryError;
use switchyard_core::memory::{VectorHit, VectorStore};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::vector::{StoredVector, rank_stored};

/// A file-backed vector store using JSONL (one JSON object per line).
pub struct FileVectorStore {
    path: PathBuf,
    entries: Arc<RwLock<HashMap<String, StoredVector>>>,
}

impl FileVectorStore {
    /// Open the store at `path`. A missing file starts empty and is created
    /// on the first write.
    pub fn new(path: PathBuf) -> Self {
        let entries = Self::load_from_disk(&path);
        debug!(path = %path.display(), count = entries.len(), "File vector store loaded");
        Self {
            path,
            entries: Arc::new(RwLock::new(entries)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_from_disk(path: &Path) -> HashMap<String, StoredVector> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return HashMap::new(),
        };

        let mut lines = 0;
        let entries: HashMap<String, StoredVector> = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .inspect(|_| lines += 1)
            .filter_map(|line| match serde_json::from_str::<StoredVector>(line) {
                Ok(entry) => Some((entry.id.clone(), entry)),
                Err(e) => {
                    warn!(error = %e, "Skipping corrupted vector entry");
                    None
                }
            })
            .collect();

        if lines > entries.len() {
            match Self::compact(path, &entries) {
                Ok(()) => info!(
                    path = %path.display(),
                    dropped = lines - entries.len(),
                    "Memory file compacted"
                ),
                Err(e) => warn!(path = %path.display(), error = %e, "Memory file compaction failed"),
            }
        }
        entries
    }

    /// Rewrite the file with one line per entry, via a temp file.
    fn compact(path: &Path, entries: &HashMap<String, StoredVector>) -> Result<(), MemoryError> {
        let mut ordered: Vec<&StoredVector> = entries.values().collect();
        ordered.sort_by(|a, b| a.id.cmp(&b.id));

        let mut content = String::new();
        for entry in ordered {
            content.push_str(&encode_line(entry)?);
        }

        let tmp = path.with_extension("jsonl.tmp");
        std::fs::write(&tmp, content)
            .and_then(|()| std::fs::rename(&tmp, path))
            .map_err(|e| MemoryError::Storage(format!("Failed to compact memory file: {e}")))
    }

    /// Append one line to the file.
    async fn append(&self, line: &str) -> Result<(), MemoryError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                MemoryError::Storage(format!("Failed to create memory directory: {e}"))
            })?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to open memory file: {e}")))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to write memory file: {e}")))?;
        file.flush()
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to write memory file: {e}")))
    }
}

fn encode_line(entry: &StoredVector) -> Result<String, MemoryError> {
    let mut line = serde_json::to_string(entry)
        .map_err(|e| MemoryError::Storage(format!("Failed to serialize vector entry: {e}")))?;
    line.push('\n');
    Ok(line)
}

#[async_trait]
impl VectorStore for FileVectorStore {
    fn name(&self) -> &str {
        "file"
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
        let entry = StoredVector {
            id: id.to_string(),
            vector,
            metadata,
        };
        let line = encode_line(&entry)?;

        // Held across the append so file order matches map order.
        let mut entries = self.entries.write().await;
        self.append(&line).await?;
        entries.insert(entry.id.clone(), entry);
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

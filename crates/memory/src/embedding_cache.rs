//! Two-tier embedding cache: a TTL map in memory, snapshotted to disk.
//!
//! Reads take a shared lock and never touch disk. Expired entries are
//! swept every [`PRUNE_EVERY`] insertions. Every `flush_every` insertions a
//! background task copies the live entries, serializes them and writes the
//! snapshot; snapshot writes are serialized and an older snapshot never
//! overwrites a newer one. [`EmbeddingCache::flush`] writes in the caller's
//! task and is meant for shutdown.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use switchyard_config::CacheConfig;
use switchyard_core::error::MemoryError;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

const SNAPSHOT_VERSION: u32 = 1;

/// Insertions between sweeps of expired entries.
pub const PRUNE_EVERY: usize = 256;

/// Cache key for `text` embedded by `model`.
pub fn content_key(model: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    vector: Vec<f32>,
    created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    entries: HashMap<String, CacheEntry>,
}

/// Hit/miss counters and current size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub len: usize,
}

type Entries = Arc<RwLock<HashMap<String, CacheEntry>>>;

pub struct EmbeddingCache {
    entries: Entries,
    ttl: chrono::Duration,
    flush_every: usize,
    path: Option<PathBuf>,
    inserts_since_flush: AtomicUsize,
    inserts_since_prune: AtomicUsize,
    hits: AtomicU64,
    misses: AtomicU64,
    writer: Arc<SnapshotWriter>,
}

/// Serializes snapshot writes and drops stale ones.
#[derive(Default)]
struct SnapshotWriter {
    lock: Mutex<()>,
    next_seq: AtomicU64,
    written_seq: AtomicU64,
}

impl SnapshotWriter {
    async fn write(&self, path: &Path, seq: u64, bytes: Vec<u8>) -> Result<(), MemoryError> {
        let _guard = self.lock.lock().await;
        if seq <= self.written_seq.load(Ordering::Acquire) {
            debug!(seq, "Skipping stale cache snapshot");
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| MemoryError::Storage(format!("cache dir: {e}")))?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| MemoryError::Storage(format!("cache snapshot: {e}")))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| MemoryError::Storage(format!("cache snapshot: {e}")))?;

        self.written_seq.store(seq, Ordering::Release);
        Ok(())
    }
}

impl EmbeddingCache {
    /// In-memory only cache; `flush` is a no-op.
    pub fn ephemeral(ttl: Duration) -> Self {
        Self::build(ttl, usize::MAX, None, HashMap::new())
    }

    /// Open the cache, loading the snapshot at `path` if there is one.
    ///
    /// A missing, unreadable or corrupt snapshot starts an empty cache.
    pub fn open(ttl: Duration, flush_every: usize, path: PathBuf) -> Self {
        let entries = load_snapshot(&path, chrono_ttl(ttl));
        info!(path = %path.display(), entries = entries.len(), "Embedding cache opened");
        Self::build(ttl, flush_every.max(1), Some(path), entries)
    }

    pub fn from_config(config: &CacheConfig, path: PathBuf) -> Self {
        Self::open(Duration::from_secs(config.ttl_secs), config.flush_every, path)
    }

    fn build(
        ttl: Duration,
        flush_every: usize,
        path: Option<PathBuf>,
        entries: HashMap<String, CacheEntry>,
    ) -> Self {
        Self {
            entries: Arc::new(RwLock::new(entries)),
            ttl: chrono_ttl(ttl),
            flush_every,
            path,
            inserts_since_flush: AtomicUsize::new(0),
            inserts_since_prune: AtomicUsize::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writer: Arc::new(SnapshotWriter::default()),
        }
    }

    /// Look up a vector. Expired entries count as misses.
    pub async fn get(&self, key: &str) -> Option<Vec<f32>> {
        self.get_at(key, Utc::now()).await
    }

    async fn get_at(&self, key: &str, now: DateTime<Utc>) -> Option<Vec<f32>> {
        let found = self
            .entries
            .read()
            .await
            .get(key)
            .filter(|e| is_live(e, self.ttl, now))
            .map(|e| e.vector.clone());

        match found {
            Some(vector) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(vector)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a vector, scheduling a snapshot every `flush_every` inserts.
    pub async fn insert(&self, key: String, vector: Vec<f32>) {
        self.insert_at(key, vector, Utc::now()).await;
    }

    async fn insert_at(&self, key: String, vector: Vec<f32>, now: DateTime<Utc>) {
        let sweep = self.inserts_since_prune.fetch_add(1, Ordering::AcqRel) + 1 >= PRUNE_EVERY;
        {
            let mut entries = self.entries.write().await;
            if sweep {
                self.inserts_since_prune.store(0, Ordering::Release);
                let before = entries.len();
                entries.retain(|_, e| is_live(e, self.ttl, now));
                debug!(pruned = before - entries.len(), "Expired embeddings swept");
            }
            entries.insert(
                key,
                CacheEntry {
                    vector,
                    created_at: now,
                },
            );
        }

        let inserted = self.inserts_since_flush.fetch_add(1, Ordering::AcqRel) + 1;
        if inserted >= self.flush_every {
            self.inserts_since_flush.store(0, Ordering::Release);
            self.spawn_flush();
        }
    }

    /// Schedule a snapshot. The copy, serialization and write all happen
    /// on the spawned task.
    fn spawn_flush(&self) {
        let Some(path) = self.path.clone() else { return };
        let seq = self.writer.next_seq.fetch_add(1, Ordering::AcqRel) + 1;
        let entries = self.entries.clone();
        let writer = self.writer.clone();
        let ttl = self.ttl;
        tokio::spawn(async move {
            let written = match encode_snapshot(&entries, ttl).await {
                Ok(bytes) => writer.write(&path, seq, bytes).await,
                Err(e) => Err(e),
            };
            match written {
                Ok(()) => debug!(seq, path = %path.display(), "Embedding cache snapshot written"),
                Err(e) => warn!(error = %e, "Embedding cache snapshot failed"),
            }
        });
    }

    /// Write a snapshot now and wait for it.
    pub async fn flush(&self) -> Result<(), MemoryError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        let seq = self.writer.next_seq.fetch_add(1, Ordering::AcqRel) + 1;
        let bytes = encode_snapshot(&self.entries, self.ttl).await?;
        self.writer.write(path, seq, bytes).await
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            len: self.entries.read().await.len(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

fn is_live(entry: &CacheEntry, ttl: chrono::Duration, now: DateTime<Utc>) -> bool {
    now.signed_duration_since(entry.created_at) < ttl
}

/// Copy the live entries out from under the read lock and serialize them.
async fn encode_snapshot(entries: &Entries, ttl: chrono::Duration) -> Result<Vec<u8>, MemoryError> {
    let now = Utc::now();
    let live: HashMap<String, CacheEntry> = entries
        .read()
        .await
        .iter()
        .filter(|(_, e)| is_live(e, ttl, now))
        .map(|(k, e)| (k.clone(), e.clone()))
        .collect();
    let snapshot = Snapshot {
        version: SNAPSHOT_VERSION,
        entries: live,
    };
    serde_json::to_vec(&snapshot)
        .map_err(|e| MemoryError::Storage(format!("cache serialization: {e}")))
}

fn chrono_ttl(ttl: Duration) -> chrono::Duration {
    chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX)
}

fn load_snapshot(path: &Path, ttl: chrono::Duration) -> HashMap<String, CacheEntry> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Cannot read embedding cache, starting empty");
            return HashMap::new();
        }
    };

    let snapshot: Snapshot = match serde_json::from_slice(&bytes) {
        Ok(s) => s,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Corrupt embedding cache, starting empty");
            return HashMap::new();
        }
    };
    if snapshot.version != SNAPSHOT_VERSION {
        warn!(version = snapshot.version, "Unknown embedding cache version, starting empty");
        return HashMap::new();
    }

    let now = Utc::now();
    snapshot
        .entries
        .into_iter()
        .filter(|(_, e)| is_live(e, ttl, now))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const WEEK: Duration = Duration::from_secs(7 * 24 * 3600);

    #[test]
    fn keys_depend_on_model_and_text() {
        let a = content_key("hash", "hello");
        assert_eq!(a.len(), 64);
        assert_eq!(a, content_key("hash", "hello"));
        assert_ne!(a, content_key("hash", "hello!"));
        assert_ne!(a, content_key("other", "hello"));
    }

    #[tokio::test]
    async fn hit_and_miss_counters() {
        let cache = EmbeddingCache::ephemeral(WEEK);
        assert!(cache.get("k").await.is_none());
        cache.insert("k".into(), vec![1.0, 2.0]).await;
        assert_eq!(cache.get("k").await, Some(vec![1.0, 2.0]));

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.len, 1);
    }

    #[tokio::test]
    async fn entries_expire_at_ttl() {
        let cache = EmbeddingCache::ephemeral(Duration::from_secs(60));
        let t0 = Utc::now();
        cache.insert_at("k".into(), vec![1.0], t0).await;

        assert!(cache.get_at("k", t0 + chrono::Duration::seconds(59)).await.is_some());
        assert!(cache.get_at("k", t0 + chrono::Duration::seconds(60)).await.is_none());
    }

    #[tokio::test]
    async fn expired_entries_are_swept_periodically() {
        let cache = EmbeddingCache::ephemeral(Duration::from_secs(60));
        let t0 = Utc::now();
        let later = t0 + chrono::Duration::seconds(120);
        cache.insert_at("old".into(), vec![1.0], t0).await;
        for i in 1..PRUNE_EVERY - 1 {
            cache.insert_at(format!("k{i}"), vec![2.0], later).await;
        }

        // Expired but not yet swept: invisible to reads, still held.
        assert!(cache.get_at("old", later).await.is_none());
        assert_eq!(cache.stats().await.len, PRUNE_EVERY - 1);

        cache.insert_at("last".into(), vec![3.0], later).await;
        assert_eq!(cache.stats().await.len, PRUNE_EVERY - 1);
        assert!(cache.get_at("last", later).await.is_some());
    }

    #[tokio::test]
    async fn lookups_only_need_the_shared_lock() {
        let cache = EmbeddingCache::ephemeral(WEEK);
        cache.insert("k".into(), vec![1.0]).await;

        let reader = cache.entries.read().await;
        let found = tokio::time::timeout(Duration::from_secs(1), cache.get("k"))
            .await
            .expect("lookup waited on an exclusive lock");
        drop(reader);

        assert_eq!(found, Some(vec![1.0]));
        assert_eq!(cache.stats().await.hits, 1);
    }

    #[tokio::test]
    async fn scheduled_snapshot_does_not_hold_up_insert() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("embedding_cache.json");
        let cache = EmbeddingCache::open(WEEK, 1, path.clone());

        // A snapshot write is in progress elsewhere.
        let busy = cache.writer.lock.lock().await;
        tokio::time::timeout(Duration::from_secs(1), cache.insert("a".into(), vec![1.0]))
            .await
            .expect("insert waited for the snapshot writer");
        assert!(!path.exists());
        drop(busy);

        for _ in 0..200 {
            if path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let reopened = EmbeddingCache::open(WEEK, 1, path);
        assert_eq!(reopened.get("a").await, Some(vec![1.0]));
    }

    #[tokio::test]
    async fn flush_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("embedding_cache.json");

        let cache = EmbeddingCache::open(WEEK, 100, path.clone());
        cache.insert("a".into(), vec![0.5, 0.5]).await;
        cache.insert("b".into(), vec![1.0, 0.0]).await;
        cache.flush().await.unwrap();

        let reopened = EmbeddingCache::open(WEEK, 100, path);
        assert_eq!(reopened.stats().await.len, 2);
        assert_eq!(reopened.get("a").await, Some(vec![0.5, 0.5]));
    }

    #[tokio::test]
    async fn periodic_flush_writes_in_background() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("embedding_cache.json");

        let cache = EmbeddingCache::open(WEEK, 2, path.clone());
        cache.insert("a".into(), vec![1.0]).await;
        assert!(!path.exists());
        cache.insert("b".into(), vec![2.0]).await;

        for _ in 0..200 {
            if path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let reopened = EmbeddingCache::open(WEEK, 2, path);
        assert_eq!(reopened.stats().await.len, 2);
    }

    #[tokio::test]
    async fn corrupt_snapshot_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("embedding_cache.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let cache = EmbeddingCache::open(WEEK, 10, path);
        assert_eq!(cache.stats().await.len, 0);
    }

    #[tokio::test]
    async fn expired_entries_are_dropped_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("embedding_cache.json");
        let stale = serde_json::json!({
            "version": 1,
            "entries": {
                "old": { "vector": [1.0], "created_at": "2020-01-01T00:00:00Z" },
                "fresh": { "vector": [2.0], "created_at": Utc::now() }
            }
        });
        std::fs::write(&path, serde_json::to_vec(&stale).unwrap()).unwrap();

        let cache = EmbeddingCache::open(WEEK, 10, path);
        assert_eq!(cache.stats().await.len, 1);
        assert!(cache.get("fresh").await.is_some());
    }

    #[tokio::test]
    async fn stale_snapshot_never_overwrites_newer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("embedding_cache.json");
        let writer = SnapshotWriter::default();

        writer.write(&path, 2, b"{\"newer\":true}".to_vec()).await.unwrap();
        writer.write(&path, 1, b"{\"older\":true}".to_vec()).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("newer"));
    }
}

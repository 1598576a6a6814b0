//! Hybrid memory retrieval.
//!
//! A query is embedded (through the [`EmbeddingCache`]), a fixed number of
//! nearest neighbours is fetched from the vector store, and each candidate
//! is scored on semantic similarity, recency and difficulty proximity.
//! Near-duplicates are dropped greedily before truncation.
//!
//! Retrieval never fails a request: embedder or store errors are logged and
//! yield an empty context.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use switchyard_config::RetrievalConfig;
use switchyard_core::error::MemoryError;
use switchyard_core::memory::{Embedder, MemoryRecord, RetrievalResult, VectorHit, VectorStore};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::embedding_cache::{CacheStats, EmbeddingCache, content_key};

/// Ranking knobs.
#[derive(Debug, Clone)]
pub struct RetrievalSettings {
    pub max_results: usize,
    pub min_similarity: f32,
    pub recency_window_days: f64,
    pub candidate_multiplier: usize,
    pub dedup_threshold: f32,
    pub difficulty_radius: Option<u8>,
    pub similarity_weight: f32,
    pub recency_weight: f32,
    pub difficulty_weight: f32,
}

impl From<&RetrievalConfig> for RetrievalSettings {
    fn from(c: &RetrievalConfig) -> Self {
        Self {
            max_results: c.max_results,
            min_similarity: c.min_similarity,
            recency_window_days: c.recency_window_days,
            candidate_multiplier: c.candidate_multiplier.max(1),
            dedup_threshold: c.dedup_threshold,
            difficulty_radius: c.difficulty_radius,
            similarity_weight: c.similarity_weight,
            recency_weight: c.recency_weight,
            difficulty_weight: c.difficulty_weight,
        }
    }
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self::from(&RetrievalConfig::default())
    }
}

/// One retrieval request. Unset limits fall back to the builder's settings.
#[derive(Debug, Clone, Default)]
pub struct RetrievalQuery {
    pub text: String,
    /// Difficulty of the query being answered, for proximity scoring
    pub difficulty: Option<u8>,
    /// Inclusive bounds on the remembered difficulty
    pub difficulty_range: Option<(u8, u8)>,
    pub max_results: Option<usize>,
    pub min_similarity: Option<f32>,
    pub recency_window_days: Option<f64>,
}

impl RetrievalQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_difficulty(mut self, difficulty: u8) -> Self {
        self.difficulty = Some(difficulty);
        self
    }

    pub fn with_difficulty_range(mut self, lo: u8, hi: u8) -> Self {
        self.difficulty_range = Some((lo.min(hi), lo.max(hi)));
        self
    }

    pub fn with_max_results(mut self, n: usize) -> Self {
        self.max_results = Some(n);
        self
    }

    pub fn with_min_similarity(mut self, s: f32) -> Self {
        self.min_similarity = Some(s);
        self
    }

    pub fn with_recency_window_days(mut self, days: f64) -> Self {
        self.recency_window_days = Some(days);
        self
    }
}

/// Retrieves and formats relevant past exchanges.
pub struct RetrievalContextBuilder {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    cache: EmbeddingCache,
    settings: RetrievalSettings,
}

impl RetrievalContextBuilder {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        cache: EmbeddingCache,
        settings: RetrievalSettings,
    ) -> Self {
        Self {
            embedder,
            store,
            cache,
            settings,
        }
    }

    pub fn settings(&self) -> &RetrievalSettings {
        &self.settings
    }

    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    pub fn embedder_name(&self) -> &str {
        self.embedder.name()
    }

    /// Embed `text`, serving repeats from the cache.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        let key = content_key(self.embedder.name(), text);
        if let Some(vector) = self.cache.get(&key).await {
            return Ok(vector);
        }

        let vector = self.embedder.encode(text).await?;
        self.cache.insert(key, vector.clone()).await;
        Ok(vector)
    }

    /// Ranked, deduplicated memories for `query`. Empty on any failure.
    pub async fn retrieve(&self, query: &RetrievalQuery) -> Vec<RetrievalResult> {
        let max_results = query.max_results.unwrap_or(self.settings.max_results);
        if max_results == 0 || query.text.trim().is_empty() {
            return Vec::new();
        }

        let vector = match self.embed(&query.text).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Embedding failed, continuing without memory");
                return Vec::new();
            }
        };

        let fetch = max_results * self.settings.candidate_multiplier;
        let hits = match self.store.query(&vector, fetch).await {
            Ok(h) => h,
            Err(e) => {
                warn!(store = self.store.name(), error = %e, "Vector store query failed, continuing without memory");
                return Vec::new();
            }
        };

        let fetched = hits.len();
        let results = self.rank(hits, query, max_results, Utc::now());
        debug!(fetched, kept = results.len(), "Memory retrieval");
        results
    }

    fn rank(
        &self,
        hits: Vec<VectorHit>,
        query: &RetrievalQuery,
        max_results: usize,
        now: DateTime<Utc>,
    ) -> Vec<RetrievalResult> {
        let s = &self.settings;
        let min_similarity = query.min_similarity.unwrap_or(s.min_similarity);
        let window = query
            .recency_window_days
            .unwrap_or(s.recency_window_days)
            .max(f64::EPSILON);
        // Distances are cosine distances in [0, 2].
        let max_distance = 2.0 * (1.0 - min_similarity);

        let range = query.difficulty_range.or_else(|| {
            let (d, r) = (query.difficulty?, s.difficulty_radius?);
            Some((d.saturating_sub(r), d.saturating_add(r).min(100)))
        });

        let mut scored: Vec<RetrievalResult> = hits
            .into_iter()
            .filter(|h| h.distance <= max_distance)
            .filter_map(|h| {
                let record = MemoryRecord::from_metadata(&h.metadata)?;
                if let Some((lo, hi)) = range
                    && !(lo..=hi).contains(&record.difficulty)
                {
                    return None;
                }

                let similarity = (1.0 - h.distance / 2.0).clamp(0.0, 1.0);
                let recency = (-record.age_days(now) / window).exp() as f32;
                let difficulty_proximity = match query.difficulty {
                    Some(d) => 1.0 - (record.difficulty as f32 - d as f32).abs() / 100.0,
                    None => 1.0,
                };
                let hybrid = s.similarity_weight * similarity
                    + s.recency_weight * recency
                    + s.difficulty_weight * difficulty_proximity;

                Some(RetrievalResult {
                    record,
                    similarity,
                    recency,
                    difficulty_proximity,
                    hybrid,
                })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.hybrid
                .partial_cmp(&a.hybrid)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut kept: Vec<RetrievalResult> = Vec::with_capacity(max_results);
        let mut kept_words: Vec<HashSet<String>> = Vec::with_capacity(max_results);
        for candidate in scored {
            if kept.len() == max_results {
                break;
            }
            let words = word_set(&candidate.record.content());
            if kept_words
                .iter()
                .all(|k| overlap(&words, k) < s.dedup_threshold)
            {
                kept_words.push(words);
                kept.push(candidate);
            }
        }
        kept
    }

    /// Store a finished exchange. Failures are logged, never returned.
    pub async fn remember(
        &self,
        user_text: &str,
        assistant_text: &str,
        difficulty: u8,
        model_id: &str,
    ) -> Option<MemoryRecord> {
        let mut record = MemoryRecord {
            id: Uuid::new_v4().to_string(),
            user_text: user_text.to_string(),
            assistant_text: assistant_text.to_string(),
            embedding: Vec::new(),
            timestamp: Utc::now(),
            difficulty,
            model_id: model_id.to_string(),
        };

        let vector = match self.embed(&record.content()).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Could not embed exchange, not remembered");
                return None;
            }
        };

        if let Err(e) = self
            .store
            .upsert(&record.id, vector.clone(), record.to_metadata())
            .await
        {
            warn!(store = self.store.name(), error = %e, "Could not store exchange");
            return None;
        }

        record.embedding = vector;
        debug!(id = %record.id, model = %model_id, difficulty, "Exchange remembered");
        Some(record)
    }

    /// Render results as a prompt block. Empty input renders as "".
    pub fn format_context(results: &[RetrievalResult]) -> String {
        if results.is_empty() {
            return String::new();
        }

        let mut out = String::from("Relevant past exchanges:\n");
        for (i, r) in results.iter().enumerate() {
            out.push_str(&format!(
                "[{}] (score {:.2}, difficulty {}, model {}, {})\nUser: {}\nAssistant: {}\n",
                i + 1,
                r.hybrid,
                r.record.difficulty,
                r.record.model_id,
                r.record.timestamp.format("%Y-%m-%d %H:%M UTC"),
                r.record.user_text,
                r.record.assistant_text,
            ));
        }
        out
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    pub async fn memory_count(&self) -> Result<usize, MemoryError> {
        self.store.count().await
    }

    /// Flush the embedding cache. Best effort: errors are logged.
    pub async fn shutdown(&self) {
        if let Err(e) = self.cache.flush().await {
            warn!(error = %e, "Embedding cache flush at shutdown failed");
        }
    }
}

fn word_set(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn overlap(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    let smaller = a.len().min(b.len());
    if smaller == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f32 / smaller as f32
}

/// Shared-word ratio `|A ∩ B| / min(|A|, |B|)` over lowercase words.
pub fn token_overlap(a: &str, b: &str) -> f32 {
    overlap(&word_set(a), &word_set(b))
}

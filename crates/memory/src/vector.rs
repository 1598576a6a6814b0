//! Vector similarity utilities.
//!
//! Pure-Rust implementations of:
//! - Cosine similarity and cosine distance
//! - Brute-force nearest-neighbour ranking for the bundled stores

use std::collections::HashMap;
use switchyard_core::memory::VectorHit;

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if either vector is zero-length or empty.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// Cosine distance `1 - cos`, in [0, 2].
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    (1.0 - cosine_similarity(a, b)).clamp(0.0, 2.0)
}

/// A stored vector with the metadata upserted alongside it.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub(crate) struct StoredVector {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Rank stored vectors by ascending cosine distance to `query`.
///
/// Returns at most `top_k` hits. Vectors of a different width are skipped.
pub fn rank_by_distance<'a, I>(query: &[f32], entries: I, top_k: usize) -> Vec<VectorHit>
where
    I: IntoIterator<Item = (&'a str, &'a [f32], &'a serde_json::Map<String, serde_json::Value>)>,
{
    let mut hits: Vec<VectorHit> = entries
        .into_iter()
        .filter(|(_, v, _)| v.len() == query.len())
        .map(|(id, v, metadata)| VectorHit {
            id: id.to_string(),
            distance: cosine_distance(query, v),
            metadata: metadata.clone(),
        })
        .collect();

    hits.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    hits.truncate(top_k);
    hits
}

/// Rank a keyed set of stored vectors.
pub(crate) fn rank_stored(
    query: &[f32],
    entries: &HashMap<String, StoredVector>,
    top_k: usize,
) -> Vec<VectorHit> {
    rank_by_distance(
        query,
        entries
            .values()
            .map(|e| (e.id.as_str(), e.vector.as_slice(), &e.metadata)),
        top_k,
    )
}

//! Thread-safe in-memory aggregation of generation metrics.

use crate::TelemetryError;
use crate::metric::{GenerationMetric, ModelUsage};
use crate::sink::MetricsSink;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

/// Per-model usage totals plus a bounded window of recent metrics.
pub struct UsageLedger {
    usage: RwLock<BTreeMap<String, ModelUsage>>,
    recent: RwLock<Vec<GenerationMetric>>,
    max_recent: usize,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::with_capacity(1_000)
    }

    /// Keep at most `max_recent` raw metrics.
    pub fn with_capacity(max_recent: usize) -> Self {
        Self {
            usage: RwLock::new(BTreeMap::new()),
            recent: RwLock::new(Vec::new()),
            max_recent: max_recent.max(1),
        }
    }

    /// Totals for one model.
    pub fn model(&self, model_id: &str) -> Option<ModelUsage> {
        self.usage
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(model_id)
            .cloned()
    }

    /// Totals for every model seen, by id.
    pub fn summary(&self) -> Vec<ModelUsage> {
        self.usage
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Most recent metrics, newest last.
    pub fn recent(&self, limit: usize) -> Vec<GenerationMetric> {
        let recent = self.recent.read().unwrap_or_else(PoisonError::into_inner);
        let start = recent.len().saturating_sub(limit);
        recent[start..].to_vec()
    }

    pub fn total_requests(&self) -> u64 {
        self.summary().iter().map(|u| u.requests).sum()
    }
}

impl Default for UsageLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink for UsageLedger {
    fn record(&self, metric: &GenerationMetric) -> Result<(), TelemetryError> {
        {
            let mut usage = self.usage.write().unwrap_or_else(PoisonError::into_inner);
            let entry = usage
                .entry(metric.model_id.clone())
                .or_insert_with(|| ModelUsage {
                    model_id: metric.model_id.clone(),
                    ..ModelUsage::default()
                });
            entry.requests += 1;
            entry.tokens_used += metric.tokens_used as u64;
            entry.total_elapsed_ms += metric.elapsed_ms;
            entry.difficulty_sum += metric.difficulty as u64;
            if let Some(q) = metric.quality_score {
                entry.quality_sum += q as f64;
                entry.quality_samples += 1;
            }
        }

        let mut recent = self.recent.write().unwrap_or_else(PoisonError::into_inner);
        if recent.len() >= self.max_recent {
            // Drop the oldest tenth in one go
            let drain = (self.max_recent / 10).max(1);
            recent.drain(..drain);
        }
        recent.push(metric.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_core::model::QueryType;

    #[test]
    fn aggregates_per_model() {
        let ledger = UsageLedger::new();
        ledger
            .record(&GenerationMetric::new("small", 10, QueryType::Chat, 200, 50, 100))
            .unwrap();
        ledger
            .record(&GenerationMetric::new("small", 30, QueryType::Chat, 200, 70, 300))
            .unwrap();
        let mut rated = GenerationMetric::new("large", 80, QueryType::Reasoning, 4000, 900, 5000);
        rated.quality_score = Some(0.8);
        ledger.record(&rated).unwrap();

        let small = ledger.model("small").unwrap();
        assert_eq!(small.requests, 2);
        assert_eq!(small.tokens_used, 120);
        assert!((small.avg_latency_ms() - 200.0).abs() < 1e-9);
        assert!((small.avg_difficulty() - 20.0).abs() < 1e-9);

        let large = ledger.model("large").unwrap();
        assert!((large.avg_quality().unwrap() - 0.8).abs() < 1e-6);
        assert_eq!(ledger.total_requests(), 3);
        assert_eq!(ledger.summary().len(), 2);
    }

    #[test]
    fn recent_window_is_bounded() {
        let ledger = UsageLedger::with_capacity(10);
        for i in 0..25 {
            ledger
                .record(&GenerationMetric::new("m", 1, QueryType::Minimal, 64, i, 1))
                .unwrap();
        }
        let recent = ledger.recent(100);
        assert!(recent.len() <= 10);
        assert_eq!(recent.last().unwrap().tokens_used, 24);
        assert_eq!(ledger.recent(2).len(), 2);
    }
}

//! Data model for generation metrics and per-model aggregates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use switchyard_core::model::QueryType;

/// One served generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationMetric {
    pub timestamp: DateTime<Utc>,
    pub model_id: String,
    /// Estimated difficulty of the query (1–100)
    pub difficulty: u8,
    pub query_type: QueryType,
    /// Ceiling handed to the engine
    pub max_tokens: u32,
    pub tokens_used: u32,
    pub elapsed_ms: u64,
    /// Filled in later by a feedback loop, if one exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f32>,
}

impl GenerationMetric {
    pub fn new(
        model_id: impl Into<String>,
        difficulty: u8,
        query_type: QueryType,
        max_tokens: u32,
        tokens_used: u32,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            model_id: model_id.into(),
            difficulty,
            query_type,
            max_tokens,
            tokens_used,
            elapsed_ms,
            quality_score: None,
        }
    }

    /// Share of the ceiling actually used, in `[0, 1]`.
    pub fn budget_utilization(&self) -> f64 {
        if self.max_tokens == 0 {
            return 0.0;
        }
        (self.tokens_used as f64 / self.max_tokens as f64).min(1.0)
    }
}

/// Running totals for one model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelUsage {
    pub model_id: String,
    pub requests: u64,
    pub tokens_used: u64,
    pub total_elapsed_ms: u64,
    pub difficulty_sum: u64,
    pub quality_sum: f64,
    pub quality_samples: u64,
}

impl ModelUsage {
    pub fn avg_latency_ms(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.total_elapsed_ms as f64 / self.requests as f64
        }
    }

    pub fn avg_difficulty(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.difficulty_sum as f64 / self.requests as f64
        }
    }

    pub fn avg_quality(&self) -> Option<f64> {
        (self.quality_samples > 0).then(|| self.quality_sum / self.quality_samples as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_serializes_snake_case_type() {
        let m = GenerationMetric::new("qwen-7b", 42, QueryType::Code, 512, 128, 900);
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["query_type"], "code");
        assert!(json.get("quality_score").is_none());
        assert!((m.budget_utilization() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn averages_handle_empty_usage() {
        let usage = ModelUsage::default();
        assert_eq!(usage.avg_latency_ms(), 0.0);
        assert!(usage.avg_quality().is_none());
    }
}

//! Generation metrics for Switchyard.
//!
//! The core only produces metrics. A [`MetricsSink`] receives one
//! [`GenerationMetric`] per served request; [`UsageLedger`] aggregates them
//! per model in memory and [`JsonlMetricsSink`] appends them to a file for
//! offline analysis.

pub mod ledger;
pub mod metric;
pub mod sink;

pub use ledger::UsageLedger;
pub use metric::{GenerationMetric, ModelUsage};
pub use sink::{FanoutSink, JsonlMetricsSink, MetricsSink, NullSink};

/// Errors from the telemetry subsystem.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("metrics I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}

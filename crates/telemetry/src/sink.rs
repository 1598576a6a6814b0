//! Metric sinks.

use crate::TelemetryError;
use crate::metric::GenerationMetric;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::warn;

/// Receives one metric per served generation.
///
/// `record` may block on I/O; async callers run it on a blocking thread.
pub trait MetricsSink: Send + Sync {
    fn record(&self, metric: &GenerationMetric) -> Result<(), TelemetryError>;
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl MetricsSink for NullSink {
    fn record(&self, _metric: &GenerationMetric) -> Result<(), TelemetryError> {
        Ok(())
    }
}

/// Appends metrics as JSON lines. Each record is a blocking write.
pub struct JsonlMetricsSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlMetricsSink {
    /// Open (or create) `path` for appending, creating parent directories.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, TelemetryError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetricsSink for JsonlMetricsSink {
    fn record(&self, metric: &GenerationMetric) -> Result<(), TelemetryError> {
        let mut line = serde_json::to_string(metric)?;
        line.push('\n');
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

/// Forwards to several sinks; a failing sink does not stop the others.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn MetricsSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl MetricsSink for FanoutSink {
    fn record(&self, metric: &GenerationMetric) -> Result<(), TelemetryError> {
        for sink in &self.sinks {
            if let Err(e) = sink.record(metric) {
                warn!(error = %e, "Metrics sink failed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::UsageLedger;
    use switchyard_core::model::QueryType;

    #[test]
    fn jsonl_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("metrics.jsonl");

        let sink = JsonlMetricsSink::open(&path).unwrap();
        sink.record(&GenerationMetric::new("a", 5, QueryType::Minimal, 64, 10, 20))
            .unwrap();
        sink.record(&GenerationMetric::new("b", 70, QueryType::Analysis, 2048, 700, 4000))
            .unwrap();
        drop(sink);

        // Reopening appends rather than truncating.
        let sink = JsonlMetricsSink::open(&path).unwrap();
        sink.record(&GenerationMetric::new("c", 50, QueryType::Code, 1024, 300, 900))
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<GenerationMetric> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1].query_type, QueryType::Analysis);
        assert_eq!(lines[2].model_id, "c");
    }

    #[test]
    fn fanout_reaches_every_sink() {
        let a = Arc::new(UsageLedger::new());
        let b = Arc::new(UsageLedger::new());
        let fanout = FanoutSink::new()
            .with(a.clone())
            .with(Arc::new(NullSink))
            .with(b.clone());
        assert_eq!(fanout.len(), 3);

        fanout
            .record(&GenerationMetric::new("m", 1, QueryType::Chat, 100, 10, 5))
            .unwrap();
        assert_eq!(a.total_requests(), 1);
        assert_eq!(b.total_requests(), 1);
    }
}

//! GPU memory snapshots and the probe seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::OrchestratorError;
use crate::model::DeviceId;

/// A point-in-time memory read for one device.
///
/// Never cached across a load decision: the lifecycle manager takes a fresh
/// snapshot under the device lock before committing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuSnapshot {
    pub device: DeviceId,
    pub total_mb: u64,
    pub used_mb: u64,
    pub free_mb: u64,
}

impl GpuSnapshot {
    /// Fraction of device memory in use, in [0, 1].
    pub fn utilization(&self) -> f64 {
        if self.total_mb == 0 {
            return 0.0;
        }
        self.used_mb as f64 / self.total_mb as f64
    }
}

/// Reads device memory on demand.
#[async_trait]
pub trait GpuProbe: Send + Sync {
    /// A human-readable name for this probe (e.g., "nvidia-smi").
    fn name(&self) -> &str;

    /// Take a fresh snapshot of one device.
    async fn snapshot(&self, device: DeviceId) -> std::result::Result<GpuSnapshot, OrchestratorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utilization_handles_empty_device() {
        let snap = GpuSnapshot { device: 0, total_mb: 0, used_mb: 0, free_mb: 0 };
        assert_eq!(snap.utilization(), 0.0);

        let snap = GpuSnapshot { device: 0, total_mb: 16000, used_mb: 4000, free_mb: 12000 };
        assert!((snap.utilization() - 0.25).abs() < 1e-9);
    }
}

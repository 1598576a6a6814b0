//! GPU resource tracking.
//!
//! [`GpuResourceTracker`] reads device memory on demand through a
//! [`GpuProbe`]. Two probes ship with the crate:
//! - [`NvidiaSmiProbe`] queries `nvidia-smi` for a fresh reading every call
//! - [`SimulatedGpu`] keeps fixed device sizes and allocate/release
//!   bookkeeping, for CPU-only hosts and tests

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use switchyard_config::GpuConfig;
use switchyard_core::error::OrchestratorError;
use switchyard_core::gpu::{GpuProbe, GpuSnapshot};
use switchyard_core::model::DeviceId;
use tracing::{debug, warn};

/// Reads free/used memory per device.
#[derive(Clone)]
pub struct GpuResourceTracker {
    probe: Arc<dyn GpuProbe>,
    devices: Vec<DeviceId>,
}

impl GpuResourceTracker {
    pub fn new(probe: Arc<dyn GpuProbe>, devices: Vec<DeviceId>) -> Self {
        Self { probe, devices }
    }

    /// Build the probe named in config.
    pub fn from_config(config: &GpuConfig, devices: Vec<DeviceId>) -> Self {
        let probe: Arc<dyn GpuProbe> = match config.probe.as_str() {
            "simulated" => Arc::new(SimulatedGpu::new(
                config.simulated.iter().map(|d| (d.device, d.total_mb)),
            )),
            _ => Arc::new(NvidiaSmiProbe::new(&config.nvidia_smi_path)),
        };
        Self::new(probe, devices)
    }

    pub fn probe_name(&self) -> &str {
        self.probe.name()
    }

    pub fn devices(&self) -> &[DeviceId] {
        &self.devices
    }

    /// Fresh snapshot of one device.
    pub async fn snapshot(&self, device: DeviceId) -> Result<GpuSnapshot, OrchestratorError> {
        let snapshot = self.probe.snapshot(device).await?;
        debug!(
            device,
            total_mb = snapshot.total_mb,
            free_mb = snapshot.free_mb,
            "GPU snapshot"
        );
        Ok(snapshot)
    }

    /// Snapshots of every tracked device. Devices whose probe fails are
    /// logged and skipped.
    pub async fn snapshot_all(&self) -> Vec<GpuSnapshot> {
        let mut out = Vec::with_capacity(self.devices.len());
        for &device in &self.devices {
            match self.probe.snapshot(device).await {
                Ok(s) => out.push(s),
                Err(e) => warn!(device, error = %e, "GPU probe failed"),
            }
        }
        out
    }
}

// ── nvidia-smi ─────────────────────────────────────────────────────────

/// Probe backed by `nvidia-smi --query-gpu`.
pub struct NvidiaSmiProbe {
    binary: String,
}

impl NvidiaSmiProbe {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

/// Parse `index, memory.total, memory.used, memory.free` CSV rows
/// (`--format=csv,noheader,nounits`). Malformed rows are skipped.
pub fn parse_nvidia_smi(output: &str) -> Vec<GpuSnapshot> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let fields: Vec<u64> = line
                .split(',')
                .map(|f| f.trim().parse::<u64>())
                .collect::<Result<_, _>>()
                .ok()?;
            match fields.as_slice() {
                [index, total, used, free] => Some(GpuSnapshot {
                    device: u32::try_from(*index).ok()?,
                    total_mb: *total,
                    used_mb: *used,
                    free_mb: *free,
                }),
                _ => None,
            }
        })
        .collect()
}

#[async_trait]
impl GpuProbe for NvidiaSmiProbe {
    fn name(&self) -> &str {
        "nvidia-smi"
    }

    async fn snapshot(&self, device: DeviceId) -> Result<GpuSnapshot, OrchestratorError> {
        let output = tokio::process::Command::new(&self.binary)
            .arg("--query-gpu=index,memory.total,memory.used,memory.free")
            .arg("--format=csv,noheader,nounits")
            .arg(format!("--id={device}"))
            .output()
            .await
            .map_err(|e| OrchestratorError::ProbeFailed {
                device,
                reason: format!("failed to run {}: {e}", self.binary),
            })?;

        if !output.status.success() {
            return Err(OrchestratorError::ProbeFailed {
                device,
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_nvidia_smi(&stdout)
            .into_iter()
            .find(|s| s.device == device)
            .ok_or_else(|| OrchestratorError::ProbeFailed {
                device,
                reason: "device missing from nvidia-smi output".into(),
            })
    }
}

// ── Simulated ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct SimDevice {
    total_mb: u64,
    used_mb: u64,
}

/// An in-process stand-in for real devices.
///
/// Engines (or tests) call [`SimulatedGpu::allocate`] and
/// [`SimulatedGpu::release`] so snapshots move the way a real device would.
#[derive(Default)]
pub struct SimulatedGpu {
    devices: Mutex<BTreeMap<DeviceId, SimDevice>>,
}

impl SimulatedGpu {
    /// Create devices from `(device, total_mb)` pairs, all empty.
    pub fn new(devices: impl IntoIterator<Item = (DeviceId, u64)>) -> Self {
        let devices = devices
            .into_iter()
            .map(|(id, total_mb)| (id, SimDevice { total_mb, used_mb: 0 }))
            .collect();
        Self {
            devices: Mutex::new(devices),
        }
    }

    /// Pretend something outside this process already uses `used_mb`.
    pub fn with_baseline(self, device: DeviceId, used_mb: u64) -> Self {
        if let Some(d) = self.lock().get_mut(&device) {
            d.used_mb = used_mb.min(d.total_mb);
        }
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<DeviceId, SimDevice>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim memory. Returns false (and claims nothing) when it does not fit.
    pub fn allocate(&self, device: DeviceId, mb: u64) -> bool {
        let mut devices = self.lock();
        match devices.get_mut(&device) {
            Some(d) if d.total_mb - d.used_mb >= mb => {
                d.used_mb += mb;
                true
            }
            _ => false,
        }
    }

    /// Return memory; never drops below zero.
    pub fn release(&self, device: DeviceId, mb: u64) {
        if let Some(d) = self.lock().get_mut(&device) {
            d.used_mb = d.used_mb.saturating_sub(mb);
        }
    }

    /// Current usage per device, for assertions and status output.
    pub fn usage(&self) -> HashMap<DeviceId, u64> {
        self.lock().iter().map(|(id, d)| (*id, d.used_mb)).collect()
    }
}

#[async_trait]
impl GpuProbe for SimulatedGpu {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn snapshot(&self, device: DeviceId) -> Result<GpuSnapshot, OrchestratorError> {
        let devices = self.lock();
        let d = devices
            .get(&device)
            .ok_or_else(|| OrchestratorError::ProbeFailed {
                device,
                reason: "no such simulated device".into(),
            })?;
        Ok(GpuSnapshot {
            device,
            total_mb: d.total_mb,
            used_mb: d.used_mb,
            free_mb: d.total_mb - d.used_mb,
        })
    }
}

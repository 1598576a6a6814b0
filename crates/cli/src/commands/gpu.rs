//! `switchyard gpu` — Device memory and which models currently fit.

use switchyard_config::AppConfig;
use switchyard_models::{GpuResourceTracker, LifecycleSettings, ModelRegistry};

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let registry = ModelRegistry::from_config(&config)?;
    let settings = LifecycleSettings::from(&config.orchestrator);

    let mut devices = registry.devices();
    devices.extend(config.gpu.simulated.iter().map(|d| d.device));
    if devices.is_empty() {
        devices.push(0);
    }
    devices.sort_unstable();
    devices.dedup();

    let tracker = GpuResourceTracker::from_config(&config.gpu, devices);
    println!("GPU memory (probe: {})", tracker.probe_name());
    println!("─────────────────────────────────────────────");

    for &device in tracker.devices() {
        let snapshot = match tracker.snapshot(device).await {
            Ok(s) => s,
            Err(e) => {
                println!("  Device {device}: unavailable ({e})");
                continue;
            }
        };
        println!(
            "  Device {}: {} / {} MB used ({:.0}%), {} MB free, {:.0} MB usable",
            device,
            snapshot.used_mb,
            snapshot.total_mb,
            snapshot.utilization() * 100.0,
            snapshot.free_mb,
            settings.usable_mb(snapshot.free_mb),
        );
        for model in registry.iter().filter(|m| m.device == device) {
            let mark = if settings.fits(snapshot.free_mb, model.required_mb) {
                "fits"
            } else {
                "needs eviction or more memory"
            };
            println!(
                "    {:<24} {:>8.0} MB peak  {}",
                model.id,
                settings.required_effective_mb(model.required_mb),
                mark
            );
        }
    }

    Ok(())
}

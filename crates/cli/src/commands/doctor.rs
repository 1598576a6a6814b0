//! `switchyard doctor` — Diagnose configuration and hardware.

use switchyard_config::AppConfig;
use switchyard_models::{GpuResourceTracker, LifecycleSettings, ModelRegistry};

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 Switchyard Doctor — System Diagnostics");
    println!("=========================================\n");

    let mut issues = 0;

    let config_path = AppConfig::config_dir().join("config.toml");
    if !config_path.exists() {
        println!("  ❌ No config file — run `switchyard init`");
        println!("\n  ⚠️  1 issue(s) found. See above for details.");
        return Ok(());
    }

    let config = match AppConfig::load() {
        Ok(config) => {
            println!("  ✅ Config file valid");
            config
        }
        Err(e) => {
            println!("  ❌ Config file invalid: {e}");
            println!("\n  ⚠️  1 issue(s) found. See above for details.");
            return Ok(());
        }
    };

    let registry = match ModelRegistry::from_config(&config) {
        Ok(r) if r.is_empty() => {
            println!("  ⚠️  No models configured — add a [models.<id>] table");
            issues += 1;
            r
        }
        Ok(r) => {
            println!("  ✅ {} model(s) registered, all weight paths resolved", r.len());
            r
        }
        Err(e) => {
            println!("  ❌ {e}");
            issues += 1;
            ModelRegistry::default()
        }
    };

    let settings = LifecycleSettings::from(&config.orchestrator);
    let tracker = GpuResourceTracker::from_config(&config.gpu, registry.devices());
    for &device in tracker.devices() {
        match tracker.snapshot(device).await {
            Ok(snapshot) => {
                println!(
                    "  ✅ Device {device} ({}): {} MB total, {} MB free",
                    tracker.probe_name(),
                    snapshot.total_mb,
                    snapshot.free_mb
                );
                // Judged against an empty device: can this model ever load?
                for model in registry.iter().filter(|m| m.device == device) {
                    if !settings.fits(snapshot.total_mb, model.required_mb) {
                        println!(
                            "  ❌ {} needs {:.0} MB at peak, more than device {device} can ever offer",
                            model.id,
                            settings.required_effective_mb(model.required_mb)
                        );
                        issues += 1;
                    }
                }
            }
            Err(e) => {
                println!("  ❌ Device {device}: {e}");
                issues += 1;
            }
        }
    }

    for model in registry.iter().filter(|m| m.endpoint.is_none()) {
        println!("  ⚠️  {} has no endpoint; it cannot be served over HTTP", model.id);
        issues += 1;
    }

    if config.retrieval.enabled {
        if config.embedding.provider == "openai" && config.embedding.api_key.is_none() {
            println!("  ⚠️  Embedding provider is openai but no key is set (SWITCHYARD_EMBEDDING_KEY)");
            issues += 1;
        } else {
            println!("  ✅ Embeddings: {} ({})", config.embedding.provider, config.embedding.model);
        }
    } else {
        println!("  ✅ Retrieval disabled");
    }

    let data_dir = config.data_dir();
    match std::fs::create_dir_all(&data_dir) {
        Ok(()) => println!("  ✅ Data directory writable: {}", data_dir.display()),
        Err(e) => {
            println!("  ❌ Data directory {}: {e}", data_dir.display());
            issues += 1;
        }
    }

    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}

//! `switchyard models` — List registered models.

use switchyard_config::AppConfig;
use switchyard_models::ModelRegistry;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let registry = ModelRegistry::from_config(&config)?;

    if registry.is_empty() {
        println!("No models configured.");
        println!("Add a [models.<id>] table to {}", AppConfig::config_dir().join("config.toml").display());
        return Ok(());
    }

    println!(
        "{:<24} {:>6} {:>10} {:>9} {:>11}  {}",
        "Model", "Device", "Memory MB", "Priority", "Difficulty", "Endpoint"
    );
    for model in registry.by_priority() {
        println!(
            "{:<24} {:>6} {:>10} {:>9} {:>5}-{:<5}  {}",
            model.id,
            model.device,
            model.required_mb,
            model.priority,
            model.min_difficulty,
            model.max_difficulty,
            model.endpoint.as_deref().unwrap_or("-"),
        );
    }
    println!();
    println!("  {} models on {} device(s)", registry.len(), registry.devices().len());

    Ok(())
}

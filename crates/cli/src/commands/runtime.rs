//! Wires config into a ready-to-serve coordinator.

use std::sync::Arc;
use switchyard_agent::{CoordinatorSettings, GenerationCoordinator, TokenBudgetCalculator};
use switchyard_config::AppConfig;
use switchyard_core::memory::VectorStore;
use switchyard_memory::{
    EmbeddingCache, FileVectorStore, InMemoryVectorStore, RetrievalContextBuilder,
    RetrievalSettings,
};
use switchyard_models::{
    GpuResourceTracker, HttpEngineLoader, LifecycleSettings, ModelLifecycleManager, ModelRegistry,
};
use switchyard_telemetry::{FanoutSink, JsonlMetricsSink, UsageLedger};
use tracing::info;

/// Build the full request pipeline from configuration.
pub fn build_coordinator(
    config: &AppConfig,
) -> Result<GenerationCoordinator, Box<dyn std::error::Error>> {
    let registry = Arc::new(ModelRegistry::from_config(config)?);
    if registry.is_empty() {
        return Err("No models configured. Add a [models.<id>] table to config.toml".into());
    }

    let tracker = GpuResourceTracker::from_config(&config.gpu, registry.devices());
    info!(
        models = registry.len(),
        devices = registry.devices().len(),
        probe = tracker.probe_name(),
        "Model registry ready"
    );
    let loader = Arc::new(HttpEngineLoader::new(
        std::env::var("SWITCHYARD_ENGINE_KEY").ok(),
    )?);
    let lifecycle = Arc::new(ModelLifecycleManager::new(
        registry,
        tracker,
        loader,
        LifecycleSettings::from(&config.orchestrator),
    ));

    let mut metrics = FanoutSink::new().with(Arc::new(UsageLedger::new()));
    if config.telemetry.enabled {
        metrics = metrics.with(Arc::new(JsonlMetricsSink::open(config.metrics_path())?));
    }

    let mut coordinator = GenerationCoordinator::new(
        lifecycle,
        TokenBudgetCalculator::from_config(&config.budget),
        Arc::new(metrics),
    )
    .with_settings(CoordinatorSettings {
        remember_exchanges: config.memory.auto_save,
        ..CoordinatorSettings::default()
    });

    if config.retrieval.enabled {
        coordinator = coordinator.with_retrieval(Arc::new(build_retrieval(config)?));
    }

    Ok(coordinator)
}

/// Memory store, embedder and embedding cache from configuration.
pub fn build_retrieval(
    config: &AppConfig,
) -> Result<RetrievalContextBuilder, Box<dyn std::error::Error>> {
    let embedder = switchyard_memory::embedder::from_config(&config.embedding)?;
    let store: Arc<dyn VectorStore> = match config.memory.backend.as_str() {
        "in_memory" => Arc::new(InMemoryVectorStore::new()),
        _ => Arc::new(FileVectorStore::new(config.memory_path())),
    };
    let cache = EmbeddingCache::from_config(&config.cache, config.cache_path());

    Ok(RetrievalContextBuilder::new(
        embedder,
        store,
        cache,
        RetrievalSettings::from(&config.retrieval),
    ))
}

//! Model registry — the validated, immutable set of models this process
//! may load.
//!
//! Built once at startup from `[models.<id>]` config tables. Every weight
//! path is resolved here, so a typo in a path stops the process before it
//! serves a single request instead of failing on first use.

use std::collections::BTreeMap;
use std::sync::Arc;
use switchyard_config::{AppConfig, ConfigError};
use switchyard_core::model::{DeviceId, ModelDescriptor};

/// Lookup table of model descriptors.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: BTreeMap<String, Arc<ModelDescriptor>>,
}

impl ModelRegistry {
    /// Build a registry from already-validated descriptors.
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = ModelDescriptor>) -> Self {
        let models = descriptors
            .into_iter()
            .map(|d| (d.id.clone(), Arc::new(d)))
            .collect();
        Self { models }
    }

    /// Build the registry from configuration, resolving every model path.
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        let mut descriptors = Vec::with_capacity(config.models.len());

        for (id, model) in &config.models {
            let path = model
                .path
                .canonicalize()
                .map_err(|_| ConfigError::ModelPathMissing {
                    model: id.clone(),
                    path: model.path.clone(),
                })?;

            descriptors.push(ModelDescriptor {
                id: id.clone(),
                path,
                device: model.device,
                required_mb: model.required_mb,
                priority: model.priority,
                load_timeout_secs: model.load_timeout_secs,
                min_difficulty: model.min_difficulty,
                max_difficulty: model.max_difficulty,
                endpoint: model.endpoint.clone(),
            });
        }

        tracing::debug!(count = descriptors.len(), "Model registry built");
        Ok(Self::from_descriptors(descriptors))
    }

    pub fn get(&self, id: &str) -> Option<Arc<ModelDescriptor>> {
        self.models.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.models.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// All descriptors in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ModelDescriptor>> {
        self.models.values()
    }

    /// Distinct devices referenced by any model, ascending.
    pub fn devices(&self) -> Vec<DeviceId> {
        let mut devices: Vec<DeviceId> = self.models.values().map(|d| d.device).collect();
        devices.sort_unstable();
        devices.dedup();
        devices
    }

    /// All descriptors ordered by priority (lower first), then id.
    pub fn by_priority(&self) -> Vec<Arc<ModelDescriptor>> {
        let mut all: Vec<_> = self.models.values().cloned().collect();
        all.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        all
    }

    /// Models whose difficulty range covers `difficulty`, by priority.
    ///
    /// Falls back to every model when none covers it.
    pub fn candidates_for(&self, difficulty: u8) -> Vec<Arc<ModelDescriptor>> {
        let ordered = self.by_priority();
        let covering: Vec<_> = ordered
            .iter()
            .filter(|d| d.covers(difficulty))
            .cloned()
            .collect();
        if covering.is_empty() { ordered } else { covering }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use switchyard_config::ModelConfig;

    fn descriptor(id: &str, priority: u32, range: (u8, u8)) -> ModelDescriptor {
        ModelDescriptor {
            id: id.into(),
            path: PathBuf::from(format!("/models/{id}.gguf")),
            device: 0,
            required_mb: 1000,
            priority,
            load_timeout_secs: 30,
            min_difficulty: range.0,
            max_difficulty: range.1,
            endpoint: None,
        }
    }

    fn model_config(path: PathBuf) -> ModelConfig {
        ModelConfig {
            path,
            device: 1,
            required_mb: 4000,
            priority: 2,
            load_timeout_secs: 60,
            min_difficulty: 1,
            max_difficulty: 100,
            endpoint: None,
        }
    }

    #[test]
    fn from_config_resolves_existing_paths() {
        let dir = tempfile::tempdir().unwrap();
        let weights = dir.path().join("tiny.gguf");
        std::fs::write(&weights, b"GGUF").unwrap();

        let mut config = AppConfig::default();
        config.models.insert("tiny".into(), model_config(weights));

        let registry = ModelRegistry::from_config(&config).unwrap();
        let tiny = registry.get("tiny").unwrap();
        assert_eq!(tiny.device, 1);
        assert!(tiny.path.is_absolute());
        assert_eq!(registry.devices(), vec![1]);
    }

    #[test]
    fn missing_path_is_fatal() {
        let mut config = AppConfig::default();
        config.models.insert(
            "ghost".into(),
            model_config(PathBuf::from("/definitely/not/here.gguf")),
        );

        let err = ModelRegistry::from_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ModelPathMissing { ref model, .. } if model == "ghost"));
    }

    #[test]
    fn priority_order_breaks_ties_by_id() {
        let registry = ModelRegistry::from_descriptors(vec![
            descriptor("c", 2, (1, 100)),
            descriptor("b", 1, (1, 100)),
            descriptor("a", 2, (1, 100)),
        ]);
        let ids: Vec<_> = registry.by_priority().iter().map(|d| d.id.clone()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn candidates_filter_by_difficulty() {
        let registry = ModelRegistry::from_descriptors(vec![
            descriptor("small", 1, (1, 40)),
            descriptor("medium", 2, (30, 70)),
            descriptor("large", 3, (60, 100)),
        ]);

        let ids = |d: u8| -> Vec<String> {
            registry.candidates_for(d).iter().map(|m| m.id.clone()).collect()
        };
        assert_eq!(ids(10), vec!["small"]);
        assert_eq!(ids(35), vec!["small", "medium"]);
        assert_eq!(ids(90), vec!["large"]);
    }

    #[test]
    fn candidates_fall_back_to_all_models_on_gap() {
        let registry = ModelRegistry::from_descriptors(vec![
            descriptor("small", 1, (1, 20)),
            descriptor("large", 2, (80, 100)),
        ]);
        assert_eq!(registry.candidates_for(50).len(), 2);
    }

    #[test]
    fn unknown_model_lookup() {
        let registry = ModelRegistry::default();
        assert!(registry.get("nope").is_none());
        assert!(registry.is_empty());
    }
}

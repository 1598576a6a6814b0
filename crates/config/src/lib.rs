//! Configuration loading, validation, and management for Switchyard.
//!
//! Loads configuration from `~/.switchyard/config.toml` with environment
//! variable overrides. Validates all settings at startup; model weight paths
//! are resolved when the model registry is built from this config.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.switchyard/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Where caches, memories and metrics live (default: `~/.switchyard/data`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// Model lifecycle settings
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// How device memory is read
    #[serde(default)]
    pub gpu: GpuConfig,

    /// Available models, keyed by model id
    #[serde(default)]
    pub models: BTreeMap<String, ModelConfig>,

    /// Output-length budget settings
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Memory retrieval settings
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Embedding cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Embedding collaborator settings
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Vector store settings
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Metrics sink settings
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Hard cap on simultaneously loaded models per device
    #[serde(default = "default_max_models_per_gpu")]
    pub max_models_per_gpu: usize,

    /// Share of free memory held back as a safety buffer
    #[serde(default = "default_safety_buffer_fraction")]
    pub safety_buffer_fraction: f64,

    /// Lower bound of the safety buffer in MB
    #[serde(default = "default_min_safety_buffer_mb")]
    pub min_safety_buffer_mb: u64,

    /// Multiplier on a model's stated requirement for inference-time peaks
    #[serde(default = "default_peak_multiplier")]
    pub peak_multiplier: f64,

    /// Engine constructions allowed to run at once
    #[serde(default = "default_max_concurrent_loads")]
    pub max_concurrent_loads: usize,
}

fn default_max_models_per_gpu() -> usize {
    2
}
fn default_safety_buffer_fraction() -> f64 {
    0.15
}
fn default_min_safety_buffer_mb() -> u64 {
    500
}
fn default_peak_multiplier() -> f64 {
    1.20
}
fn default_max_concurrent_loads() -> usize {
    2
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_models_per_gpu: default_max_models_per_gpu(),
            safety_buffer_fraction: default_safety_buffer_fraction(),
            min_safety_buffer_mb: default_min_safety_buffer_mb(),
            peak_multiplier: default_peak_multiplier(),
            max_concurrent_loads: default_max_concurrent_loads(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuConfig {
    /// "nvidia-smi" or "simulated"
    #[serde(default = "default_gpu_probe")]
    pub probe: String,

    #[serde(default = "default_nvidia_smi")]
    pub nvidia_smi_path: String,

    /// Device sizes for the simulated probe
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub simulated: Vec<SimulatedDeviceConfig>,
}

fn default_gpu_probe() -> String {
    "nvidia-smi".into()
}
fn default_nvidia_smi() -> String {
    "nvidia-smi".into()
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            probe: default_gpu_probe(),
            nvidia_smi_path: default_nvidia_smi(),
            simulated: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedDeviceConfig {
    pub device: u32,
    pub total_mb: u64,
}

/// Raw, unvalidated model entry. Becomes a `ModelDescriptor` once the
/// registry has resolved its path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub path: PathBuf,

    #[serde(default)]
    pub device: u32,

    pub required_mb: u64,

    /// Lower = preferred
    #[serde(default = "default_priority")]
    pub priority: u32,

    #[serde(default = "default_load_timeout")]
    pub load_timeout_secs: u64,

    #[serde(default = "default_min_difficulty")]
    pub min_difficulty: u8,

    #[serde(default = "default_max_difficulty")]
    pub max_difficulty: u8,

    /// OpenAI-compatible endpoint serving this model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

fn default_priority() -> u32 {
    100
}
fn default_load_timeout() -> u64 {
    120
}
fn default_min_difficulty() -> u8 {
    1
}
fn default_max_difficulty() -> u8 {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Floor for every output budget
    #[serde(default = "default_absolute_min_tokens")]
    pub absolute_min_tokens: u32,

    /// Turns after which the budget is halved
    #[serde(default = "default_decay_turns")]
    pub decay_turns: f64,
}

fn default_absolute_min_tokens() -> u32 {
    64
}
fn default_decay_turns() -> f64 {
    8.0
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            absolute_min_tokens: default_absolute_min_tokens(),
            decay_turns: default_decay_turns(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_max_results")]
    pub max_results: usize,

    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,

    #[serde(default = "default_recency_window_days")]
    pub recency_window_days: f64,

    /// Candidates fetched per requested result
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,

    #[serde(default = "default_dedup_threshold")]
    pub dedup_threshold: f32,

    /// Restrict memories to `difficulty ± radius` of the query
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty_radius: Option<u8>,

    #[serde(default = "default_similarity_weight")]
    pub similarity_weight: f32,

    #[serde(default = "default_recency_weight")]
    pub recency_weight: f32,

    #[serde(default = "default_difficulty_weight")]
    pub difficulty_weight: f32,
}

fn default_max_results() -> usize {
    5
}
fn default_min_similarity() -> f32 {
    0.7
}
fn default_recency_window_days() -> f64 {
    30.0
}
fn default_candidate_multiplier() -> usize {
    3
}
fn default_dedup_threshold() -> f32 {
    0.95
}
fn default_similarity_weight() -> f32 {
    0.7
}
fn default_recency_weight() -> f32 {
    0.2
}
fn default_difficulty_weight() -> f32 {
    0.1
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_results: default_max_results(),
            min_similarity: default_min_similarity(),
            recency_window_days: default_recency_window_days(),
            candidate_multiplier: default_candidate_multiplier(),
            dedup_threshold: default_dedup_threshold(),
            difficulty_radius: None,
            similarity_weight: default_similarity_weight(),
            recency_weight: default_recency_weight(),
            difficulty_weight: default_difficulty_weight(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,

    /// Snapshot to disk after this many insertions
    #[serde(default = "default_flush_every")]
    pub flush_every: usize,

    /// Snapshot file (default: `<data_dir>/embedding_cache.json`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

fn default_cache_ttl() -> u64 {
    7 * 24 * 3600
}
fn default_flush_every() -> usize {
    50
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl(),
            flush_every: default_flush_every(),
            path: None,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "hash" (offline) or "openai" (any OpenAI-compatible /embeddings)
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Vector width for the hash embedder
    #[serde(default = "default_embedding_dims")]
    pub dimensions: usize,
}

fn default_embedding_provider() -> String {
    "hash".into()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}
fn default_embedding_dims() -> usize {
    256
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_url: None,
            api_key: None,
            model: default_embedding_model(),
            dimensions: default_embedding_dims(),
        }
    }
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for EmbeddingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingConfig")
            .field("provider", &self.provider)
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// "file" or "in_memory"
    #[serde(default = "default_memory_backend")]
    pub backend: String,

    /// JSONL file for the file backend (default: `<data_dir>/memories.jsonl`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Record each successful exchange
    #[serde(default = "default_true")]
    pub auto_save: bool,
}

fn default_memory_backend() -> String {
    "file".into()
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: default_memory_backend(),
            path: None,
            auto_save: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// JSONL metrics file (default: `<data_dir>/metrics.jsonl`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_path: Option<PathBuf>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            metrics_path: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.switchyard/config.toml).
    ///
    /// Environment overrides:
    /// - `SWITCHYARD_DATA_DIR`
    /// - `SWITCHYARD_EMBEDDING_KEY` (falls back to `OPENAI_API_KEY`)
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if let Ok(dir) = std::env::var("SWITCHYARD_DATA_DIR") {
            config.data_dir = Some(PathBuf::from(dir));
        }

        if config.embedding.api_key.is_none() {
            config.embedding.api_key = std::env::var("SWITCHYARD_EMBEDDING_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Self::from_toml_str(&content).map_err(|e| match e {
            ConfigError::ParseError { reason, .. } => ConfigError::ParseError {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<inline>"),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".switchyard")
    }

    /// Directory for caches, memories and metrics.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("data"))
    }

    pub fn cache_path(&self) -> PathBuf {
        self.cache
            .path
            .clone()
            .unwrap_or_else(|| self.data_dir().join("embedding_cache.json"))
    }

    pub fn memory_path(&self) -> PathBuf {
        self.memory
            .path
            .clone()
            .unwrap_or_else(|| self.data_dir().join("memories.jsonl"))
    }

    pub fn metrics_path(&self) -> PathBuf {
        self.telemetry
            .metrics_path
            .clone()
            .unwrap_or_else(|| self.data_dir().join("metrics.jsonl"))
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        let orch = &self.orchestrator;
        if orch.max_models_per_gpu == 0 {
            return Err(ConfigError::ValidationError(
                "orchestrator.max_models_per_gpu must be at least 1".into(),
            ));
        }
        if !(0.0..1.0).contains(&orch.safety_buffer_fraction) {
            return Err(ConfigError::ValidationError(
                "orchestrator.safety_buffer_fraction must be in [0.0, 1.0)".into(),
            ));
        }
        if orch.peak_multiplier < 1.0 {
            return Err(ConfigError::ValidationError(
                "orchestrator.peak_multiplier must be >= 1.0".into(),
            ));
        }
        if orch.max_concurrent_loads == 0 {
            return Err(ConfigError::ValidationError(
                "orchestrator.max_concurrent_loads must be at least 1".into(),
            ));
        }

        if self.gpu.probe != "nvidia-smi" && self.gpu.probe != "simulated" {
            return Err(ConfigError::ValidationError(format!(
                "gpu.probe must be \"nvidia-smi\" or \"simulated\", got \"{}\"",
                self.gpu.probe
            )));
        }

        for (id, model) in &self.models {
            if model.required_mb == 0 {
                return Err(ConfigError::InvalidModel {
                    model: id.clone(),
                    reason: "required_mb must be > 0".into(),
                });
            }
            if model.load_timeout_secs == 0 {
                return Err(ConfigError::InvalidModel {
                    model: id.clone(),
                    reason: "load_timeout_secs must be > 0".into(),
                });
            }
            if model.min_difficulty < 1
                || model.max_difficulty > 100
                || model.min_difficulty > model.max_difficulty
            {
                return Err(ConfigError::InvalidModel {
                    model: id.clone(),
                    reason: "difficulty range must satisfy 1 <= min <= max <= 100".into(),
                });
            }
        }

        if self.budget.decay_turns <= 0.0 {
            return Err(ConfigError::ValidationError(
                "budget.decay_turns must be > 0".into(),
            ));
        }

        let r = &self.retrieval;
        if !(0.0..=1.0).contains(&r.min_similarity) {
            return Err(ConfigError::ValidationError(
                "retrieval.min_similarity must be between 0.0 and 1.0".into(),
            ));
        }
        if r.recency_window_days <= 0.0 {
            return Err(ConfigError::ValidationError(
                "retrieval.recency_window_days must be > 0".into(),
            ));
        }
        if r.dedup_threshold <= 0.0 || r.dedup_threshold > 1.0 {
            return Err(ConfigError::ValidationError(
                "retrieval.dedup_threshold must be in (0.0, 1.0]".into(),
            ));
        }
        if r.candidate_multiplier == 0 {
            return Err(ConfigError::ValidationError(
                "retrieval.candidate_multiplier must be at least 1".into(),
            ));
        }
        if r.similarity_weight + r.recency_weight + r.difficulty_weight <= 0.0 {
            return Err(ConfigError::ValidationError(
                "retrieval weights must sum to > 0".into(),
            ));
        }

        if self.cache.flush_every == 0 {
            return Err(ConfigError::ValidationError(
                "cache.flush_every must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for the `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        let mut out = toml::to_string_pretty(&config).unwrap_or_default();
        out.push_str(concat!(
            "\n# Declare one table per model. Paths are checked at startup.\n",
            "# [models.qwen-7b]\n",
            "# path = \"/models/qwen2.5-7b-instruct-q4_k_m.gguf\"\n",
            "# device = 0\n",
            "# required_mb = 6000\n",
            "# priority = 1\n",
            "# load_timeout_secs = 120\n",
            "# max_difficulty = 60\n",
            "# endpoint = \"http://localhost:8080/v1\"\n",
        ));
        out
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            orchestrator: OrchestratorConfig::default(),
            gpu: GpuConfig::default(),
            models: BTreeMap::new(),
            budget: BudgetConfig::default(),
            retrieval: RetrievalConfig::default(),
            cache: CacheConfig::default(),
            embedding: EmbeddingConfig::default(),
            memory: MemoryConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error("Invalid model \"{model}\": {reason}")]
    InvalidModel { model: String, reason: String },

    #[error("Model \"{model}\" points at {path}, which does not exist")]
    ModelPathMissing { model: String, path: PathBuf },
}

//! Request coordination: the seam between the lifecycle core and the rest
//! of the application.
//!
//! ```text
//! query ─▶ classify + difficulty ─▶ pick candidate ─▶ load / touch
//!                                        ▲   │ ResourceExhausted,
//!                                        └───┘ LoadTimeout, LoadFailed
//!       ─▶ budget ─▶ retrieve context ─▶ engine.generate ─▶ remember + metric
//! ```

use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use switchyard_core::error::{Error, OrchestratorError};
use switchyard_core::message::Conversation;
use switchyard_core::model::{ModelDescriptor, QueryType};
use switchyard_memory::{RetrievalContextBuilder, RetrievalQuery};
use switchyard_models::{LoadedModel, ModelLifecycleManager};
use switchyard_telemetry::{GenerationMetric, MetricsSink};
use tracing::{debug, info, warn};

use crate::budget::{BudgetBreakdown, TokenBudgetCalculator};
use crate::classify::{DifficultyEstimator, HeuristicClassifier, HeuristicDifficulty, QueryClassifier};
use crate::context::assemble_prompt;

/// One generation request.
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub query: String,
    pub conversation: Conversation,
    /// Overrides the difficulty estimate
    pub difficulty: Option<u8>,
    /// Overrides the classifier
    pub query_type: Option<QueryType>,
    /// Serve with this model only, no fallback
    pub model: Option<String>,
}

impl GenerationRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn with_conversation(mut self, conversation: Conversation) -> Self {
        self.conversation = conversation;
        self
    }

    pub fn with_difficulty(mut self, difficulty: u8) -> Self {
        self.difficulty = Some(difficulty);
        self
    }

    pub fn with_query_type(mut self, query_type: QueryType) -> Self {
        self.query_type = Some(query_type);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Text plus everything that shaped it.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationOutcome {
    pub text: String,
    pub model_id: String,
    pub difficulty: u8,
    pub query_type: QueryType,
    pub max_tokens: u32,
    pub tokens_used: u32,
    pub elapsed_ms: u64,
    pub context_results: usize,
    pub budget: BudgetBreakdown,
}

/// Coordinator tuning.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Estimated-token allowance for conversation history in the prompt
    pub history_tokens: usize,
    /// Store each successful exchange for later retrieval
    pub remember_exchanges: bool,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            history_tokens: 1024,
            remember_exchanges: true,
        }
    }
}

pub struct GenerationCoordinator {
    lifecycle: Arc<ModelLifecycleManager>,
    budget: TokenBudgetCalculator,
    retrieval: Option<Arc<RetrievalContextBuilder>>,
    metrics: Arc<dyn MetricsSink>,
    classifier: Box<dyn QueryClassifier>,
    estimator: Box<dyn DifficultyEstimator>,
    settings: CoordinatorSettings,
}

impl GenerationCoordinator {
    pub fn new(
        lifecycle: Arc<ModelLifecycleManager>,
        budget: TokenBudgetCalculator,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            lifecycle,
            budget,
            retrieval: None,
            metrics,
            classifier: Box::new(HeuristicClassifier),
            estimator: Box::new(HeuristicDifficulty::default()),
            settings: CoordinatorSettings::default(),
        }
    }

    pub fn with_retrieval(mut self, retrieval: Arc<RetrievalContextBuilder>) -> Self {
        self.retrieval = Some(retrieval);
        self
    }

    pub fn with_classifier(mut self, classifier: Box<dyn QueryClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_estimator(mut self, estimator: Box<dyn DifficultyEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn with_settings(mut self, settings: CoordinatorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn lifecycle(&self) -> &Arc<ModelLifecycleManager> {
        &self.lifecycle
    }

    pub fn retrieval(&self) -> Option<&Arc<RetrievalContextBuilder>> {
        self.retrieval.as_ref()
    }

    /// Candidate models in the order they will be tried.
    pub fn candidates(&self, difficulty: u8) -> Vec<Arc<ModelDescriptor>> {
        let mut candidates = self.lifecycle.registry().candidates_for(difficulty);
        // Stable: keeps id order within (priority, loaded) groups.
        candidates.sort_by_key(|d| (d.priority, !self.lifecycle.is_loaded(&d.id)));
        candidates
    }

    /// Load the first candidate that fits, falling through on capacity,
    /// timeout and construction errors.
    async fn acquire(
        &self,
        request: &GenerationRequest,
        difficulty: u8,
    ) -> Result<Arc<LoadedModel>, OrchestratorError> {
        if let Some(model) = &request.model {
            return self.lifecycle.load(model).await;
        }

        let candidates = self.candidates(difficulty);
        let mut last_error = None;
        for candidate in candidates {
            match self.lifecycle.load(&candidate.id).await {
                Ok(handle) => return Ok(handle),
                Err(e) if e.is_fallback_eligible() => {
                    warn!(model = %candidate.id, error = %e, "Candidate unavailable, trying next");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| OrchestratorError::ModelNotFound("no models configured".into())))
    }

    /// Serve one request end to end.
    pub async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutcome, Error> {
        let started = Instant::now();

        let query_type = request
            .query_type
            .unwrap_or_else(|| self.classifier.classify(&request.query));
        let difficulty = request
            .difficulty
            .unwrap_or_else(|| self.estimator.estimate(&request.query))
            .clamp(1, 100);
        debug!(difficulty, query_type = %query_type, "Query classified");

        let handle = self.acquire(request, difficulty).await?;
        self.lifecycle.touch(handle.id());

        let free_mb = match self.lifecycle.tracker().snapshot(handle.device()).await {
            Ok(s) => s.free_mb,
            Err(e) => {
                warn!(device = handle.device(), error = %e, "GPU probe failed, using the smallest cap");
                0
            }
        };
        let budget = self.budget.budget(
            difficulty,
            query_type,
            free_mb,
            request.conversation.turns(),
        );
        debug!(
            model = %handle.id(),
            base = budget.base_tokens,
            multiplier = budget.type_multiplier,
            decay = budget.conversation_decay,
            cap = budget.vram_cap,
            max_tokens = budget.final_tokens,
            "Token budget"
        );

        let results = match &self.retrieval {
            Some(retrieval) => {
                retrieval
                    .retrieve(&RetrievalQuery::new(&request.query).with_difficulty(difficulty))
                    .await
            }
            None => Vec::new(),
        };
        let context = RetrievalContextBuilder::format_context(&results);

        let prompt = assemble_prompt(
            &context,
            &request.conversation,
            &request.query,
            self.settings.history_tokens,
        );

        let generation = handle.generate(&prompt.text, budget.final_tokens).await?;
        self.lifecycle.touch(handle.id());
        let elapsed_ms = started.elapsed().as_millis() as u64;

        if self.settings.remember_exchanges
            && let Some(retrieval) = &self.retrieval
        {
            retrieval
                .remember(&request.query, &generation.text, difficulty, handle.id())
                .await;
        }

        let metric = GenerationMetric::new(
            handle.id(),
            difficulty,
            query_type,
            budget.final_tokens,
            generation.tokens_used,
            elapsed_ms,
        );
        // Sinks may write files; keep that off the runtime's worker threads.
        let metrics = self.metrics.clone();
        match tokio::task::spawn_blocking(move || metrics.record(&metric)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Failed to record generation metric"),
            Err(e) => warn!(error = %e, "Metric recording task died"),
        }

        info!(
            model = %handle.id(),
            difficulty,
            query_type = %query_type,
            max_tokens = budget.final_tokens,
            tokens_used = generation.tokens_used,
            elapsed_ms,
            context = results.len(),
            "Generation complete"
        );

        Ok(GenerationOutcome {
            text: generation.text,
            model_id: handle.id().to_string(),
            difficulty,
            query_type,
            max_tokens: budget.final_tokens,
            tokens_used: generation.tokens_used,
            elapsed_ms,
            context_results: results.len(),
            budget,
        })
    }

    /// Flush caches and release every model.
    pub async fn shutdown(&self) {
        if let Some(retrieval) = &self.retrieval {
            retrieval.shutdown().await;
        }
        self.lifecycle.unload_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;
    use switchyard_core::engine::{EngineLoader, Generation, InferenceEngine};
    use switchyard_core::error::EngineError;
    use switchyard_core::message::Message;
    use switchyard_memory::{EmbeddingCache, HashEmbedder, InMemoryVectorStore, RetrievalSettings};
    use switchyard_models::{GpuResourceTracker, LifecycleSettings, ModelRegistry, SimulatedGpu};
    use switchyard_telemetry::UsageLedger;

    /// Engine that records prompts and echoes a fixed reply.
    struct ScriptedEngine {
        model: String,
        prompts: Arc<Mutex<Vec<(String, u32)>>>,
        fail: bool,
    }

    #[async_trait]
    impl InferenceEngine for ScriptedEngine {
        async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<Generation, EngineError> {
            if self.fail {
                return Err(EngineError::GenerationFailed("CUDA error".into()));
            }
            self.prompts
                .lock()
                .unwrap()
                .push((prompt.to_string(), max_tokens));
            Ok(Generation {
                text: format!("answer from {}", self.model),
                tokens_used: 7,
            })
        }
    }

    struct ScriptedLoader {
        gpu: Arc<SimulatedGpu>,
        prompts: Arc<Mutex<Vec<(String, u32)>>>,
        broken: Vec<&'static str>,
        failing_engines: bool,
    }

    #[async_trait]
    impl EngineLoader for ScriptedLoader {
        async fn load(
            &self,
            descriptor: &ModelDescriptor,
        ) -> Result<Arc<dyn InferenceEngine>, EngineError> {
            if self.broken.contains(&descriptor.id.as_str()) {
                return Err(EngineError::Unavailable("missing weights".into()));
            }
            self.gpu.allocate(descriptor.device, descriptor.required_mb);
            Ok(Arc::new(ScriptedEngine {
                model: descriptor.id.clone(),
                prompts: self.prompts.clone(),
                fail: self.failing_engines,
            }))
        }

        async fn unload(&self, descriptor: &ModelDescriptor, _engine: Arc<dyn InferenceEngine>) {
            self.gpu.release(descriptor.device, descriptor.required_mb);
        }
    }

    fn model(id: &str, required_mb: u64, priority: u32, range: (u8, u8)) -> ModelDescriptor {
        ModelDescriptor {
            id: id.into(),
            path: PathBuf::from(format!("/models/{id}.gguf")),
            device: 0,
            required_mb,
            priority,
            load_timeout_secs: 5,
            min_difficulty: range.0,
            max_difficulty: range.1,
            endpoint: None,
        }
    }

    struct Harness {
        coordinator: GenerationCoordinator,
        prompts: Arc<Mutex<Vec<(String, u32)>>>,
        ledger: Arc<UsageLedger>,
    }

    fn harness(
        models: Vec<ModelDescriptor>,
        broken: Vec<&'static str>,
        failing_engines: bool,
        with_memory: bool,
    ) -> Harness {
        let gpu = Arc::new(SimulatedGpu::new([(0, 16000)]));
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let loader = Arc::new(ScriptedLoader {
            gpu: gpu.clone(),
            prompts: prompts.clone(),
            broken,
            failing_engines,
        });
        let registry = Arc::new(ModelRegistry::from_descriptors(models));
        let tracker = GpuResourceTracker::new(gpu, registry.devices());
        let lifecycle = Arc::new(ModelLifecycleManager::new(
            registry,
            tracker,
            loader,
            LifecycleSettings::default(),
        ));
        let ledger = Arc::new(UsageLedger::new());

        let mut coordinator =
            GenerationCoordinator::new(lifecycle, TokenBudgetCalculator::default(), ledger.clone());
        if with_memory {
            coordinator = coordinator.with_retrieval(Arc::new(RetrievalContextBuilder::new(
                Arc::new(HashEmbedder::default()),
                Arc::new(InMemoryVectorStore::new()),
                EmbeddingCache::ephemeral(Duration::from_secs(3600)),
                RetrievalSettings {
                    min_similarity: 0.3,
                    ..RetrievalSettings::default()
                },
            )));
        }
        Harness {
            coordinator,
            prompts,
            ledger,
        }
    }

    #[tokio::test]
    async fn serves_with_covering_model_and_records_metric() {
        let h = harness(
            vec![model("small", 2000, 1, (1, 40)), model("large", 9000, 2, (41, 100))],
            vec![],
            false,
            false,
        );

        let out = h
            .coordinator
            .generate(
                &GenerationRequest::new("hello there friend")
                    .with_difficulty(15)
                    .with_query_type(QueryType::Chat),
            )
            .await
            .unwrap();

        assert_eq!(out.model_id, "small");
        assert_eq!(out.max_tokens, 178);
        assert_eq!(out.tokens_used, 7);

        let prompts = h.prompts.lock().unwrap();
        assert_eq!(prompts[0].1, 178);
        assert!(prompts[0].0.ends_with("User: hello there friend\nAssistant:"));

        let usage = h.ledger.model("small").unwrap();
        assert_eq!(usage.requests, 1);
        assert_eq!(usage.tokens_used, 7);
    }

    /// Sink that notes which thread each record arrives on.
    #[derive(Default)]
    struct ThreadRecordingSink {
        threads: Mutex<Vec<std::thread::ThreadId>>,
    }

    impl MetricsSink for ThreadRecordingSink {
        fn record(&self, _metric: &GenerationMetric) -> Result<(), switchyard_telemetry::TelemetryError> {
            self.threads.lock().unwrap().push(std::thread::current().id());
            Ok(())
        }
    }

    #[tokio::test]
    async fn metrics_are_written_off_the_request_thread() {
        let h = harness(vec![model("small", 2000, 1, (1, 100))], vec![], false, false);
        let sink = Arc::new(ThreadRecordingSink::default());
        let coordinator = GenerationCoordinator::new(
            h.coordinator.lifecycle().clone(),
            TokenBudgetCalculator::default(),
            sink.clone(),
        );

        coordinator
            .generate(&GenerationRequest::new("hi").with_difficulty(10))
            .await
            .unwrap();

        // Recorded before generate returned, on a blocking-pool thread.
        let threads = sink.threads.lock().unwrap();
        assert_eq!(threads.len(), 1);
        assert_ne!(threads[0], std::thread::current().id());
    }

    #[tokio::test]
    async fn falls_back_when_first_candidate_cannot_fit() {
        let h = harness(
            vec![model("huge", 15000, 1, (1, 100)), model("small", 2000, 2, (1, 100))],
            vec![],
            false,
            false,
        );
        let out = h
            .coordinator
            .generate(&GenerationRequest::new("hi").with_difficulty(50))
            .await
            .unwrap();
        assert_eq!(out.model_id, "small");
    }

    #[tokio::test]
    async fn falls_back_when_construction_fails() {
        let h = harness(
            vec![model("broken", 2000, 1, (1, 100)), model("ok", 2000, 2, (1, 100))],
            vec!["broken"],
            false,
            false,
        );
        let out = h
            .coordinator
            .generate(&GenerationRequest::new("hi"))
            .await
            .unwrap();
        assert_eq!(out.model_id, "ok");
    }

    #[tokio::test]
    async fn categorized_error_when_nothing_fits() {
        let h = harness(vec![model("huge", 15000, 1, (1, 100))], vec![], false, false);
        let err = h
            .coordinator
            .generate(&GenerationRequest::new("hi"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Orchestrator(OrchestratorError::ResourceExhausted { .. })
        ));
        assert_eq!(h.ledger.total_requests(), 0);
    }

    #[tokio::test]
    async fn pinned_unknown_model_is_not_found() {
        let h = harness(vec![model("small", 2000, 1, (1, 100))], vec![], false, false);
        let err = h
            .coordinator
            .generate(&GenerationRequest::new("hi").with_model("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Orchestrator(OrchestratorError::ModelNotFound(_))));
    }

    #[tokio::test]
    async fn engine_errors_are_returned_not_retried() {
        let h = harness(
            vec![model("a", 2000, 1, (1, 100)), model("b", 2000, 2, (1, 100))],
            vec![],
            true,
            false,
        );
        let err = h
            .coordinator
            .generate(&GenerationRequest::new("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Engine(EngineError::GenerationFailed(_))));
    }

    #[tokio::test]
    async fn loaded_models_are_preferred_within_a_priority() {
        let h = harness(
            vec![model("a", 2000, 1, (1, 100)), model("b", 2000, 1, (1, 100))],
            vec![],
            false,
            false,
        );
        h.coordinator.lifecycle().load("b").await.unwrap();

        let ids: Vec<_> = h.coordinator.candidates(50).iter().map(|d| d.id.clone()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn remembered_exchange_feeds_the_next_prompt() {
        let h = harness(vec![model("small", 2000, 1, (1, 100))], vec![], false, true);

        h.coordinator
            .generate(&GenerationRequest::new("where is my config file stored").with_difficulty(20))
            .await
            .unwrap();
        let second = h
            .coordinator
            .generate(&GenerationRequest::new("where is my config file stored").with_difficulty(20))
            .await
            .unwrap();

        assert_eq!(second.context_results, 1);
        let prompts = h.prompts.lock().unwrap();
        assert!(prompts[1].0.starts_with("Relevant past exchanges:"));
        assert!(prompts[1].0.contains("answer from small"));
    }

    #[tokio::test]
    async fn history_shrinks_the_budget() {
        let h = harness(vec![model("small", 2000, 1, (1, 100))], vec![], false, false);

        let mut conversation = Conversation::new();
        for i in 0..16 {
            conversation.push(Message::user(format!("question {i}")));
            conversation.push(Message::assistant(format!("answer {i}")));
        }

        let fresh = h
            .coordinator
            .generate(&GenerationRequest::new("next").with_difficulty(70).with_query_type(QueryType::Explanation))
            .await
            .unwrap();
        let long = h
            .coordinator
            .generate(
                &GenerationRequest::new("next")
                    .with_difficulty(70)
                    .with_query_type(QueryType::Explanation)
                    .with_conversation(conversation),
            )
            .await
            .unwrap();
        assert!(long.max_tokens < fresh.max_tokens);
        assert!(h.prompts.lock().unwrap()[1].0.contains("question 15"));
    }
}

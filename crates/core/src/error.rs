//! Error types for the Switchyard domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; the top-level [`Error`]
//! wraps the ones a generation request can surface. Retrieval failures
//! never reach it: memory degrades to an empty context instead.

use thiserror::Error;

/// The top-level error type for all Switchyard operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Model lifecycle errors ---
    #[error("Orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    // --- Inference engine errors ---
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures of the model lifecycle manager.
///
/// Every variant is request-scoped: a failed load never leaves a partial
/// registration or a dangling reservation behind.
#[derive(Debug, Clone, Error)]
pub enum OrchestratorError {
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error(
        "Insufficient GPU memory for {model} on device {device}: \
         need {required_mb} MB, {available_mb} MB usable after eviction"
    )]
    ResourceExhausted {
        model: String,
        device: u32,
        required_mb: u64,
        available_mb: u64,
    },

    #[error("Loading {model} exceeded its {timeout_secs}s budget")]
    LoadTimeout { model: String, timeout_secs: u64 },

    #[error("Loading {model} failed: {reason}")]
    LoadFailed { model: String, reason: String },

    #[error("GPU probe failed for device {device}: {reason}")]
    ProbeFailed { device: u32, reason: String },
}

impl OrchestratorError {
    /// Whether the caller should try a different (smaller or lower-priority)
    /// model instead of surfacing the error.
    pub fn is_fallback_eligible(&self) -> bool {
        matches!(
            self,
            Self::ResourceExhausted { .. } | Self::LoadTimeout { .. } | Self::LoadFailed { .. }
        )
    }
}

/// Failures reported by an inference engine or its loader.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("Engine request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Engine unavailable: {0}")]
    Unavailable(String),

    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Vector store unavailable: {0}")]
    StoreUnavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_exhausted_displays_figures() {
        let err = Error::Orchestrator(OrchestratorError::ResourceExhausted {
            model: "llama-70b".into(),
            device: 0,
            required_mb: 48_000,
            available_mb: 20_000,
        });
        let text = err.to_string();
        assert!(text.contains("llama-70b"));
        assert!(text.contains("48000"));
        assert!(text.contains("20000"));
    }

    #[test]
    fn fallback_eligibility() {
        assert!(OrchestratorError::LoadTimeout {
            model: "m".into(),
            timeout_secs: 30
        }
        .is_fallback_eligible());
        assert!(OrchestratorError::ResourceExhausted {
            model: "m".into(),
            device: 1,
            required_mb: 1,
            available_mb: 0
        }
        .is_fallback_eligible());
        assert!(!OrchestratorError::ModelNotFound("m".into()).is_fallback_eligible());
    }

    #[test]
    fn request_errors_convert_into_the_top_level_error() {
        fn origin(err: &Error) -> &'static str {
            match err {
                Error::Orchestrator(_) => "lifecycle",
                Error::Engine(_) => "engine",
            }
        }

        let lifecycle: Error = OrchestratorError::ModelNotFound("ghost".into()).into();
        let engine: Error = EngineError::Network("connection reset".into()).into();
        assert_eq!(origin(&lifecycle), "lifecycle");
        assert_eq!(origin(&engine), "engine");
    }

    #[test]
    fn engine_error_displays_correctly() {
        let err = Error::Engine(EngineError::ApiError {
            status_code: 503,
            message: "model warming up".into(),
        });
        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("warming up"));
    }
}

//! Inference engine seam.
//!
//! The text generator is opaque to the core. The hosting application
//! supplies one [`EngineLoader`] per backend; the lifecycle manager calls it
//! to construct and tear down engines, and the coordinator only ever talks
//! to the resulting [`InferenceEngine`] trait object.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use crate::error::EngineError;
use crate::model::ModelDescriptor;

/// Output of a single generation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    pub tokens_used: u32,
}

/// A constructed, ready-to-serve model instance.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Generate a completion for `prompt`, producing at most `max_tokens`.
    async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
    ) -> std::result::Result<Generation, EngineError>;
}

/// Builds and releases engines for model descriptors.
///
/// `load` may take tens of seconds; the lifecycle manager runs it outside
/// its locks and under the descriptor's timeout, aborting the future if the
/// deadline passes.
#[async_trait]
pub trait EngineLoader: Send + Sync {
    /// Construct an engine for the descriptor.
    async fn load(
        &self,
        descriptor: &ModelDescriptor,
    ) -> std::result::Result<Arc<dyn InferenceEngine>, EngineError>;

    /// Release engine resources and clear device-side caches.
    ///
    /// Default implementation drops the engine.
    async fn unload(&self, descriptor: &ModelDescriptor, engine: Arc<dyn InferenceEngine>) {
        let _ = descriptor;
        drop(engine);
    }
}

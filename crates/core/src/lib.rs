//! # Switchyard Core
//!
//! Domain types, collaborator traits, and error definitions for the
//! Switchyard assistant backend. This crate has **no runtime dependencies**:
//! it defines the vocabulary that the orchestrator, the retrieval layer and
//! the coordinator all speak.
//!
//! ## Collaborator seams
//!
//! Everything the core consumes but does not own is a trait here:
//! - [`InferenceEngine`] / [`EngineLoader`]: the opaque text generator
//! - [`GpuProbe`]: point-in-time device memory reads
//! - [`Embedder`] / [`VectorStore`]: embedding and nearest-neighbour search
//!
//! Implementations live in their respective crates, or in the hosting
//! application.

pub mod error;
pub mod message;
pub mod model;
pub mod engine;
pub mod gpu;
pub mod memory;

// Re-export key types at crate root for ergonomics
pub use error::{EngineError, Error, MemoryError, OrchestratorError, Result};
pub use message::{Conversation, Message, Role};
pub use model::{DeviceId, ModelDescriptor, QueryType};
pub use engine::{EngineLoader, Generation, InferenceEngine};
pub use gpu::{GpuProbe, GpuSnapshot};
pub use memory::{Embedder, MemoryRecord, RetrievalResult, VectorHit, VectorStore};

//! Model registry, GPU memory tracking and model lifecycle orchestration.
//!
//! The [`ModelLifecycleManager`] decides which models are resident on which
//! device. It loads on demand, evicts least-recently-used models when a
//! device runs short of memory or hits its model cap, and guards every
//! engine construction with a timeout and a rollback.

pub mod gpu;
pub mod http_engine;
pub mod lifecycle;
pub mod registry;

pub use gpu::{GpuResourceTracker, NvidiaSmiProbe, SimulatedGpu};
pub use http_engine::{HttpEngine, HttpEngineLoader};
pub use lifecycle::{LifecycleSettings, LoadedModel, ModelLifecycleManager};
pub use registry::ModelRegistry;

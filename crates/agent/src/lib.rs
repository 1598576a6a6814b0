//! Per-request orchestration for Switchyard.
//!
//! Every request goes through the same steps:
//!
//! 1. **Classify** the query shape and estimate its difficulty
//! 2. **Acquire** a loaded model, falling back across candidates
//! 3. **Budget** the output length from difficulty, shape, free GPU memory
//!    and conversation length
//! 4. **Retrieve** relevant past exchanges and assemble the prompt
//! 5. **Generate**, then remember the exchange and emit a metric

pub mod budget;
pub mod classify;
pub mod context;
pub mod coordinator;

pub use budget::{BudgetBreakdown, TokenBudgetCalculator};
pub use classify::{DifficultyEstimator, HeuristicClassifier, HeuristicDifficulty, QueryClassifier};
pub use context::{AssembledPrompt, assemble_prompt};
pub use coordinator::{
    CoordinatorSettings, GenerationCoordinator, GenerationOutcome, GenerationRequest,
};

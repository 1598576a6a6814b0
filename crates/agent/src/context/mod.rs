//! Prompt assembly.
//!
//! The prompt sent to an engine has three parts, in order:
//!
//! | Part | Source | Trim strategy |
//! |------|--------|---------------|
//! | 1. Memory | Retrieved past exchanges | Already ranked and truncated |
//! | 2. History | Recent conversation turns | Oldest turns dropped |
//! | 3. Query | The current user message | Never trimmed |

pub mod prompt;
pub mod token;

pub use prompt::{AssembledPrompt, assemble_prompt};

//! Model descriptors and request classification types.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Index of a GPU device as reported by the driver.
pub type DeviceId = u32;

/// A validated, immutable description of one available model.
///
/// Built once at startup by the model registry; an unresolvable `path`
/// never makes it this far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Registry key (e.g. "qwen2.5-7b")
    pub id: String,

    /// Weights on disk
    pub path: PathBuf,

    /// Device the model is placed on
    pub device: DeviceId,

    /// Stated memory requirement in MB, before the inference peak multiplier
    pub required_mb: u64,

    /// Lower is preferred
    pub priority: u32,

    /// Budget for engine construction
    pub load_timeout_secs: u64,

    /// Lowest difficulty this model is meant to serve (inclusive)
    pub min_difficulty: u8,

    /// Highest difficulty this model is meant to serve (inclusive)
    pub max_difficulty: u8,

    /// Serving endpoint for HTTP-backed engines
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl ModelDescriptor {
    pub fn load_timeout(&self) -> Duration {
        Duration::from_secs(self.load_timeout_secs)
    }

    /// Whether a request of this difficulty falls in the model's range.
    pub fn covers(&self, difficulty: u8) -> bool {
        (self.min_difficulty..=self.max_difficulty).contains(&difficulty)
    }
}

/// Shape of a query, used to scale the output budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    /// Greetings, acknowledgements, one-word answers.
    Minimal,
    /// Ordinary conversational exchange.
    Chat,
    /// "Explain", "what is", "how does".
    Explanation,
    /// Anything containing or asking for code.
    Code,
    /// Step-by-step problem solving.
    Reasoning,
    /// Comparisons, evaluations, trade-offs.
    Analysis,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Chat => "chat",
            Self::Explanation => "explanation",
            Self::Code => "code",
            Self::Reasoning => "reasoning",
            Self::Analysis => "analysis",
        }
    }
}

impl std::fmt::Display for QueryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QueryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minimal" => Ok(Self::Minimal),
            "chat" => Ok(Self::Chat),
            "explanation" => Ok(Self::Explanation),
            "code" => Ok(Self::Code),
            "reasoning" => Ok(Self::Reasoning),
            "analysis" => Ok(Self::Analysis),
            other => Err(format!(
                "unknown query type \"{other}\" (expected minimal, chat, explanation, code, reasoning or analysis)"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> ModelDescriptor {
        ModelDescriptor {
            id: "small".into(),
            path: PathBuf::from("/models/small.gguf"),
            device: 0,
            required_mb: 4000,
            priority: 1,
            load_timeout_secs: 30,
            min_difficulty: 1,
            max_difficulty: 40,
            endpoint: None,
        }
    }

    #[test]
    fn difficulty_range_is_inclusive() {
        let d = descriptor();
        assert!(d.covers(1));
        assert!(d.covers(40));
        assert!(!d.covers(41));
    }

    #[test]
    fn query_type_serializes_snake_case() {
        let json = serde_json::to_string(&QueryType::Explanation).unwrap();
        assert_eq!(json, "\"explanation\"");
        assert_eq!(QueryType::Code.to_string(), "code");
    }

    #[test]
    fn query_type_parses_case_insensitively() {
        assert_eq!("Analysis".parse::<QueryType>().unwrap(), QueryType::Analysis);
        assert!("poem".parse::<QueryType>().is_err());
    }
}

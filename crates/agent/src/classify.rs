//! Query shape and difficulty heuristics.
//!
//! Both sit behind traits so a learned model can replace them without
//! touching the coordinator.

use switchyard_core::model::QueryType;

/// Assigns a [`QueryType`] to a query.
pub trait QueryClassifier: Send + Sync {
    fn classify(&self, query: &str) -> QueryType;
}

/// Scores query complexity from 1 (trivial) to 100 (hardest).
pub trait DifficultyEstimator: Send + Sync {
    fn estimate(&self, query: &str) -> u8;
}

const GREETINGS: &[&str] = &[
    "hi", "hello", "hey", "thanks", "thank you", "ok", "okay", "yes", "no", "bye", "good morning",
    "good night", "cool", "great",
];

const ANALYSIS_VERBS: &[&str] = &[
    "compare", "contrast", "analyze", "analyse", "evaluate", "assess", "review", "critique",
    "pros and cons", "trade-off", "tradeoff", "versus", " vs ",
];

const REASONING_MARKERS: &[&str] = &[
    "prove", "derive", "solve", "calculate", "compute", "step by step", "how many", "puzzle",
    "deduce", "if and only if", "probability",
];

const EXPLANATION_MARKERS: &[&str] = &[
    "explain", "what is", "what are", "how does", "how do", "why", "describe", "tell me about",
    "what does", "meaning of",
];

const CODE_MARKERS: &[&str] = &[
    "```", "fn ", "def ", "class ", "impl ", "#include", "select ", "function(", "=>", "::",
    "stack trace", "traceback", "compile error", "segfault",
];

const CODE_REQUESTS: &[&str] = &[
    "write a function", "write a script", "write code", "implement", "refactor", "debug",
    "fix this code", "fix the bug", "unit test", "regex",
];

const TECHNICAL_TERMS: &[&str] = &[
    "algorithm", "complexity", "concurrency", "distributed", "architecture", "optimiz",
    "kernel", "compiler", "database", "protocol", "cryptograph", "theorem", "integral",
    "derivative", "matrix", "gradient", "latency", "throughput", "memory", "async", "thread",
    "lock", "transaction", "consensus", "proof",
];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

fn word_count(query: &str) -> usize {
    query.split_whitespace().count()
}

/// Share of characters that are code-ish punctuation.
fn symbol_density(query: &str) -> f32 {
    let total = query.chars().filter(|c| !c.is_whitespace()).count();
    if total == 0 {
        return 0.0;
    }
    let symbols = query
        .chars()
        .filter(|c| matches!(c, '{' | '}' | '(' | ')' | ';' | '=' | '<' | '>' | '[' | ']' | '&' | '|'))
        .count();
    symbols as f32 / total as f32
}

/// Pattern-matching classifier over code fences, verbs, punctuation and
/// length.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicClassifier;

impl QueryClassifier for HeuristicClassifier {
    fn classify(&self, query: &str) -> QueryType {
        let lower = query.trim().to_lowercase();
        let words = word_count(&lower);

        if lower.is_empty() {
            return QueryType::Minimal;
        }
        let bare = lower.trim_end_matches(['!', '.', '?']);
        if words <= 3 && GREETINGS.iter().any(|g| bare == *g || bare.starts_with(&format!("{g} "))) {
            return QueryType::Minimal;
        }

        if contains_any(&lower, CODE_MARKERS)
            || contains_any(&lower, CODE_REQUESTS)
            || symbol_density(&lower) > 0.08
        {
            return QueryType::Code;
        }
        if contains_any(&lower, ANALYSIS_VERBS) {
            return QueryType::Analysis;
        }
        if contains_any(&lower, REASONING_MARKERS) {
            return QueryType::Reasoning;
        }
        if contains_any(&lower, EXPLANATION_MARKERS) {
            return QueryType::Explanation;
        }
        if words <= 2 {
            return QueryType::Minimal;
        }
        QueryType::Chat
    }
}

/// Additive difficulty score from length, vocabulary and structure.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicDifficulty {
    classifier: HeuristicClassifier,
}

impl DifficultyEstimator for HeuristicDifficulty {
    fn estimate(&self, query: &str) -> u8 {
        let lower = query.to_lowercase();
        let words = word_count(&lower);

        let mut score: f32 = 5.0;

        // Length: up to 35 points, saturating at ~140 words
        score += (words as f32 / 4.0).min(35.0);

        // Technical vocabulary: 6 points per distinct term, up to 30
        let terms = TECHNICAL_TERMS.iter().filter(|t| lower.contains(*t)).count();
        score += (terms as f32 * 6.0).min(30.0);

        // Several questions or enumerated parts
        let questions = lower.matches('?').count();
        if questions > 1 {
            score += ((questions - 1) as f32 * 4.0).min(12.0);
        }
        let parts = lower
            .lines()
            .filter(|l| {
                let t = l.trim_start();
                t.starts_with("- ") || t.starts_with("* ") || t.chars().next().is_some_and(|c| c.is_ascii_digit())
            })
            .count();
        score += (parts as f32 * 3.0).min(12.0);

        score += match self.classifier.classify(query) {
            QueryType::Minimal => -10.0,
            QueryType::Chat => 0.0,
            QueryType::Explanation => 5.0,
            QueryType::Code => 12.0,
            QueryType::Analysis => 15.0,
            QueryType::Reasoning => 18.0,
        };

        score.round().clamp(1.0, 100.0) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(q: &str) -> QueryType {
        HeuristicClassifier.classify(q)
    }

    #[test]
    fn greetings_are_minimal() {
        assert_eq!(classify("hi"), QueryType::Minimal);
        assert_eq!(classify("Thanks!"), QueryType::Minimal);
        assert_eq!(classify("   "), QueryType::Minimal);
    }

    #[test]
    fn code_by_fence_request_or_punctuation() {
        assert_eq!(classify("```rust\nfn main() {}\n```"), QueryType::Code);
        assert_eq!(classify("Write a function that reverses a list"), QueryType::Code);
        assert_eq!(classify("x = {a: [1, 2]}; y = (x[0] <= 3)"), QueryType::Code);
    }

    #[test]
    fn analysis_reasoning_explanation() {
        assert_eq!(classify("Compare Postgres and SQLite for a desktop app"), QueryType::Analysis);
        assert_eq!(classify("Solve for x: two times x plus three equals nine"), QueryType::Reasoning);
        assert_eq!(classify("Explain how TLS handshakes work"), QueryType::Explanation);
    }

    #[test]
    fn everything_else_is_chat() {
        assert_eq!(classify("I had a great weekend at the lake with friends"), QueryType::Chat);
    }

    #[test]
    fn difficulty_orders_simple_below_complex() {
        let est = HeuristicDifficulty::default();
        let easy = est.estimate("hello");
        let medium = est.estimate("Explain how a hash map works");
        let hard = est.estimate(
            "Prove that the amortized complexity of this concurrent lock-free queue is O(1), \
             then analyze its memory ordering under contention and compare throughput with a \
             mutex-based design. What happens with many threads? What about latency?",
        );
        assert!(easy < medium, "{easy} < {medium}");
        assert!(medium < hard, "{medium} < {hard}");
        assert!(hard > 50);
    }

    #[test]
    fn difficulty_stays_in_range() {
        let est = HeuristicDifficulty::default();
        assert!(est.estimate("") >= 1);
        let huge = "algorithm proof theorem matrix gradient ".repeat(200);
        assert!(est.estimate(&huge) <= 100);
    }
}

//! Output-length budgeting.
//!
//! `final = clamp(base(difficulty) * multiplier(type) * decay(turns),
//! absolute_min, vram_cap(free_mb))`. Pure arithmetic, no I/O.

use serde::Serialize;
use switchyard_config::BudgetConfig;
use switchyard_core::model::QueryType;

/// Difficulty bands: `(first, last, tokens at first, tokens at last)`.
const BANDS: [(u8, u8, f64, f64); 5] = [
    (1, 20, 128.0, 256.0),
    (21, 40, 256.0, 512.0),
    (41, 60, 512.0, 1024.0),
    (61, 80, 1024.0, 2048.0),
    (81, 100, 2048.0, 4096.0),
];

/// Every factor that went into a budget, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BudgetBreakdown {
    pub difficulty: u8,
    pub query_type: QueryType,
    pub base_tokens: f64,
    pub type_multiplier: f64,
    pub conversation_decay: f64,
    pub vram_cap: u32,
    pub final_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct TokenBudgetCalculator {
    absolute_min: u32,
    decay_turns: f64,
}

impl Default for TokenBudgetCalculator {
    fn default() -> Self {
        Self::from_config(&BudgetConfig::default())
    }
}

impl TokenBudgetCalculator {
    pub fn new(absolute_min: u32, decay_turns: f64) -> Self {
        Self {
            absolute_min,
            decay_turns: if decay_turns > 0.0 { decay_turns } else { 8.0 },
        }
    }

    pub fn from_config(config: &BudgetConfig) -> Self {
        Self::new(config.absolute_min_tokens, config.decay_turns)
    }

    pub fn absolute_min(&self) -> u32 {
        self.absolute_min
    }

    /// Piecewise-linear base budget. Out-of-range difficulty is clamped.
    pub fn base_tokens(difficulty: u8) -> f64 {
        let d = difficulty.clamp(1, 100);
        BANDS
            .iter()
            .find(|(first, last, _, _)| (*first..=*last).contains(&d))
            .map(|&(first, last, lo, hi)| {
                lo + (d - first) as f64 / (last - first) as f64 * (hi - lo)
            })
            .unwrap_or(4096.0)
    }

    pub fn type_multiplier(query_type: QueryType) -> f64 {
        match query_type {
            QueryType::Minimal => 0.5,
            QueryType::Chat => 0.8,
            QueryType::Explanation => 1.0,
            QueryType::Code => 1.5,
            QueryType::Analysis => 1.8,
            QueryType::Reasoning => 2.0,
        }
    }

    /// Ceiling from free device memory.
    pub fn vram_cap(free_mb: u64) -> u32 {
        match free_mb {
            0..4096 => 512,
            4096..8192 => 1024,
            8192..12288 => 2048,
            _ => 8192,
        }
    }

    /// `1 / (1 + turns / decay_turns)`, never below 0.25.
    pub fn conversation_decay(&self, turns: usize) -> f64 {
        (1.0 / (1.0 + turns as f64 / self.decay_turns)).max(0.25)
    }

    pub fn budget(
        &self,
        difficulty: u8,
        query_type: QueryType,
        free_mb: u64,
        turns: usize,
    ) -> BudgetBreakdown {
        let difficulty = difficulty.clamp(1, 100);
        let base_tokens = Self::base_tokens(difficulty);
        let type_multiplier = Self::type_multiplier(query_type);
        let conversation_decay = self.conversation_decay(turns);
        let vram_cap = Self::vram_cap(free_mb);

        let raw = (base_tokens * type_multiplier * conversation_decay).round() as u32;
        let floor = self.absolute_min.min(vram_cap);
        let final_tokens = raw.clamp(floor, vram_cap);

        BudgetBreakdown {
            difficulty,
            query_type,
            base_tokens,
            type_multiplier,
            conversation_decay,
            vram_cap,
            final_tokens,
        }
    }

    pub fn final_budget(
        &self,
        difficulty: u8,
        query_type: QueryType,
        free_mb: u64,
        turns: usize,
    ) -> u32 {
        self.budget(difficulty, query_type, free_mb, turns).final_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_TYPES: [QueryType; 6] = [
        QueryType::Minimal,
        QueryType::Chat,
        QueryType::Explanation,
        QueryType::Code,
        QueryType::Reasoning,
        QueryType::Analysis,
    ];

    #[test]
    fn band_endpoints() {
        assert_eq!(TokenBudgetCalculator::base_tokens(1), 128.0);
        assert_eq!(TokenBudgetCalculator::base_tokens(20), 256.0);
        assert_eq!(TokenBudgetCalculator::base_tokens(21), 256.0);
        assert_eq!(TokenBudgetCalculator::base_tokens(60), 1024.0);
        assert_eq!(TokenBudgetCalculator::base_tokens(100), 4096.0);
        // Clamped, not rejected
        assert_eq!(TokenBudgetCalculator::base_tokens(0), 128.0);
        assert_eq!(TokenBudgetCalculator::base_tokens(250), 4096.0);
    }

    #[test]
    fn vram_cap_thresholds() {
        assert_eq!(TokenBudgetCalculator::vram_cap(0), 512);
        assert_eq!(TokenBudgetCalculator::vram_cap(4095), 512);
        assert_eq!(TokenBudgetCalculator::vram_cap(4096), 1024);
        assert_eq!(TokenBudgetCalculator::vram_cap(12287), 2048);
        assert_eq!(TokenBudgetCalculator::vram_cap(12288), 8192);
    }

    #[test]
    fn chat_at_difficulty_15_with_plenty_of_memory() {
        let calc = TokenBudgetCalculator::default();
        let b = calc.budget(15, QueryType::Chat, 16000, 0);

        assert!(b.base_tokens > 128.0 && b.base_tokens < 256.0);
        assert_eq!(b.vram_cap, 8192);
        assert!(b.final_tokens >= (128.0 * 0.8) as u32);
        assert!(b.final_tokens <= (256.0 * 0.8) as u32);
        assert_eq!(b.final_tokens, 178);
    }

    #[test]
    fn always_within_floor_and_cap() {
        let calc = TokenBudgetCalculator::default();
        for free in [0u64, 3000, 6000, 10000, 40000] {
            for qt in ALL_TYPES {
                for d in 0..=110u8 {
                    for turns in [0usize, 5, 50] {
                        let t = calc.final_budget(d, qt, free, turns);
                        assert!(t >= calc.absolute_min());
                        assert!(t <= TokenBudgetCalculator::vram_cap(free));
                    }
                }
            }
        }
    }

    #[test]
    fn monotone_in_difficulty() {
        let calc = TokenBudgetCalculator::default();
        for free in [2000u64, 9000, 24000] {
            for qt in ALL_TYPES {
                let mut prev = 0;
                for d in 1..=100u8 {
                    let t = calc.final_budget(d, qt, free, 0);
                    assert!(t >= prev, "d={d} type={qt} free={free}: {t} < {prev}");
                    prev = t;
                }
            }
        }
    }

    #[test]
    fn decay_never_increases_and_floors_at_quarter() {
        let calc = TokenBudgetCalculator::default();
        assert_eq!(calc.conversation_decay(0), 1.0);
        assert!((calc.conversation_decay(8) - 0.5).abs() < 1e-9);

        let mut prev = f64::MAX;
        for turns in 0..200 {
            let d = calc.conversation_decay(turns);
            assert!(d <= prev);
            assert!(d >= 0.25);
            prev = d;
        }
        assert_eq!(calc.conversation_decay(1000), 0.25);
    }

    #[test]
    fn long_conversations_shrink_the_budget() {
        let calc = TokenBudgetCalculator::default();
        let fresh = calc.final_budget(70, QueryType::Explanation, 24000, 0);
        let long = calc.final_budget(70, QueryType::Explanation, 24000, 40);
        assert!(long < fresh);
        assert!(long as f64 >= fresh as f64 * 0.25 - 1.0);
    }
}

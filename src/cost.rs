//! Process-wide accounting for capability invocations.
//!
//! Every capability call reports a [`TokenUsage`]; the engine adds it to the
//! global [`COST`] ledger. Counters are atomic so concurrent sessions never
//! lose updates, and they reset only at process start.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Usage reported by one capability invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Monetary cost in account currency units.
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

/// Accumulated usage across all sessions in this process.
///
/// Monetary cost is an `f64` stored as raw bits and updated with a CAS loop;
/// token counts are plain fetch-adds. Read-only from the engine's
/// perspective apart from [`CostLedger::record`].
#[derive(Debug)]
pub struct CostLedger {
    cost_bits: AtomicU64,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
}

/// The process-wide ledger.
pub static COST: CostLedger = CostLedger::new();

impl CostLedger {
    pub const fn new() -> Self {
        Self {
            cost_bits: AtomicU64::new(0), // 0u64 == 0.0f64 bits
            input_tokens: AtomicU64::new(0),
            output_tokens: AtomicU64::new(0),
        }
    }

    /// Add one invocation's usage. Safe under concurrent callers.
    pub fn record(&self, usage: &TokenUsage) {
        self.input_tokens
            .fetch_add(usage.input_tokens, Ordering::Relaxed);
        self.output_tokens
            .fetch_add(usage.output_tokens, Ordering::Relaxed);

        let mut current = self.cost_bits.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + usage.cost).to_bits();
            match self.cost_bits.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn cost(&self) -> f64 {
        f64::from_bits(self.cost_bits.load(Ordering::Relaxed))
    }

    pub fn input_tokens(&self) -> u64 {
        self.input_tokens.load(Ordering::Relaxed)
    }

    pub fn output_tokens(&self) -> u64 {
        self.output_tokens.load(Ordering::Relaxed)
    }
}

impl Default for CostLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_single_usage() {
        let ledger = CostLedger::new();
        ledger.record(&TokenUsage {
            cost: 0.25,
            input_tokens: 100,
            output_tokens: 40,
        });
        assert_eq!(ledger.cost(), 0.25);
        assert_eq!(ledger.input_tokens(), 100);
        assert_eq!(ledger.output_tokens(), 40);
    }

    #[test]
    fn concurrent_records_lose_no_updates() {
        let ledger = std::sync::Arc::new(CostLedger::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let ledger = std::sync::Arc::clone(&ledger);
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    ledger.record(&TokenUsage {
                        cost: 0.5,
                        input_tokens: 3,
                        output_tokens: 1,
                    });
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(ledger.input_tokens(), 8 * 1000 * 3);
        assert_eq!(ledger.output_tokens(), 8 * 1000);
        // 0.5 is exactly representable, so the sum is exact.
        assert_eq!(ledger.cost(), 8.0 * 1000.0 * 0.5);
    }

    #[test]
    fn usage_deserializes_with_missing_fields() {
        let usage: TokenUsage = serde_json::from_str(r#"{"input_tokens": 5}"#).unwrap();
        assert_eq!(usage.input_tokens, 5);
        assert_eq!(usage.output_tokens, 0);
        assert_eq!(usage.cost, 0.0);
    }
}

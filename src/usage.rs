//! Process-wide model usage accounting.
//!
//! Pages run concurrently and every one of them reports tokens, so the
//! counters are plain atomics shared through an `Arc`. No lock is taken on
//! the hot path.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Which tier a call was billed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Precheck,
    Extraction,
}

#[derive(Debug, Default)]
struct TierCounters {
    calls: AtomicU64,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
}

impl TierCounters {
    fn record(&self, input: usize, output: usize) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.input_tokens.fetch_add(input as u64, Ordering::Relaxed);
        self.output_tokens.fetch_add(output as u64, Ordering::Relaxed);
    }

    fn snapshot(&self) -> TierUsage {
        TierUsage {
            calls: self.calls.load(Ordering::Relaxed),
            input_tokens: self.input_tokens.load(Ordering::Relaxed),
            output_tokens: self.output_tokens.load(Ordering::Relaxed),
        }
    }
}

/// Shared, lock-free usage meter.
#[derive(Debug, Default)]
pub struct UsageMeter {
    precheck: TierCounters,
    extraction: TierCounters,
}

impl UsageMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed model call.
    pub fn record(&self, tier: Tier, input_tokens: usize, output_tokens: usize) {
        match tier {
            Tier::Precheck => self.precheck.record(input_tokens, output_tokens),
            Tier::Extraction => self.extraction.record(input_tokens, output_tokens),
        }
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            precheck: self.precheck.snapshot(),
            extraction: self.extraction.snapshot(),
        }
    }
}

/// Point-in-time copy of one tier's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierUsage {
    pub calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Point-in-time copy of the whole meter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub precheck: TierUsage,
    pub extraction: TierUsage,
}

impl UsageSnapshot {
    pub fn total_input_tokens(&self) -> u64 {
        self.precheck.input_tokens + self.extraction.input_tokens
    }

    pub fn total_output_tokens(&self) -> u64 {
        self.precheck.output_tokens + self.extraction.output_tokens
    }
}

//! Deterministic hash-based sampling.
//!
//! A decision is a pure function of `(session_id, turn_index, rate)`: the
//! SHA-256 of `"<session_id>:<turn_index>"` truncated to 32 bits, mod 100,
//! compared against the rate. Every worker replica therefore makes the
//! same call for the same turn, so redeliveries and horizontal scaling
//! never double- or under-sample.

use omnia_domain::config::SamplingConfig;
use sha2::{Digest, Sha256};

/// Sampling rates in percent, `0..=100`.
#[derive(Debug, Clone, Copy)]
pub struct Sampler {
    default_rate: u32,
    llm_judge_rate: u32,
}

impl Sampler {
    pub fn new(cfg: &SamplingConfig) -> Self {
        Self {
            default_rate: cfg.default_rate,
            llm_judge_rate: cfg.llm_judge_rate,
        }
    }

    /// Decide whether the eval for this turn runs.
    ///
    /// Judge evals use the (typically much lower) `llm_judge_rate`.
    pub fn should_sample(&self, session_id: &str, turn_index: usize, is_llm_judge: bool) -> bool {
        let rate = if is_llm_judge {
            self.llm_judge_rate
        } else {
            self.default_rate
        };
        if rate == 0 {
            return false;
        }
        if rate >= 100 {
            return true;
        }
        bucket(session_id, turn_index) < rate
    }
}

/// Map a `(session_id, turn_index)` pair onto `0..100`.
fn bucket(session_id: &str, turn_index: usize) -> u32 {
    let mut hasher = Sha256::new();
    hasher.update(session_id.as_bytes());
    hasher.update(b":");
    hasher.update(turn_index.to_string().as_bytes());
    let digest = hasher.finalize();
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) % 100
}

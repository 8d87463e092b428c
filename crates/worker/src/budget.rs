//! Per-namespace judge-spend accounting.
//!
//! The tracker is in-process state: it bounds what *this* worker spends on
//! judge calls between externally scheduled resets. `paused` is recomputed
//! on every mutation so the hot-path check stays O(1).

use std::collections::HashMap;

use parking_lot::Mutex;

#[derive(Debug, Default, Clone, Copy)]
struct BudgetState {
    spent: f64,
    limit: f64,
    paused: bool,
}

impl BudgetState {
    /// `paused ⇔ limit > 0 ∧ spent ≥ limit`.
    fn recompute(&mut self) {
        self.paused = self.limit > 0.0 && self.spent >= self.limit;
    }
}

/// Thread-safe per-namespace spend tracker with a pause latch.
#[derive(Default)]
pub struct BudgetTracker {
    state: Mutex<HashMap<String, BudgetState>>,
}

impl BudgetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (or change) the USD limit. `limit <= 0` disables enforcement.
    pub fn set_budget(&self, namespace: &str, limit: f64) {
        let mut state = self.state.lock();
        let entry = state.entry(namespace.to_owned()).or_default();
        entry.limit = limit;
        entry.recompute();
    }

    /// Add judge spend and recompute the pause flag.
    pub fn record_spend(&self, namespace: &str, cost: f64) {
        let mut state = self.state.lock();
        let entry = state.entry(namespace.to_owned()).or_default();
        entry.spent += cost;
        entry.recompute();
    }

    /// Whether eval execution for this namespace is paused.
    pub fn is_paused(&self, namespace: &str) -> bool {
        self.state
            .lock()
            .get(namespace)
            .map(|s| s.paused)
            .unwrap_or(false)
    }

    /// Current spend (0 for untracked namespaces).
    pub fn spent(&self, namespace: &str) -> f64 {
        self.state
            .lock()
            .get(namespace)
            .map(|s| s.spent)
            .unwrap_or(0.0)
    }

    /// Zero the spend and clear the pause flag. Called by the external
    /// reset schedule (e.g. monthly rollover).
    pub fn reset(&self, namespace: &str) {
        let mut state = self.state.lock();
        if let Some(entry) = state.get_mut(namespace) {
            entry.spent = 0.0;
            entry.recompute();
        }
    }
}

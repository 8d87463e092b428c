//! `omnia-evals` — eval execution for the Omnia eval worker.
//!
//! An [`EvalDispatcher`] routes each eval definition to one of three
//! executors:
//!
//! | `type` | Executor |
//! |---|---|
//! | `arena_assertion` | [`arena`] — conversation-level assertions |
//! | `llm_judge` | a pluggable [`JudgeExecutor`] (network-backed) |
//! | everything else | [`rules`] — deterministic string/regex/length checks |
//!
//! Only deterministic evals run synchronously in-process; judges may
//! suspend for network I/O.

pub mod arena;
pub mod cost;
pub mod rules;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use omnia_domain::error::{Error, Result};
use omnia_domain::evals::{eval_type, EvalDefinition};
use omnia_domain::session::Message;

pub use cost::CostCalculator;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outcomes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Token usage reported by a judge call, used for pricing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeUsage {
    pub provider: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// What an executor produced for one eval.
///
/// The worker turns this into a persisted `EvalResult` by stamping session
/// identity, pack identity, and `created_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalOutcome {
    pub passed: bool,
    /// Optional score in `[0, 1]`.
    pub score: Option<f64>,
    /// Structured detail blob, serialized into the result's `details`.
    pub details: serde_json::Value,
    pub duration_ms: u64,
    /// Present only for judge evals that reported usage.
    pub usage: Option<JudgeUsage>,
}

impl EvalOutcome {
    pub fn new(passed: bool, score: Option<f64>, details: serde_json::Value) -> Self {
        Self {
            passed,
            score,
            details,
            duration_ms: 0,
            usage: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Judge seam
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The single-call contract for LLM-judge backends.
///
/// Provider clients live outside this workspace; the worker only needs
/// `evaluate`. Implementations must be safe for concurrent use — the rate
/// limiter bounds in-flight calls, not the executor.
#[async_trait]
pub trait JudgeExecutor: Send + Sync {
    async fn evaluate(&self, def: &EvalDefinition, messages: &[Message]) -> Result<EvalOutcome>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatcher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Routes eval definitions to the executor matching their `type`.
pub struct EvalDispatcher {
    judge: Option<Arc<dyn JudgeExecutor>>,
}

impl EvalDispatcher {
    pub fn new(judge: Option<Arc<dyn JudgeExecutor>>) -> Self {
        Self { judge }
    }

    /// Whether evals of this type run without network I/O.
    pub fn is_deterministic(eval_type_name: &str) -> bool {
        eval_type_name != eval_type::LLM_JUDGE
    }

    /// Execute one eval over the conversation.
    pub async fn dispatch(
        &self,
        def: &EvalDefinition,
        messages: &[Message],
    ) -> Result<EvalOutcome> {
        match def.eval_type.as_str() {
            eval_type::ARENA_ASSERTION => arena::run(def, messages),
            eval_type::LLM_JUDGE => match &self.judge {
                Some(judge) => judge.evaluate(def, messages).await,
                None => Err(Error::eval(&def.id, "no judge executor configured")),
            },
            _ => rules::run(def, messages),
        }
    }
}

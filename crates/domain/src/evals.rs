//! Eval definitions, triggers, and persisted results.
//!
//! Eval definitions live in prompt packs; results are written back to the
//! session service in batches and are append-only from the worker's view.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Well-known eval `type` values. `params` decides everything else, so the
/// type stays a plain string on the wire — unknown types route to the rule
/// engine and fail there with a typed error.
pub mod eval_type {
    pub const CONTAINS: &str = "contains";
    pub const NOT_CONTAINS: &str = "not_contains";
    pub const MAX_LENGTH: &str = "max_length";
    pub const MIN_LENGTH: &str = "min_length";
    pub const REGEX_MATCH: &str = "regex_match";
    pub const ARENA_ASSERTION: &str = "arena_assertion";
    pub const LLM_JUDGE: &str = "llm_judge";
}

/// Marker recorded on every result row produced by this process.
pub const RESULT_SOURCE_WORKER: &str = "worker";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Triggers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// When an eval runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalTrigger {
    #[default]
    PerTurn,
    OnSessionComplete,
    OnNTurns,
}

impl EvalTrigger {
    /// The wire/label name of this trigger.
    pub fn as_str(&self) -> &'static str {
        match self {
            EvalTrigger::PerTurn => "per_turn",
            EvalTrigger::OnSessionComplete => "on_session_complete",
            EvalTrigger::OnNTurns => "on_n_turns",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Definitions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One eval attached to a prompt pack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalDefinition {
    pub id: String,
    #[serde(rename = "type")]
    pub eval_type: String,
    #[serde(default)]
    pub trigger: EvalTrigger,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    /// References a judge mapping when `eval_type` is `llm_judge`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judge_name: Option<String>,
}

impl EvalDefinition {
    pub fn is_llm_judge(&self) -> bool {
        self.eval_type == eval_type::LLM_JUDGE
    }
}

/// Simplified declarative assertion form carried by packs.
///
/// The pack loader converts each one into an `arena_assertion`
/// [`EvalDefinition`] with trigger `on_session_complete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackAssertion {
    #[serde(rename = "type")]
    pub assertion_type: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// The evals of one prompt pack, as cached by the loader.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptPackEvals {
    pub pack_name: String,
    pub pack_version: String,
    /// Explicit evals first, converted pack assertions after.
    pub evals: Vec<EvalDefinition>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Results
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One pass/fail/score record persisted to the session service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalResult {
    pub session_id: String,
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub agent_name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub prompt_pack_name: String,
    #[serde(default)]
    pub prompt_pack_version: String,
    pub eval_id: String,
    #[serde(default)]
    pub eval_type: String,
    #[serde(default)]
    pub trigger: EvalTrigger,
    pub passed: bool,
    /// Optional score in `[0, 1]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// JSON-encoded detail blob.
    #[serde(default)]
    pub details: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub source: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_wire_names_are_snake_case() {
        assert_eq!(serde_json::to_string(&EvalTrigger::PerTurn).unwrap(), "\"per_turn\"");
        assert_eq!(
            serde_json::to_string(&EvalTrigger::OnSessionComplete).unwrap(),
            "\"on_session_complete\""
        );
        assert_eq!(serde_json::to_string(&EvalTrigger::OnNTurns).unwrap(), "\"on_n_turns\"");
    }

    #[test]
    fn definition_trigger_defaults_to_per_turn() {
        let def: EvalDefinition =
            serde_json::from_str(r#"{"id":"e1","type":"contains","params":{"value":"hi"}}"#)
                .unwrap();
        assert_eq!(def.trigger, EvalTrigger::PerTurn);
        assert!(!def.is_llm_judge());
    }

    #[test]
    fn result_serializes_camel_case() {
        let result = EvalResult {
            session_id: "s1".into(),
            message_id: "m1".into(),
            agent_name: "bot".into(),
            namespace: "prod".into(),
            prompt_pack_name: "pack".into(),
            prompt_pack_version: "v1".into(),
            eval_id: "e1".into(),
            eval_type: eval_type::CONTAINS.into(),
            trigger: EvalTrigger::PerTurn,
            passed: true,
            score: Some(1.0),
            details: "{}".into(),
            duration_ms: Some(3),
            source: RESULT_SOURCE_WORKER.into(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"sessionId\":\"s1\""));
        assert!(json.contains("\"evalId\":\"e1\""));
        assert!(json.contains("\"promptPackVersion\":\"v1\""));
    }
}

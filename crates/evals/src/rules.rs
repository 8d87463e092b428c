//! Deterministic rule checks over assistant messages.
//!
//! Every rule scans the assistant messages of the conversation and produces
//! a pass flag plus a fractional score: the share of messages satisfying
//! the rule. "All must satisfy" rules with zero assistant messages fail
//! with no score; "none may violate" rules pass vacuously.

use std::time::Instant;

use regex::Regex;
use serde_json::{json, Map, Value};

use omnia_domain::error::{Error, Result};
use omnia_domain::evals::{eval_type, EvalDefinition};
use omnia_domain::session::Message;

use crate::EvalOutcome;

/// Execute a rule-type eval. Unknown types produce a typed error.
pub fn run(def: &EvalDefinition, messages: &[Message]) -> Result<EvalOutcome> {
    let start = Instant::now();
    let assistant: Vec<&str> = messages
        .iter()
        .filter(|m| m.is_assistant())
        .map(|m| m.content.as_str())
        .collect();

    let mut outcome = match def.eval_type.as_str() {
        eval_type::CONTAINS => {
            let value = require_str(&def.params, "value", &def.id)?;
            all_match(&assistant, |content| content.contains(value), json!({"value": value}))
        }
        eval_type::NOT_CONTAINS => {
            let value = require_str(&def.params, "value", &def.id)?;
            none_match(&assistant, |content| content.contains(value), json!({"value": value}))
        }
        eval_type::MAX_LENGTH => {
            let max = require_int(&def.params, "maxLength", &def.id)?;
            none_match(
                &assistant,
                |content| content.chars().count() > max,
                json!({"maxLength": max}),
            )
        }
        eval_type::MIN_LENGTH => {
            let min = require_int(&def.params, "minLength", &def.id)?;
            all_match(
                &assistant,
                |content| content.chars().count() >= min,
                json!({"minLength": min}),
            )
        }
        eval_type::REGEX_MATCH => {
            let pattern = require_str(&def.params, "pattern", &def.id)?;
            let regex = Regex::new(pattern)
                .map_err(|e| Error::eval(&def.id, format!("invalid regex: {e}")))?;
            all_match(&assistant, |content| regex.is_match(content), json!({"pattern": pattern}))
        }
        other => {
            return Err(Error::eval(&def.id, format!("unknown eval type: {other}")));
        }
    };

    outcome.duration_ms = start.elapsed().as_millis() as u64;
    Ok(outcome)
}

// ── rule shapes ──────────────────────────────────────────────────────

/// Pass iff every assistant message satisfies `check`.
/// Zero assistant messages fail with no score.
fn all_match(assistant: &[&str], check: impl Fn(&str) -> bool, mut details: Value) -> EvalOutcome {
    if assistant.is_empty() {
        annotate(&mut details, 0, 0);
        return EvalOutcome::new(false, None, details);
    }
    let matched = assistant.iter().filter(|c| check(c)).count();
    annotate(&mut details, matched, assistant.len());
    EvalOutcome::new(
        matched == assistant.len(),
        Some(matched as f64 / assistant.len() as f64),
        details,
    )
}

/// Pass iff no assistant message violates `check`.
/// Zero assistant messages pass vacuously with no score.
fn none_match(assistant: &[&str], violates: impl Fn(&str) -> bool, mut details: Value) -> EvalOutcome {
    if assistant.is_empty() {
        annotate(&mut details, 0, 0);
        return EvalOutcome::new(true, None, details);
    }
    let clean = assistant.iter().filter(|c| !violates(c)).count();
    annotate(&mut details, clean, assistant.len());
    EvalOutcome::new(
        clean == assistant.len(),
        Some(clean as f64 / assistant.len() as f64),
        details,
    )
}

fn annotate(details: &mut Value, matched: usize, total: usize) {
    if let Value::Object(map) = details {
        map.insert("matched".into(), json!(matched));
        map.insert("assistantMessages".into(), json!(total));
    }
}

// ── param coercion ───────────────────────────────────────────────────

fn require_str<'p>(params: &'p Map<String, Value>, key: &str, eval_id: &str) -> Result<&'p str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::eval(eval_id, format!("missing or non-string param \"{key}\"")))
}

/// Integer params may arrive as JSON floats (`100.0`); coerce them.
fn require_int(params: &Map<String, Value>, key: &str, eval_id: &str) -> Result<usize> {
    let value = params
        .get(key)
        .ok_or_else(|| Error::eval(eval_id, format!("missing param \"{key}\"")))?;
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_u64() {
                Ok(i as usize)
            } else if let Some(f) = n.as_f64() {
                if f >= 0.0 {
                    Ok(f as usize)
                } else {
                    Err(Error::eval(eval_id, format!("param \"{key}\" must be non-negative")))
                }
            } else {
                Err(Error::eval(eval_id, format!("param \"{key}\" is not a valid integer")))
            }
        }
        _ => Err(Error::eval(eval_id, format!("param \"{key}\" must be a number"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: &str, content: &str) -> Message {
        serde_json::from_value(json!({"id": "m", "role": role, "content": content})).unwrap()
    }

    fn def(eval_type_name: &str, params: Value) -> EvalDefinition {
        serde_json::from_value(json!({"id": "e1", "type": eval_type_name, "params": params}))
            .unwrap()
    }

    #[test]
    fn contains_pass_scores_full() {
        let messages = [msg("user", "hi"), msg("assistant", "hello world")];
        let outcome = run(&def("contains", json!({"value": "hello"})), &messages).unwrap();
        assert!(outcome.passed);
        assert_eq!(outcome.score, Some(1.0));
    }

    #[test]
    fn contains_fail_scores_zero() {
        let messages = [msg("user", "hi"), msg("assistant", "hello world")];
        let outcome = run(&def("contains", json!({"value": "goodbye"})), &messages).unwrap();
        assert!(!outcome.passed);
        assert_eq!(outcome.score, Some(0.0));
    }

    #[test]
    fn contains_partial_fraction() {
        let messages = [
            msg("assistant", "hello world"),
            msg("assistant", "goodbye"),
        ];
        let outcome = run(&def("contains", json!({"value": "hello"})), &messages).unwrap();
        assert!(!outcome.passed);
        assert_eq!(outcome.score, Some(0.5));
    }

    #[test]
    fn contains_ignores_non_assistant_messages() {
        let messages = [msg("user", "hello"), msg("assistant", "sure")];
        let outcome = run(&def("contains", json!({"value": "hello"})), &messages).unwrap();
        assert!(!outcome.passed);
    }

    #[test]
    fn not_contains_clean_passes() {
        let messages = [msg("assistant", "all good")];
        let outcome = run(&def("not_contains", json!({"value": "error"})), &messages).unwrap();
        assert!(outcome.passed);
        assert_eq!(outcome.score, Some(1.0));
    }

    #[test]
    fn max_length_counts_chars() {
        let messages = [msg("assistant", "12345")];
        assert!(run(&def("max_length", json!({"maxLength": 5})), &messages).unwrap().passed);
        assert!(!run(&def("max_length", json!({"maxLength": 4})), &messages).unwrap().passed);
    }

    #[test]
    fn min_length_requires_every_message() {
        let messages = [msg("assistant", "long enough"), msg("assistant", "no")];
        let outcome = run(&def("min_length", json!({"minLength": 5})), &messages).unwrap();
        assert!(!outcome.passed);
        assert_eq!(outcome.score, Some(0.5));
    }

    #[test]
    fn regex_match_all_messages() {
        let messages = [msg("assistant", "order #1234 confirmed")];
        let outcome = run(&def("regex_match", json!({"pattern": r"#\d+"})), &messages).unwrap();
        assert!(outcome.passed);
    }

    #[test]
    fn invalid_regex_is_typed_error() {
        let messages = [msg("assistant", "x")];
        let err = run(&def("regex_match", json!({"pattern": "("})), &messages).unwrap_err();
        assert!(matches!(err, Error::Eval { .. }));
    }

    #[test]
    fn zero_assistant_messages_edge_cases() {
        let messages = [msg("user", "hi")];
        // "all must satisfy" rules fail with no score.
        for (t, params) in [
            ("contains", json!({"value": "x"})),
            ("min_length", json!({"minLength": 1})),
            ("regex_match", json!({"pattern": "x"})),
        ] {
            let outcome = run(&def(t, params), &messages).unwrap();
            assert!(!outcome.passed, "{t} should fail on empty");
            assert_eq!(outcome.score, None, "{t} should carry no score");
        }
        // "none may violate" rules pass vacuously.
        for (t, params) in [
            ("not_contains", json!({"value": "x"})),
            ("max_length", json!({"maxLength": 1})),
        ] {
            let outcome = run(&def(t, params), &messages).unwrap();
            assert!(outcome.passed, "{t} should pass on empty");
            assert_eq!(outcome.score, None);
        }
    }

    #[test]
    fn float_params_are_coerced_to_int() {
        let messages = [msg("assistant", "12345")];
        let outcome = run(&def("max_length", json!({"maxLength": 5.0})), &messages).unwrap();
        assert!(outcome.passed);
    }

    #[test]
    fn wrong_typed_param_is_typed_error() {
        let messages = [msg("assistant", "x")];
        assert!(run(&def("contains", json!({"value": 7})), &messages).is_err());
        assert!(run(&def("max_length", json!({"maxLength": "five"})), &messages).is_err());
        assert!(run(&def("contains", json!({})), &messages).is_err());
    }

    #[test]
    fn unknown_type_is_typed_error() {
        let messages = [msg("assistant", "x")];
        let err = run(&def("sentiment", json!({})), &messages).unwrap_err();
        assert!(matches!(err, Error::Eval { .. }));
    }
}

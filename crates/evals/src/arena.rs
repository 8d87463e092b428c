//! Conversation-level assertions.
//!
//! Arena assertions look at the entire transcript plus an index of tool
//! calls extracted from it. Handlers are side-effect-free; an unknown
//! assertion type or a missing handler param fails the assertion
//! (`passed = false`, `score = 0.0`) without raising an error.

use std::time::Instant;

use serde_json::{json, Map, Value};

use omnia_domain::error::{Error, Result};
use omnia_domain::evals::EvalDefinition;
use omnia_domain::session::{message_meta, Message};

use crate::EvalOutcome;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool-call extraction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One tool invocation recovered from the transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub turn_index: usize,
    pub name: String,
    pub args: Map<String, Value>,
}

/// Walk the transcript and index every tool invocation.
///
/// A message counts when its `metadata.type` is `tool_call` and its content
/// parses as `{"name":…, "arguments":…}`. Argument payloads may be absent,
/// a JSON string, or a nested object; anything unusable yields `{}`.
/// Malformed payloads are skipped silently.
pub fn extract_tool_calls(messages: &[Message]) -> Vec<ToolCall> {
    let mut calls = Vec::new();
    for (turn_index, message) in messages.iter().enumerate() {
        if message.metadata.get(message_meta::TYPE_KEY).map(String::as_str)
            != Some(message_meta::TOOL_CALL)
        {
            continue;
        }
        let Ok(payload) = serde_json::from_str::<Value>(&message.content) else {
            continue;
        };
        let Some(name) = payload.get("name").and_then(Value::as_str) else {
            continue;
        };
        calls.push(ToolCall {
            turn_index,
            name: name.to_owned(),
            args: parse_args(payload.get("arguments")),
        });
    }
    calls
}

fn parse_args(raw: Option<&Value>) -> Map<String, Value> {
    match raw {
        Some(Value::Object(map)) => map.clone(),
        // Arguments often arrive double-encoded as a JSON string.
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        },
        _ => Map::new(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Assertion execution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Execute an `arena_assertion` eval over the conversation.
///
/// `params.assertion_type` selects the handler; `params.assertion_params`
/// configures it. Missing `assertion_type` is the one hard error — the
/// eval is unconfigurable without it.
pub fn run(def: &EvalDefinition, messages: &[Message]) -> Result<EvalOutcome> {
    let start = Instant::now();

    let assertion_type = def
        .params
        .get("assertion_type")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::eval(&def.id, "missing required param \"assertion_type\""))?;

    let empty = Map::new();
    let params = def
        .params
        .get("assertion_params")
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    let tool_calls = extract_tool_calls(messages);
    let mut outcome = match assertion_type {
        "tools_called" => tools_called(params, &tool_calls),
        "tools_not_called" => tools_not_called(params, &tool_calls),
        "tool_calls_with_args" => tool_calls_with_args(params, &tool_calls),
        "content_includes_any" => content_includes_any(params, messages),
        "content_excludes" => content_excludes(params, messages),
        other => EvalOutcome::new(
            false,
            Some(0.0),
            json!({"error": format!("unknown assertion type: {other}")}),
        ),
    };

    outcome.duration_ms = start.elapsed().as_millis() as u64;
    Ok(outcome)
}

// ── handlers ─────────────────────────────────────────────────────────

fn fail_missing_param(key: &str) -> EvalOutcome {
    EvalOutcome::new(false, Some(0.0), json!({"error": format!("missing param \"{key}\"")}))
}

fn string_list(params: &Map<String, Value>, key: &str) -> Option<Vec<String>> {
    let list = params.get(key)?.as_array()?;
    Some(
        list.iter()
            .filter_map(Value::as_str)
            .map(str::to_owned)
            .collect(),
    )
}

/// All named tools appeared at least once.
fn tools_called(params: &Map<String, Value>, calls: &[ToolCall]) -> EvalOutcome {
    let Some(names) = string_list(params, "tool_names") else {
        return fail_missing_param("tool_names");
    };
    if names.is_empty() {
        return fail_missing_param("tool_names");
    }
    let found: Vec<String> = names
        .iter()
        .filter(|name| calls.iter().any(|c| &c.name == *name))
        .cloned()
        .collect();
    EvalOutcome::new(
        found.len() == names.len(),
        Some(found.len() as f64 / names.len() as f64),
        json!({"expected": names, "found": found}),
    )
}

/// None of the named tools appeared.
fn tools_not_called(params: &Map<String, Value>, calls: &[ToolCall]) -> EvalOutcome {
    let Some(names) = string_list(params, "tool_names") else {
        return fail_missing_param("tool_names");
    };
    if names.is_empty() {
        return fail_missing_param("tool_names");
    }
    let seen: Vec<String> = names
        .iter()
        .filter(|name| calls.iter().any(|c| &c.name == *name))
        .cloned()
        .collect();
    let absent = names.len() - seen.len();
    EvalOutcome::new(
        seen.is_empty(),
        Some(absent as f64 / names.len() as f64),
        json!({"forbidden": names, "seen": seen}),
    )
}

/// At least one invocation of `tool_name` carried all of `required_args`.
fn tool_calls_with_args(params: &Map<String, Value>, calls: &[ToolCall]) -> EvalOutcome {
    let Some(tool_name) = params.get("tool_name").and_then(Value::as_str) else {
        return fail_missing_param("tool_name");
    };
    let Some(required) = params.get("required_args").and_then(Value::as_object) else {
        return fail_missing_param("required_args");
    };

    let matched = calls.iter().any(|call| {
        call.name == tool_name
            && required
                .iter()
                .all(|(key, value)| call.args.get(key) == Some(value))
    });
    EvalOutcome::new(
        matched,
        Some(if matched { 1.0 } else { 0.0 }),
        json!({"toolName": tool_name, "requiredArgs": required}),
    )
}

/// Some assistant message contains at least one of the patterns.
fn content_includes_any(params: &Map<String, Value>, messages: &[Message]) -> EvalOutcome {
    let Some(patterns) = string_list(params, "patterns") else {
        return fail_missing_param("patterns");
    };
    if patterns.is_empty() {
        return fail_missing_param("patterns");
    }
    let matched = messages
        .iter()
        .filter(|m| m.is_assistant())
        .any(|m| patterns.iter().any(|p| m.content.contains(p)));
    EvalOutcome::new(
        matched,
        Some(if matched { 1.0 } else { 0.0 }),
        json!({"patterns": patterns}),
    )
}

/// No assistant message contains any of the patterns.
fn content_excludes(params: &Map<String, Value>, messages: &[Message]) -> EvalOutcome {
    let Some(patterns) = string_list(params, "patterns") else {
        return fail_missing_param("patterns");
    };
    if patterns.is_empty() {
        return fail_missing_param("patterns");
    }
    let violations: Vec<String> = messages
        .iter()
        .filter(|m| m.is_assistant())
        .flat_map(|m| {
            patterns
                .iter()
                .filter(|p| m.content.contains(p.as_str()))
                .cloned()
                .collect::<Vec<_>>()
        })
        .collect();
    EvalOutcome::new(
        violations.is_empty(),
        Some(if violations.is_empty() { 1.0 } else { 0.0 }),
        json!({"patterns": patterns, "violations": violations}),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: &str, content: &str) -> Message {
        serde_json::from_value(json!({"id": "m", "role": role, "content": content})).unwrap()
    }

    fn tool_call_msg(name: &str, args: Value) -> Message {
        serde_json::from_value(json!({
            "id": "m", "role": "assistant",
            "content": json!({"name": name, "arguments": args}).to_string(),
            "metadata": {"type": "tool_call"}
        }))
        .unwrap()
    }

    fn assertion(assertion_type: &str, params: Value) -> EvalDefinition {
        serde_json::from_value(json!({
            "id": "a1", "type": "arena_assertion", "trigger": "on_session_complete",
            "params": {"assertion_type": assertion_type, "assertion_params": params}
        }))
        .unwrap()
    }

    /// user → assistant tool_call(get_weather) → tool result → assistant answer.
    fn weather_conversation() -> Vec<Message> {
        vec![
            msg("user", "what's the weather in NYC?"),
            tool_call_msg("get_weather", json!({"city": "NYC"})),
            serde_json::from_value(json!({
                "id": "m3", "role": "system", "content": "{\"tempF\": 72}",
                "toolCallId": "tc1", "metadata": {"type": "tool_result"}
            }))
            .unwrap(),
            msg("assistant", "It's 72°F"),
        ]
    }

    #[test]
    fn extracts_tool_calls_with_turn_index() {
        let calls = extract_tool_calls(&weather_conversation());
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "get_weather");
        assert_eq!(calls[0].turn_index, 1);
        assert_eq!(calls[0].args.get("city"), Some(&json!("NYC")));
    }

    #[test]
    fn extraction_handles_string_encoded_arguments() {
        let messages = [tool_call_msg("search", json!("{\"query\":\"rust\"}"))];
        let calls = extract_tool_calls(&messages);
        assert_eq!(calls[0].args.get("query"), Some(&json!("rust")));
    }

    #[test]
    fn extraction_defaults_bad_arguments_to_empty() {
        let messages = [
            tool_call_msg("a", json!(42)),
            tool_call_msg("b", json!("not json")),
        ];
        let calls = extract_tool_calls(&messages);
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|c| c.args.is_empty()));
    }

    #[test]
    fn extraction_skips_malformed_payloads() {
        let mut broken = tool_call_msg("x", json!({}));
        broken.content = "not json at all".into();
        let mut nameless = tool_call_msg("x", json!({}));
        nameless.content = r#"{"arguments":{}}"#.into();

        assert!(extract_tool_calls(&[broken, nameless]).is_empty());
    }

    #[test]
    fn tools_called_pass() {
        let def = assertion("tools_called", json!({"tool_names": ["get_weather"]}));
        let outcome = run(&def, &weather_conversation()).unwrap();
        assert!(outcome.passed);
        assert_eq!(outcome.score, Some(1.0));
    }

    #[test]
    fn tools_called_partial_score() {
        let def = assertion("tools_called", json!({"tool_names": ["get_weather", "book_flight"]}));
        let outcome = run(&def, &weather_conversation()).unwrap();
        assert!(!outcome.passed);
        assert_eq!(outcome.score, Some(0.5));
    }

    #[test]
    fn tools_not_called_flags_forbidden_tool() {
        let def = assertion("tools_not_called", json!({"tool_names": ["get_weather"]}));
        let outcome = run(&def, &weather_conversation()).unwrap();
        assert!(!outcome.passed);
    }

    #[test]
    fn tool_calls_with_args_subset_match() {
        let def = assertion(
            "tool_calls_with_args",
            json!({"tool_name": "get_weather", "required_args": {"city": "NYC"}}),
        );
        assert!(run(&def, &weather_conversation()).unwrap().passed);

        let wrong_city = assertion(
            "tool_calls_with_args",
            json!({"tool_name": "get_weather", "required_args": {"city": "LA"}}),
        );
        assert!(!run(&wrong_city, &weather_conversation()).unwrap().passed);
    }

    #[test]
    fn content_handlers() {
        let include = assertion("content_includes_any", json!({"patterns": ["72°F", "sunny"]}));
        assert!(run(&include, &weather_conversation()).unwrap().passed);

        let exclude = assertion("content_excludes", json!({"patterns": ["password"]}));
        assert!(run(&exclude, &weather_conversation()).unwrap().passed);

        let exclude_hit = assertion("content_excludes", json!({"patterns": ["72°F"]}));
        assert!(!run(&exclude_hit, &weather_conversation()).unwrap().passed);
    }

    #[test]
    fn unknown_assertion_fails_without_error() {
        let def = assertion("checks_latency", json!({}));
        let outcome = run(&def, &weather_conversation()).unwrap();
        assert!(!outcome.passed);
        assert_eq!(outcome.score, Some(0.0));
    }

    #[test]
    fn missing_handler_param_fails_without_error() {
        let def = assertion("tools_called", json!({}));
        let outcome = run(&def, &weather_conversation()).unwrap();
        assert!(!outcome.passed);
        assert_eq!(outcome.score, Some(0.0));
    }

    #[test]
    fn missing_assertion_type_is_hard_error() {
        let def: EvalDefinition = serde_json::from_value(json!({
            "id": "a1", "type": "arena_assertion", "params": {}
        }))
        .unwrap();
        assert!(run(&def, &weather_conversation()).is_err());
    }
}

//! Session and message DTOs fetched from the session service.
//!
//! The worker is a reader of this data, never the owner. Tool invocations
//! travel as regular messages whose `metadata.type` marks them as
//! `tool_call` / `tool_result`, with the invocation JSON in `content`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `metadata.type` values that mark tool traffic.
pub mod message_meta {
    pub const TYPE_KEY: &str = "type";
    pub const TOOL_CALL: &str = "tool_call";
    pub const TOOL_RESULT: &str = "tool_result";
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A conversational-agent session as stored by the session service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    #[serde(default)]
    pub agent_name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub prompt_pack_name: String,
    #[serde(default)]
    pub prompt_pack_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_input_tokens: u64,
    #[serde(default)]
    pub total_output_tokens: u64,
    #[serde(default)]
    pub total_messages: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The role a message was produced under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

/// One message in a session transcript.
///
/// `content` is opaque text; for tool traffic it carries the invocation as
/// JSON (`{"name":…,"arguments":…}`) or the result body. Every
/// `tool_result` references an earlier `tool_call` via `tool_call_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Message {
    pub fn is_assistant(&self) -> bool {
        self.role == MessageRole::Assistant
    }

    /// Whether this message carries a tool invocation payload.
    pub fn is_tool_call(&self) -> bool {
        self.metadata.get(message_meta::TYPE_KEY).map(String::as_str)
            == Some(message_meta::TOOL_CALL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_wire_names_are_lowercase() {
        assert_eq!(serde_json::to_string(&MessageRole::Assistant).unwrap(), "\"assistant\"");
        assert_eq!(serde_json::to_string(&MessageRole::Tool).unwrap(), "\"tool\"");
    }

    #[test]
    fn message_defaults_fill_missing_fields() {
        let msg: Message =
            serde_json::from_str(r#"{"id":"m1","role":"assistant","content":"hi"}"#).unwrap();
        assert!(msg.is_assistant());
        assert!(!msg.is_tool_call());
        assert_eq!(msg.input_tokens, 0);
        assert!(msg.metadata.is_empty());
    }

    #[test]
    fn tool_call_detected_from_metadata() {
        let msg: Message = serde_json::from_str(
            r#"{"id":"m1","role":"assistant",
                "content":"{\"name\":\"get_weather\",\"arguments\":{\"city\":\"NYC\"}}",
                "metadata":{"type":"tool_call"}}"#,
        )
        .unwrap();
        assert!(msg.is_tool_call());
    }
}

//! Session events consumed from the stream broker.
//!
//! Each broker message carries one JSON-encoded [`SessionEvent`] under its
//! `payload` field. Events are classified into exactly one of three classes;
//! unknown event types are valid input and classify as [`EventClass::Ignored`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Well-known `eventType` values on the wire.
pub mod event_type {
    pub const ASSISTANT_MESSAGE: &str = "message.assistant";
    pub const USER_MESSAGE: &str = "message.user";
    pub const SESSION_COMPLETED: &str = "session.completed";
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SessionEvent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One session event as published by the session service.
///
/// Fields the publisher does not know yet (e.g. `messageId` on a
/// `session.completed` event) arrive as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEvent {
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub agent_name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub message_role: String,
    #[serde(default)]
    pub prompt_pack_name: String,
    #[serde(default)]
    pub prompt_pack_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// What the worker should do with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
    /// An assistant turn finished; per-turn evals may apply.
    AssistantMessage,
    /// The session ended explicitly; end-of-session evals fire.
    SessionCompleted,
    /// Everything else. Acknowledged and dropped.
    Ignored,
}

impl SessionEvent {
    /// Classify this event. Pure; unknown `eventType` values are `Ignored`.
    pub fn classify(&self) -> EventClass {
        match self.event_type.as_str() {
            event_type::ASSISTANT_MESSAGE if self.message_role == "assistant" => {
                EventClass::AssistantMessage
            }
            event_type::SESSION_COMPLETED => EventClass::SessionCompleted,
            _ => EventClass::Ignored,
        }
    }
}

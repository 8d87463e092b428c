//! Envelope DTOs for the session-service HTTP API.
//!
//! Every response wraps its payload in a small envelope object; field names
//! are `camelCase` on the wire.

use serde::{Deserialize, Serialize};

use omnia_domain::evals::EvalResult;
use omnia_domain::session::{Message, Session};

/// GET /api/v1/sessions/{id} — response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEnvelope {
    pub session: Session,
}

/// GET /api/v1/sessions/{id}/messages — response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesEnvelope {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub has_more: bool,
}

/// GET /api/v1/eval-results and /api/v1/sessions/{id}/eval-results —
/// response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsEnvelope {
    #[serde(default)]
    pub results: Vec<EvalResult>,
}

/// Filters for GET /api/v1/eval-results.
#[derive(Debug, Clone, Default)]
pub struct RecentResultsQuery {
    pub namespace: String,
    pub agent_name: String,
    pub eval_id: String,
    pub limit: usize,
}

impl RecentResultsQuery {
    /// Render as URL query pairs (the API uses camelCase parameter names).
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if !self.namespace.is_empty() {
            pairs.push(("namespace", self.namespace.clone()));
        }
        if !self.agent_name.is_empty() {
            pairs.push(("agent", self.agent_name.clone()));
        }
        if !self.eval_id.is_empty() {
            pairs.push(("evalId", self.eval_id.clone()));
        }
        if self.limit > 0 {
            pairs.push(("limit", self.limit.to_string()));
        }
        pairs
    }
}

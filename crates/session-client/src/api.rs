//! The `SessionApi` trait defines the interface to the session service
//! (REST in production, in-memory doubles in tests).

use async_trait::async_trait;
use omnia_domain::error::Result;
use omnia_domain::evals::EvalResult;
use omnia_domain::session::{Message, Session};

use crate::types::RecentResultsQuery;

/// Abstraction over the session-service API surface the worker needs.
///
/// Implementations must be safe for concurrent use; one instance is shared
/// across all worker tasks.
#[async_trait]
pub trait SessionApi: Send + Sync {
    /// Fetch session metadata (GET /api/v1/sessions/{id}).
    async fn get_session(&self, session_id: &str) -> Result<Session>;

    /// Fetch the session transcript (GET /api/v1/sessions/{id}/messages).
    async fn get_messages(&self, session_id: &str) -> Result<Vec<Message>>;

    /// Persist a batch of eval results (POST /api/v1/eval-results).
    async fn write_results(&self, results: &[EvalResult]) -> Result<()>;

    /// Query recent results across sessions (GET /api/v1/eval-results?…).
    /// Used by the webhook dispatcher to build pass-rate windows.
    async fn recent_results(&self, query: &RecentResultsQuery) -> Result<Vec<EvalResult>>;

    /// Fetch all results of one session
    /// (GET /api/v1/sessions/{id}/eval-results).
    async fn session_results(&self, session_id: &str) -> Result<Vec<EvalResult>>;
}

//! `omnia-session-client` — session-service client for the Omnia eval worker.
//!
//! Provides the [`SessionApi`] trait that abstracts over the session
//! service's HTTP API, a production REST implementation
//! ([`RestSessionClient`]) with retry + exponential back-off, and the
//! envelope DTOs the API wraps its payloads in.
//!
//! The worker is a *reader* of sessions and messages and a *writer* of eval
//! results; it never owns either.

pub mod api;
pub mod rest;
pub mod types;

pub use api::SessionApi;
pub use rest::{from_reqwest, RestSessionClient};
pub use types::{MessagesEnvelope, RecentResultsQuery, ResultsEnvelope, SessionEnvelope};

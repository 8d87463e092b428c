//! REST implementation of [`SessionApi`].
//!
//! `RestSessionClient` wraps a `reqwest::Client` and translates every trait
//! method into the corresponding HTTP call against the session service,
//! with automatic retry + exponential back-off on transient (5xx / timeout)
//! failures. 4xx responses are permanent and never retried.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use uuid::Uuid;

use omnia_domain::config::SessionServiceConfig;
use omnia_domain::error::{Error, Result};
use omnia_domain::evals::EvalResult;
use omnia_domain::session::{Message, Session};

use crate::api::SessionApi;
use crate::types::{MessagesEnvelope, RecentResultsQuery, ResultsEnvelope, SessionEnvelope};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A REST client for the session service.
///
/// Created once and reused for the lifetime of the worker process. The
/// underlying `reqwest::Client` maintains a connection pool.
#[derive(Debug, Clone)]
pub struct RestSessionClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    max_retries: u32,
}

impl RestSessionClient {
    /// Build a new client from the shared [`SessionServiceConfig`].
    pub fn new(cfg: &SessionServiceConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_owned(),
            api_key: cfg.api_key.clone(),
            max_retries: cfg.max_retries,
        })
    }

    // ── request helpers ──────────────────────────────────────────────

    /// Decorate a `RequestBuilder` with the standard worker headers.
    fn decorate(&self, rb: RequestBuilder) -> RequestBuilder {
        let trace_id = Uuid::new_v4().to_string();
        let mut rb = rb
            .header("X-Client-Type", "omnia-eval-worker")
            .header("X-Trace-Id", &trace_id);

        if let Some(ref key) = self.api_key {
            rb = rb.header("X-Api-Key", key);
        }
        rb
    }

    /// Build the full URL for a path like `/api/v1/sessions/s1`.
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    // ── retry engine ─────────────────────────────────────────────────

    /// Execute a request with retry + exponential back-off on transient
    /// errors.
    ///
    /// * Retries on 5xx status codes and on timeouts / connection errors.
    /// * Does **not** retry on 4xx (client errors are permanent).
    async fn execute_with_retry(
        &self,
        endpoint: &str,
        build_request: impl Fn() -> RequestBuilder,
    ) -> Result<Response> {
        let mut last_err: Option<Error> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = Duration::from_millis(100 * 2u64.pow(attempt - 1));
                tokio::time::sleep(backoff).await;
            }

            let start = Instant::now();
            let rb = self.decorate(build_request());
            let result = rb.send().await;
            let duration_ms = start.elapsed().as_millis() as u64;

            match result {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    tracing::debug!(endpoint, status, duration_ms, "session service call");

                    if resp.status().is_server_error() {
                        // 5xx — transient, retry
                        let body = resp.text().await.unwrap_or_default();
                        last_err = Some(Error::SessionService(format!(
                            "{endpoint} returned {status}: {body}"
                        )));
                        continue;
                    }

                    if resp.status().is_client_error() {
                        // 4xx — permanent, do NOT retry
                        let body = resp.text().await.unwrap_or_default();
                        return Err(Error::SessionService(format!(
                            "{endpoint} returned {status}: {body}"
                        )));
                    }

                    return Ok(resp);
                }
                Err(e) => {
                    tracing::debug!(endpoint, duration_ms, error = %e, "session service call failed");
                    last_err = Some(from_reqwest(e));
                    // Timeouts and connection errors are transient — retry
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| Error::SessionService(format!("{endpoint}: all retries exhausted"))))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        let resp = self
            .execute_with_retry(path, || self.http.get(&url))
            .await?;
        resp.json::<T>()
            .await
            .map_err(|e| Error::SessionService(format!("{path}: decoding response: {e}")))
    }
}

/// Map a `reqwest::Error` to the shared error type.
pub fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait]
impl SessionApi for RestSessionClient {
    async fn get_session(&self, session_id: &str) -> Result<Session> {
        let envelope: SessionEnvelope = self
            .get_json(&format!("/api/v1/sessions/{session_id}"))
            .await?;
        Ok(envelope.session)
    }

    async fn get_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        let envelope: MessagesEnvelope = self
            .get_json(&format!("/api/v1/sessions/{session_id}/messages"))
            .await?;
        if envelope.has_more {
            // The service caps one page; evals run over what we got.
            tracing::debug!(session_id, fetched = envelope.messages.len(), "transcript truncated");
        }
        Ok(envelope.messages)
    }

    async fn write_results(&self, results: &[EvalResult]) -> Result<()> {
        if results.is_empty() {
            return Ok(());
        }
        let path = "/api/v1/eval-results";
        let url = self.url(path);
        self.execute_with_retry(path, || self.http.post(&url).json(results))
            .await?;
        Ok(())
    }

    async fn recent_results(&self, query: &RecentResultsQuery) -> Result<Vec<EvalResult>> {
        let path = "/api/v1/eval-results";
        let url = self.url(path);
        let pairs = query.to_pairs();
        let envelope: ResultsEnvelope = self
            .execute_with_retry(path, || self.http.get(&url).query(&pairs))
            .await?
            .json()
            .await
            .map_err(|e| Error::SessionService(format!("{path}: decoding response: {e}")))?;
        Ok(envelope.results)
    }

    async fn session_results(&self, session_id: &str) -> Result<Vec<EvalResult>> {
        let envelope: ResultsEnvelope = self
            .get_json(&format!("/api/v1/sessions/{session_id}/eval-results"))
            .await?;
        Ok(envelope.results)
    }
}

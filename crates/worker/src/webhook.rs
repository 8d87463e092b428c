//! Pass-rate webhook alerts.
//!
//! After results are written, recent results for the affected eval are
//! replayed against every configured webhook: if the windowed pass rate
//! drops below the threshold (or enough trailing failures pile up), the
//! dispatcher POSTs an alert. A per-(eval, url) rate limit keeps a flapping
//! eval from spamming the target, and one misbehaving config never blocks
//! the others.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use reqwest::Client;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use omnia_domain::config::WebhookConfig;
use omnia_domain::error::{Error, Result};
use omnia_domain::evals::EvalResult;

const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const ALERT_RATE_LIMIT: Duration = Duration::from_secs(60);
const MAX_RECENT_FAILURES: usize = 5;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Payload
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertPayload {
    pub agent_name: String,
    pub namespace: String,
    pub eval_id: String,
    pub current_pass_rate: f64,
    pub threshold: f64,
    pub window_size: usize,
    pub triggered_at: chrono::DateTime<chrono::Utc>,
    pub recent_failures: Vec<FailureSample>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureSample {
    pub session_id: String,
    pub message_id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Window math
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fraction of passing results. An empty window counts as fully passing,
/// so it can never trigger an alert.
pub fn pass_rate(window: &[&EvalResult]) -> f64 {
    if window.is_empty() {
        return 1.0;
    }
    let passed = window.iter().filter(|r| r.passed).count();
    passed as f64 / window.len() as f64
}

/// Failures counted from the window tail backwards until the first pass.
pub fn trailing_failures(window: &[&EvalResult]) -> usize {
    window.iter().rev().take_while(|r| !r.passed).count()
}

fn should_fire(config: &WebhookConfig, window: &[&EvalResult]) -> bool {
    pass_rate(window) < config.threshold
        || (config.consecutive_fails > 0 && trailing_failures(window) >= config.consecutive_fails)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatcher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct WebhookDispatcher {
    http: Client,
    configs: Vec<WebhookConfig>,
    /// (eval_id, url) → last successful fire time.
    last_fired: Mutex<HashMap<(String, String), Instant>>,
}

impl WebhookDispatcher {
    pub fn new(configs: Vec<WebhookConfig>) -> Self {
        Self {
            http: Client::new(),
            configs,
            last_fired: Mutex::new(HashMap::new()),
        }
    }

    /// The largest configured window — how many recent results are worth
    /// fetching before a dispatch.
    pub fn max_window(&self) -> usize {
        self.configs.iter().map(|c| c.window_size).max().unwrap_or(0)
    }

    pub fn has_configs(&self) -> bool {
        !self.configs.is_empty()
    }

    /// Evaluate every config against the recent results of one eval.
    /// Errors in one config are logged and never inhibit the next.
    pub async fn dispatch(
        &self,
        cancel: &CancellationToken,
        eval_id: &str,
        agent_name: &str,
        namespace: &str,
        recent: &[EvalResult],
    ) {
        for config in &self.configs {
            if let Err(e) = self
                .dispatch_one(cancel, config, eval_id, agent_name, namespace, recent)
                .await
            {
                tracing::warn!(
                    eval_id,
                    url = %config.url,
                    error = %e,
                    "webhook dispatch failed"
                );
            }
        }
    }

    async fn dispatch_one(
        &self,
        cancel: &CancellationToken,
        config: &WebhookConfig,
        eval_id: &str,
        agent_name: &str,
        namespace: &str,
        recent: &[EvalResult],
    ) -> Result<()> {
        let for_eval: Vec<&EvalResult> =
            recent.iter().filter(|r| r.eval_id == eval_id).collect();
        let window_start = for_eval.len().saturating_sub(config.window_size);
        let window = &for_eval[window_start..];

        if !should_fire(config, window) {
            return Ok(());
        }

        if self.is_rate_limited(eval_id, &config.url) {
            tracing::debug!(eval_id, url = %config.url, "alert suppressed by rate limit");
            return Ok(());
        }

        let failures: Vec<FailureSample> = window
            .iter()
            .filter(|r| !r.passed)
            .rev()
            .take(MAX_RECENT_FAILURES)
            .map(|r| FailureSample {
                session_id: r.session_id.clone(),
                message_id: r.message_id.clone(),
                created_at: r.created_at,
            })
            .collect();

        let payload = AlertPayload {
            agent_name: agent_name.to_owned(),
            namespace: namespace.to_owned(),
            eval_id: eval_id.to_owned(),
            current_pass_rate: pass_rate(window),
            threshold: config.threshold,
            window_size: config.window_size,
            triggered_at: chrono::Utc::now(),
            recent_failures: failures,
        };

        self.post_with_retries(cancel, config, &payload).await?;
        self.record_fired(eval_id, &config.url);
        tracing::info!(
            eval_id,
            url = %config.url,
            pass_rate = payload.current_pass_rate,
            "webhook alert fired"
        );
        Ok(())
    }

    /// POST with up to [`MAX_ATTEMPTS`] tries and doubling backoff.
    /// Any non-2xx response is retryable; cancellation aborts between
    /// attempts.
    async fn post_with_retries(
        &self,
        cancel: &CancellationToken,
        config: &WebhookConfig,
        payload: &AlertPayload,
    ) -> Result<()> {
        let mut backoff = INITIAL_BACKOFF;
        let mut last_err = Error::Http("no attempts made".into());

        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff *= 2;
            }

            let mut request = self.http.post(&config.url).json(payload);
            for (name, value) in &config.headers {
                request = request.header(name, value);
            }

            match request.send().await {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => {
                    last_err = Error::Http(format!(
                        "{} returned {}",
                        config.url,
                        resp.status().as_u16()
                    ));
                }
                Err(e) => {
                    last_err = Error::Http(format!("{}: {e}", config.url));
                }
            }
        }
        Err(last_err)
    }

    fn is_rate_limited(&self, eval_id: &str, url: &str) -> bool {
        self.last_fired
            .lock()
            .get(&(eval_id.to_owned(), url.to_owned()))
            .is_some_and(|at| at.elapsed() < ALERT_RATE_LIMIT)
    }

    fn record_fired(&self, eval_id: &str, url: &str) {
        self.last_fired
            .lock()
            .insert((eval_id.to_owned(), url.to_owned()), Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn result(eval_id: &str, passed: bool) -> EvalResult {
        EvalResult {
            session_id: "s1".into(),
            message_id: "m1".into(),
            agent_name: "bot".into(),
            namespace: "prod".into(),
            prompt_pack_name: "pack".into(),
            prompt_pack_version: "v1".into(),
            eval_id: eval_id.into(),
            eval_type: "contains".into(),
            trigger: Default::default(),
            passed,
            score: None,
            details: String::new(),
            duration_ms: None,
            source: "worker".into(),
            created_at: Utc::now(),
        }
    }

    fn config(threshold: f64, window_size: usize, consecutive_fails: usize) -> WebhookConfig {
        WebhookConfig {
            url: "https://alerts.example.com/hook".into(),
            threshold,
            window_size,
            consecutive_fails,
            headers: HashMap::new(),
        }
    }

    #[test]
    fn empty_window_passes_fully() {
        assert_eq!(pass_rate(&[]), 1.0);
        assert!(!should_fire(&config(0.8, 5, 0), &[]));
    }

    #[test]
    fn pass_rate_is_fraction_of_passes() {
        let results = [result("e1", true), result("e1", false)];
        let window: Vec<&EvalResult> = results.iter().collect();
        assert_eq!(pass_rate(&window), 0.5);
    }

    #[test]
    fn trailing_failures_stop_at_first_pass() {
        let results = [
            result("e1", false),
            result("e1", true),
            result("e1", false),
            result("e1", false),
        ];
        let window: Vec<&EvalResult> = results.iter().collect();
        assert_eq!(trailing_failures(&window), 2);
    }

    #[test]
    fn threshold_breach_fires() {
        // pass rate 0.4 < 0.8
        let results = [
            result("e1", true),
            result("e1", false),
            result("e1", false),
            result("e1", false),
            result("e1", true),
        ];
        let window: Vec<&EvalResult> = results.iter().collect();
        assert!(should_fire(&config(0.8, 5, 0), &window));
        assert!(!should_fire(&config(0.3, 5, 0), &window));
    }

    #[test]
    fn consecutive_failures_fire_even_above_threshold() {
        let results = [
            result("e1", true),
            result("e1", true),
            result("e1", true),
            result("e1", false),
            result("e1", false),
        ];
        let window: Vec<&EvalResult> = results.iter().collect();
        // pass rate 0.6 is fine for threshold 0.5, but two trailing fails trip it.
        assert!(!should_fire(&config(0.5, 5, 0), &window));
        assert!(should_fire(&config(0.5, 5, 2), &window));
    }

    #[test]
    fn rate_limit_bookkeeping() {
        let dispatcher = WebhookDispatcher::new(vec![config(0.8, 5, 0)]);
        assert!(!dispatcher.is_rate_limited("e1", "u"));
        dispatcher.record_fired("e1", "u");
        assert!(dispatcher.is_rate_limited("e1", "u"));
        // Distinct pairs are independent.
        assert!(!dispatcher.is_rate_limited("e2", "u"));
        assert!(!dispatcher.is_rate_limited("e1", "v"));
    }

    #[test]
    fn max_window_spans_configs() {
        let dispatcher = WebhookDispatcher::new(vec![config(0.8, 5, 0), config(0.9, 50, 0)]);
        assert_eq!(dispatcher.max_window(), 50);
        assert!(dispatcher.has_configs());
    }

    #[test]
    fn payload_serializes_camel_case() {
        let payload = AlertPayload {
            agent_name: "bot".into(),
            namespace: "prod".into(),
            eval_id: "e1".into(),
            current_pass_rate: 0.4,
            threshold: 0.8,
            window_size: 5,
            triggered_at: Utc::now(),
            recent_failures: vec![FailureSample {
                session_id: "s1".into(),
                message_id: "m1".into(),
                created_at: Utc::now(),
            }],
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"currentPassRate\":0.4"));
        assert!(json.contains("\"windowSize\":5"));
        assert!(json.contains("\"recentFailures\""));
    }
}

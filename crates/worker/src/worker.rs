//! The eval worker core loop.
//!
//! One worker process is scoped to a namespace. It joins the consumer
//! group `omnia-eval-workers-<namespace>`, block-reads event batches,
//! and for each event: classifies it, tracks session activity or
//! completion, loads the prompt pack's evals, gates them through sampling
//! and rate limiting, dispatches them, persists the results, and ACKs.
//!
//! Ack policy: a message is ACKed when processing succeeded *or* when its
//! payload is poison (unparseable — redelivery cannot help). Transient
//! failures (session fetch, result write) leave the message pending so
//! the broker redelivers it.

use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use omnia_domain::config::Config;
use omnia_domain::error::Result;
use omnia_domain::evals::{EvalDefinition, EvalResult, EvalTrigger, PromptPackEvals,
    RESULT_SOURCE_WORKER};
use omnia_domain::event::{EventClass, SessionEvent};
use omnia_domain::session::{Message, Session};
use omnia_evals::{CostCalculator, EvalDispatcher, EvalOutcome};
use omnia_packs::{filter_evals_by_trigger, PackLoader};
use omnia_session_client::{RecentResultsQuery, SessionApi};

use crate::broker::{StreamConsumer, StreamMessage, PAYLOAD_FIELD};
use crate::budget::BudgetTracker;
use crate::completion::CompletionTracker;
use crate::metrics::{EvalStatus, MetricsRecorder};
use crate::rate_limit::RateLimiter;
use crate::sampler::Sampler;
use crate::webhook::WebhookDispatcher;

/// Consumer-group name for a namespace. Shared by every replica scoped to
/// it; the broker load-balances pending messages across their consumers.
pub fn consumer_group(namespace: &str) -> String {
    format!("omnia-eval-workers-{namespace}")
}

/// Unique-per-process consumer name: hostname plus a random suffix.
fn consumer_name() -> String {
    let host = gethostname::gethostname().to_string_lossy().into_owned();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{host}-{}", &suffix[..8])
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Construction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Shared collaborators handed to the worker at construction.
pub struct WorkerHandles {
    pub broker: Arc<dyn StreamConsumer>,
    pub session_api: Arc<dyn SessionApi>,
    /// `None` runs the worker without evals (events are still tracked and
    /// acknowledged) — the safety path for unconfigured deployments.
    pub pack_loader: Option<Arc<PackLoader>>,
    pub dispatcher: Arc<EvalDispatcher>,
    pub budget: Arc<BudgetTracker>,
    pub cost: Arc<CostCalculator>,
    pub webhooks: Option<Arc<WebhookDispatcher>>,
    pub metrics: Arc<MetricsRecorder>,
}

pub struct EvalWorker {
    broker: Arc<dyn StreamConsumer>,
    session_api: Arc<dyn SessionApi>,
    pack_loader: Option<Arc<PackLoader>>,
    dispatcher: Arc<EvalDispatcher>,
    budget: Arc<BudgetTracker>,
    cost: Arc<CostCalculator>,
    webhooks: Option<Arc<WebhookDispatcher>>,
    metrics: Arc<MetricsRecorder>,
    sampler: Sampler,
    rate_limiter: RateLimiter,
    tracker: Arc<CompletionTracker>,
    namespace: String,
    group: String,
    consumer: String,
    streams: Vec<String>,
    batch_size: usize,
    block_time: Duration,
    sweep_interval: Duration,
}

impl EvalWorker {
    pub fn new(handles: WorkerHandles, config: &Config) -> Arc<Self> {
        let namespace = config.worker.namespace.clone();
        let worker = Arc::new(Self {
            broker: handles.broker,
            session_api: handles.session_api,
            pack_loader: handles.pack_loader,
            dispatcher: handles.dispatcher,
            budget: handles.budget,
            cost: handles.cost,
            webhooks: handles.webhooks,
            metrics: handles.metrics,
            sampler: Sampler::new(&config.sampling),
            rate_limiter: RateLimiter::new(&config.rate_limit),
            tracker: Arc::new(CompletionTracker::new(
                config.session_completion.inactivity_timeout(),
            )),
            group: consumer_group(&namespace),
            consumer: consumer_name(),
            namespace,
            streams: config.broker.streams.clone(),
            batch_size: config.broker.batch_size,
            block_time: config.broker.block_time(),
            sweep_interval: config.session_completion.sweep_interval(),
        });
        worker.install_completion_callback();
        worker
    }

    /// Wire the completion tracker back into this worker. A weak reference
    /// keeps the tracker from pinning the worker alive.
    fn install_completion_callback(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.tracker.set_on_complete(Arc::new(move |cancel, session_id| {
            let weak = weak.clone();
            Box::pin(async move {
                match weak.upgrade() {
                    Some(worker) => worker.on_session_complete(cancel, &session_id).await,
                    None => Ok(()),
                }
            })
        }));
    }

    /// The completion tracker (exposed for tests and introspection).
    pub fn tracker(&self) -> &Arc<CompletionTracker> {
        &self.tracker
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Main loop
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Run until the token is cancelled. In-flight processing finishes to
    /// its natural conclusion; no new reads are issued after cancellation.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> Result<()> {
        for stream in &self.streams {
            self.broker.ensure_group(stream, &self.group).await?;
        }

        let sweeper = tokio::spawn(self.clone().run_sweeper(cancel.clone()));
        tracing::info!(
            namespace = %self.namespace,
            group = %self.group,
            consumer = %self.consumer,
            streams = ?self.streams,
            "eval worker started"
        );

        'main: while !cancel.is_cancelled() {
            for stream in &self.streams {
                let read = tokio::select! {
                    _ = cancel.cancelled() => break 'main,
                    read = self.broker.read_batch(
                        stream,
                        &self.group,
                        &self.consumer,
                        self.batch_size,
                        self.block_time,
                    ) => read,
                };

                let batch = match read {
                    Ok(batch) => batch,
                    Err(e) => {
                        tracing::warn!(stream, error = %e, "stream read failed");
                        tokio::select! {
                            _ = cancel.cancelled() => break 'main,
                            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                        }
                        continue;
                    }
                };

                for message in batch {
                    self.handle_message(&cancel, stream, message).await;
                }

                match self.broker.pending_count(stream, &self.group).await {
                    Ok(lag) => self.metrics.set_stream_lag(stream, lag as f64),
                    Err(e) => tracing::debug!(stream, error = %e, "lag probe failed"),
                }
            }
        }

        tracing::info!("eval worker shutting down");
        let _ = sweeper.await;
        Ok(())
    }

    async fn run_sweeper(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => self.tracker.check_inactive(&cancel).await,
            }
        }
    }

    /// Parse and process one broker message, then apply the ack policy.
    async fn handle_message(
        &self,
        cancel: &CancellationToken,
        stream: &str,
        message: StreamMessage,
    ) {
        let started = Instant::now();

        let Some(payload) = message.fields.get(PAYLOAD_FIELD) else {
            tracing::warn!(stream_msg_id = %message.id, "message has no payload field, dropping");
            self.ack(stream, &message.id).await;
            return;
        };

        let event: SessionEvent = match serde_json::from_str(payload) {
            Ok(event) => event,
            Err(e) => {
                // Poison: redelivery cannot fix a parse failure.
                tracing::warn!(
                    stream_msg_id = %message.id,
                    error = %e,
                    "unparseable event payload, dropping"
                );
                self.ack(stream, &message.id).await;
                return;
            }
        };

        self.metrics.record_event_received(&event.event_type);

        match self.process_event(cancel, &event).await {
            Ok(()) => {
                self.metrics
                    .record_event_processing(&event.event_type, started.elapsed());
                self.ack(stream, &message.id).await;
            }
            Err(e) => {
                // No ACK — the broker redelivers the message.
                tracing::warn!(
                    session_id = %event.session_id,
                    stream_msg_id = %message.id,
                    error = %e,
                    "event processing failed, leaving message pending"
                );
            }
        }
    }

    async fn ack(&self, stream: &str, message_id: &str) {
        if let Err(e) = self.broker.ack(stream, &self.group, message_id).await {
            // Redelivery of an already-processed event is safe: result
            // writes are idempotent at the store.
            tracing::warn!(stream_msg_id = %message_id, error = %e, "ack failed");
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Event processing
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Process one classified event. `Ok` means the message may be ACKed.
    pub async fn process_event(
        &self,
        cancel: &CancellationToken,
        event: &SessionEvent,
    ) -> Result<()> {
        match event.classify() {
            EventClass::Ignored => Ok(()),
            EventClass::AssistantMessage => self.process_assistant_message(cancel, event).await,
            EventClass::SessionCompleted => {
                self.tracker.mark_completed(cancel, &event.session_id).await
            }
        }
    }

    async fn process_assistant_message(
        &self,
        cancel: &CancellationToken,
        event: &SessionEvent,
    ) -> Result<()> {
        self.tracker.record_activity(&event.session_id);

        let Some(pack) = self
            .load_pack_evals(&event.prompt_pack_name, &event.prompt_pack_version)
            .await
        else {
            return Ok(());
        };
        let per_turn = filter_evals_by_trigger(&pack.evals, Some(EvalTrigger::PerTurn));
        if per_turn.is_empty() {
            return Ok(());
        }

        // Transient fetch failures propagate: the event must stay unacked.
        let session = self.session_api.get_session(&event.session_id).await?;
        let messages = self.session_api.get_messages(&event.session_id).await?;
        let turn_index = assistant_turns(&messages);

        let results = self
            .run_evals_with_sampling(cancel, &per_turn, &messages, event, &session, turn_index)
            .await;
        self.persist_and_alert(cancel, results).await
    }

    /// End-of-session evals, reached from the completion tracker on either
    /// the explicit or the inactivity route. Tracker state for the session
    /// is erased on every exit so a redelivered completion can start over.
    async fn on_session_complete(
        &self,
        cancel: CancellationToken,
        session_id: &str,
    ) -> Result<()> {
        let outcome = self.run_session_complete(&cancel, session_id).await;
        self.tracker.cleanup(session_id);
        outcome
    }

    async fn run_session_complete(
        &self,
        cancel: &CancellationToken,
        session_id: &str,
    ) -> Result<()> {
        tracing::info!(session_id, "running end-of-session evals");

        let session = self.session_api.get_session(session_id).await?;
        let Some(pack) = self
            .load_pack_evals(&session.prompt_pack_name, &session.prompt_pack_version)
            .await
        else {
            return Ok(());
        };
        let on_complete =
            filter_evals_by_trigger(&pack.evals, Some(EvalTrigger::OnSessionComplete));
        if on_complete.is_empty() {
            return Ok(());
        }

        let messages = self.session_api.get_messages(session_id).await?;
        let turn_index = assistant_turns(&messages);

        // Synthesize the event identity for result stamping; completion may
        // have been inferred from inactivity, with no event to hand.
        let event = SessionEvent {
            event_type: omnia_domain::event::event_type::SESSION_COMPLETED.into(),
            session_id: session_id.to_owned(),
            agent_name: session.agent_name.clone(),
            namespace: session.namespace.clone(),
            prompt_pack_name: session.prompt_pack_name.clone(),
            prompt_pack_version: session.prompt_pack_version.clone(),
            ..Default::default()
        };

        let results = self
            .run_evals_with_sampling(cancel, &on_complete, &messages, &event, &session, turn_index)
            .await;
        self.persist_and_alert(cancel, results).await
    }

    /// Load pack evals, treating every failure as "no evals available".
    async fn load_pack_evals(
        &self,
        pack_name: &str,
        pack_version: &str,
    ) -> Option<PromptPackEvals> {
        let loader = self.pack_loader.as_ref()?;
        if pack_name.is_empty() {
            return None;
        }
        match loader
            .load_evals(&self.namespace, pack_name, pack_version)
            .await
        {
            Ok(pack) => Some(pack),
            Err(e) => {
                tracing::warn!(
                    namespace = %self.namespace,
                    pack = pack_name,
                    error = %e,
                    "pack evals unavailable, skipping"
                );
                None
            }
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Eval pipeline
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Run the filtered definitions through sampling, rate limiting, and
    /// dispatch. One failing eval never stops the rest; cancellation does,
    /// but results already produced stand.
    async fn run_evals_with_sampling(
        &self,
        cancel: &CancellationToken,
        defs: &[EvalDefinition],
        messages: &[Message],
        event: &SessionEvent,
        session: &Session,
        turn_index: usize,
    ) -> Vec<EvalResult> {
        let mut results = Vec::new();

        if self.budget.is_paused(&self.namespace) {
            tracing::debug!(namespace = %self.namespace, "budget paused, skipping evals");
            for def in defs {
                self.metrics.record_eval_executed(
                    &def.eval_type,
                    def.trigger,
                    EvalStatus::Skipped,
                    Duration::ZERO,
                );
            }
            return results;
        }

        for def in defs {
            let is_judge = def.is_llm_judge();
            let sampled = self
                .sampler
                .should_sample(&event.session_id, turn_index, is_judge);
            self.metrics.record_sampling_decision(&def.eval_type, sampled);
            if !sampled {
                continue;
            }

            let acquired = if is_judge {
                self.rate_limiter.acquire_judge(cancel).await
            } else {
                self.rate_limiter.acquire(cancel).await
            };
            if acquired.is_err() {
                tracing::debug!(
                    session_id = %event.session_id,
                    eval_id = %def.id,
                    "rate-limit acquire cancelled, terminating pipeline"
                );
                break;
            }

            let dispatched = self.dispatcher.dispatch(def, messages).await;
            if is_judge {
                self.rate_limiter.release_judge();
            }

            match dispatched {
                Ok(outcome) => {
                    self.metrics.record_eval_executed(
                        &def.eval_type,
                        def.trigger,
                        EvalStatus::Success,
                        Duration::from_millis(outcome.duration_ms),
                    );
                    if is_judge {
                        self.record_judge_spend(&outcome);
                    }
                    results.push(self.normalize(def, outcome, event, session));
                }
                Err(e) => {
                    self.metrics.record_eval_executed(
                        &def.eval_type,
                        def.trigger,
                        EvalStatus::Error,
                        Duration::ZERO,
                    );
                    tracing::warn!(
                        session_id = %event.session_id,
                        eval_id = %def.id,
                        error = %e,
                        "eval failed"
                    );
                }
            }
        }

        results
    }

    fn record_judge_spend(&self, outcome: &EvalOutcome) {
        let Some(usage) = &outcome.usage else { return };
        let cost = self.cost.calculate(
            &usage.provider,
            &usage.model,
            usage.input_tokens,
            usage.output_tokens,
        );
        if cost > 0.0 {
            self.budget.record_spend(&self.namespace, cost);
        }
    }

    /// Stamp an outcome into a persistable result row.
    fn normalize(
        &self,
        def: &EvalDefinition,
        outcome: EvalOutcome,
        event: &SessionEvent,
        session: &Session,
    ) -> EvalResult {
        EvalResult {
            session_id: event.session_id.clone(),
            message_id: event.message_id.clone(),
            agent_name: non_empty(&session.agent_name, &event.agent_name),
            namespace: non_empty(&session.namespace, &self.namespace),
            prompt_pack_name: event.prompt_pack_name.clone(),
            prompt_pack_version: event.prompt_pack_version.clone(),
            eval_id: def.id.clone(),
            eval_type: def.eval_type.clone(),
            trigger: def.trigger,
            passed: outcome.passed,
            score: outcome.score,
            details: outcome.details.to_string(),
            duration_ms: Some(outcome.duration_ms),
            source: RESULT_SOURCE_WORKER.into(),
            created_at: chrono::Utc::now(),
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Persistence & alerting
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Write results, then hand the affected evals to the webhook
    /// dispatcher off the processing path. A write failure propagates (no
    /// ACK); webhook failures never do.
    async fn persist_and_alert(
        &self,
        cancel: &CancellationToken,
        results: Vec<EvalResult>,
    ) -> Result<()> {
        if results.is_empty() {
            return Ok(());
        }

        let count = results.len();
        if let Err(e) = self.session_api.write_results(&results).await {
            self.metrics.record_results_written(count, false);
            return Err(e);
        }
        self.metrics.record_results_written(count, true);

        self.spawn_webhook_checks(cancel, results);
        Ok(())
    }

    /// Re-read the recent window for every (eval, agent, namespace) just
    /// written and run the webhook configs against it, asynchronously.
    fn spawn_webhook_checks(&self, cancel: &CancellationToken, results: Vec<EvalResult>) {
        let Some(webhooks) = self.webhooks.clone() else { return };
        if !webhooks.has_configs() {
            return;
        }
        let session_api = self.session_api.clone();
        let cancel = cancel.clone();

        tokio::spawn(async move {
            let mut seen: HashSet<(String, String, String)> = HashSet::new();
            for result in results {
                let key = (
                    result.eval_id.clone(),
                    result.agent_name.clone(),
                    result.namespace.clone(),
                );
                if !seen.insert(key) {
                    continue;
                }

                let query = RecentResultsQuery {
                    namespace: result.namespace.clone(),
                    agent_name: result.agent_name.clone(),
                    eval_id: result.eval_id.clone(),
                    limit: webhooks.max_window(),
                };
                match session_api.recent_results(&query).await {
                    Ok(recent) => {
                        webhooks
                            .dispatch(
                                &cancel,
                                &result.eval_id,
                                &result.agent_name,
                                &result.namespace,
                                &recent,
                            )
                            .await;
                    }
                    Err(e) => {
                        tracing::warn!(
                            eval_id = %result.eval_id,
                            error = %e,
                            "recent-results fetch for webhook check failed"
                        );
                    }
                }
            }
        });
    }
}

/// The effective turn index: how many assistant turns the transcript holds.
fn assistant_turns(messages: &[Message]) -> usize {
    messages.iter().filter(|m| m.is_assistant()).count()
}

fn non_empty(preferred: &str, fallback: &str) -> String {
    if preferred.is_empty() {
        fallback.to_owned()
    } else {
        preferred.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consumer_group_is_namespace_scoped() {
        assert_eq!(consumer_group("prod"), "omnia-eval-workers-prod");
    }

    #[test]
    fn consumer_names_are_unique_per_process() {
        assert_ne!(consumer_name(), consumer_name());
    }

    #[test]
    fn turn_index_counts_assistant_messages() {
        let messages: Vec<Message> = serde_json::from_value(serde_json::json!([
            {"id": "m1", "role": "user", "content": "hi"},
            {"id": "m2", "role": "assistant", "content": "hello"},
            {"id": "m3", "role": "system", "content": "tool output"},
            {"id": "m4", "role": "assistant", "content": "done"}
        ]))
        .unwrap();
        assert_eq!(assistant_turns(&messages), 2);
    }
}

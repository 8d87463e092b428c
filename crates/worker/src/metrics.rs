//! Prometheus metrics for the worker.
//!
//! One registry per process, owned here and exposed by [`crate::server`].
//! Commonly used label combinations are pre-touched at startup so the
//! exposition surface is non-empty before the first event arrives.

use std::time::Duration;

use prometheus::{
    GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

use omnia_domain::error::{Error, Result};
use omnia_domain::event::event_type;
use omnia_domain::evals::EvalTrigger;

/// Outcome label of one eval execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalStatus {
    Success,
    Error,
    Skipped,
}

impl EvalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvalStatus::Success => "success",
            EvalStatus::Error => "error",
            EvalStatus::Skipped => "skipped",
        }
    }
}

/// Latency buckets spanning 1 ms to 30 s.
fn duration_buckets() -> Vec<f64> {
    vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
}

/// All counters, histograms, and gauges the worker records.
pub struct MetricsRecorder {
    registry: Registry,
    events_received: IntCounterVec,
    evals_executed: IntCounterVec,
    eval_duration: HistogramVec,
    sampling_decisions: IntCounterVec,
    event_processing: HistogramVec,
    results_written: IntCounterVec,
    stream_lag: GaugeVec,
}

impl MetricsRecorder {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let events_received = IntCounterVec::new(
            Opts::new("omnia_events_received_total", "Session events consumed from the broker"),
            &["event_type"],
        )
        .map_err(metrics_err)?;

        let evals_executed = IntCounterVec::new(
            Opts::new("omnia_evals_executed_total", "Eval executions by outcome"),
            &["eval_type", "trigger", "status"],
        )
        .map_err(metrics_err)?;

        let eval_duration = HistogramVec::new(
            HistogramOpts::new("omnia_eval_duration_seconds", "Wall time of one eval execution")
                .buckets(duration_buckets()),
            &["eval_type"],
        )
        .map_err(metrics_err)?;

        let sampling_decisions = IntCounterVec::new(
            Opts::new("omnia_sampling_decisions_total", "Sampling decisions by outcome"),
            &["eval_type", "decision"],
        )
        .map_err(metrics_err)?;

        let event_processing = HistogramVec::new(
            HistogramOpts::new(
                "omnia_event_processing_seconds",
                "End-to-end processing time of one stream event",
            )
            .buckets(duration_buckets()),
            &["event_type"],
        )
        .map_err(metrics_err)?;

        let results_written = IntCounterVec::new(
            Opts::new("omnia_results_written_total", "Eval results written to the session service"),
            &["status"],
        )
        .map_err(metrics_err)?;

        let stream_lag = GaugeVec::new(
            Opts::new("omnia_stream_lag", "Unacknowledged messages pending for the consumer group"),
            &["stream"],
        )
        .map_err(metrics_err)?;

        for collector in [
            Box::new(events_received.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(evals_executed.clone()),
            Box::new(eval_duration.clone()),
            Box::new(sampling_decisions.clone()),
            Box::new(event_processing.clone()),
            Box::new(results_written.clone()),
            Box::new(stream_lag.clone()),
        ] {
            registry.register(collector).map_err(metrics_err)?;
        }

        Ok(Self {
            registry,
            events_received,
            evals_executed,
            eval_duration,
            sampling_decisions,
            event_processing,
            results_written,
            stream_lag,
        })
    }

    /// Touch the label combinations dashboards query first, so scrapes see
    /// them at zero instead of absent.
    pub fn pre_touch(&self, streams: &[String]) {
        for event in [
            event_type::ASSISTANT_MESSAGE,
            event_type::USER_MESSAGE,
            event_type::SESSION_COMPLETED,
        ] {
            self.events_received.with_label_values(&[event]);
            self.event_processing.with_label_values(&[event]);
        }
        for status in ["success", "error"] {
            self.results_written.with_label_values(&[status]);
        }
        for stream in streams {
            self.stream_lag.with_label_values(&[stream]).set(0.0);
        }
    }

    pub fn record_event_received(&self, event_type_name: &str) {
        self.events_received.with_label_values(&[event_type_name]).inc();
    }

    pub fn record_eval_executed(
        &self,
        eval_type_name: &str,
        trigger: EvalTrigger,
        status: EvalStatus,
        duration: Duration,
    ) {
        self.evals_executed
            .with_label_values(&[eval_type_name, trigger.as_str(), status.as_str()])
            .inc();
        self.eval_duration
            .with_label_values(&[eval_type_name])
            .observe(duration.as_secs_f64());
    }

    pub fn record_sampling_decision(&self, eval_type_name: &str, sampled: bool) {
        let decision = if sampled { "sampled" } else { "skipped" };
        self.sampling_decisions
            .with_label_values(&[eval_type_name, decision])
            .inc();
    }

    pub fn record_event_processing(&self, event_type_name: &str, duration: Duration) {
        self.event_processing
            .with_label_values(&[event_type_name])
            .observe(duration.as_secs_f64());
    }

    pub fn record_results_written(&self, count: usize, success: bool) {
        let status = if success { "success" } else { "error" };
        self.results_written
            .with_label_values(&[status])
            .inc_by(count as u64);
    }

    pub fn set_stream_lag(&self, stream: &str, lag: f64) {
        self.stream_lag.with_label_values(&[stream]).set(lag);
    }

    /// Render the Prometheus text exposition.
    pub fn export(&self) -> Result<String> {
        TextEncoder::new()
            .encode_to_string(&self.registry.gather())
            .map_err(metrics_err)
    }
}

fn metrics_err(e: impl std::fmt::Display) -> Error {
    Error::Other(format!("metrics: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pre_touch_makes_exposition_non_empty() {
        let metrics = MetricsRecorder::new().unwrap();
        metrics.pre_touch(&["omnia:session-events".into()]);
        let text = metrics.export().unwrap();
        assert!(text.contains("omnia_events_received_total"));
        assert!(text.contains("omnia_stream_lag"));
        assert!(text.contains("omnia:session-events"));
    }

    #[test]
    fn recorders_accept_all_statuses() {
        let metrics = MetricsRecorder::new().unwrap();
        metrics.record_event_received(event_type::ASSISTANT_MESSAGE);
        for status in [EvalStatus::Success, EvalStatus::Error, EvalStatus::Skipped] {
            metrics.record_eval_executed(
                "contains",
                EvalTrigger::PerTurn,
                status,
                Duration::from_millis(5),
            );
        }
        metrics.record_sampling_decision("llm_judge", false);
        metrics.record_event_processing(event_type::SESSION_COMPLETED, Duration::from_millis(12));
        metrics.record_results_written(3, true);
        metrics.set_stream_lag("omnia:session-events", 7.0);

        let text = metrics.export().unwrap();
        assert!(text.contains("omnia_evals_executed_total"));
        assert!(text.contains("status=\"skipped\""));
    }
}

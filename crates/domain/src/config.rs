//! Worker configuration, loaded from TOML with per-field defaults.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub session_service: SessionServiceConfig,
    #[serde(default)]
    pub packs: PacksConfig,
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub session_completion: SessionCompletionConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub server: ServerConfig,
    /// Pricing overrides layered on top of the built-in table.
    #[serde(default)]
    pub pricing: Vec<PricingEntry>,
    /// Pass-rate alert targets.
    #[serde(default)]
    pub webhooks: Vec<WebhookConfig>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Worker identity
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// The namespace this worker is scoped to. Used for consumer-group
    /// naming, budget accounting, and metrics labels.
    #[serde(default = "d_namespace")]
    pub namespace: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            namespace: d_namespace(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stream broker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "d_broker_url")]
    pub url: String,
    /// Streams the worker subscribes to.
    #[serde(default = "d_streams")]
    pub streams: Vec<String>,
    /// Max time one read blocks waiting for new entries.
    #[serde(default = "d_5000")]
    pub block_ms: u64,
    /// Max messages fetched per read.
    #[serde(default = "d_16")]
    pub batch_size: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: d_broker_url(),
            streams: d_streams(),
            block_ms: 5000,
            batch_size: 16,
        }
    }
}

impl BrokerConfig {
    pub fn block_time(&self) -> Duration {
        Duration::from_millis(self.block_ms)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session service
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionServiceConfig {
    #[serde(default = "d_session_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "d_10000")]
    pub timeout_ms: u64,
    #[serde(default = "d_3")]
    pub max_retries: u32,
}

impl Default for SessionServiceConfig {
    fn default() -> Self {
        Self {
            base_url: d_session_url(),
            api_key: None,
            timeout_ms: 10_000,
            max_retries: 3,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Prompt packs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacksConfig {
    /// When false the worker runs without a pack loader and every event
    /// resolves to "no evals".
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// Root directory holding `<namespace>/<pack>/pack.json` documents.
    #[serde(default = "d_packs_path")]
    pub path: PathBuf,
}

impl Default for PacksConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: d_packs_path(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sampling
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Percentage of turns sampled for deterministic evals (0–100).
    #[serde(default = "d_100")]
    pub default_rate: u32,
    /// Percentage of turns sampled for LLM-judge evals (0–100).
    #[serde(default = "d_10")]
    pub llm_judge_rate: u32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            default_rate: 100,
            llm_judge_rate: 10,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rate limiting
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "d_50")]
    pub max_evals_per_second: u32,
    #[serde(default = "d_5")]
    pub max_concurrent_judge_calls: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_evals_per_second: 50,
            max_concurrent_judge_calls: 5,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session completion
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCompletionConfig {
    /// Sessions silent for this long are treated as completed.
    #[serde(default = "d_300")]
    pub inactivity_timeout_secs: u64,
}

impl Default for SessionCompletionConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_secs: 300,
        }
    }
}

impl SessionCompletionConfig {
    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }

    /// Sweep at a small fraction of the timeout so detection lag stays low.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs((self.inactivity_timeout_secs / 10).max(1))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Budget
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BudgetConfig {
    /// USD ceiling on judge spend for this worker's namespace.
    /// `<= 0` disables enforcement.
    #[serde(default)]
    pub usd_limit: f64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Metrics / health server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_9090")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 9090,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pricing & webhooks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingEntry {
    pub provider: String,
    pub model: String,
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    /// Alert when the windowed pass rate drops below this value (0–1).
    #[serde(default = "d_threshold")]
    pub threshold: f64,
    /// How many recent results the pass rate is computed over.
    #[serde(default = "d_20")]
    pub window_size: usize,
    /// Also alert after this many trailing consecutive failures.
    /// `0` disables the consecutive-failure trigger.
    #[serde(default)]
    pub consecutive_fails: usize,
    /// Extra headers added to the POST (e.g. auth tokens).
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.worker.namespace.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "worker.namespace".into(),
                message: "namespace must not be empty".into(),
            });
        }

        if self.broker.streams.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "broker.streams".into(),
                message: "at least one stream must be configured".into(),
            });
        }

        if self.broker.batch_size == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "broker.batch_size".into(),
                message: "batch_size must be greater than 0".into(),
            });
        }

        if !self.session_service.base_url.starts_with("http://")
            && !self.session_service.base_url.starts_with("https://")
        {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "session_service.base_url".into(),
                message: format!(
                    "base_url must start with http:// or https:// (got \"{}\")",
                    self.session_service.base_url
                ),
            });
        }

        for (field, rate) in [
            ("sampling.default_rate", self.sampling.default_rate),
            ("sampling.llm_judge_rate", self.sampling.llm_judge_rate),
        ] {
            if rate > 100 {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Warning,
                    field: field.into(),
                    message: format!("rate {rate} exceeds 100 and will behave as 100"),
                });
            }
        }

        if self.rate_limit.max_evals_per_second == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "rate_limit.max_evals_per_second".into(),
                message: "must be greater than 0".into(),
            });
        }

        if self.rate_limit.max_concurrent_judge_calls == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "rate_limit.max_concurrent_judge_calls".into(),
                message: "must be greater than 0".into(),
            });
        }

        if self.session_completion.inactivity_timeout_secs == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "session_completion.inactivity_timeout_secs".into(),
                message: "must be greater than 0".into(),
            });
        }

        for (i, hook) in self.webhooks.iter().enumerate() {
            if !hook.url.starts_with("http://") && !hook.url.starts_with("https://") {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: format!("webhooks[{i}].url"),
                    message: format!("url must start with http:// or https:// (got \"{}\")", hook.url),
                });
            }
            if !(0.0..=1.0).contains(&hook.threshold) {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: format!("webhooks[{i}].threshold"),
                    message: format!("threshold must be in [0, 1] (got {})", hook.threshold),
                });
            }
            if hook.window_size == 0 {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Warning,
                    field: format!("webhooks[{i}].window_size"),
                    message: "window_size 0 means the pass-rate trigger never fires".into(),
                });
            }
        }

        issues
    }
}

// ── serde default helpers ────────────────────────────────────────────

fn d_namespace() -> String {
    "default".into()
}
fn d_broker_url() -> String {
    "redis://127.0.0.1:6379".into()
}
fn d_streams() -> Vec<String> {
    vec!["omnia:session-events".into()]
}
fn d_session_url() -> String {
    "http://127.0.0.1:8080".into()
}
fn d_packs_path() -> PathBuf {
    PathBuf::from("./packs")
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_true() -> bool {
    true
}
fn d_threshold() -> f64 {
    0.8
}
fn d_3() -> u32 {
    3
}
fn d_5() -> usize {
    5
}
fn d_10() -> u32 {
    10
}
fn d_16() -> usize {
    16
}
fn d_20() -> usize {
    20
}
fn d_50() -> u32 {
    50
}
fn d_100() -> u32 {
    100
}
fn d_300() -> u64 {
    300
}
fn d_5000() -> u64 {
    5000
}
fn d_9090() -> u16 {
    9090
}
fn d_10000() -> u64 {
    10_000
}
